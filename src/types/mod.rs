pub mod error;
pub mod task;
pub mod utils;

pub use error::{AgentFailure, DeckError, ErrorClassifier, FailureKind, Result};
pub use task::TaskKind;
pub use utils::{
    json_flag, json_scalar_string, json_string, log_filter_warn, preview, sha256_hex,
    write_atomic,
};
