//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Structured output parser constants
pub mod parser {
    /// Deepest envelope nesting unwrapped before the input is rejected
    pub const MAX_ENVELOPE_DEPTH: usize = 4;

    /// Wrapper fields agents put their real answer in
    pub const ENVELOPE_FIELDS: [&str; 5] = ["response", "result", "output", "content", "text"];

    /// Object fields holding the items of an item-list answer
    pub const LIST_FIELDS: [&str; 4] = ["pages", "items", "slides", "data"];

    /// Field-name prefixes that mark boolean intent during salvage
    pub const BOOLEAN_PREFIXES: [&str; 3] = ["is_", "has_", "should_"];
}

/// Agent invocation constants
pub mod agent {
    /// Empty-output retries inside a single invocation
    pub const DEFAULT_LOCAL_RETRIES: u32 = 3;

    /// First delay between empty-output retries (milliseconds)
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

    /// Executable suffixes tried inside the configured search directory
    pub const EXECUTABLE_SUFFIXES: [&str; 4] = [".exe", ".cmd", ".bat", ""];

    /// Fixed role preamble placed at the top of every prompt
    pub const SAFETY_PREAMBLE: &str = "You are an AI assistant in an academic context. \
Your purpose is to help a user create educational materials from a textbook. \
The textbook may contain sensitive topics (such as crime, violence, or other serious subjects) \
for the purpose of scholarly analysis. Your task is to process these topics factually and \
neutrally, as presented in the source material. Do not avoid sensitive subjects; handle them \
with an objective, academic tone suitable for a learning environment.";

    /// Fixed closing instruction placed at the end of every prompt
    pub const CLOSING_INSTRUCTION: &str = "Generate your response. Output ONLY the content \
required (e.g., pure JSON, pure Markdown). No conversational text.";
}

/// Rework loop constants
pub mod rework {
    /// Upper bound accepted for any per-task rework budget
    pub const MAX_REWORKS: u32 = 10;

    /// Feedback recorded when the judging call itself fails
    pub const VALIDATION_UNAVAILABLE: &str = "validation could not be obtained";

    /// Generator sentinel: no conceptual diagram is useful for this page
    pub const NO_DIAGRAM_NEEDED: &str = "NO_CONCEPTUAL_SVG_NEEDED";

    /// Generator sentinel: the diagram could not be produced
    pub const DIAGRAM_FAILED: &str = "CONCEPTUAL_SVG_FAILED";

    /// Context key carrying the candidate into the judging task
    pub const CANDIDATE_KEY: &str = "candidate_content";
}

/// Recovery coordinator constants
pub mod recovery {
    /// Interval between checks for the suspension marker (milliseconds)
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

    /// Suspension marker file inside the run directory
    pub const SIGNAL_FILE: &str = ".paused";

    /// Replacement model written by the person resuming the run
    pub const OVERRIDE_FILE: &str = ".model_override";
}

/// Output tree constants
pub mod output {
    /// Reserved unit id for job-level artifacts (analysis, plan)
    pub const DECK_UNIT: &str = "_deck";

    pub const CHECKPOINT_FILE: &str = ".progress.json";
    pub const MANIFEST_FILE: &str = "run.json";
    pub const ANALYSIS_FILE: &str = "analysis.md";
    pub const PLAN_FILE: &str = "plan.json";
    pub const SLIDES_DIR: &str = "slides";
    pub const NOTES_DIR: &str = "notes";
    pub const DIAGRAMS_DIR: &str = "diagrams";

    /// Marker prepended to content that never passed review
    pub const DEGRADED_MARKER: &str = "DEGRADED-OUTPUT";

    /// Marker of the placeholder written when nothing usable was produced
    pub const FAILED_MARKER: &str = "GENERATION-FAILED";
}

/// Local review constants
pub mod review {
    /// Chinese characters spoken per minute
    pub const CJK_CHARS_PER_MINUTE: f64 = 250.0;

    /// English words spoken per minute
    pub const EN_WORDS_PER_MINUTE: f64 = 150.0;

    /// Slack applied on both ends of the speaking-time window (minutes)
    pub const TIME_TOLERANCE_MINUTES: f64 = 0.15;
}
