pub mod config;
pub mod control;
pub mod review;
pub mod run;
pub mod status;
