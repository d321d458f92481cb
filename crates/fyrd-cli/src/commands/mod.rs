//! CLI command implementations.

pub mod call;
pub mod cancel;
pub mod clean;
pub mod common;
pub mod conf;
pub mod options;
pub mod output;
pub mod profile;
pub mod queue;
pub mod status;
pub mod submit;
pub mod wait;
