//! CLI command implementations

pub mod checkpoints;
pub mod init;
pub mod run;
pub mod validate;
