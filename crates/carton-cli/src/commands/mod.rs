//! CLI command implementations.

pub mod compile;
pub mod package;
pub mod run;
