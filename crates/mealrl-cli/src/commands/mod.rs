//! CLI command modules

pub mod remote;
pub mod report;
pub mod train;
