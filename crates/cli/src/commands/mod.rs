//! Subcommand implementations

pub mod join;
pub mod labels;
pub mod manifest;
pub mod show;
