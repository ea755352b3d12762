//! CLI subcommands.

pub mod migrate;
pub mod quote;
pub mod webhook;
