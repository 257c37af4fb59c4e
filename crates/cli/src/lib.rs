//! Command-line front end for the approval client

pub mod args;
pub mod commands;
pub mod completions;
pub mod display;
pub mod interactive;

pub use args::Cli;
