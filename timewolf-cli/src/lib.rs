//! Library side of the `timewolf` binary: command line, configuration,
//! logging, display and the built-in modules.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod modules;
pub mod output;
pub mod recipes;
