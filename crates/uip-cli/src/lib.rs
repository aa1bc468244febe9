//! Command-line entry point, configuration loading and startup wiring for
//! the interaction gateway daemon.

pub mod bootstrap_helpers;
pub mod cli_args;
pub mod config;
pub mod startup;

pub use bootstrap_helpers::init_tracing;
pub use cli_args::Cli;
pub use config::*;
pub use startup::run_gateway;
