pub mod cli;
pub mod client;
pub mod credentials;
pub mod export;
pub mod load_config;
pub mod loader;

pub use cli::{execute, run, Cli, Commands};
