pub mod authorize;
pub mod cli;
pub mod drive;
pub mod github;
pub mod http;
pub mod load_config;

pub use cli::{run, Cli, Commands};
