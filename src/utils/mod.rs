//! Environment variable helpers shared by the configuration types.

pub mod env;

pub use env::{env_flag, get_env_with_prefix, parse_env_with_prefix};
