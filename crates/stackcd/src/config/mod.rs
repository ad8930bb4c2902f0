pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, parse_values_file, validate_config};
pub use schema::{Config, RepoConfig, StackConfig};
