//! devboot configuration layer
//!
//! Every environment variable read goes through this module; the rest of the
//! workspace consumes structured config instead of calling `std::env::var`.
//!
//! - `loader`: env_or, env_optional, env_bool, env_list helpers and `.env` loading
//! - `schema`: BootstrapConfig, ObservabilityConfig
//! - `env_keys`: key constants, including the variables devboot exports

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_list, env_optional, env_or, load_dotenv, set_env_var};
pub use schema::{BootstrapConfig, ObservabilityConfig};
