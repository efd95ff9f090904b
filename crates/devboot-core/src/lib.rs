pub mod config;
pub mod error;
pub mod run;
pub mod version;

pub use error::BootstrapError;
pub use run::{Environment, RunConfig};
