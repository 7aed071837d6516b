// gemflows — Run multi-step AI workflows from YAML recipes
// License: Apache-2.0

pub mod capability;
pub mod config;
pub mod engine;
pub mod fetcher;
pub mod logger;
pub mod provider;
pub mod telemetry;
pub mod templating;
pub mod workflow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
