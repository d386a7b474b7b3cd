//! Configuration loading and schema
//!
//! Configuration merges, in order: config files (`trellis.toml` / `.json` /
//! `.yaml`), then `TRELLIS_`-prefixed environment variables. String fields
//! support `${VAR}` / `${VAR:-default}` substitution.

mod loader;
mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{BuildConfig, BuiltinsConfig, Config, HttpConfig, RenderConfig, RuntimeConfig};
