pub mod archive;
pub mod config;
pub mod download;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod server;
pub mod tree;

pub use config::{PrepareConfig, ServeConfig};
pub use tree::StaticTree;
