//! Node binary support: configuration files and the application the node
//! runs.
#![allow(missing_docs)]
mod app;
mod config;

#[cfg(test)]
mod tests;

pub use app::HashChainApp;
pub use config::{decode_json, encode_json, AppConfig, ConfigPaths, Configs, TimeoutsConfig};
