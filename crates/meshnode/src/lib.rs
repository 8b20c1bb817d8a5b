//! meshnode - one peer of the gossip mesh.
//!
//! Joins the broadcast and metrics topics, dials its bootstrap peers,
//! writes lifecycle events to stdout and exposes an HTTP trigger for
//! originating broadcasts.

pub mod api;
pub mod config;
pub mod error;

pub use api::ApiServer;
pub use config::NodeConfig;
pub use error::NodeError;
