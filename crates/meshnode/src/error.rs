//! Error types for meshnode.

use std::net::SocketAddr;

use gossip_mesh::P2pError;
use thiserror::Error;

/// Errors that can occur while starting or serving a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP trigger endpoint could not bind.
    #[error("failed to bind api server on {addr}: {source}")]
    ApiBind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Mesh layer error.
    #[error("mesh error: {0}")]
    Mesh(#[from] P2pError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = NodeError::Config("host cannot be empty".to_string());
        assert_eq!(err.to_string(), "configuration error: host cannot be empty");
    }

    #[test]
    fn mesh_error_converts() {
        let err: NodeError = P2pError::Publish("closed".to_string()).into();
        assert!(matches!(err, NodeError::Mesh(_)));
        assert_eq!(err.to_string(), "mesh error: publish failed: closed");
    }
}
