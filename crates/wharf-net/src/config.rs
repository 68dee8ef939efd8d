use serde::{Deserialize, Serialize};

/// Capacity of the inbound ring per socket, in bytes.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;
/// Capacity of the outbound staging buffer per socket, in bytes.
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Runtime sizing, resolved once when the module comes up.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Upper bound on concurrently open sockets.
    pub max_sockets: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { max_sockets: 256 }
    }
}

impl NetworkConfig {
    /// The handle table carries a small margin over the socket cap so
    /// records linger briefly through accept/destroy churn without starving
    /// reservation.
    pub(crate) fn handle_capacity(&self) -> usize {
        self.max_sockets + if self.max_sockets > 256 { 256 } else { 8 }
    }
}
