//! Handle-based socket runtime with a buffered byte-stream façade.
//!
//! Sockets live behind stable, generation-tagged [`Handle`]s resolved
//! through a fixed-capacity table; per-socket ring buffers sit between the
//! caller and the OS, and every socket can be viewed as a sequential
//! [`wharf_stream::Stream`]. The runtime is a passive library driven by
//! caller threads: it owns no event loop, and blocking behavior follows
//! the per-socket blocking flag.

mod base;
mod config;
mod error;
mod event;
mod handle;
mod ring;
mod runtime;
mod socket;
mod stream;
mod sys;
mod tcp;

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

pub use base::SocketState;
pub use config::{NetworkConfig, READ_BUFFER_SIZE, WRITE_BUFFER_SIZE};
pub use error::{ConnectError, NetError};
pub use event::NetworkEvent;
pub use handle::Handle;
pub use runtime::Network;
pub use stream::SocketStream;

static GLOBAL: RwLock<Option<Arc<Network>>> = RwLock::new(None);

/// Bring up the process-wide runtime. Idempotent: a second call returns
/// the existing runtime without reconfiguring it.
pub fn initialize(config: NetworkConfig) -> Arc<Network> {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = global.as_ref() {
        return Arc::clone(existing);
    }
    let network = Arc::new(Network::new(config));
    *global = Some(Arc::clone(&network));
    network
}

/// Tear down the process-wide runtime. Destroying any records still alive
/// is the caller's responsibility; outstanding `Arc`s keep the runtime
/// usable until they drop.
pub fn finalize() {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if global.take().is_some() {
        debug!("terminating network services");
    }
}

pub fn is_initialized() -> bool {
    GLOBAL.read().unwrap_or_else(PoisonError::into_inner).is_some()
}

/// The process-wide runtime, if [`initialize`] has been called.
pub fn network() -> Option<Arc<Network>> {
    GLOBAL.read().unwrap_or_else(PoisonError::into_inner).clone()
}
