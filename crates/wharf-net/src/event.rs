use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::handle::Handle;

/// Out-of-band conditions surfaced to the host. Transport failures are not
/// call-site errors; the socket core closes the connection and posts
/// `Hangup` here instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The peer closed the connection or the transport failed fatally.
    Hangup { handle: Handle },
}

#[derive(Default)]
pub(crate) struct EventQueue {
    queue: Mutex<VecDeque<NetworkEvent>>,
}

impl EventQueue {
    pub(crate) fn post(&self, event: NetworkEvent) {
        self.lock().push_back(event);
    }

    pub(crate) fn next(&self) -> Option<NetworkEvent> {
        self.lock().pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<NetworkEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
