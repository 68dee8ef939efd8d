use std::{
    os::fd::RawFd,
    sync::atomic::{AtomicI32, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use bitflags::bitflags;
use strum::{Display, FromRepr};

use crate::{handle::Handle, sys::INVALID_FD};

bitflags! {
    /// Per-slot option and condition bits. Option bits are captured here
    /// even before an fd exists and re-applied when one is opened.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct SocketFlags: u32 {
        const BLOCKING = 1 << 0;
        const REUSE_ADDR = 1 << 1;
        const REUSE_PORT = 1 << 2;
        /// Nagle's algorithm stays enabled while set.
        const TCP_DELAY = 1 << 3;
        /// An external poll loop owns moving bytes for this socket; the
        /// stream layer must not recv on its own.
        const POLLED = 1 << 4;
        const CONNECTION_PENDING = 1 << 5;
        const ERROR_PENDING = 1 << 6;
        const HANGUP_PENDING = 1 << 7;
        /// A previous flush made partial progress and must be retried.
        const REFLUSH = 1 << 8;
    }
}

/// Connection lifecycle stage, stored atomically on the base slot.
#[derive(Clone, Copy, Debug, Display, FromRepr, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    NotConnected = 0,
    Connecting,
    Connected,
    Listening,
    Disconnected,
}

/// One fd-bearing descriptor in the fixed pool. Slots never move; the
/// owner word is the claim token and everything else is written only by
/// the owning record.
pub(crate) struct BaseSlot {
    owner: AtomicU64,
    fd: AtomicI32,
    flags: AtomicU32,
    state: AtomicU8,
    last_event: AtomicU64,
}

impl BaseSlot {
    fn vacant() -> Self {
        Self {
            owner: AtomicU64::new(0),
            fd: AtomicI32::new(INVALID_FD),
            flags: AtomicU32::new(0),
            state: AtomicU8::new(SocketState::NotConnected as u8),
            last_event: AtomicU64::new(0),
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    pub(crate) fn set_fd(&self, fd: RawFd) {
        self.fd.store(fd, Ordering::Release);
    }

    pub(crate) fn state(&self) -> SocketState {
        SocketState::from_repr(self.state.load(Ordering::Acquire))
            .unwrap_or(SocketState::NotConnected)
    }

    pub(crate) fn set_state(&self, state: SocketState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn flags(&self) -> SocketFlags {
        SocketFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn has_flag(&self, flag: SocketFlags) -> bool {
        self.flags().contains(flag)
    }

    pub(crate) fn set_flag(&self, flag: SocketFlags, on: bool) {
        if on {
            self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
        }
    }

    /// Drop every flag outside `keep`.
    pub(crate) fn retain_flags(&self, keep: SocketFlags) {
        self.flags.fetch_and(keep.bits(), Ordering::AcqRel);
    }

    pub(crate) fn touch(&self, timestamp_ms: u64) {
        self.last_event.store(timestamp_ms, Ordering::Release);
    }

    pub(crate) fn clear_last_event(&self) {
        self.last_event.store(0, Ordering::Release);
    }

    fn reset(&self) {
        self.fd.store(INVALID_FD, Ordering::Release);
        self.flags.store(0, Ordering::Release);
        self.state.store(SocketState::NotConnected as u8, Ordering::Release);
        self.last_event.store(0, Ordering::Release);
    }

    /// Return the slot to the pool. Fields are wiped before the owner word
    /// clears so the next claimant never sees stale state.
    pub(crate) fn release(&self) {
        self.reset();
        self.owner.store(0, Ordering::Release);
    }
}

/// Fixed array of base slots with a rotating claim cursor.
pub(crate) struct SlotPool {
    slots: Box<[BaseSlot]>,
    cursor: AtomicUsize,
}

impl SlotPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: (0..size.max(1)).map(|_| BaseSlot::vacant()).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub(crate) fn get(&self, index: usize) -> &BaseSlot {
        &self.slots[index]
    }

    /// Claim a free slot for `owner` by CAS on the owner word. The search
    /// is bounded to two passes over the pool; a full pool surfaces as
    /// `None` instead of spinning.
    pub(crate) fn claim(&self, owner: Handle) -> Option<usize> {
        for _ in 0..self.slots.len() * 2 {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
            let slot = &self.slots[index];
            if slot.owner.load(Ordering::Acquire) != 0 {
                continue;
            }
            if slot
                .owner
                .compare_exchange(0, owner.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.reset();
                return Some(index);
            }
        }
        None
    }

    #[cfg(test)]
    fn owner_of(&self, index: usize) -> u64 {
        self.slots[index].owner.load(Ordering::Acquire)
    }
}
