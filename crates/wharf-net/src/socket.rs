use std::{
    net::SocketAddr,
    os::fd::RawFd,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicI32, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, warn};

use crate::{
    base::{BaseSlot, SlotPool, SocketFlags, SocketState},
    config::{READ_BUFFER_SIZE, WRITE_BUFFER_SIZE},
    error::{ConnectError, NetError},
    event::{EventQueue, NetworkEvent},
    handle::Handle,
    ring::{FlushBuffer, RingBuffer},
    sys::{self, AddressFamily, INVALID_FD},
};

/// Protocol hook table: how a concrete transport opens descriptors,
/// establishes connections, and moves bytes through the record's buffers.
pub(crate) trait Protocol: Send + Sync {
    /// Open an fd for `family` on the record's base slot.
    fn open(&self, sock: &Socket, family: AddressFamily) -> Result<(), NetError>;

    /// Establish a connection, driving the slot state to `Connected` or
    /// `Connecting`.
    fn connect(
        &self,
        sock: &Socket,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<(), ConnectError>;

    /// Pull bytes from the OS into the in-ring. Returns bytes gained.
    fn fill(&self, sock: &Socket, io: &mut SocketIo, wanted: usize) -> usize;

    /// Push buffered bytes from the out-buffer to the OS.
    fn drain(&self, sock: &Socket, io: &mut SocketIo);
}

/// Mutable half of a socket record, guarded by the record mutex.
pub(crate) struct SocketIo {
    pub(crate) family: Option<AddressFamily>,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) remote: Option<SocketAddr>,
    pub(crate) rx: RingBuffer,
    pub(crate) tx: FlushBuffer,
    pub(crate) bytes_read: u64,
    pub(crate) bytes_written: u64,
}

/// One socket record. Shared ownership through the handle table: the Arc
/// strong count is the refcount, and whichever holder drops last runs
/// teardown. The base slot is borrowed from the pool while an fd can
/// exist and detached again on close.
pub(crate) struct Socket {
    handle: Handle,
    proto: &'static dyn Protocol,
    base: AtomicI32,
    pool: Arc<SlotPool>,
    events: Arc<EventQueue>,
    io: Mutex<SocketIo>,
}

impl Socket {
    pub(crate) fn new(
        handle: Handle,
        proto: &'static dyn Protocol,
        pool: Arc<SlotPool>,
        events: Arc<EventQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            proto,
            base: AtomicI32::new(-1),
            pool,
            events,
            io: Mutex::new(SocketIo {
                family: None,
                local: None,
                remote: None,
                rx: RingBuffer::new(READ_BUFFER_SIZE),
                tx: FlushBuffer::new(WRITE_BUFFER_SIZE),
                bytes_read: 0,
                bytes_written: 0,
            }),
        })
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn protocol(&self) -> &'static dyn Protocol {
        self.proto
    }

    pub(crate) fn io(&self) -> MutexGuard<'_, SocketIo> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn slot(&self) -> Option<&BaseSlot> {
        let index = self.base.load(Ordering::Acquire);
        (index >= 0).then(|| self.pool.get(index as usize))
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.slot().map_or(INVALID_FD, BaseSlot::fd)
    }

    /// Borrow a base slot from the pool on first use.
    pub(crate) fn ensure_slot(&self) -> Result<&BaseSlot, NetError> {
        if let Some(slot) = self.slot() {
            return Ok(slot);
        }
        let index = self.pool.claim(self.handle).ok_or(NetError::OutOfSlots)?;
        self.base.store(index as i32, Ordering::Release);
        Ok(self.pool.get(index))
    }

    /// Open the fd for `family` if none exists yet, re-applying the option
    /// flags captured on the slot. Fails when the socket already carries a
    /// descriptor of a different family.
    pub(crate) fn ensure_fd(
        &self,
        io: &mut SocketIo,
        family: AddressFamily,
    ) -> Result<RawFd, NetError> {
        let slot = self.ensure_slot()?;
        if slot.fd() != INVALID_FD {
            if io.family != Some(family) {
                return Err(NetError::FamilyMismatch);
            }
            return Ok(slot.fd());
        }
        self.proto.open(self, family)?;
        let fd = slot.fd();
        if fd == INVALID_FD {
            return Err(NetError::NotOpen);
        }
        io.family = Some(family);
        let flags = slot.flags();
        if let Err(err) = sys::set_reuse_address(fd, flags.contains(SocketFlags::REUSE_ADDR)) {
            warn!(handle = %self.handle, fd, %err, "unable to apply reuse address option");
        }
        if let Err(err) = sys::set_reuse_port(fd, flags.contains(SocketFlags::REUSE_PORT)) {
            warn!(handle = %self.handle, fd, %err, "unable to apply reuse port option");
        }
        Ok(fd)
    }

    pub(crate) fn set_blocking(&self, blocking: bool) -> Result<(), NetError> {
        let slot = self.ensure_slot()?;
        slot.set_flag(SocketFlags::BLOCKING, blocking);
        if slot.fd() != INVALID_FD {
            sys::set_blocking(slot.fd(), blocking);
        }
        Ok(())
    }

    pub(crate) fn set_reuse_address(&self, reuse: bool) -> Result<(), NetError> {
        let slot = self.ensure_slot()?;
        slot.set_flag(SocketFlags::REUSE_ADDR, reuse);
        if slot.fd() != INVALID_FD
            && let Err(err) = sys::set_reuse_address(slot.fd(), reuse)
        {
            warn!(handle = %self.handle, fd = slot.fd(), %err, "unable to set reuse address option");
        }
        Ok(())
    }

    pub(crate) fn set_reuse_port(&self, reuse: bool) -> Result<(), NetError> {
        let slot = self.ensure_slot()?;
        slot.set_flag(SocketFlags::REUSE_PORT, reuse);
        if slot.fd() != INVALID_FD
            && let Err(err) = sys::set_reuse_port(slot.fd(), reuse)
        {
            warn!(handle = %self.handle, fd = slot.fd(), %err, "unable to set reuse port option");
        }
        Ok(())
    }

    /// Toggle Nagle's algorithm. `delay == false` sets TCP_NODELAY.
    pub(crate) fn set_tcp_delay(&self, delay: bool) -> Result<(), NetError> {
        let slot = self.ensure_slot()?;
        slot.set_flag(SocketFlags::TCP_DELAY, delay);
        if slot.fd() != INVALID_FD
            && let Err(err) = sys::set_nodelay(slot.fd(), !delay)
        {
            warn!(handle = %self.handle, fd = slot.fd(), %err, "unable to set tcp delay option");
        }
        Ok(())
    }

    /// Hand byte movement over to an external poll loop (or take it back).
    pub(crate) fn set_polled(&self, polled: bool) -> Result<(), NetError> {
        let slot = self.ensure_slot()?;
        slot.set_flag(SocketFlags::POLLED, polled);
        Ok(())
    }

    pub(crate) fn flag(&self, flag: SocketFlags) -> bool {
        self.slot().is_some_and(|slot| slot.has_flag(flag))
    }

    /// Drive OS-observed state transitions. Never blocks: a zero-timeout
    /// select while `Connecting`, a readability probe while `Connected`,
    /// and a drain check while `Disconnected`.
    pub(crate) fn poll_state(&self, io: &mut SocketIo) -> SocketState {
        let Some(slot) = self.slot() else {
            return SocketState::NotConnected;
        };
        match slot.state() {
            SocketState::Connecting => {
                let fd = slot.fd();
                if let Ok(ready) = sys::select_fd(fd, sys::Interest::Write, None) {
                    if ready.error {
                        debug!(handle = %self.handle, fd, "error while connecting");
                        self.close(io);
                    } else if ready.ready {
                        debug!(handle = %self.handle, fd, "connection established");
                        slot.set_state(SocketState::Connected);
                    }
                }
            }
            SocketState::Connected => {
                if sys::available(slot.fd()).is_none() {
                    debug!(handle = %self.handle, fd = slot.fd(), "hangup while connected");
                    slot.set_state(SocketState::Disconnected);
                    if io.rx.is_empty() {
                        self.close(io);
                    }
                }
            }
            SocketState::Disconnected => {
                if io.rx.is_empty() {
                    debug!(handle = %self.handle, "buffered data drained after disconnect");
                    self.close(io);
                }
            }
            SocketState::NotConnected | SocketState::Listening => {}
        }
        self.slot().map_or(SocketState::NotConnected, BaseSlot::state)
    }

    /// In-ring bytes plus whatever the kernel reports as pending.
    pub(crate) fn available_nonblock(&self, io: &SocketIo) -> usize {
        let pending = self.slot().and_then(|slot| sys::available(slot.fd())).unwrap_or(0);
        io.rx.len() + pending
    }

    /// Synchronously push the out-buffer down to the OS while connected.
    pub(crate) fn flush_out(&self, io: &mut SocketIo) {
        if io.tx.is_empty() {
            return;
        }
        let Some(slot) = self.slot() else {
            return;
        };
        if slot.state() != SocketState::Connected {
            return;
        }
        self.proto.drain(self, io);
    }

    /// Post the hangup event, at most once per connection.
    pub(crate) fn post_hangup(&self) {
        let Some(slot) = self.slot() else {
            return;
        };
        if !slot.has_flag(SocketFlags::HANGUP_PENDING) {
            slot.set_flag(SocketFlags::HANGUP_PENDING, true);
            slot.touch(now_ms());
            self.events.post(NetworkEvent::Hangup { handle: self.handle });
        }
    }

    /// Release the fd, return the base slot to the pool, and forget both
    /// addresses. The record itself stays valid in `NotConnected`.
    pub(crate) fn close(&self, io: &mut SocketIo) {
        let mut fd = INVALID_FD;
        let index = self.base.swap(-1, Ordering::AcqRel);
        if index >= 0 {
            let slot = self.pool.get(index as usize);
            fd = slot.fd();
            slot.release();
        }
        debug!(handle = %self.handle, fd, "closing socket");
        io.local = None;
        io.remote = None;
        if fd != INVALID_FD {
            sys::set_blocking(fd, false);
            sys::close_fd(fd);
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let mut io = self.io();
        self.close(&mut io);
    }
}

/// Bounded-wait pivot shared by connect and accept: flip a blocking socket
/// to non-blocking around `f`, then restore. A non-blocking socket runs
/// `f` untouched.
pub(crate) fn with_nonblocking<T>(
    slot: &BaseSlot,
    timeout: Option<Duration>,
    f: impl FnOnce() -> T,
) -> T {
    let fd = slot.fd();
    let pivot = timeout.is_some() && slot.has_flag(SocketFlags::BLOCKING) && fd != INVALID_FD;
    if pivot {
        sys::set_blocking(fd, false);
    }
    let out = f();
    if pivot {
        sys::set_blocking(fd, true);
    }
    out
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
