use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    base::{SlotPool, SocketFlags, SocketState},
    config::NetworkConfig,
    error::NetError,
    event::{EventQueue, NetworkEvent},
    handle::{Handle, HandleTable},
    socket::{Socket, SocketIo, with_nonblocking},
    stream::SocketStream,
    sys::{self, AddressFamily, INVALID_FD},
    tcp::TcpProtocol,
};

/// The socket runtime: handle table, base slot pool, and event queue.
///
/// All socket operations go through a [`Handle`]; a stale handle is never
/// an error, just a failed lookup with a logged complaint and a failure
/// sentinel. Construct one explicitly, or use the module-level
/// [`initialize`](crate::initialize) for a process-wide instance.
pub struct Network {
    config: NetworkConfig,
    table: HandleTable<Socket>,
    pool: Arc<SlotPool>,
    events: Arc<EventQueue>,
    supports_ipv4: bool,
    supports_ipv6: bool,
}

impl Network {
    pub fn new(config: NetworkConfig) -> Self {
        let supports_ipv4 = sys::datagram_probe(AddressFamily::Ipv4);
        let supports_ipv6 = sys::datagram_probe(AddressFamily::Ipv6);
        debug!(
            max_sockets = config.max_sockets,
            supports_ipv4, supports_ipv6, "initializing network services"
        );
        Self {
            table: HandleTable::new(config.handle_capacity()),
            pool: Arc::new(SlotPool::new(config.max_sockets)),
            events: Arc::new(EventQueue::default()),
            config,
            supports_ipv4,
            supports_ipv6,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn supports_ipv4(&self) -> bool {
        self.supports_ipv4
    }

    pub fn supports_ipv6(&self) -> bool {
        self.supports_ipv6
    }

    /// Allocate a TCP socket record. `None` when the handle table is full.
    pub fn tcp_create(&self) -> Option<Handle> {
        match self.table.insert(|handle| {
            Socket::new(handle, &TcpProtocol, Arc::clone(&self.pool), Arc::clone(&self.events))
        }) {
            Some((handle, _)) => {
                debug!(%handle, "allocated tcp socket");
                Some(handle)
            }
            None => {
                error!("socket handle table exhausted");
                None
            }
        }
    }

    /// Retire `handle`. The record is torn down once the last in-flight
    /// operation lets go of it; calling this twice is a no-op.
    pub fn destroy(&self, handle: Handle) {
        if let Some(record) = self.table.remove(handle) {
            debug!(%handle, holders = Arc::strong_count(&record) - 1, "destroying socket");
        }
    }

    pub fn is_socket(&self, handle: Handle) -> bool {
        self.table.lookup(handle).is_some()
    }

    pub fn bind(&self, handle: Handle, addr: SocketAddr) -> bool {
        let Some(sock) = self.lookup(handle, "bind") else {
            return false;
        };
        let mut io = sock.io();
        match self.bind_locked(&sock, &mut io, addr) {
            Ok(()) => {
                info!(%handle, local = ?io.local, "socket bound");
                true
            }
            Err(err) => {
                warn!(%handle, %addr, %err, "bind failed");
                false
            }
        }
    }

    fn bind_locked(
        &self,
        sock: &Socket,
        io: &mut SocketIo,
        addr: SocketAddr,
    ) -> Result<(), NetError> {
        let fd = sock.ensure_fd(io, AddressFamily::of(&addr))?;
        sys::bind(fd, &addr).map_err(NetError::Bind)?;
        io.local = sys::local_address(fd).ok();
        Ok(())
    }

    /// Connect to `addr`, waiting up to `timeout` for the handshake. With
    /// no timeout an in-progress connect parks the socket in
    /// [`SocketState::Connecting`] for `poll_state` to pick up later.
    pub fn connect(&self, handle: Handle, addr: SocketAddr, timeout: Option<Duration>) -> bool {
        let Some(sock) = self.lookup(handle, "connect") else {
            return false;
        };
        let mut io = sock.io();
        match self.connect_locked(&sock, &mut io, addr, timeout) {
            Ok(()) => true,
            Err(err) => {
                warn!(%handle, %addr, %err, "connect failed");
                false
            }
        }
    }

    fn connect_locked(
        &self,
        sock: &Socket,
        io: &mut SocketIo,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<(), NetError> {
        sock.ensure_fd(io, AddressFamily::of(&addr))?;
        let slot = sock.slot().ok_or(NetError::NotOpen)?;
        if slot.state() != SocketState::NotConnected {
            return Err(NetError::AlreadyConnected);
        }
        slot.set_flag(
            SocketFlags::CONNECTION_PENDING |
                SocketFlags::ERROR_PENDING |
                SocketFlags::HANGUP_PENDING,
            false,
        );
        slot.clear_last_event();
        sock.protocol().connect(sock, addr, timeout)?;
        io.remote = Some(addr);
        if io.local.is_none() {
            io.local = sys::local_address(slot.fd()).ok();
        }
        Ok(())
    }

    /// Start accepting connections. The socket must be bound and idle.
    pub fn listen(&self, handle: Handle) -> bool {
        let Some(sock) = self.lookup(handle, "listen") else {
            return false;
        };
        let io = sock.io();
        let outcome = (|| {
            let slot = sock.slot().ok_or(NetError::NotOpen)?;
            if slot.state() != SocketState::NotConnected ||
                slot.fd() == INVALID_FD ||
                io.local.is_none()
            {
                return Err(NetError::InvalidState("listen requires a bound, idle socket"));
            }
            sys::listen(slot.fd()).map_err(NetError::Listen)?;
            slot.set_state(SocketState::Listening);
            Ok(())
        })();
        match outcome {
            Ok(()) => {
                info!(%handle, local = ?io.local, "listening");
                true
            }
            Err(err) => {
                warn!(%handle, %err, "listen failed");
                false
            }
        }
    }

    /// Take one pending connection off a listening socket, waiting up to
    /// `timeout`. The new record comes back already `Connected`.
    pub fn accept(&self, handle: Handle, timeout: Option<Duration>) -> Option<Handle> {
        let Some(sock) = self.lookup(handle, "accept") else {
            return None;
        };
        match self.accept_inner(&sock, timeout) {
            Ok(accepted) => Some(accepted),
            Err(NetError::Accept(err)) if sys::is_would_block(&err) => None,
            Err(err) => {
                warn!(%handle, %err, "accept failed");
                None
            }
        }
    }

    fn accept_inner(&self, sock: &Socket, timeout: Option<Duration>) -> Result<Handle, NetError> {
        let slot = sock.slot().ok_or(NetError::NotOpen)?;
        if slot.state() != SocketState::Listening || slot.fd() == INVALID_FD {
            return Err(NetError::InvalidState("accept requires a listening socket"));
        }
        let fd = slot.fd();

        let result = with_nonblocking(slot, timeout, || match sys::accept(fd) {
            Ok(pair) => Ok(pair),
            Err(err) if sys::is_would_block(&err) && timeout.is_some() => {
                let ready = sys::select_fd(fd, sys::Interest::Read, timeout)
                    .map_err(NetError::Accept)?;
                if ready.ready && !ready.error {
                    sys::accept(fd).map_err(NetError::Accept)
                } else {
                    Err(NetError::Accept(err))
                }
            }
            Err(err) => Err(NetError::Accept(err)),
        });
        slot.retain_flags(SocketFlags::CONNECTION_PENDING);
        let (accepted_fd, peer) = result?;

        let Some((accepted, record)) = self.table.insert(|handle| {
            Socket::new(handle, &TcpProtocol, Arc::clone(&self.pool), Arc::clone(&self.events))
        }) else {
            sys::close_fd(accepted_fd);
            return Err(NetError::TableFull);
        };
        match record.ensure_slot() {
            Ok(accepted_slot) => {
                accepted_slot.set_fd(accepted_fd);
                accepted_slot.set_state(SocketState::Connected);
            }
            Err(err) => {
                self.table.remove(accepted);
                sys::close_fd(accepted_fd);
                return Err(err);
            }
        }
        let mut accepted_io = record.io();
        accepted_io.family = peer.as_ref().map(AddressFamily::of);
        accepted_io.remote = peer;
        accepted_io.local = sys::local_address(accepted_fd).ok();
        info!(
            listener = %sock.handle(),
            %accepted,
            remote = ?accepted_io.remote,
            local = ?accepted_io.local,
            "accepted connection"
        );
        Ok(accepted)
    }

    /// Release the fd and detach the base slot; the handle stays valid in
    /// `NotConnected`.
    pub fn close(&self, handle: Handle) {
        if let Some(sock) = self.table.lookup(handle) {
            let mut io = sock.io();
            sock.close(&mut io);
        }
    }

    /// Current connection state, advancing any transition the OS has
    /// already decided. Never blocks.
    pub fn state(&self, handle: Handle) -> SocketState {
        let Some(sock) = self.table.lookup(handle) else {
            return SocketState::NotConnected;
        };
        let mut io = sock.io();
        sock.poll_state(&mut io)
    }

    pub fn local_address(&self, handle: Handle) -> Option<SocketAddr> {
        self.table.lookup(handle)?.io().local
    }

    pub fn remote_address(&self, handle: Handle) -> Option<SocketAddr> {
        self.table.lookup(handle)?.io().remote
    }

    pub fn blocking(&self, handle: Handle) -> bool {
        self.flag(handle, SocketFlags::BLOCKING)
    }

    pub fn set_blocking(&self, handle: Handle, blocking: bool) {
        self.apply(handle, "set_blocking", |sock| sock.set_blocking(blocking));
    }

    pub fn reuse_address(&self, handle: Handle) -> bool {
        self.flag(handle, SocketFlags::REUSE_ADDR)
    }

    pub fn set_reuse_address(&self, handle: Handle, reuse: bool) {
        self.apply(handle, "set_reuse_address", |sock| sock.set_reuse_address(reuse));
    }

    pub fn reuse_port(&self, handle: Handle) -> bool {
        self.flag(handle, SocketFlags::REUSE_PORT)
    }

    pub fn set_reuse_port(&self, handle: Handle, reuse: bool) {
        self.apply(handle, "set_reuse_port", |sock| sock.set_reuse_port(reuse));
    }

    /// Whether Nagle's algorithm is enabled (the inverse of TCP_NODELAY).
    pub fn tcp_delay(&self, handle: Handle) -> bool {
        self.flag(handle, SocketFlags::TCP_DELAY)
    }

    pub fn set_tcp_delay(&self, handle: Handle, delay: bool) {
        self.apply(handle, "set_tcp_delay", |sock| sock.set_tcp_delay(delay));
    }

    /// Whether an external poll loop owns this socket's byte movement.
    pub fn polled(&self, handle: Handle) -> bool {
        self.flag(handle, SocketFlags::POLLED)
    }

    /// Mode selection, not an optimization: while polled, the stream layer
    /// never issues its own recv and relies on the poller to fill the
    /// in-ring.
    pub fn set_polled(&self, handle: Handle, polled: bool) {
        self.apply(handle, "set_polled", |sock| sock.set_polled(polled));
    }

    /// Join an IPv4 multicast group on the default interface. TTL is fixed
    /// at 1 (local network).
    pub fn set_multicast_group(
        &self,
        handle: Handle,
        group: Ipv4Addr,
        allow_loopback: bool,
    ) -> bool {
        let Some(sock) = self.lookup(handle, "set_multicast_group") else {
            return false;
        };
        let outcome = (|| {
            let slot = sock.ensure_slot()?;
            if slot.fd() == INVALID_FD {
                return Err(NetError::NotOpen);
            }
            sys::join_multicast_v4(slot.fd(), group, allow_loopback).map_err(NetError::Multicast)
        })();
        match outcome {
            Ok(()) => true,
            Err(err) => {
                warn!(%handle, %group, %err, "multicast join failed");
                false
            }
        }
    }

    /// Sequential byte-stream view of the socket. `None` for a stale
    /// handle; the stream itself stays safe if the socket is destroyed
    /// while it is still around.
    pub fn stream(self: &Arc<Self>, handle: Handle) -> Option<SocketStream> {
        self.table.lookup(handle).map(|_| SocketStream::new(Arc::clone(self), handle))
    }

    /// Drain one posted event, oldest first.
    pub fn poll_event(&self) -> Option<NetworkEvent> {
        self.events.next()
    }

    pub(crate) fn record(&self, handle: Handle) -> Option<Arc<Socket>> {
        self.table.lookup(handle)
    }

    fn lookup(&self, handle: Handle, op: &'static str) -> Option<Arc<Socket>> {
        let record = self.table.lookup(handle);
        if record.is_none() {
            error!(op, "{}", NetError::InvalidHandle(handle));
        }
        record
    }

    fn flag(&self, handle: Handle, flag: SocketFlags) -> bool {
        self.table.lookup(handle).is_some_and(|sock| sock.flag(flag))
    }

    fn apply(
        &self,
        handle: Handle,
        op: &'static str,
        f: impl FnOnce(&Socket) -> Result<(), NetError>,
    ) {
        let Some(sock) = self.lookup(handle, op) else {
            return;
        };
        if let Err(err) = f(&sock) {
            warn!(%handle, op, %err, "socket option change failed");
        }
    }
}
