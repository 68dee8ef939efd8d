use std::{net::SocketAddr, time::Duration};

use tracing::{debug, warn};

use crate::{
    base::{SocketFlags, SocketState},
    error::{ConnectError, NetError},
    socket::{Protocol, Socket, SocketIo, with_nonblocking},
    sys::{self, AddressFamily, INVALID_FD},
};

/// Stream-socket transport: SOCK_STREAM/IPPROTO_TCP descriptors with the
/// buffered ring I/O discipline.
pub(crate) struct TcpProtocol;

impl Protocol for TcpProtocol {
    fn open(&self, sock: &Socket, family: AddressFamily) -> Result<(), NetError> {
        let slot = sock.slot().ok_or(NetError::NotOpen)?;
        let fd = sys::tcp_socket(family).map_err(|err| {
            warn!(handle = %sock.handle(), %err, "unable to open tcp socket");
            NetError::Open(err)
        })?;
        slot.set_fd(fd);
        debug!(handle = %sock.handle(), fd, "opened tcp socket");
        let flags = slot.flags();
        sys::set_blocking(fd, flags.contains(SocketFlags::BLOCKING));
        if let Err(err) = sys::set_nodelay(fd, !flags.contains(SocketFlags::TCP_DELAY)) {
            warn!(handle = %sock.handle(), fd, %err, "unable to apply tcp delay option");
        }
        Ok(())
    }

    fn connect(
        &self,
        sock: &Socket,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<(), ConnectError> {
        let slot = sock
            .slot()
            .ok_or_else(|| ConnectError::Other(std::io::ErrorKind::NotConnected.into()))?;
        let fd = slot.fd();

        let outcome = with_nonblocking(slot, timeout, || match sys::connect(fd, &addr) {
            Ok(sys::ConnectStart::Done) => {
                slot.set_state(SocketState::Connected);
                Ok(())
            }
            Ok(sys::ConnectStart::InProgress) => match timeout {
                None => {
                    slot.set_state(SocketState::Connecting);
                    Ok(())
                }
                Some(limit) => {
                    match sys::select_fd(fd, sys::Interest::Write, Some(limit)) {
                        Err(err) => Err(ConnectError::Select(err)),
                        Ok(ready) if !ready.ready && !ready.error => Err(ConnectError::Timeout),
                        Ok(_) => match sys::take_socket_error(fd) {
                            Ok(()) => {
                                slot.set_state(SocketState::Connected);
                                Ok(())
                            }
                            Err(err) if sys::is_refused(&err) => Err(ConnectError::Refused),
                            Err(err) => Err(ConnectError::Other(err)),
                        },
                    }
                }
            },
            Err(err) => Err(ConnectError::Other(err)),
        });

        if outcome.is_ok() {
            debug!(
                handle = %sock.handle(),
                fd,
                %addr,
                state = %slot.state(),
                "tcp connect"
            );
        }
        outcome
    }

    fn fill(&self, sock: &Socket, io: &mut SocketIo, wanted: usize) -> usize {
        let Some(slot) = sock.slot() else {
            return 0;
        };
        let fd = slot.fd();
        if fd == INVALID_FD {
            return 0;
        }

        let pending = sys::available(fd);
        if pending == Some(0) && wanted == 0 && slot.has_flag(SocketFlags::BLOCKING) {
            // opportunistic refill on a blocking socket would stall
            return 0;
        }

        let result = {
            let chunk = io.rx.writable_chunk();
            if chunk.is_empty() {
                return 0;
            }
            let mut try_read = chunk.len();
            if wanted > 0 {
                try_read = try_read.min(wanted);
            }
            if let Some(pending) = pending
                && pending > try_read
            {
                try_read = chunk.len().min(pending);
            }
            sys::recv(fd, &mut chunk[..try_read]).map(|n| (n, try_read))
        };

        match result {
            Ok((0, _)) => {
                debug!(
                    handle = %sock.handle(),
                    fd,
                    remote = ?io.remote,
                    "remote end closed gracefully"
                );
                sock.post_hangup();
                sock.close(io);
                0
            }
            Ok((n, try_read)) => {
                io.rx.commit(n);
                // The recv was clipped at the end of the ring; when the
                // caller wanted more and the kernel had more, wrap to the
                // front and continue.
                if slot.state() == SocketState::Connected
                    && wanted > try_read
                    && pending.is_some_and(|p| p > try_read)
                    && io.rx.write_offset() == 0
                    && io.rx.read_offset() > 1
                {
                    n + self.fill(sock, io, wanted - try_read)
                } else {
                    n
                }
            }
            Err(err) if sys::is_would_block(&err) => {
                sock.poll_state(io);
                0
            }
            Err(err) => {
                warn!(handle = %sock.handle(), fd, %err, "socket recv failed");
                if sys::is_fatal_transport(&err) {
                    sock.post_hangup();
                    sock.close(io);
                } else {
                    sock.poll_state(io);
                }
                0
            }
        }
    }

    fn drain(&self, sock: &Socket, io: &mut SocketIo) {
        let Some(slot) = sock.slot() else {
            return;
        };
        let fd = slot.fd();
        if fd == INVALID_FD {
            return;
        }
        let mut sent = 0;
        while sent < io.tx.len() {
            match sys::send(fd, &io.tx.as_slice()[sent..]) {
                Ok(0) => {
                    io.tx.consume(sent);
                    return;
                }
                Ok(n) => sent += n,
                Err(err) => {
                    let so_error = sys::take_socket_error(fd).err();
                    if sys::is_would_block(&err) {
                        warn!(
                            handle = %sock.handle(),
                            fd,
                            sent,
                            queued = io.tx.len(),
                            ?so_error,
                            "partial tcp send, queueing reflush"
                        );
                        slot.set_flag(SocketFlags::REFLUSH, true);
                    } else {
                        warn!(handle = %sock.handle(), fd, %err, ?so_error, "socket send failed");
                    }
                    if sys::is_fatal_transport(&err) {
                        sock.post_hangup();
                        sock.close(io);
                    } else if slot.state() != SocketState::NotConnected {
                        sock.poll_state(io);
                    }
                    io.tx.consume(sent);
                    return;
                }
            }
        }
        slot.set_flag(SocketFlags::REFLUSH, false);
        io.tx.clear();
    }
}
