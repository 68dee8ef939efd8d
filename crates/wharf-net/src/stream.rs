use std::{sync::Arc, time::SystemTime};

use tracing::{error, warn};
use wharf_stream::{ByteOrder, SeekMode, Stream};

use crate::{
    base::{SocketFlags, SocketState},
    handle::Handle,
    runtime::Network,
    sys::{self, INVALID_FD},
};

/// Sequential, binary, read+write byte-stream view of one socket, little
/// endian by contract.
///
/// The stream holds the handle, never the record: every operation resolves
/// it through the handle table, so a stream that outlives its socket
/// simply degrades to a closed stream (reads return 0, `eos` is true).
pub struct SocketStream {
    net: Arc<Network>,
    handle: Handle,
}

impl SocketStream {
    pub(crate) fn new(net: Arc<Network>, handle: Handle) -> Self {
        Self { net, handle }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Shared read path. `dst == None` discards, which is how forward
    /// seeking is implemented.
    fn read_into(&mut self, mut dst: Option<&mut [u8]>, size: usize) -> usize {
        let Some(sock) = self.net.record(self.handle) else {
            return 0;
        };
        let Some(slot) = sock.slot() else {
            return 0;
        };
        let polled = slot.has_flag(SocketFlags::POLLED);
        let blocking = slot.has_flag(SocketFlags::BLOCKING);

        // Re-arm read events: a poll/read/poll cycle over the same buffered
        // bytes must fire again.
        slot.clear_last_event();

        let mut io = sock.io();
        if !matches!(slot.state(), SocketState::Connected | SocketState::Disconnected) {
            return 0;
        }
        if size == 0 {
            return 0;
        }

        let mut was_read = 0;
        let mut rounds = 0;
        loop {
            let mut progressed = false;
            loop {
                let copied = {
                    let chunk = io.rx.readable_chunk();
                    let copy = chunk.len().min(size - was_read);
                    if copy > 0
                        && let Some(dst) = dst.as_deref_mut()
                    {
                        dst[was_read..was_read + copy].copy_from_slice(&chunk[..copy]);
                    }
                    copy
                };
                if copied == 0 {
                    break;
                }
                io.rx.consume(copied);
                was_read += copied;
                progressed = true;
            }
            if was_read == size {
                break;
            }
            // In polled non-blocking mode the external poller owns the
            // recv; everyone else pulls from the OS here.
            if blocking || !polled {
                progressed |= sock.protocol().fill(&sock, &mut io, size - was_read) > 0;
            }
            if !progressed {
                rounds += 1;
                if rounds >= 2 {
                    break;
                }
            }
        }

        if was_read < size {
            if was_read > 0 {
                warn!(
                    handle = %self.handle,
                    got = was_read,
                    wanted = size,
                    "partial socket read"
                );
            }
            sock.poll_state(&mut io);
        }
        io.bytes_read += was_read as u64;
        was_read
    }
}

impl Stream for SocketStream {
    fn read(&mut self, dst: &mut [u8]) -> usize {
        let size = dst.len();
        self.read_into(Some(dst), size)
    }

    fn write(&mut self, src: &[u8]) -> usize {
        let Some(sock) = self.net.record(self.handle) else {
            return 0;
        };
        let Some(slot) = sock.slot() else {
            return 0;
        };
        let mut io = sock.io();
        if slot.state() != SocketState::Connected || src.is_empty() {
            return 0;
        }

        let mut written = 0;
        loop {
            written += io.tx.push(&src[written..]);
            if written == src.len() {
                // Filling the buffer to exactly capacity flushes once.
                if io.tx.is_full() {
                    sock.flush_out(&mut io);
                }
                break;
            }
            sock.flush_out(&mut io);
            if slot.state() != SocketState::Connected {
                warn!(
                    handle = %self.handle,
                    written,
                    wanted = src.len(),
                    "partial socket write"
                );
                break;
            }
            if io.tx.is_full() {
                // the flush made no progress; the kernel is backed up
                break;
            }
        }
        io.bytes_written += written as u64;
        written
    }

    fn flush(&mut self) {
        if let Some(sock) = self.net.record(self.handle) {
            let mut io = sock.io();
            sock.flush_out(&mut io);
        }
    }

    fn eos(&mut self) -> bool {
        let Some(sock) = self.net.record(self.handle) else {
            return true;
        };
        if sock.slot().is_none() {
            return true;
        }
        let mut io = sock.io();
        let state = sock.poll_state(&mut io);
        (state != SocketState::Connected || sock.fd() == INVALID_FD) &&
            sock.available_nonblock(&io) == 0
    }

    fn available_read(&mut self) -> usize {
        let Some(sock) = self.net.record(self.handle) else {
            return 0;
        };
        if sock.slot().is_none() {
            return 0;
        }
        let io = sock.io();
        sock.available_nonblock(&io)
    }

    fn buffer_read(&mut self) {
        let Some(sock) = self.net.record(self.handle) else {
            return;
        };
        let Some(slot) = sock.slot() else {
            return;
        };
        if slot.state() != SocketState::Connected ||
            slot.has_flag(SocketFlags::POLLED) ||
            slot.fd() == INVALID_FD
        {
            return;
        }
        let mut io = sock.io();
        if io.rx.is_full() {
            return;
        }
        if let Some(pending) = sys::available(slot.fd())
            && pending > 0
        {
            sock.protocol().fill(&sock, &mut io, pending);
        }
    }

    fn skip(&mut self, n: u64) -> u64 {
        let size = usize::try_from(n).unwrap_or(usize::MAX);
        self.read_into(None, size) as u64
    }

    fn seek(&mut self, offset: i64, mode: SeekMode) -> bool {
        if mode != SeekMode::Current || offset < 0 {
            error!(handle = %self.handle, "only forward seeking is allowed on sockets");
            return false;
        }
        self.skip(offset as u64);
        true
    }

    /// Cumulative bytes read; never decreases.
    fn tell(&mut self) -> u64 {
        self.net.record(self.handle).map_or(0, |sock| sock.io().bytes_read)
    }

    fn size(&mut self) -> u64 {
        0
    }

    fn truncate(&mut self, _size: u64) {}

    fn last_modified(&mut self) -> SystemTime {
        SystemTime::now()
    }

    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Little
    }

    fn is_sequential(&self) -> bool {
        true
    }
}
