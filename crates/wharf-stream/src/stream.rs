use std::time::SystemTime;

/// Byte order applied by the typed accessors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    Begin,
    Current,
    End,
}

/// Contract for a binary byte stream.
///
/// Counts, not errors: `read` and `write` report how many bytes actually
/// moved, which may be less than requested. Implementations that can fail
/// mid-transfer surface the condition through `eos` and their own side
/// channels rather than a per-call error value.
///
/// Sequential implementations (sockets, pipes) reject backwards seeks and
/// report a zero `size`; random-access implementations support the full
/// `SeekMode` set.
pub trait Stream {
    /// Read up to `dst.len()` bytes, returning how many were read.
    fn read(&mut self, dst: &mut [u8]) -> usize;

    /// Write up to `src.len()` bytes, returning how many were accepted.
    fn write(&mut self, src: &[u8]) -> usize;

    /// Push any buffered writes down to the underlying transport.
    fn flush(&mut self) {}

    /// True when nothing more can ever be read.
    fn eos(&mut self) -> bool;

    /// Bytes that a `read` could return without blocking.
    fn available_read(&mut self) -> usize;

    /// Opportunistically pull pending bytes into internal buffers.
    fn buffer_read(&mut self) {}

    /// Discard up to `n` bytes, returning how many were dropped.
    fn skip(&mut self, n: u64) -> u64 {
        let mut scratch = [0_u8; 256];
        let mut left = n;
        while left > 0 {
            let want = scratch.len().min(usize::try_from(left).unwrap_or(usize::MAX));
            let got = self.read(&mut scratch[..want]);
            if got == 0 {
                break;
            }
            left -= got as u64;
        }
        n - left
    }

    /// Reposition the stream. Returns false when the mode or offset is not
    /// supported by this implementation.
    fn seek(&mut self, offset: i64, mode: SeekMode) -> bool;

    /// Current position. For sequential streams this is the cumulative
    /// number of bytes read, which never decreases.
    fn tell(&mut self) -> u64;

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

    fn read_u8(&mut self) -> Option<u8> {
        let mut b = [0_u8; 1];
        (self.read(&mut b) == 1).then(|| b[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        let mut b = [0_u8; 2];
        (self.read(&mut b) == 2).then(|| match self.byte_order() {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn read_u32(&mut self) -> Option<u32> {
        let mut b = [0_u8; 4];
        (self.read(&mut b) == 4).then(|| match self.byte_order() {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    fn read_u64(&mut self) -> Option<u64> {
        let mut b = [0_u8; 8];
        (self.read(&mut b) == 8).then(|| match self.byte_order() {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
        })
    }

    fn write_u8(&mut self, value: u8) -> bool {
        self.write(&[value]) == 1
    }

    fn write_u16(&mut self, value: u16) -> bool {
        let b = match self.byte_order() {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write(&b) == b.len()
    }

    fn write_u32(&mut self, value: u32) -> bool {
        let b = match self.byte_order() {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write(&b) == b.len()
    }

    fn write_u64(&mut self, value: u64) -> bool {
        let b = match self.byte_order() {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        self.write(&b) == b.len()
    }
}
