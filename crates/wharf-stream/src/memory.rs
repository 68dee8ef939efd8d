use std::time::SystemTime;

use crate::stream::{ByteOrder, SeekMode, Stream};

/// Growable in-memory stream with full random access.
///
/// Writes past the end extend the buffer; writes inside it overwrite in
/// place. Useful as a staging area for generic stream consumers and as the
/// reference implementation of the [`Stream`] contract.
#[derive(Debug, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
    order: ByteOrder,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_order(order: ByteOrder) -> Self {
        Self { order, ..Self::default() }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, ..Self::default() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Stream for MemoryStream {
    fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.data.len() - self.pos);
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn write(&mut self, src: &[u8]) -> usize {
        let overlap = (self.data.len() - self.pos).min(src.len());
        self.data[self.pos..self.pos + overlap].copy_from_slice(&src[..overlap]);
        self.data.extend_from_slice(&src[overlap..]);
        self.pos += src.len();
        src.len()
    }

    fn eos(&mut self) -> bool {
        self.pos >= self.data.len()
    }

    fn available_read(&mut self) -> usize {
        self.data.len() - self.pos
    }

    fn seek(&mut self, offset: i64, mode: SeekMode) -> bool {
        let base = match mode {
            SeekMode::Begin => 0_i64,
            SeekMode::Current => self.pos as i64,
            SeekMode::End => self.data.len() as i64,
        };
        let Some(target) = base.checked_add(offset) else {
            return false;
        };
        if target < 0 {
            return false;
        }
        self.pos = (target as usize).min(self.data.len());
        true
    }

    fn tell(&mut self) -> u64 {
        self.pos as u64
    }

    fn size(&mut self) -> u64 {
        self.data.len() as u64
    }

    fn truncate(&mut self, size: u64) {
        self.data.truncate(usize::try_from(size).unwrap_or(usize::MAX));
        self.pos = self.pos.min(self.data.len());
    }

    fn last_modified(&mut self) -> SystemTime {
        SystemTime::now()
    }

    fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn is_sequential(&self) -> bool {
        false
    }
}
