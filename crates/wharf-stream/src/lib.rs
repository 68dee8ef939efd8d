mod memory;
mod stream;

pub use memory::MemoryStream;
pub use stream::{ByteOrder, SeekMode, Stream};
