use arrayvec::ArrayVec;

/// Number of response bytes kept, the channel code included. A node that
/// sends more than this without a line feed has its frame cut here.
pub const PAYLOAD_CAPACITY: usize = 31;

/// Fixed capacity store for one response frame.
#[derive(Debug)]
pub struct Buffer {
    data: ArrayVec<u8, PAYLOAD_CAPACITY>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            data: ArrayVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.data.is_full()
    }

    /// Append one byte. Returns `false` without storing it if the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        self.data.try_push(byte).is_ok()
    }
}

impl AsRef<[u8]> for Buffer {
    /// The stored frame, up to the first NUL byte.
    fn as_ref(&self) -> &[u8] {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or_else(|| self.data.len());
        &self.data[..end]
    }
}
