//! Buffers shared between the I/O driver and the state machines.

/// Read and write buffers for one session.
///
/// The driver reads a message into `read_buffer` (payload only, length
/// stripped) and records its type in `type_byte`; a state machine fills
/// `write_buffer` before asking the driver to write.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read
    pub read_buffer: Vec<u8>,
    /// Outgoing messages not yet written
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            type_byte: 0,
        }
    }

    /// Stage a message from the driver's point of view. Used by tests that feed
    /// state machines directly.
    #[cfg(test)]
    pub fn feed(&mut self, type_byte: u8, payload: &[u8]) {
        self.type_byte = type_byte;
        self.read_buffer.clear();
        self.read_buffer.extend_from_slice(payload);
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
