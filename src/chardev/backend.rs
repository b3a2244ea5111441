use std::sync::{Arc, Mutex};

use crate::err::ChardevError;

/// A connected character-device backend: a bidirectional byte stream with
/// blocking writes and blocking reads-of-exact-length.
///
/// The proxy device is the only required consumer and it asks for nothing
/// beyond these three calls. Framing, connection setup, and reconnection
/// are the backend's own business.
pub trait CharBackend {
    /// Writes the whole buffer, blocking until every byte is accepted.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), ChardevError>;

    /// Fills the whole buffer, blocking until `buf.len()` bytes have
    /// arrived. A stream that ends first reports a short read; the buffer
    /// contents are unspecified on failure.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ChardevError>;

    /// Whether the backend currently has a live peer.
    fn is_connected(&self) -> bool;
}

/// A chardev binding shared between a device and its owner.
///
/// The mutex doubles as the exchange lock: whoever performs a
/// request/response round trip holds it for the full write-then-read, so
/// two accesses can never interleave their bytes on one stream.
pub type SharedChardev = Arc<Mutex<dyn CharBackend + Send>>;

/// Wraps a backend into a [`SharedChardev`] binding.
pub fn shared<C: CharBackend + Send + 'static>(backend: C) -> SharedChardev {
    Arc::new(Mutex::new(backend))
}
