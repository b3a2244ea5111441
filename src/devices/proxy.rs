//! MMIO proxy device: forwards register accesses to an external handler
//! over a character-device backend.
//!
//! The device owns no register state at all. Every access becomes one
//! request/response exchange on the bound chardev (see [`crate::proto`]),
//! and the calling context blocks for the full round trip. Failures never
//! escape to the caller: an access that cannot be serviced logs a
//! diagnostic and falls back to reading zero / dropping the write, so a
//! guest can never take the host down by poking an unbacked region.

use crate::chardev::{CharBackend, SharedChardev};
use crate::devices::MmioDevice;
use crate::err::{ChardevError, MmioError};
use crate::proto::{self, Request};

/// Region size used when none is configured.
pub const DEFAULT_REGION_SIZE: u64 = 0x1000;

pub struct ProxyDevice {
    size: u64,
    chardev: Option<SharedChardev>,
}

impl ProxyDevice {
    /// Creates a proxy region of `size` bytes; 0 selects the 4 KiB
    /// default. The size is fixed for the device's lifetime.
    pub fn new(size: u64) -> Self {
        let size = if size == 0 { DEFAULT_REGION_SIZE } else { size };
        Self {
            size,
            chardev: None,
        }
    }

    /// Attaches the backend that will service accesses. Without one,
    /// every access fails soft.
    pub fn bind_chardev(&mut self, chardev: SharedChardev) {
        self.chardev = Some(chardev);
    }

    /// Locks the binding for one exchange. A poisoned lock is recovered
    /// rather than propagated: the stream carries no cross-access state,
    /// and a register access must not panic the host.
    fn lock_chardev(&self) -> Option<std::sync::MutexGuard<'_, dyn CharBackend + Send + 'static>> {
        let chardev = self.chardev.as_ref()?;
        Some(match chardev.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        })
    }

    /// One complete exchange: the encoded request out, then exactly
    /// `response.len()` bytes back. The caller must hold the binding lock
    /// for the whole call; the protocol has no request IDs, so strict
    /// write-then-read alternation is the only thing keeping responses
    /// matched to requests.
    fn transact(
        chr: &mut (dyn CharBackend + Send),
        request: Request,
        response: &mut [u8],
    ) -> Result<(), ChardevError> {
        chr.write_all(&request.encode())?;
        chr.read_exact(response)
    }
}

impl MmioDevice for ProxyDevice {
    fn read(&mut self, offset: u64, size: usize) -> Result<u64, MmioError> {
        // Bounds are checked on the start address alone; the access width
        // is not considered. A multi-byte read starting just under the
        // region size is forwarded even though it nominally extends past
        // the end.
        if offset >= self.size {
            log::warn!(
                "out-of-bounds read at {offset:#x} (size {:#x})",
                self.size
            );
            return Ok(0);
        }

        let Some(mut chr) = self.lock_chardev() else {
            log::warn!("no chardev connected for read at {offset:#x}");
            return Ok(0);
        };
        if !chr.is_connected() {
            log::warn!("no chardev connected for read at {offset:#x}");
            return Ok(0);
        }

        let mut response = [0u8; proto::MAX_ACCESS_WIDTH];
        let response = &mut response[..size];
        match Self::transact(&mut *chr, Request::read(offset, size), response) {
            Ok(()) => Ok(proto::decode_value(response)),
            Err(err) => {
                log::warn!("failed to read response for addr {offset:#x}: {err}");
                Ok(0)
            }
        }
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) -> Result<(), MmioError> {
        if offset >= self.size {
            log::warn!(
                "out-of-bounds write at {offset:#x} (size {:#x})",
                self.size
            );
            return Ok(());
        }

        let Some(mut chr) = self.lock_chardev() else {
            log::warn!("no chardev connected for write at {offset:#x}");
            return Ok(());
        };
        if !chr.is_connected() {
            log::warn!("no chardev connected for write at {offset:#x}");
            return Ok(());
        }

        // The ack byte's value is not interpreted; only its arrival is.
        // A write whose ack never comes has still been sent: no retry.
        let mut ack = [0u8; proto::ACK_LEN];
        if let Err(err) = Self::transact(&mut *chr, Request::write(offset, size, value), &mut ack) {
            log::warn!("failed to read ack for write at {offset:#x}: {err}");
        }
        Ok(())
    }

    fn reset(&mut self) {
        // Stateless between accesses; the backend owns all register state.
    }

    fn size(&self) -> u64 {
        self.size
    }
}
