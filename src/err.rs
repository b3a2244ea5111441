use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("MMIO error: {0}")]
    Mmio(#[from] MmioError),

    #[error("Chardev error: {0}")]
    Chardev(#[from] ChardevError),

    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("General error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Error, Debug, Clone)]
pub enum MmioError {
    #[error("Unmapped memory access at address 0x{0:016x}")]
    UnmappedAccess(u64),

    #[error("Invalid alignment: address 0x{addr:016x} not aligned for {size}-byte access")]
    InvalidAlignment { addr: u64, size: usize },

    #[error("Invalid access size: {size} bytes (must be 1, 2, 4, or 8)")]
    InvalidSize { size: usize },

    #[error(
        "Overlapping MMIO region: new region [0x{new_start:016x}, 0x{new_end:016x}) overlaps with existing region [0x{existing_start:016x}, 0x{existing_end:016x})"
    )]
    OverlappingRegion {
        existing_start: u64,
        existing_end: u64,
        new_start: u64,
        new_end: u64,
    },
}

// Helper constructor for the overlapping region error
impl MmioError {
    pub fn overlapping_region(existing: (u64, u64), new: (u64, u64)) -> Self {
        Self::OverlappingRegion {
            existing_start: existing.0,
            existing_end: existing.1,
            new_start: new.0,
            new_end: new.1,
        }
    }
}

/// Errors reported by a character-device backend.
///
/// The proxy device absorbs all of these at its access boundary; callers
/// only see them when driving a chardev directly.
#[derive(Error, Debug)]
pub enum ChardevError {
    #[error("chardev backend disconnected")]
    Disconnected,

    #[error("short read: got {got} of {expected} bytes")]
    ShortRead { got: usize, expected: usize },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    #[error("chardev I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum ProtoError {
    #[error("unknown operation code {0:#04x}")]
    UnknownOp(u8),

    #[error("invalid access width {0} (must be 1-8)")]
    InvalidWidth(u8),
}
