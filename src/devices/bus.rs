use std::collections::BTreeMap;

use crate::err::MmioError;

/// An emulated memory-mapped device.
///
/// Offsets are relative to the device's own base; the bus has already
/// validated the access width (power of two, 1-8 bytes) and its natural
/// alignment before a device method runs.
pub trait MmioDevice {
    fn read(&mut self, offset: u64, size: usize) -> Result<u64, MmioError>;
    fn write(&mut self, offset: u64, size: usize, value: u64) -> Result<(), MmioError>;
    fn reset(&mut self);
    fn size(&self) -> u64;
}

struct Mapping {
    base: u64,
    size: u64,
    device: Box<dyn MmioDevice>,
}

/// Dispatches guest accesses to registered devices by address.
#[derive(Default)]
pub struct MmioBus {
    mappings: BTreeMap<u64, Mapping>, // Sorted by base address
}

impl MmioBus {
    pub fn register_device(
        &mut self,
        base: u64,
        device: Box<dyn MmioDevice>,
    ) -> Result<(), MmioError> {
        let size = device.size();

        if let Some(existing) = self.overlap_with(base, size) {
            return Err(MmioError::overlapping_region(existing, (base, base + size)));
        }

        self.mappings.insert(base, Mapping { base, size, device });
        Ok(())
    }

    pub fn read(&mut self, addr: u64, size: usize) -> Result<u64, MmioError> {
        log::debug!("Read from {addr:#0x} of size {size}");
        let (device, offset) = self.resolve(addr, size)?;
        device.read(offset, size)
    }

    pub fn write(&mut self, addr: u64, size: usize, value: u64) -> Result<(), MmioError> {
        log::debug!("Write {value} to {addr:#0x} of size {size}");
        let (device, offset) = self.resolve(addr, size)?;
        device.write(offset, size, value)
    }

    pub fn reset_all(&mut self) {
        for mapping in self.mappings.values_mut() {
            mapping.device.reset();
        }
    }

    /// Validates the access shape and maps an absolute address onto the
    /// owning device and its region-relative offset.
    fn resolve(
        &mut self,
        addr: u64,
        size: usize,
    ) -> Result<(&mut dyn MmioDevice, u64), MmioError> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(MmioError::InvalidSize { size });
        }
        if addr & (size as u64 - 1) != 0 {
            return Err(MmioError::InvalidAlignment { addr, size });
        }

        let mapping = self
            .mappings
            .range_mut(..=addr)
            .next_back()
            .map(|(_, mapping)| mapping)
            .filter(|mapping| addr < mapping.base + mapping.size)
            .ok_or(MmioError::UnmappedAccess(addr))?;

        let offset = addr - mapping.base;
        if offset + size as u64 > mapping.size {
            return Err(MmioError::UnmappedAccess(addr));
        }
        Ok((mapping.device.as_mut(), offset))
    }

    /// Finds an already-registered region overlapping `[base, base+size)`,
    /// O(log n).
    fn overlap_with(&self, base: u64, size: u64) -> Option<(u64, u64)> {
        let new_end = base + size;

        if let Some((_, mapping)) = self.mappings.range(base..).next() {
            if mapping.base < new_end {
                return Some((mapping.base, mapping.base + mapping.size));
            }
        }

        if let Some((_, mapping)) = self.mappings.range(..base).next_back() {
            let existing_end = mapping.base + mapping.size;
            if existing_end > base {
                return Some((mapping.base, existing_end));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eight bytes of plain storage, for exercising the bus.
    struct ScratchDevice {
        bytes: [u8; 8],
    }

    impl ScratchDevice {
        fn new() -> Self {
            Self { bytes: [0; 8] }
        }
    }

    impl MmioDevice for ScratchDevice {
        fn read(&mut self, offset: u64, size: usize) -> Result<u64, MmioError> {
            let mut raw = [0u8; 8];
            raw[..size].copy_from_slice(&self.bytes[offset as usize..offset as usize + size]);
            Ok(u64::from_le_bytes(raw))
        }

        fn write(&mut self, offset: u64, size: usize, value: u64) -> Result<(), MmioError> {
            self.bytes[offset as usize..offset as usize + size]
                .copy_from_slice(&value.to_le_bytes()[..size]);
            Ok(())
        }

        fn reset(&mut self) {
            self.bytes = [0; 8];
        }

        fn size(&self) -> u64 {
            8
        }
    }

    #[test]
    fn test_dispatch_uses_region_relative_offsets() {
        let mut bus = MmioBus::default();
        bus.register_device(0x1000, Box::new(ScratchDevice::new()))
            .unwrap();

        bus.write(0x1004, 4, 0xCAFE_F00D).unwrap();
        assert_eq!(bus.read(0x1004, 4).unwrap(), 0xCAFE_F00D);
        assert_eq!(bus.read(0x1000, 4).unwrap(), 0);
    }

    #[test]
    fn test_unmapped_and_straddling_accesses_fail() {
        let mut bus = MmioBus::default();
        bus.register_device(0x1000, Box::new(ScratchDevice::new()))
            .unwrap();

        assert!(matches!(
            bus.read(0x2000, 4),
            Err(MmioError::UnmappedAccess(0x2000))
        ));
        // Aligned, starts inside the region, but runs past its end.
        assert!(matches!(
            bus.read(0x1008, 8),
            Err(MmioError::UnmappedAccess(0x1008))
        ));
    }

    #[test]
    fn test_access_shape_is_validated() {
        let mut bus = MmioBus::default();
        bus.register_device(0x1000, Box::new(ScratchDevice::new()))
            .unwrap();

        assert!(matches!(
            bus.read(0x1000, 3),
            Err(MmioError::InvalidSize { size: 3 })
        ));
        assert!(matches!(
            bus.read(0x1002, 4),
            Err(MmioError::InvalidAlignment { addr: 0x1002, size: 4 })
        ));
    }

    #[test]
    fn test_overlapping_registration_is_rejected() {
        let mut bus = MmioBus::default();
        bus.register_device(0x1000, Box::new(ScratchDevice::new()))
            .unwrap();

        assert!(matches!(
            bus.register_device(0x1004, Box::new(ScratchDevice::new())),
            Err(MmioError::OverlappingRegion { .. })
        ));
        bus.register_device(0x1008, Box::new(ScratchDevice::new()))
            .unwrap();
    }

    #[test]
    fn test_reset_all_reaches_devices() {
        let mut bus = MmioBus::default();
        bus.register_device(0x0, Box::new(ScratchDevice::new()))
            .unwrap();

        bus.write(0x0, 8, u64::MAX).unwrap();
        bus.reset_all();
        assert_eq!(bus.read(0x0, 8).unwrap(), 0);
    }
}
