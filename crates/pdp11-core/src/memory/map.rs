//! I/O page device registry and first-match dispatch.

use std::fmt;

use tracing::{event, Level};

use crate::interrupt::{InterruptRequests, IrqLine};
use crate::memory::{is_iopage, AccessKind, PhysAddr};
use crate::{BusError, ConfigError};

/// Bus contract implemented by every device on the I/O page.
///
/// Addresses are full 22-bit physical addresses. Word and console references
/// are always even; byte references carry the address of the byte.
pub trait IoDevice {
    /// Short device name used in diagnostics.
    fn name(&self) -> &str;

    /// Returns `false` to stop decoding addresses without unregistering.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Reads the word containing `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the device cannot complete the cycle; the
    /// engine turns this into a non-existent memory trap.
    fn read(
        &mut self,
        addr: PhysAddr,
        kind: AccessKind,
        irq: &mut InterruptRequests,
    ) -> Result<u16, BusError>;

    /// Writes `value` at `addr`.
    ///
    /// For [`AccessKind::Byte`] the byte is in the low eight bits of `value`
    /// and the low address bit selects the target half.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the device cannot complete the cycle.
    fn write(
        &mut self,
        addr: PhysAddr,
        value: u16,
        kind: AccessKind,
        irq: &mut InterruptRequests,
    ) -> Result<(), BusError>;

    /// Interrupt acknowledge: called when the CPU takes `line`.
    ///
    /// Returning `Some(vector)` overrides the vector registered for the line.
    fn acknowledge(&mut self, line: IrqLine) -> Option<u16> {
        let _ = line;
        None
    }

    /// Bus reset (`RESET` instruction or power-up).
    fn reset(&mut self, irq: &mut InterruptRequests) {
        let _ = irq;
    }
}

/// Handle of a device registered with an [`IoPageRouter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceId(usize);

impl DeviceId {
    /// Registration index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Cpu(&'static str),
    Device(DeviceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    low: PhysAddr,
    high: PhysAddr,
    owner: Owner,
}

impl Mapping {
    const fn contains(self, addr: PhysAddr) -> bool {
        addr >= self.low && addr <= self.high
    }

    const fn overlaps(self, low: PhysAddr, high: PhysAddr) -> bool {
        low <= self.high && self.low <= high
    }
}

/// Ordered registry of I/O page ranges.
///
/// Ranges owned by the CPU are reserved so devices cannot shadow them; the
/// CPU serves those addresses itself before consulting the router.
#[derive(Default)]
pub struct IoPageRouter {
    devices: Vec<Box<dyn IoDevice>>,
    mappings: Vec<Mapping>,
}

impl IoPageRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `low..=high` for CPU-internal registers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed or overlapping range.
    pub fn reserve(
        &mut self,
        low: PhysAddr,
        high: PhysAddr,
        owner: &'static str,
    ) -> Result<(), ConfigError> {
        self.check_range(low, high)?;
        self.mappings.push(Mapping {
            low,
            high,
            owner: Owner::Cpu(owner),
        });
        Ok(())
    }

    /// Registers `device` for the inclusive byte range `low..=high`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedRange`] when `low` is odd, `low > high`
    /// or either bound lies outside the I/O page, and
    /// [`ConfigError::OverlappingRange`] when the range collides with an
    /// existing registration.
    pub fn register(
        &mut self,
        low: PhysAddr,
        high: PhysAddr,
        device: Box<dyn IoDevice>,
    ) -> Result<DeviceId, ConfigError> {
        self.check_range(low, high)?;
        let id = DeviceId(self.devices.len());
        event!(
            Level::DEBUG,
            device = device.name(),
            "registered I/O page range {low:o}..={high:o}"
        );
        self.devices.push(device);
        self.mappings.push(Mapping {
            low,
            high,
            owner: Owner::Device(id),
        });
        Ok(id)
    }

    fn check_range(&self, low: PhysAddr, high: PhysAddr) -> Result<(), ConfigError> {
        if low & 1 != 0 || low > high || !is_iopage(low) || !is_iopage(high) {
            return Err(ConfigError::MalformedRange { low, high });
        }
        if let Some(existing) = self.mappings.iter().find(|m| m.overlaps(low, high)) {
            return Err(ConfigError::OverlappingRange {
                low,
                high,
                existing: self.owner_name(existing.owner).to_owned(),
            });
        }
        Ok(())
    }

    fn owner_name(&self, owner: Owner) -> &str {
        match owner {
            Owner::Cpu(name) => name,
            Owner::Device(id) => self.devices.get(id.0).map_or("?", |d| d.name()),
        }
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Returns the registered device `id`.
    #[must_use]
    pub fn device(&self, id: DeviceId) -> Option<&dyn IoDevice> {
        self.devices.get(id.0).map(AsRef::as_ref)
    }

    /// Returns the registered device `id` mutably.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut (dyn IoDevice + 'static)> {
        self.devices.get_mut(id.0).map(AsMut::as_mut)
    }

    /// Resolves `addr` to the first enabled device whose range contains it.
    #[must_use]
    pub fn decode(&self, addr: PhysAddr) -> Option<DeviceId> {
        self.mappings.iter().find_map(|m| match m.owner {
            Owner::Device(id) if m.contains(addr) && self.devices[id.0].is_enabled() => Some(id),
            _ => None,
        })
    }

    /// Reads the word at `addr` (even) from the decoding device.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NonExistent`] when no enabled device decodes the
    /// address, or the device's own failure.
    pub fn read_word(
        &mut self,
        addr: PhysAddr,
        kind: AccessKind,
        irq: &mut InterruptRequests,
    ) -> Result<u16, BusError> {
        let id = self.decode(addr).ok_or(BusError::NonExistent { addr })?;
        self.devices[id.0].read(addr & !1, kind, irq)
    }

    /// Reads the byte at `addr` by reading its word and selecting the half.
    ///
    /// # Errors
    ///
    /// See [`Self::read_word`].
    pub fn read_byte(&mut self, addr: PhysAddr, irq: &mut InterruptRequests) -> Result<u8, BusError> {
        let [lo, hi] = self.read_word(addr, AccessKind::Byte, irq)?.to_le_bytes();
        Ok(if addr & 1 == 0 { lo } else { hi })
    }

    /// Writes to the decoding device.
    ///
    /// # Errors
    ///
    /// See [`Self::read_word`].
    pub fn write(
        &mut self,
        addr: PhysAddr,
        value: u16,
        kind: AccessKind,
        irq: &mut InterruptRequests,
    ) -> Result<(), BusError> {
        let id = self.decode(addr).ok_or(BusError::NonExistent { addr })?;
        let addr = if kind.is_byte() { addr } else { addr & !1 };
        self.devices[id.0].write(addr, value, kind, irq)
    }

    /// Forwards an interrupt acknowledge to device `id`.
    pub fn acknowledge(&mut self, id: DeviceId, line: IrqLine) -> Option<u16> {
        self.devices.get_mut(id.0)?.acknowledge(line)
    }

    /// Broadcasts bus reset to every device in registration order.
    pub fn reset_all(&mut self, irq: &mut InterruptRequests) {
        for device in &mut self.devices {
            device.reset(irq);
        }
    }
}

impl fmt::Debug for IoPageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for mapping in &self.mappings {
            list.entry(&format_args!(
                "{:o}..={:o} {}",
                mapping.low,
                mapping.high,
                self.owner_name(mapping.owner)
            ));
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::{IoDevice, IoPageRouter};
    use crate::interrupt::{InterruptRequests, IrqLine};
    use crate::memory::{AccessKind, PhysAddr};
    use crate::{BusError, ConfigError};

    struct Latch {
        name: &'static str,
        value: u16,
        enabled: Rc<Cell<bool>>,
        resets: Rc<Cell<u32>>,
    }

    impl Latch {
        fn boxed(name: &'static str, value: u16) -> Box<Self> {
            Box::new(Self {
                name,
                value,
                enabled: Rc::new(Cell::new(true)),
                resets: Rc::new(Cell::new(0)),
            })
        }
    }

    impl IoDevice for Latch {
        fn name(&self) -> &str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            self.enabled.get()
        }

        fn read(
            &mut self,
            _addr: PhysAddr,
            _kind: AccessKind,
            _irq: &mut InterruptRequests,
        ) -> Result<u16, BusError> {
            Ok(self.value)
        }

        fn write(
            &mut self,
            _addr: PhysAddr,
            value: u16,
            _kind: AccessKind,
            _irq: &mut InterruptRequests,
        ) -> Result<(), BusError> {
            self.value = value;
            Ok(())
        }

        fn acknowledge(&mut self, _line: IrqLine) -> Option<u16> {
            Some(0o300)
        }

        fn reset(&mut self, _irq: &mut InterruptRequests) {
            self.resets.set(self.resets.get() + 1);
        }
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        let mut router = IoPageRouter::new();
        for (low, high) in [
            (0o17_777_561, 0o17_777_567),
            (0o17_777_570, 0o17_777_560),
            (0o157_776, 0o160_000),
            (0o17_777_776, 0o20_000_000),
        ] {
            assert_eq!(
                router.register(low, high, Latch::boxed("tt", 0)).err(),
                Some(ConfigError::MalformedRange { low, high })
            );
        }
        assert!(router.is_empty());
    }

    #[test]
    fn overlaps_name_the_existing_owner() {
        let mut router = IoPageRouter::new();
        router
            .reserve(0o17_777_776, 0o17_777_777, "psw")
            .expect("free range");
        router
            .register(0o17_777_560, 0o17_777_567, Latch::boxed("tt", 0))
            .expect("free range");

        assert_eq!(
            router.register(0o17_777_566, 0o17_777_571, Latch::boxed("lp", 0)),
            Err(ConfigError::OverlappingRange {
                low: 0o17_777_566,
                high: 0o17_777_571,
                existing: "tt".to_owned(),
            })
        );
        assert!(matches!(
            router.register(0o17_777_776, 0o17_777_777, Latch::boxed("lp", 0)),
            Err(ConfigError::OverlappingRange { existing, .. }) if existing == "psw"
        ));
    }

    #[test]
    fn dispatch_skips_disabled_devices_and_reports_non_existent() {
        let mut router = IoPageRouter::new();
        let mut irq = InterruptRequests::new();
        let device = Latch::boxed("tt", 0o123_456);
        let enabled = Rc::clone(&device.enabled);
        router
            .register(0o17_777_560, 0o17_777_567, device)
            .expect("free range");

        assert_eq!(
            router.read_word(0o17_777_562, AccessKind::Word, &mut irq),
            Ok(0o123_456)
        );
        assert_eq!(router.read_byte(0o17_777_563, &mut irq), Ok(0o247));

        enabled.set(false);
        assert_eq!(
            router.read_word(0o17_777_562, AccessKind::Word, &mut irq),
            Err(BusError::NonExistent {
                addr: 0o17_777_562
            })
        );
        assert_eq!(
            router.read_word(0o17_770_000, AccessKind::Word, &mut irq),
            Err(BusError::NonExistent {
                addr: 0o17_770_000
            })
        );
    }

    #[test]
    fn reset_and_acknowledge_reach_devices() {
        let mut router = IoPageRouter::new();
        let mut irq = InterruptRequests::new();
        let device = Latch::boxed("tt", 0);
        let resets = Rc::clone(&device.resets);
        let id = router
            .register(0o17_777_560, 0o17_777_567, device)
            .expect("free range");

        router.reset_all(&mut irq);
        router.reset_all(&mut irq);
        assert_eq!(resets.get(), 2);

        let line = IrqLine::new(4, 3).expect("valid line");
        assert_eq!(router.acknowledge(id, line), Some(0o300));
        assert_eq!(router.device(id).map(|d| d.name()), Some("tt"));
        assert!(format!("{router:?}").contains("17777560..=17777567 tt"));
    }
}
