//! Dual-role configuration register layout and window access.
//!
//! The mux is controlled through two 32-bit registers inside the device's
//! memory-mapped block. `CFG0` carries the software override bits and `CFG1`
//! reports which controller currently owns the data lines. Platforms provide
//! a [`RegisterWindow`] implementation; everything above it only speaks in
//! terms of [`Cfg0`] / [`Cfg1`] values.

use core::fmt;

use crate::arbiter::MuxTarget;

/// Offset of the dual-role control register.
pub const DUAL_ROLE_CFG0: usize = 0x68;
/// Offset of the dual-role status register.
pub const DUAL_ROLE_CFG1: usize = 0x6c;

/// `CFG0`: vbus-valid override value.
pub const SW_VBUS_VALID: u32 = 1 << 24;
/// `CFG0`: hand mux control to software instead of firmware.
pub const SW_IDPIN_EN: u32 = 1 << 21;
/// `CFG0`: idpin override value.
pub const SW_IDPIN: u32 = 1 << 20;

/// `CFG1`: host controller owns the data lines.
pub const HOST_MODE: u32 = 1 << 29;

/// Smallest window that still covers both registers.
pub const MIN_WINDOW_SIZE: usize = DUAL_ROLE_CFG1 + 4;

/// Exclusive access to the mapped register block.
///
/// Implementations own the mapping for as long as they live and release it on
/// drop. Offsets are byte offsets from the start of the window.
pub trait RegisterWindow {
    /// Reads the 32-bit register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Writes the 32-bit register at `offset`.
    fn write32(&mut self, offset: usize, value: u32);

    /// Size of the mapped window in bytes.
    fn size(&self) -> usize {
        MIN_WINDOW_SIZE
    }
}

impl<W: RegisterWindow + ?Sized> RegisterWindow for &mut W {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }

    fn size(&self) -> usize {
        (**self).size()
    }
}

/// Raw `CFG0` value with typed accessors for the override bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cfg0(pub u32);

impl Cfg0 {
    /// Returns `true` once software owns the mux.
    #[must_use]
    pub const fn software_control(self) -> bool {
        self.0 & SW_IDPIN_EN != 0
    }

    /// Returns a copy with the software override latched on.
    #[must_use]
    pub const fn with_software_control(self) -> Self {
        Self(self.0 | SW_IDPIN_EN)
    }

    /// Returns a copy with the idpin / vbus-valid bits replaced by `target`.
    ///
    /// All other bits, including the override enable, are preserved.
    #[must_use]
    pub const fn with_target(self, target: MuxTarget) -> Self {
        let mut raw = self.0 & !(SW_IDPIN | SW_VBUS_VALID);
        if target.id_pin {
            raw |= SW_IDPIN;
        }
        if target.vbus_valid {
            raw |= SW_VBUS_VALID;
        }
        Self(raw)
    }

    /// Override bits currently latched, if software owns the mux.
    #[must_use]
    pub const fn target(self) -> Option<MuxTarget> {
        if self.software_control() {
            Some(MuxTarget::new(
                self.0 & SW_IDPIN != 0,
                self.0 & SW_VBUS_VALID != 0,
            ))
        } else {
            None
        }
    }
}

/// Raw `CFG1` value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cfg1(pub u32);

impl Cfg1 {
    /// Returns `true` when the host controller owns the data lines.
    #[must_use]
    pub const fn host_mode_active(self) -> bool {
        self.0 & HOST_MODE != 0
    }

    /// Returns `true` when the reported role matches `target`.
    ///
    /// `idpin` set means device intent, so host mode must be inactive.
    #[must_use]
    pub const fn confirms(self, target: MuxTarget) -> bool {
        self.host_mode_active() != target.id_pin
    }
}

/// Snapshot of both registers, used by the `dumpregs` debug command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterDump {
    pub cfg0: u32,
    pub cfg1: u32,
}

impl RegisterDump {
    /// Reads both registers from `window`.
    pub fn capture<W: RegisterWindow + ?Sized>(window: &W) -> Self {
        Self {
            cfg0: window.read32(DUAL_ROLE_CFG0),
            cfg1: window.read32(DUAL_ROLE_CFG1),
        }
    }
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mux cfg {:08x} {:08x}", self.cfg0, self.cfg1)
    }
}
