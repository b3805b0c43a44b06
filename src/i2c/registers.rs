// Licensed under the Apache-2.0 license

//! AM335x I2C register map and raw register accessors.
//!
//! Offsets are relative to the base of one I2C module. The accessors perform
//! exactly one 32-bit volatile access per call and never retry or buffer.
//!
//! Some registers have side effects the accessor does not hide:
//! - `IRQSTATUS` is write-one-to-clear.
//! - Reading `DATA` pops the receive path.
//! - Devices behind the bus may latch multi-byte values on the first read
//!   (for example a FIFO count high byte must be read before the low byte).
//!   Respecting such ordering is the caller's job.

use bitflags::bitflags;
use core::ptr::NonNull;

pub const I2C_SYSC: usize = 0x10;
pub const I2C_IRQSTATUS_RAW: usize = 0x24;
pub const I2C_IRQSTATUS: usize = 0x28;
pub const I2C_IRQENABLE_SET: usize = 0x2C;
pub const I2C_IRQENABLE_CLR: usize = 0x30;
pub const I2C_SYSS: usize = 0x90;
pub const I2C_BUF: usize = 0x94;
pub const I2C_CNT: usize = 0x98;
pub const I2C_DATA: usize = 0x9C;
pub const I2C_CON: usize = 0xA4;
pub const I2C_OA: usize = 0xA8;
pub const I2C_SA: usize = 0xAC;
pub const I2C_PSC: usize = 0xB0;
pub const I2C_SCLL: usize = 0xB4;
pub const I2C_SCLH: usize = 0xB8;

/// Size of one I2C module register window.
pub const I2C_MAP_SIZE: usize = 0x1000;

/// Clock manager (`CM_PER`) base and window size. `CM_WKUP` lives inside the
/// same window at offset 0x400.
pub const CM_PER_BASE: usize = 0x44E0_0000;
pub const CM_MAP_SIZE: usize = 0x1000;

/// Write-one-to-clear value covering every `IRQSTATUS` event.
pub const IRQ_CLEAR_ALL: u32 = 0xFFFF;

bitflags! {
    /// `I2C_CON` control bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Con: u32 {
        const EN = 1 << 15;
        const MST = 1 << 10;
        const TRX = 1 << 9;
        const STP = 1 << 1;
        const STT = 1 << 0;
    }

    /// Event bits shared by `IRQSTATUS_RAW`, `IRQSTATUS` and `IRQENABLE_SET`.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Irq: u32 {
        /// Arbitration lost
        const AL = 1 << 0;
        /// No acknowledge
        const NACK = 1 << 1;
        /// Register access ready: programmed count done, STOP issued
        const ARDY = 1 << 2;
        /// Receive data ready
        const RRDY = 1 << 3;
        /// Transmit data ready
        const XRDY = 1 << 4;
        /// Bus busy
        const BB = 1 << 12;
    }

    /// `I2C_SYSC` bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Sysc: u32 {
        const SOFTRESET = 1 << 1;
    }

    /// `I2C_SYSS` bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Syss: u32 {
        const RDONE = 1 << 0;
    }
}

impl Irq {
    /// Events the transfer state machine is driven by.
    pub const TRANSFER_EVENTS: Self = Self::XRDY
        .union(Self::RRDY)
        .union(Self::ARDY)
        .union(Self::NACK)
        .union(Self::AL);

    /// Events that terminate a transaction with an error.
    pub const FAULTS: Self = Self::NACK.union(Self::AL);
}

/// Raw 32-bit register access at a byte offset.
///
/// Takes `&self` because the same register block is touched from thread
/// context and from the interrupt handler. No offset validation is done.
pub trait RegisterAccess {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);

    fn modify<F>(&self, offset: usize, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value);
    }
}

/// Memory-mapped register window accessed with volatile loads and stores.
pub struct MmioRegisters {
    base: NonNull<u8>,
}

// SAFETY: every access is a single aligned volatile word access to device
// memory; the window itself is never dereferenced as a Rust object.
unsafe impl Send for MmioRegisters {}
// SAFETY: see above.
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Wrap an already mapped register window.
    ///
    /// Returns `None` for a null base.
    ///
    /// # Safety
    ///
    /// `base` must point to a device register window that stays mapped for the
    /// lifetime of the returned value, and every offset later passed to
    /// `read`/`write` must be a word-aligned register inside that window.
    #[must_use]
    pub unsafe fn new(base: *mut u8) -> Option<Self> {
        NonNull::new(base).map(|base| Self { base })
    }

    #[must_use]
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn reg(&self, offset: usize) -> *mut u32 {
        self.base.as_ptr().wrapping_add(offset).cast::<u32>()
    }
}

impl RegisterAccess for MmioRegisters {
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: validity of the window and offset is guaranteed by the
        // contract of `MmioRegisters::new`.
        unsafe { core::ptr::read_volatile(self.reg(offset)) }
    }

    fn write(&self, offset: usize, value: u32) {
        // SAFETY: see `read`.
        unsafe { core::ptr::write_volatile(self.reg(offset), value) }
    }
}
