// Licensed under the Apache-2.0 license

//! # I2C Hardware Instantiation for AM335x
//!
//! The AM335x has three I2C modules. Each one is described by where its
//! registers live, which `CLKCTRL` register gates it and which interrupt line
//! it raises:
//!
//! | Instance | Base          | `CLKCTRL` (from `CM_PER`) | IRQ |
//! |----------|---------------|---------------------------|-----|
//! | I2C0     | `0x44E0_B000` | `0x4B8` (`CM_WKUP`)       | 70  |
//! | I2C1     | `0x4802_A000` | `0x48`                    | 71  |
//! | I2C2     | `0x4819_C000` | `0x44`                    | 30  |
//!
//! How physical windows become addressable is platform business, so
//! [`map_instance`] goes through a [`RegisterMapper`]. The controller owns
//! both windows and hands them back to the mapper when it is dropped.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use am335x_i2c_ddk::i2c::hardware_instantiation::{map_instance, Instance};
//! use am335x_i2c_ddk::i2c::IdentityMapper;
//!
//! let i2c2 = unsafe { map_instance(Instance::I2c2, IdentityMapper, irq, delay, logger)? };
//! i2c2.init(400, Instance::I2c2.irq())?;
//! let id = i2c2.read_register(0x68, 0x75)?;
//! i2c2.deinit();
//! drop(i2c2); // windows unmapped, I2C2 can be mapped again
//! ```
//!
//! At most one controller per instance exists at a time: a second
//! [`map_instance`] for a bound instance fails with [`Error::InUse`].

use crate::common::{Logger, NoOpLogger};
use crate::i2c::am335x_i2c::{Am335xI2c, Error};
use crate::i2c::clock::ClockDomain;
use crate::i2c::registers::{MmioRegisters, RegisterAccess, CM_MAP_SIZE, CM_PER_BASE, I2C_MAP_SIZE};
use crate::i2c::traits::{IrqControl, RegisterMapper};
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::delay::DelayNs;

static I2C0_BOUND: AtomicBool = AtomicBool::new(false);
static I2C1_BOUND: AtomicBool = AtomicBool::new(false);
static I2C2_BOUND: AtomicBool = AtomicBool::new(false);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instance {
    I2c0,
    I2c1,
    I2c2,
}

impl Instance {
    pub const ALL: [Instance; 3] = [Instance::I2c0, Instance::I2c1, Instance::I2c2];

    /// Physical base of the module register window.
    #[must_use]
    pub const fn base(self) -> usize {
        match self {
            Instance::I2c0 => 0x44E0_B000,
            Instance::I2c1 => 0x4802_A000,
            Instance::I2c2 => 0x4819_C000,
        }
    }

    /// Offset of the module's `CLKCTRL` register from [`CM_PER_BASE`].
    #[must_use]
    pub const fn clkctrl_offset(self) -> usize {
        match self {
            Instance::I2c0 => 0x4B8,
            Instance::I2c1 => 0x48,
            Instance::I2c2 => 0x44,
        }
    }

    #[must_use]
    pub const fn irq(self) -> u32 {
        match self {
            Instance::I2c0 => 70,
            Instance::I2c1 => 71,
            Instance::I2c2 => 30,
        }
    }

    /// Whether a controller is currently bound to this instance.
    #[must_use]
    pub fn is_bound(self) -> bool {
        self.bound().load(Ordering::Acquire)
    }

    fn bound(self) -> &'static AtomicBool {
        match self {
            Instance::I2c0 => &I2C0_BOUND,
            Instance::I2c1 => &I2C1_BOUND,
            Instance::I2c2 => &I2C2_BOUND,
        }
    }
}

/// Exclusive binding of one instance, released on drop.
struct Binding(Instance);

impl Binding {
    fn take(instance: Instance) -> Option<Self> {
        (!instance.bound().swap(true, Ordering::AcqRel)).then_some(Self(instance))
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.0.bound().store(false, Ordering::Release);
    }
}

/// Register window obtained from a [`RegisterMapper`], unmapped on drop.
pub struct MappedWindow<M: RegisterMapper> {
    regs: MmioRegisters,
    size: usize,
    mapper: M,
    _binding: Option<Binding>,
}

impl<M: RegisterMapper> MappedWindow<M> {
    /// # Safety
    ///
    /// See [`map_instance`].
    unsafe fn map(
        mut mapper: M,
        phys: usize,
        size: usize,
        binding: Option<Binding>,
    ) -> Result<Self, Error> {
        let regs = MmioRegisters::new(mapper.map(phys, size)).ok_or(Error::AllocationFailure)?;
        Ok(Self {
            regs,
            size,
            mapper,
            _binding: binding,
        })
    }
}

impl<M: RegisterMapper> RegisterAccess for MappedWindow<M> {
    fn read(&self, offset: usize) -> u32 {
        self.regs.read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.regs.write(offset, value);
    }
}

impl<M: RegisterMapper> Drop for MappedWindow<M> {
    fn drop(&mut self) {
        self.mapper.unmap(self.regs.as_ptr(), self.size);
    }
}

/// Controller over mapped register windows.
pub type MmioI2c<M, I, D, L = NoOpLogger> = Am335xI2c<MappedWindow<M>, MappedWindow<M>, I, D, L>;

/// Bind `instance` to a new controller, mapping its register window and the
/// clock manager through `mapper`.
///
/// Dropping the controller unmaps both windows and frees the instance. Call
/// [`Am335xI2c::deinit`] first; dropping does not release the interrupt line.
///
/// # Errors
///
/// - `InUse` if another controller is bound to `instance`.
/// - `AllocationFailure` if either window cannot be mapped. Whatever was
///   mapped is unmapped again.
///
/// # Safety
///
/// Non-null pointers returned by `mapper` must address the requested device
/// windows and stay mapped until handed back to `unmap`.
pub unsafe fn map_instance<M, I, D, L>(
    instance: Instance,
    mapper: M,
    irq: I,
    delay: D,
    logger: L,
) -> Result<MmioI2c<M, I, D, L>, Error>
where
    M: RegisterMapper + Clone,
    I: IrqControl,
    D: DelayNs,
    L: Logger,
{
    let binding = Binding::take(instance).ok_or(Error::InUse)?;
    let regs = MappedWindow::map(mapper.clone(), instance.base(), I2C_MAP_SIZE, Some(binding))?;
    let cm = MappedWindow::map(mapper, CM_PER_BASE, CM_MAP_SIZE, None)?;
    Ok(Am335xI2c::new(
        regs,
        ClockDomain::new(cm, instance.clkctrl_offset()),
        irq,
        delay,
        logger,
    ))
}
