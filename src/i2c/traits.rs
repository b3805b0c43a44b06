// Licensed under the Apache-2.0 license

//! # I2C Hardware Abstraction Traits
//!
//! Small traits separating what a controller does from how the platform
//! reaches it:
//!
//! ```text
//! I2cHardwareCore (lifecycle, interrupt entry point, recovery)
//!     └── I2cMaster (blocking master transfers)
//! IrqControl (platform: registration of the controller's interrupt line)
//! RegisterMapper (platform: mapping of physical register windows)
//! ```
//!
//! Every method takes `&self`. A controller is shared between the threads
//! issuing transfers and the interrupt vector, and serializes transfers
//! internally.

use crate::i2c::common::I2cConfig;
use crate::i2c::transfer::IrqReturn;
use embedded_hal::i2c::{AddressMode, Operation, SevenBitAddress};

/// Core I2C hardware interface
///
/// # Examples
///
/// ```rust,ignore
/// use am335x_i2c_ddk::i2c::{I2cConfigBuilder, I2cHardwareCore, I2cSpeed};
///
/// fn bring_up<T: I2cHardwareCore>(controller: &T, line: u32) -> Result<(), T::Error> {
///     let config = I2cConfigBuilder::new().speed(I2cSpeed::Fast).build();
///     controller.init(&config, line)
/// }
/// ```
pub trait I2cHardwareCore {
    /// Hardware-specific error type that implements embedded-hal error traits
    type Error: embedded_hal::i2c::Error + core::fmt::Debug;

    /// Bring the controller up and register its interrupt line.
    ///
    /// # Errors
    ///
    /// Returns an error if the module clock does not come up, the interrupt
    /// line cannot be registered, or the arguments are invalid. Calling it on
    /// an initialized controller succeeds without touching the hardware.
    fn init(&self, config: &I2cConfig, interrupt_line: u32) -> Result<(), Self::Error>;

    /// Release the interrupt line and gate the module. Idempotent.
    fn deinit(&self);

    fn is_initialized(&self) -> bool;

    /// Interrupt entry point
    ///
    /// Called by the platform's vector for the controller's line. Must not
    /// block and must not take any lock held by transfer callers.
    fn handle_interrupt(&self) -> IrqReturn;

    /// Attempt to recover the controller from a stuck condition
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is not initialized or its clock
    /// cannot be enabled.
    fn recover_bus(&self) -> Result<(), Self::Error>;
}

/// I2C Master mode operations
///
/// Each call is one contiguous bus transaction (START ... STOP) per data
/// phase; implementations hold their transfer lock across all phases of a
/// call so that no other caller's transaction can interleave.
pub trait I2cMaster<A: AddressMode = SevenBitAddress>: I2cHardwareCore {
    /// # Errors
    ///
    /// Returns an error if the slave does not acknowledge, arbitration is
    /// lost, or the transfer does not complete in time.
    fn write(&self, addr: A, bytes: &[u8]) -> Result<(), Self::Error>;

    /// # Errors
    ///
    /// See [`I2cMaster::write`].
    fn read(&self, addr: A, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write phase then read phase, without releasing the bus to other callers.
    ///
    /// # Errors
    ///
    /// See [`I2cMaster::write`]. A failing write phase aborts before the read.
    fn write_read(&self, addr: A, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Execute `operations` in order as one uninterrupted sequence.
    ///
    /// # Errors
    ///
    /// Stops at the first failing operation and returns its error.
    fn transaction_slice(
        &self,
        addr: A,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error>;
}

/// Platform interrupt controller glue.
///
/// The platform routes the registered line to the owner's
/// [`I2cHardwareCore::handle_interrupt`].
pub trait IrqControl {
    type Error: core::fmt::Debug;

    /// # Errors
    ///
    /// Returns an error if the line cannot be registered (already taken,
    /// out of range).
    fn request(&mut self, line: u32) -> Result<(), Self::Error>;

    fn release(&mut self, line: u32);
}

/// Makes physical register windows addressable.
///
/// Identity on bare metal ([`IdentityMapper`]), an `ioremap`-like service
/// under an OS. Every window returned by `map` is handed back to `unmap`
/// exactly once.
pub trait RegisterMapper {
    /// Virtual address of `[phys, phys + size)`, or null if it cannot be
    /// mapped.
    fn map(&mut self, phys: usize, size: usize) -> *mut u8;

    fn unmap(&mut self, virt: *mut u8, size: usize);
}

/// Physical addresses are used as is.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityMapper;

impl RegisterMapper for IdentityMapper {
    fn map(&mut self, phys: usize, _size: usize) -> *mut u8 {
        phys as *mut u8
    }

    fn unmap(&mut self, _virt: *mut u8, _size: usize) {}
}
