// Licensed under the Apache-2.0 license

//! embedded-hal view of an I2C master.
//!
//! Sensor drivers written against `embedded_hal::i2c::I2c` take the bus by
//! `&mut`. The controller itself is shared (`&self`) with the interrupt vector
//! and other callers, so the adapter only borrows it; several adapters over
//! the same controller can coexist, and their transfers are serialized by the
//! controller.
//!
//! The controller never generates a repeated START. `write_read` and
//! `transaction` run each phase as its own START ... STOP transaction, back
//! to back under the controller lock. Slaves that drop their register
//! pointer on STOP need a driver that does not rely on `write_read`.

use crate::i2c::traits::I2cMaster;
use embedded_hal::i2c::{Operation, SevenBitAddress};

/// `embedded_hal::i2c::I2c` over a shared controller.
///
/// Deviates from the embedded-hal contract in one point: there is no
/// repeated START. In `write_read` and `transaction` every phase ends with
/// STOP before the next one starts, though no other caller can get onto
/// the bus in between.
pub struct I2cController<'a, H: I2cMaster> {
    hardware: &'a H,
}

impl<'a, H: I2cMaster> I2cController<'a, H> {
    pub fn new(hardware: &'a H) -> Self {
        Self { hardware }
    }

    #[must_use]
    pub fn hardware(&self) -> &'a H {
        self.hardware
    }
}

impl<H: I2cMaster> embedded_hal::i2c::ErrorType for I2cController<'_, H> {
    type Error = H::Error;
}

impl<H: I2cMaster> embedded_hal::i2c::I2c for I2cController<'_, H> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.hardware.read(addr, buffer)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.hardware.write(addr, bytes)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.hardware.write_read(addr, bytes, buffer)
    }

    /// Every operation is its own START ... STOP transaction; adjacent
    /// operations are not merged and no repeated START is generated. No other
    /// caller can get onto the bus between them.
    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.hardware.transaction_slice(addr, operations)
    }
}
