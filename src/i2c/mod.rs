// Licensed under the Apache-2.0 license

//! AM335x I2C driver module.
//!
//! Master-mode driver for the I2C modules of TI AM335x `SoCs` (BeagleBone),
//! for bare-metal and `no_std` environments. The hardware implementation
//! ([`am335x_i2c`]) sits on raw register access ([`registers`]), clock gating
//! ([`clock`]) and an interrupt-driven transfer state machine ([`transfer`]);
//! [`i2c_controller`] exposes it through embedded-hal.

pub mod am335x_i2c;
pub mod clock;
pub mod common;
pub mod hardware_instantiation;
pub mod i2c_controller;
pub mod registers;
#[cfg(test)]
pub(crate) mod sim;
pub mod traits;
pub mod transfer;

pub use am335x_i2c::{Am335xI2c, Error};
pub use common::{I2cConfig, I2cConfigBuilder, I2cSpeed, TimingConfig};
pub use i2c_controller::I2cController;
pub use traits::{I2cHardwareCore, I2cMaster, IdentityMapper, IrqControl, RegisterMapper};
pub use transfer::IrqReturn;
