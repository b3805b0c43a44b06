// Licensed under the Apache-2.0 license

//! Functional clock gating for an I2C module.
//!
//! The platform power manager may gate the module clock behind the driver's
//! back. Touching I2C registers while gated raises a bus fault, so every
//! transfer re-checks the clock first.

use crate::i2c::am335x_i2c::Error;
use crate::i2c::registers::RegisterAccess;
use embedded_hal::delay::DelayNs;
use fugit::MicrosDurationU32;

/// `MODULEMODE` field of a `CM_*_CLKCTRL` register.
pub const CLKCTRL_MODULEMODE_MASK: u32 = 0x3;
/// `MODULEMODE` value requesting an explicitly enabled module.
pub const CLKCTRL_MODULEMODE_ENABLE: u32 = 0x2;
/// `IDLEST` field; zero means the module is fully functional.
pub const CLKCTRL_IDLEST_MASK: u32 = 0x3 << 16;

/// Delay between two `IDLEST` polls.
pub const CLOCK_POLL_STEP: MicrosDurationU32 = MicrosDurationU32::micros(10);
/// Poll budget for the per-transfer check (about 2 ms).
pub const ENSURE_POLLS: u32 = 200;
/// Poll budget when bringing the module up at initialization (about 10 ms).
pub const INIT_POLLS: u32 = 1000;

/// Clock control of one module, inside the clock manager register window.
pub struct ClockDomain<C: RegisterAccess> {
    regs: C,
    clkctrl: usize,
}

impl<C: RegisterAccess> ClockDomain<C> {
    /// `clkctrl` is the offset of the module's `CLKCTRL` register in `regs`.
    pub const fn new(regs: C, clkctrl: usize) -> Self {
        Self { regs, clkctrl }
    }

    #[must_use]
    pub fn clkctrl_offset(&self) -> usize {
        self.clkctrl
    }

    /// Whether register access is currently safe.
    ///
    /// Read-only: never re-enables anything, so it can be used from
    /// diagnostics without changing the state being diagnosed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        let value = self.regs.read(self.clkctrl);
        value & CLKCTRL_IDLEST_MASK == 0 && value & CLKCTRL_MODULEMODE_MASK != 0
    }

    /// Make sure the clock is running, re-enabling it if it was gated.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if the module does not report functional within
    /// [`ENSURE_POLLS`] polls.
    pub fn ensure_enabled<D: DelayNs>(&self, delay: &mut D) -> Result<(), Error> {
        if self.is_enabled() {
            return Ok(());
        }
        self.enable(delay, ENSURE_POLLS)
    }

    /// Request module enable unconditionally and wait for `IDLEST` to clear.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if `IDLEST` is still set after `polls` polls.
    pub fn enable<D: DelayNs>(&self, delay: &mut D, polls: u32) -> Result<(), Error> {
        self.regs.modify(self.clkctrl, |v| {
            (v & !CLKCTRL_MODULEMODE_MASK) | CLKCTRL_MODULEMODE_ENABLE
        });

        for _ in 0..polls {
            if self.regs.read(self.clkctrl) & CLKCTRL_IDLEST_MASK == 0 {
                return Ok(());
            }
            delay.delay_us(CLOCK_POLL_STEP.ticks());
        }
        Err(Error::Timeout)
    }

    /// Gate the module clock.
    pub fn disable(&self) {
        self.regs
            .modify(self.clkctrl, |v| v & !CLKCTRL_MODULEMODE_MASK);
    }
}
