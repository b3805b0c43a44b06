// Licensed under the Apache-2.0 license

//! Common configuration types for the AM335x I2C driver.
//!
//! Bus timing is not computed at runtime: the controller supports exactly two
//! bus speeds, each with a fixed prescaler and SCL low/high count.

use fugit::{HertzU32, MillisDurationU32};

/// How long a blocking transfer waits for the interrupt handler.
pub const DEFAULT_TRANSFER_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(100);
/// Own address programmed into `I2C_OA`; unused in master mode.
pub const DEFAULT_OWN_ADDRESS: u8 = 0x01;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
}

impl I2cSpeed {
    /// Map a requested bus speed in kHz. Only 400 selects fast mode; every
    /// other value (including 0) falls back to standard mode.
    #[must_use]
    pub fn from_khz(khz: u32) -> Self {
        if khz == 400 {
            I2cSpeed::Fast
        } else {
            I2cSpeed::Standard
        }
    }

    #[must_use]
    pub fn frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }

    #[must_use]
    pub fn khz(self) -> u32 {
        self.frequency().to_kHz()
    }
}

/// Divider and SCL timing registers (`I2C_PSC`, `I2C_SCLL`, `I2C_SCLH`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    pub prescaler: u8,
    pub scl_low: u8,
    pub scl_high: u8,
}

impl TimingConfig {
    pub const STANDARD: Self = Self {
        prescaler: 23,
        scl_low: 53,
        scl_high: 55,
    };

    pub const FAST: Self = Self {
        prescaler: 3,
        scl_low: 10,
        scl_high: 12,
    };

    #[must_use]
    pub const fn for_speed(speed: I2cSpeed) -> Self {
        match speed {
            I2cSpeed::Standard => Self::STANDARD,
            I2cSpeed::Fast => Self::FAST,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct I2cConfig {
    pub speed: I2cSpeed,
    pub timing: TimingConfig,
    pub own_address: u8,
    pub transfer_timeout: MillisDurationU32,
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    speed: I2cSpeed,
    timing: Option<TimingConfig>,
    own_address: u8,
    transfer_timeout: MillisDurationU32,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            speed: I2cSpeed::Standard,
            timing: None,
            own_address: DEFAULT_OWN_ADDRESS,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
    /// Override the fixed timing of the selected speed.
    #[must_use]
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = Some(timing);
        self
    }
    #[must_use]
    pub fn own_address(mut self, address: u8) -> Self {
        self.own_address = address;
        self
    }
    #[must_use]
    pub fn transfer_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.transfer_timeout = timeout;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            speed: self.speed,
            timing: self
                .timing
                .unwrap_or(TimingConfig::for_speed(self.speed)),
            own_address: self.own_address,
            transfer_timeout: self.transfer_timeout,
        }
    }
}
