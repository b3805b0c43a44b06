// Licensed under the Apache-2.0 license

//! AM335x I2C master controller.
//!
//! [`Am335xI2c`] owns one I2C module: its register window, the clock control
//! of the module and the single in-flight [`Transfer`]. Caller threads issue
//! blocking transfers through `&self`; the platform's interrupt vector calls
//! [`Am335xI2c::handle_interrupt`], which advances the transfer without taking
//! any lock.
//!
//! Every public transfer operation holds the controller lock for its whole
//! duration, so a composite operation (register read = write phase + read
//! phase) is never interleaved with another caller's bytes. Each phase is a
//! separate START ... STOP transaction; repeated START is never used.
//!
//! A timed out transfer is not cancelled: the hardware may still be busy. The
//! driver forces the descriptor idle and clears the latched status so that a
//! late event does not corrupt the next transfer, but it does not reset the
//! bus. [`Am335xI2c::recover_bus`] does.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::clock::{ClockDomain, INIT_POLLS};
use crate::i2c::common::{I2cConfig, I2cConfigBuilder, I2cSpeed};
use crate::i2c::registers::{
    Con, Irq, RegisterAccess, Sysc, Syss, I2C_BUF, I2C_CNT, I2C_CON, I2C_DATA,
    I2C_IRQENABLE_CLR, I2C_IRQENABLE_SET, I2C_IRQSTATUS, I2C_IRQSTATUS_RAW, I2C_OA, I2C_PSC,
    I2C_SA, I2C_SCLH, I2C_SCLL, I2C_SYSC, I2C_SYSS, IRQ_CLEAR_ALL,
};
use crate::i2c::traits::{I2cHardwareCore, I2cMaster, IrqControl};
use crate::i2c::transfer::{IrqReturn, Transfer};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, Operation, SevenBitAddress};
use fugit::MicrosDurationU32;
use spin::mutex::{SpinMutex, SpinMutexGuard};
use spin::relax::{RelaxStrategy, Spin};

/// Largest transfer the 16-bit `I2C_CNT` register can describe.
pub const MAX_TRANSFER_LEN: usize = 0xFFFF;
/// Highest 7-bit slave address.
pub const MAX_ADDRESS: SevenBitAddress = 0x7F;

const RESET_POLLS: u32 = 100;
const RESET_POLL_STEP: MicrosDurationU32 = MicrosDurationU32::micros(10);
const DISABLE_SETTLE: MicrosDurationU32 = MicrosDurationU32::micros(10);
const ENABLE_SETTLE: MicrosDurationU32 = MicrosDurationU32::micros(50);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// No completion within the transfer timeout, or the module clock did
    /// not come up in time.
    Timeout,
    /// The slave did not acknowledge its address or a data byte.
    NoAcknowledge,
    ArbitrationLost,
    NotInitialized,
    /// Empty or oversized buffer, address above 0x7F, zero chunk size or
    /// zero interrupt line.
    InvalidArgument,
    /// The staging buffer cannot hold the requested block.
    AllocationFailure,
    /// The interrupt line could not be registered.
    InterruptUnavailable,
    /// Another controller is already bound to this module.
    InUse,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::NoAcknowledge => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Timeout => "timed out",
            Error::NoAcknowledge => "no acknowledge",
            Error::ArbitrationLost => "arbitration lost",
            Error::NotInitialized => "controller not initialized",
            Error::InvalidArgument => "invalid argument",
            Error::AllocationFailure => "staging buffer too small",
            Error::InterruptUnavailable => "interrupt line unavailable",
            Error::InUse => "controller already bound to this module",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[derive(Copy, Clone)]
enum Direction {
    Write,
    Read,
}

impl Direction {
    fn con(self) -> Con {
        match self {
            Direction::Write => Con::TRX,
            Direction::Read => Con::empty(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Direction::Write => "write",
            Direction::Read => "read",
        }
    }

    fn timeout_tag(self) -> &'static str {
        match self {
            Direction::Write => "write_timeout",
            Direction::Read => "read_timeout",
        }
    }
}

/// Caller-side resources, only ever touched with the controller lock held.
struct Session<I, D, L> {
    irq: I,
    delay: D,
    logger: L,
    line: Option<u32>,
    config: I2cConfig,
}

fn check_target(address: SevenBitAddress, len: usize) -> Result<(), Error> {
    if address > MAX_ADDRESS || len == 0 || len > MAX_TRANSFER_LEN {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

/// One AM335x I2C module in master mode.
///
/// - `R`: the module's register window.
/// - `C`: the clock manager window holding the module's `CLKCTRL`.
/// - `I`: interrupt registration.
/// - `D`: delay used by every bounded wait.
/// - `L`: diagnostics sink.
/// - `X`: how a contended caller waits for the controller lock.
pub struct Am335xI2c<R, C, I, D, L = NoOpLogger, X = Spin>
where
    R: RegisterAccess,
    C: RegisterAccess,
{
    regs: R,
    clock: ClockDomain<C>,
    xfer: Transfer,
    ready: AtomicBool,
    session: SpinMutex<Session<I, D, L>, X>,
}

impl<R, C, I, D, L, X> Am335xI2c<R, C, I, D, L, X>
where
    R: RegisterAccess,
    C: RegisterAccess,
    I: IrqControl,
    D: DelayNs,
    L: Logger,
    X: RelaxStrategy,
{
    /// Bind a controller to already mapped register windows. Nothing is
    /// touched until [`Am335xI2c::init`].
    pub fn new(regs: R, clock: ClockDomain<C>, irq: I, delay: D, logger: L) -> Self {
        Self {
            regs,
            clock,
            xfer: Transfer::new(),
            ready: AtomicBool::new(false),
            session: SpinMutex::new(Session {
                irq,
                delay,
                logger,
                line: None,
                config: I2cConfig::default(),
            }),
        }
    }

    /// Initialize for `bus_speed_khz` (400 selects fast mode, anything else
    /// standard mode) and register `interrupt_line`.
    ///
    /// # Errors
    ///
    /// See [`Am335xI2c::init_with_config`].
    pub fn init(&self, bus_speed_khz: u32, interrupt_line: u32) -> Result<(), Error> {
        let config = I2cConfigBuilder::new()
            .speed(I2cSpeed::from_khz(bus_speed_khz))
            .build();
        self.init_with_config(&config, interrupt_line)
    }

    /// Bring the module up: clock, soft reset, timing, interrupt sources,
    /// module enable, then interrupt registration. A no-op returning `Ok` if
    /// already initialized.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for interrupt line 0.
    /// - `Timeout` if the module clock does not come up.
    /// - `InterruptUnavailable` if the line cannot be registered; the module
    ///   is disabled and its clock gated again.
    pub fn init_with_config(&self, config: &I2cConfig, interrupt_line: u32) -> Result<(), Error> {
        let mut guard = self.session.lock();
        let s = &mut *guard;
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        if interrupt_line == 0 {
            return Err(Error::InvalidArgument);
        }

        s.logger.info(format_args!(
            "i2c: init ({} kHz, irq {interrupt_line})",
            config.speed.khz()
        ));

        if let Err(e) = self.clock.enable(&mut s.delay, INIT_POLLS) {
            s.logger.error(format_args!(
                "i2c: module clock did not come up (CLKCTRL at 0x{:x})",
                self.clock.clkctrl_offset()
            ));
            return Err(e);
        }

        s.config = *config;
        self.configure(s);
        self.xfer.reset();

        if let Err(e) = s.irq.request(interrupt_line) {
            s.logger.error(format_args!(
                "i2c: cannot register irq {interrupt_line}: {e:?}"
            ));
            self.regs.write(I2C_CON, 0);
            self.clock.disable();
            return Err(Error::InterruptUnavailable);
        }
        s.line = Some(interrupt_line);
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Release the interrupt line, disable the module and gate its clock.
    pub fn deinit(&self) {
        let mut guard = self.session.lock();
        let s = &mut *guard;
        if !self.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(line) = s.line.take() {
            s.irq.release(line);
        }
        self.xfer.reset();
        if self.clock.is_enabled() {
            self.regs
                .write(I2C_IRQENABLE_CLR, Irq::TRANSFER_EVENTS.bits());
            self.regs.write(I2C_CON, 0);
        }
        self.clock.disable();
        s.logger.info(format_args!("i2c: deinit"));
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether the module clock is running. Never changes clock state.
    #[must_use]
    pub fn clock_enabled(&self) -> bool {
        self.clock.is_enabled()
    }

    /// Log the transfer registers, tagged with `tag`.
    pub fn dump_state(&self, tag: &str) {
        let mut guard = self.session.lock();
        self.dump(&mut guard.logger, tag);
    }

    /// Interrupt entry point. Never blocks.
    pub fn handle_interrupt(&self) -> IrqReturn {
        if !self.ready.load(Ordering::Acquire) {
            return IrqReturn::None;
        }
        self.xfer.service(&self.regs)
    }

    /// Write `bytes` to `address` in one transaction.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, `InvalidArgument`, `Timeout`, `NoAcknowledge` or
    /// `ArbitrationLost`.
    pub fn write_bytes(&self, address: SevenBitAddress, bytes: &[u8]) -> Result<(), Error> {
        let mut s = self.lock_ready()?;
        self.start_write(&mut s, address, bytes)
    }

    /// Fill `buffer` from `address` in one transaction.
    ///
    /// # Errors
    ///
    /// See [`Am335xI2c::write_bytes`].
    pub fn read_bytes(&self, address: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Error> {
        let mut s = self.lock_ready()?;
        self.start_read(&mut s, address, buffer)
    }

    /// # Errors
    ///
    /// See [`Am335xI2c::write_bytes`].
    pub fn write_register(
        &self,
        address: SevenBitAddress,
        register: u8,
        value: u8,
    ) -> Result<(), Error> {
        self.write_bytes(address, &[register, value])
    }

    /// Select `register`, then read one byte back.
    ///
    /// # Errors
    ///
    /// See [`Am335xI2c::write_bytes`]. A failed register select aborts
    /// before the read.
    pub fn read_register(&self, address: SevenBitAddress, register: u8) -> Result<u8, Error> {
        let mut guard = self.lock_ready()?;
        let s = &mut *guard;
        let mut value = [0u8];

        self.start_write(s, address, &[register])?;
        if let Err(e) = self.start_read(s, address, &mut value) {
            s.logger.error(format_args!(
                "i2c: read_register failed sa=0x{address:02x} reg=0x{register:02x}: {e}"
            ));
            return Err(e);
        }
        let [byte] = value;
        Ok(byte)
    }

    /// Select `register`, then fill `buffer` from consecutive registers.
    ///
    /// # Errors
    ///
    /// See [`Am335xI2c::read_register`].
    pub fn read_block(
        &self,
        address: SevenBitAddress,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        self.write_read(address, &[register], buffer)
    }

    /// Write phase then read phase under one lock hold.
    ///
    /// # Errors
    ///
    /// See [`Am335xI2c::read_register`].
    pub fn write_read(
        &self,
        address: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        let mut guard = self.lock_ready()?;
        let s = &mut *guard;
        check_target(address, bytes.len())?;
        check_target(address, buffer.len())?;
        self.start_write(s, address, bytes)?;
        self.start_read(s, address, buffer)
    }

    /// Block read into a fixed-capacity staging buffer of `N` bytes.
    ///
    /// # Errors
    ///
    /// `AllocationFailure` if `len` exceeds `N`, otherwise as
    /// [`Am335xI2c::read_block`].
    pub fn read_block_staged<const N: usize>(
        &self,
        address: SevenBitAddress,
        register: u8,
        len: usize,
    ) -> Result<heapless::Vec<u8, N>, Error> {
        if len == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut staging = heapless::Vec::<u8, N>::new();
        staging
            .resize_default(len)
            .map_err(|()| Error::AllocationFailure)?;
        self.read_block(address, register, &mut staging)?;
        Ok(staging)
    }

    /// Drain `register` into `buffer`, at most `chunk` bytes per composite
    /// operation. Other callers may run between chunks. Returns the number
    /// of bytes read.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty buffer or zero chunk; otherwise the
    /// error of the first failing chunk.
    pub fn read_block_chunked(
        &self,
        address: SevenBitAddress,
        register: u8,
        buffer: &mut [u8],
        chunk: usize,
    ) -> Result<usize, Error> {
        if chunk == 0 || buffer.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let mut total = 0;
        for part in buffer.chunks_mut(chunk) {
            self.read_block(address, register, part)?;
            total += part.len();
        }
        Ok(total)
    }

    /// Soft reset the module and program the configuration again.
    ///
    /// # Errors
    ///
    /// `NotInitialized`, or `Timeout` if the clock cannot be enabled.
    pub fn recover_bus(&self) -> Result<(), Error> {
        let mut guard = self.lock_ready()?;
        let s = &mut *guard;
        self.ensure_clock(s, "recover")?;
        s.logger.warn(format_args!("i2c: resetting controller"));
        self.configure(s);
        Ok(())
    }

    fn lock_ready(&self) -> Result<SpinMutexGuard<'_, Session<I, D, L>>, Error> {
        let guard = self.session.lock();
        if self.ready.load(Ordering::Acquire) {
            Ok(guard)
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Soft reset followed by the full register setup. Leaves the module
    /// enabled with all transfer events unmasked.
    fn configure(&self, s: &mut Session<I, D, L>) {
        self.regs.write(I2C_SYSC, Sysc::SOFTRESET.bits());
        if !self.wait_reset_done(&mut s.delay) {
            s.logger
                .warn(format_args!("i2c: soft reset did not complete, continuing"));
        }

        self.regs.write(I2C_CON, 0);
        s.delay.delay_us(DISABLE_SETTLE.ticks());

        let timing = s.config.timing;
        self.regs.write(I2C_PSC, u32::from(timing.prescaler));
        self.regs.write(I2C_SCLL, u32::from(timing.scl_low));
        self.regs.write(I2C_SCLH, u32::from(timing.scl_high));
        self.regs.write(I2C_OA, u32::from(s.config.own_address));
        self.regs.write(I2C_BUF, 0);

        self.regs.write(I2C_IRQSTATUS, IRQ_CLEAR_ALL);
        self.regs
            .write(I2C_IRQENABLE_SET, Irq::TRANSFER_EVENTS.bits());

        self.regs.write(I2C_CON, Con::EN.bits());
        s.delay.delay_us(ENABLE_SETTLE.ticks());
    }

    fn wait_reset_done(&self, delay: &mut D) -> bool {
        for _ in 0..RESET_POLLS {
            if Syss::from_bits_truncate(self.regs.read(I2C_SYSS)).contains(Syss::RDONE) {
                return true;
            }
            delay.delay_us(RESET_POLL_STEP.ticks());
        }
        false
    }

    fn ensure_clock(&self, s: &mut Session<I, D, L>, op: &str) -> Result<(), Error> {
        match self.clock.ensure_enabled(&mut s.delay) {
            Ok(()) => Ok(()),
            Err(e) => {
                s.logger
                    .error(format_args!("i2c: {op}: cannot enable clock: {e}"));
                Err(e)
            }
        }
    }

    fn start_write(
        &self,
        s: &mut Session<I, D, L>,
        address: SevenBitAddress,
        bytes: &[u8],
    ) -> Result<(), Error> {
        check_target(address, bytes.len())?;
        self.ensure_clock(s, Direction::Write.name())?;
        // SAFETY: `finish` disarms the descriptor before returning, so the
        // interrupt handler is done with `bytes` when this borrow ends.
        unsafe { self.xfer.arm_write(bytes) };
        self.launch(address, bytes.len(), Direction::Write);
        self.finish(s, address, bytes.len(), Direction::Write)
    }

    fn start_read(
        &self,
        s: &mut Session<I, D, L>,
        address: SevenBitAddress,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        check_target(address, buffer.len())?;
        self.ensure_clock(s, Direction::Read.name())?;
        let len = buffer.len();
        // SAFETY: as in `start_write`; `buffer` is not touched here until
        // `finish` has disarmed the descriptor.
        unsafe { self.xfer.arm_read(buffer) };
        self.launch(address, len, Direction::Read);
        self.finish(s, address, len, Direction::Read)
    }

    /// Program one START ... STOP transaction of `len` bytes.
    fn launch(&self, address: SevenBitAddress, len: usize, direction: Direction) {
        self.regs.write(I2C_IRQSTATUS, IRQ_CLEAR_ALL);
        self.regs.write(I2C_SA, u32::from(address));
        self.regs.write(I2C_CNT, (len & MAX_TRANSFER_LEN) as u32);
        let con = Con::EN | Con::MST | direction.con() | Con::STT | Con::STP;
        self.regs.write(I2C_CON, con.bits());
    }

    fn finish(
        &self,
        s: &mut Session<I, D, L>,
        address: SevenBitAddress,
        len: usize,
        direction: Direction,
    ) -> Result<(), Error> {
        let completed = self.xfer.wait(&mut s.delay, s.config.transfer_timeout);
        self.xfer.disarm();

        if !completed {
            s.logger.error(format_args!(
                "i2c: {} timeout (sa=0x{address:02x}, len={len})",
                direction.name()
            ));
            self.dump(&mut s.logger, direction.timeout_tag());
            // Drop whatever is latched so it cannot leak into the next transfer.
            self.regs.write(I2C_IRQSTATUS, IRQ_CLEAR_ALL);
            return Err(Error::Timeout);
        }
        self.xfer.outcome()
    }

    fn dump(&self, logger: &mut L, tag: &str) {
        // Reading a gated module raises an external abort.
        if !self.clock.is_enabled() {
            logger.warn(format_args!(
                "i2c: dump_state({tag}): clock gated or module idle, skipping register read"
            ));
            return;
        }
        logger.info(format_args!(
            "i2c: [{tag}] CON=0x{:04x} SA=0x{:04x} CNT=0x{:04x} DATA=0x{:04x}",
            self.regs.read(I2C_CON),
            self.regs.read(I2C_SA),
            self.regs.read(I2C_CNT),
            self.regs.read(I2C_DATA),
        ));
        logger.info(format_args!(
            "i2c: [{tag}] IRQSTATUS=0x{:04x} RAW=0x{:04x} ENABLE=0x{:04x}",
            self.regs.read(I2C_IRQSTATUS),
            self.regs.read(I2C_IRQSTATUS_RAW),
            self.regs.read(I2C_IRQENABLE_SET),
        ));
    }
}

impl<R, C, I, D, L, X> I2cHardwareCore for Am335xI2c<R, C, I, D, L, X>
where
    R: RegisterAccess,
    C: RegisterAccess,
    I: IrqControl,
    D: DelayNs,
    L: Logger,
    X: RelaxStrategy,
{
    type Error = Error;

    fn init(&self, config: &I2cConfig, interrupt_line: u32) -> Result<(), Self::Error> {
        self.init_with_config(config, interrupt_line)
    }

    fn deinit(&self) {
        Am335xI2c::deinit(self);
    }

    fn is_initialized(&self) -> bool {
        Am335xI2c::is_initialized(self)
    }

    fn handle_interrupt(&self) -> IrqReturn {
        Am335xI2c::handle_interrupt(self)
    }

    fn recover_bus(&self) -> Result<(), Self::Error> {
        Am335xI2c::recover_bus(self)
    }
}

impl<R, C, I, D, L, X> I2cMaster for Am335xI2c<R, C, I, D, L, X>
where
    R: RegisterAccess,
    C: RegisterAccess,
    I: IrqControl,
    D: DelayNs,
    L: Logger,
    X: RelaxStrategy,
{
    fn write(&self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.write_bytes(addr, bytes)
    }

    fn read(&self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(addr, buffer)
    }

    fn write_read(
        &self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        Am335xI2c::write_read(self, addr, bytes, buffer)
    }

    fn transaction_slice(
        &self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut guard = self.lock_ready()?;
        let s = &mut *guard;
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => self.start_write(s, addr, bytes)?,
                Operation::Read(buffer) => self.start_read(s, addr, buffer)?,
            }
        }
        Ok(())
    }
}
