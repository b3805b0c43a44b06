// Licensed under the Apache-2.0 license

//! Transaction descriptor and the interrupt-side state machine.
//!
//! A controller owns exactly one [`Transfer`]. It is shared between the thread
//! that arms a transaction and the interrupt handler that advances it, without
//! a lock the interrupt path would have to take:
//!
//! - The arming thread writes the descriptor (buffer, length, index, error)
//!   and publishes it by storing the new phase. From then until it observes
//!   completion or gives up, the thread does not touch the descriptor.
//! - The interrupt handler is the only writer of `phase`, `index` and `error`
//!   while a transaction is armed, and signals [`Completion`] exactly once on
//!   transfer-acknowledge, NACK or arbitration loss.
//! - Before the arming thread releases the caller's buffer it calls
//!   [`Transfer::disarm`], which forces the phase back to idle and waits until
//!   no handler invocation is in progress. A handler that starts afterwards
//!   sees the idle phase and never dereferences the buffer.
//!
//! Interrupt events are serviced in strict precedence order: faults first
//! (nothing else is looked at), then transmit-ready, receive-ready and finally
//! transfer-acknowledge. Several of the last three can be latched at once and
//! are all serviced in the same invocation.

use crate::i2c::am335x_i2c::Error;
use crate::i2c::registers::{Irq, RegisterAccess, I2C_DATA, I2C_IRQSTATUS, I2C_IRQSTATUS_RAW};
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MillisDurationU32};

/// Granularity of every blocking wait on a [`Completion`].
pub const WAIT_STEP: MicrosDurationU32 = MicrosDurationU32::micros(10);

/// Number of [`WAIT_STEP`] polls covering `timeout`, at least one.
fn wait_steps(timeout: MillisDurationU32) -> u64 {
    let micros = u64::from(timeout.ticks()) * 1_000;
    (micros / u64::from(WAIT_STEP.ticks())).max(1)
}

const NO_ERROR: u8 = 0;
const NACK_ERROR: u8 = 1;
const ARBITRATION_ERROR: u8 = 2;

/// Which interrupt events the descriptor currently services.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Writing = 1,
    Reading = 2,
}

impl Phase {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Phase::Writing,
            2 => Phase::Reading,
            _ => Phase::Idle,
        }
    }
}

/// Result of one interrupt handler invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// The controller had nothing pending; the interrupt was not ours.
    None,
    Handled,
}

/// One-shot completion signal.
///
/// Asserted from interrupt context, waited on by exactly one thread at a
/// time. The wait is a bounded poll: it never blocks past its deadline.
pub struct Completion {
    done: AtomicBool,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    pub fn reinit(&self) {
        self.done.store(false, Ordering::Release);
    }

    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Wait until completed or `timeout` has elapsed.
    ///
    /// Returns `false` on timeout.
    pub fn wait_timeout<D: DelayNs>(&self, delay: &mut D, timeout: MillisDurationU32) -> bool {
        for _ in 0..wait_steps(timeout) {
            if self.is_completed() {
                return true;
            }
            delay.delay_us(WAIT_STEP.ticks());
        }
        self.is_completed()
    }
}

/// The single in-flight transaction of a controller.
pub struct Transfer {
    phase: AtomicU8,
    error: AtomicU8,
    buf: AtomicPtr<u8>,
    len: AtomicUsize,
    index: AtomicUsize,
    done: Completion,
    servicing: AtomicBool,
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transfer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
            error: AtomicU8::new(NO_ERROR),
            buf: AtomicPtr::new(core::ptr::null_mut()),
            len: AtomicUsize::new(0),
            index: AtomicUsize::new(0),
            done: Completion::new(),
            servicing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_raw(self.phase.load(Ordering::SeqCst))
    }

    /// Bytes moved so far in the current (or last) transaction.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arm a transmit transaction over `bytes`.
    ///
    /// # Safety
    ///
    /// `bytes` must stay valid until [`Transfer::disarm`] has returned.
    pub unsafe fn arm_write(&self, bytes: &[u8]) {
        self.arm(Phase::Writing, bytes.as_ptr().cast_mut(), bytes.len());
    }

    /// Arm a receive transaction into `buffer`.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid, and must not be accessed by the caller, until
    /// [`Transfer::disarm`] has returned.
    pub unsafe fn arm_read(&self, buffer: &mut [u8]) {
        self.arm(Phase::Reading, buffer.as_mut_ptr(), buffer.len());
    }

    fn arm(&self, phase: Phase, ptr: *mut u8, len: usize) {
        self.wait_for_handler();
        self.done.reinit();
        self.error.store(NO_ERROR, Ordering::Relaxed);
        self.buf.store(ptr, Ordering::Relaxed);
        self.len.store(len, Ordering::Relaxed);
        self.index.store(0, Ordering::Relaxed);
        // Publishes everything above to the interrupt handler.
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Detach the caller's buffer.
    ///
    /// Forces the phase to idle and returns once no interrupt handler
    /// invocation can still be using the buffer. Progress (`index`, `len`) and
    /// the recorded error are kept for inspection.
    pub fn disarm(&self) {
        self.phase.store(Phase::Idle as u8, Ordering::SeqCst);
        self.wait_for_handler();
        self.buf.store(core::ptr::null_mut(), Ordering::Relaxed);
    }

    /// Return to the freshly created state. Used at controller (de)initialization.
    pub fn reset(&self) {
        self.disarm();
        self.error.store(NO_ERROR, Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
        self.index.store(0, Ordering::Relaxed);
        self.done.reinit();
    }

    /// Block until the interrupt handler signals completion or `timeout` expires.
    pub fn wait<D: DelayNs>(&self, delay: &mut D, timeout: MillisDurationU32) -> bool {
        self.done.wait_timeout(delay, timeout)
    }

    /// Error recorded by the interrupt handler for the last transaction.
    pub fn outcome(&self) -> Result<(), Error> {
        match self.error.load(Ordering::Acquire) {
            NACK_ERROR => Err(Error::NoAcknowledge),
            ARBITRATION_ERROR => Err(Error::ArbitrationLost),
            _ => Ok(()),
        }
    }

    fn wait_for_handler(&self) {
        while self.servicing.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }
    }

    /// Interrupt service routine body.
    ///
    /// Never blocks and never takes the controller lock.
    pub fn service<R: RegisterAccess>(&self, regs: &R) -> IrqReturn {
        let raw = regs.read(I2C_IRQSTATUS_RAW);
        let status = Irq::from_bits_truncate(regs.read(I2C_IRQSTATUS));
        if raw == 0 {
            return IrqReturn::None;
        }

        self.servicing.store(true, Ordering::SeqCst);
        self.service_events(regs, status);
        self.servicing.store(false, Ordering::SeqCst);
        IrqReturn::Handled
    }

    fn service_events<R: RegisterAccess>(&self, regs: &R, status: Irq) {
        if status.intersects(Irq::FAULTS) {
            let code = if status.contains(Irq::NACK) {
                NACK_ERROR
            } else {
                ARBITRATION_ERROR
            };
            self.error.store(code, Ordering::Relaxed);
            self.phase.store(Phase::Idle as u8, Ordering::SeqCst);
            regs.write(I2C_IRQSTATUS, Irq::FAULTS.bits());
            self.done.complete();
            return;
        }

        let phase = self.phase();

        if status.contains(Irq::XRDY) && phase == Phase::Writing {
            // The controller asks for a byte until STOP is acknowledged, even
            // past the programmed count; feed it zeros then.
            let byte = self.next_tx_byte().unwrap_or(0);
            regs.write(I2C_DATA, u32::from(byte));
            regs.write(I2C_IRQSTATUS, Irq::XRDY.bits());
        }

        if status.contains(Irq::RRDY) && phase == Phase::Reading {
            // Always pop DATA; bytes past the end are drained and dropped.
            let byte = (regs.read(I2C_DATA) & 0xFF) as u8;
            self.store_rx_byte(byte);
            regs.write(I2C_IRQSTATUS, Irq::RRDY.bits());
        }

        if status.contains(Irq::ARDY) {
            regs.write(I2C_IRQSTATUS, Irq::ARDY.bits());
            self.phase.store(Phase::Idle as u8, Ordering::SeqCst);
            self.done.complete();
        }
    }

    fn next_tx_byte(&self) -> Option<u8> {
        let index = self.index.load(Ordering::Relaxed);
        let ptr = self.buf.load(Ordering::Relaxed);
        if ptr.is_null() || index >= self.len.load(Ordering::Relaxed) {
            return None;
        }
        // SAFETY: `ptr`/`len` describe the slice passed to `arm_write`, which
        // stays valid until `disarm` has seen this handler leave.
        let byte = unsafe { ptr.add(index).read() };
        self.index.store(index + 1, Ordering::Release);
        Some(byte)
    }

    fn store_rx_byte(&self, byte: u8) {
        let index = self.index.load(Ordering::Relaxed);
        let ptr = self.buf.load(Ordering::Relaxed);
        if ptr.is_null() || index >= self.len.load(Ordering::Relaxed) {
            return;
        }
        // SAFETY: `ptr`/`len` describe the slice passed to `arm_read`; the
        // caller does not touch it until `disarm` has returned.
        unsafe { ptr.add(index).write(byte) };
        self.index.store(index + 1, Ordering::Release);
    }
}
