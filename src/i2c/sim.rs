// Licensed under the Apache-2.0 license

//! Host-side models of the I2C module, its clock control and the platform
//! glue, used by the unit tests.
//!
//! [`SimI2c`] behaves like the controller seen through its registers: a
//! transaction starts when `CON.STT` is written, then [`SimI2c::step`] raises
//! one event at a time (`XRDY`/`RRDY` per byte, then `ARDY`), waiting until
//! the previous event has been acknowledged in `IRQSTATUS`. Slaves are byte
//! oriented register files behind a 7-bit address.

use crate::common::{LogLevel, Logger};
use crate::i2c::am335x_i2c::Am335xI2c;
use crate::i2c::clock::{
    ClockDomain, CLKCTRL_IDLEST_MASK, CLKCTRL_MODULEMODE_ENABLE, CLKCTRL_MODULEMODE_MASK,
};
use crate::i2c::common::I2cConfig;
use crate::i2c::registers::{
    Con, Irq, RegisterAccess, Sysc, Syss, I2C_CNT, I2C_CON, I2C_DATA, I2C_IRQENABLE_CLR,
    I2C_IRQENABLE_SET, I2C_IRQSTATUS, I2C_IRQSTATUS_RAW, I2C_PSC, I2C_SA, I2C_SCLH, I2C_SCLL,
    I2C_SYSC, I2C_SYSS,
};
use crate::i2c::traits::IrqControl;
use core::fmt;
use embedded_hal::delay::DelayNs;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Delay that only counts: every `delay_*` call is one step.
#[derive(Default)]
pub struct StepDelay {
    steps: u32,
    elapsed_ns: u64,
}

impl StepDelay {
    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_ns / 1_000
    }
}

impl DelayNs for StepDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.steps += 1;
        self.elapsed_ns += u64::from(ns);
    }
}

/// Delay backed by the host scheduler, for tests with a real interrupt thread.
#[derive(Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Lock relax strategy that gives the CPU away while contended.
pub struct YieldRelax;

impl spin::relax::RelaxStrategy for YieldRelax {
    fn relax() {
        thread::yield_now();
    }
}

struct ClockState {
    offset: usize,
    value: u32,
    stuck: bool,
    enable_requests: u32,
}

/// One `CM_*_CLKCTRL` register. Starts gated.
#[derive(Clone)]
pub struct SimClock {
    state: Arc<Mutex<ClockState>>,
}

impl SimClock {
    pub fn new(offset: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                offset,
                value: CLKCTRL_IDLEST_MASK,
                stuck: false,
                enable_requests: 0,
            })),
        }
    }

    /// Keep `IDLEST` set whatever is requested.
    pub fn set_stuck(&self, stuck: bool) {
        lock(&self.state).stuck = stuck;
    }

    /// Gate the module behind the driver's back, like a power manager would.
    pub fn gate(&self) {
        lock(&self.state).value = CLKCTRL_IDLEST_MASK;
    }

    pub fn clkctrl(&self) -> u32 {
        lock(&self.state).value
    }

    pub fn enable_requests(&self) -> u32 {
        lock(&self.state).enable_requests
    }
}

impl RegisterAccess for SimClock {
    fn read(&self, offset: usize) -> u32 {
        let state = lock(&self.state);
        if offset == state.offset {
            state.value
        } else {
            0
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = lock(&self.state);
        if offset != state.offset {
            return;
        }
        let mode = value & CLKCTRL_MODULEMODE_MASK;
        if mode == CLKCTRL_MODULEMODE_ENABLE {
            state.enable_requests += 1;
        }
        state.value = if mode == 0 || state.stuck {
            mode | CLKCTRL_IDLEST_MASK
        } else {
            mode
        };
    }
}

/// Misbehaviour applied to the next transaction started on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Raise NACK once `after` bytes have moved.
    Nack { after: usize },
    /// Raise arbitration loss once `after` bytes have moved.
    ArbitrationLost { after: usize },
    /// Never raise another event.
    Stall,
    /// Once `after` bytes have moved, latch the ready event of the other
    /// direction (`RRDY` on a write, `XRDY` on a read) and then stall. The
    /// handler leaves such an event latched.
    StrayEvent { after: usize },
}

/// Slave behind an address.
pub enum Device {
    /// 256 byte registers with an auto-incrementing pointer. The first byte of
    /// every write transaction selects the pointer. Reads of `fifo_register`
    /// pop `fifo` and leave the pointer in place.
    Registers {
        regs: [u8; 256],
        pointer: u8,
        fifo_register: Option<u8>,
        fifo: VecDeque<u8>,
    },
    /// Reads return previously written bytes in order.
    Loopback(VecDeque<u8>),
}

impl Device {
    pub fn registers() -> Self {
        Device::Registers {
            regs: [0; 256],
            pointer: 0,
            fifo_register: None,
            fifo: VecDeque::new(),
        }
    }

    pub fn loopback() -> Self {
        Device::Loopback(VecDeque::new())
    }

    fn write(&mut self, first: bool, byte: u8) {
        match self {
            Device::Registers { regs, pointer, .. } => {
                if first {
                    *pointer = byte;
                } else {
                    regs[usize::from(*pointer)] = byte;
                    *pointer = pointer.wrapping_add(1);
                }
            }
            Device::Loopback(queue) => queue.push_back(byte),
        }
    }

    fn read(&mut self) -> u8 {
        match self {
            Device::Registers {
                regs,
                pointer,
                fifo_register,
                fifo,
            } => {
                if *fifo_register == Some(*pointer) {
                    return fifo.pop_front().unwrap_or(0);
                }
                let byte = regs[usize::from(*pointer)];
                *pointer = pointer.wrapping_add(1);
                byte
            }
            Device::Loopback(queue) => queue.pop_front().unwrap_or(0xFF),
        }
    }
}

/// A finished bus transaction as seen on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub address: u8,
    pub write: bool,
    pub bytes: Vec<u8>,
}

struct Active {
    address: u8,
    write: bool,
    count: usize,
    bytes: Vec<u8>,
    fault: Option<Fault>,
}

#[derive(Default)]
struct I2cState {
    regs: HashMap<usize, u32>,
    status: u32,
    enabled: u32,
    active: Option<Active>,
    devices: HashMap<u8, Device>,
    faults: VecDeque<Option<Fault>>,
    rx_latch: Option<u8>,
    dummy_reads: usize,
    soft_resets: u32,
    reset_stuck: bool,
    records: Vec<Record>,
}

impl I2cState {
    fn start(&mut self) {
        let address = (self.regs.get(&I2C_SA).copied().unwrap_or(0) & 0x7F) as u8;
        let count = (self.regs.get(&I2C_CNT).copied().unwrap_or(0) & 0xFFFF) as usize;
        let write = self
            .regs
            .get(&I2C_CON)
            .is_some_and(|con| Con::from_bits_truncate(*con).contains(Con::TRX));
        let mut fault = self.faults.pop_front().flatten();
        if fault.is_none() && !self.devices.contains_key(&address) {
            fault = Some(Fault::Nack { after: 0 });
        }
        self.rx_latch = None;
        self.active = Some(Active {
            address,
            write,
            count,
            bytes: Vec::new(),
            fault,
        });
    }

    fn finish(&mut self, event: Irq) {
        self.status |= event.bits();
        if let Some(active) = self.active.take() {
            self.records.push(Record {
                address: active.address,
                write: active.write,
                bytes: active.bytes,
            });
        }
    }

    fn accept_tx(&mut self, byte: u8) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.write || active.bytes.len() >= active.count {
            return;
        }
        let first = active.bytes.is_empty();
        active.bytes.push(byte);
        if let Some(device) = self.devices.get_mut(&active.address) {
            device.write(first, byte);
        }
    }

    fn step(&mut self) -> bool {
        if self.status & Irq::TRANSFER_EVENTS.bits() != 0 {
            return false;
        }
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        let done = active.bytes.len();
        match active.fault {
            Some(Fault::Stall) => return false,
            Some(Fault::Nack { after }) if done >= after => {
                self.finish(Irq::NACK);
                return true;
            }
            Some(Fault::ArbitrationLost { after }) if done >= after => {
                self.finish(Irq::AL);
                return true;
            }
            Some(Fault::StrayEvent { after }) if done >= after => {
                let stray = if active.write { Irq::RRDY } else { Irq::XRDY };
                self.status |= stray.bits();
                if let Some(active) = self.active.as_mut() {
                    active.fault = Some(Fault::Stall);
                }
                return true;
            }
            _ => {}
        }
        if done >= active.count {
            self.finish(Irq::ARDY);
            return true;
        }
        if active.write {
            self.status |= Irq::XRDY.bits();
            return true;
        }
        let address = active.address;
        let byte = self
            .devices
            .get_mut(&address)
            .map_or(0xFF, Device::read);
        if let Some(active) = self.active.as_mut() {
            active.bytes.push(byte);
        }
        self.rx_latch = Some(byte);
        self.status |= Irq::RRDY.bits();
        true
    }
}

/// Register-level model of one I2C module and the slaves on its bus.
#[derive(Clone, Default)]
pub struct SimI2c {
    state: Arc<Mutex<I2cState>>,
}

impl SimI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, address: u8, device: Device) {
        lock(&self.state).devices.insert(address, device);
    }

    /// Register-file slave preloaded with `bytes` starting at `register`.
    pub fn add_register_device(&self, address: u8, register: u8, bytes: &[u8]) {
        let mut device = Device::registers();
        if let Device::Registers { regs, .. } = &mut device {
            for (offset, byte) in bytes.iter().enumerate() {
                regs[(usize::from(register) + offset) % 256] = *byte;
            }
        }
        self.add_device(address, device);
    }

    /// Route reads of `register` on `address` to a FIFO holding `bytes`.
    pub fn set_fifo(&self, address: u8, register: u8, bytes: &[u8]) {
        let mut state = lock(&self.state);
        if let Some(Device::Registers {
            fifo_register,
            fifo,
            ..
        }) = state.devices.get_mut(&address)
        {
            *fifo_register = Some(register);
            fifo.extend(bytes.iter().copied());
        }
    }

    pub fn device_register(&self, address: u8, register: u8) -> Option<u8> {
        match lock(&self.state).devices.get(&address) {
            Some(Device::Registers { regs, .. }) => Some(regs[usize::from(register)]),
            _ => None,
        }
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.state).faults.push_back(Some(fault));
    }

    /// Let the next transaction through untouched; faults injected after this
    /// apply to the ones that follow.
    pub fn pass(&self) {
        lock(&self.state).faults.push_back(None);
    }

    /// Keep `SYSS.RDONE` low after a soft reset.
    pub fn set_reset_stuck(&self, stuck: bool) {
        lock(&self.state).reset_stuck = stuck;
    }

    /// Raise the next event of the active transaction, if the previous one
    /// has been acknowledged. Returns whether anything was raised.
    pub fn step(&self) -> bool {
        lock(&self.state).step()
    }

    /// Whether an enabled event is latched, i.e. the interrupt line is high.
    pub fn irq_pending(&self) -> bool {
        let state = lock(&self.state);
        state.status & state.enabled != 0
    }

    /// Latch arbitrary events, as if the hardware raised them.
    pub fn raise(&self, events: Irq) {
        lock(&self.state).status |= events.bits();
    }

    /// Peek at a plain register without side effects.
    pub fn register(&self, offset: usize) -> u32 {
        let state = lock(&self.state);
        match offset {
            I2C_IRQSTATUS_RAW => state.status,
            I2C_IRQSTATUS => state.status & state.enabled,
            I2C_IRQENABLE_SET | I2C_IRQENABLE_CLR => state.enabled,
            _ => state.regs.get(&offset).copied().unwrap_or(0),
        }
    }

    pub fn timing(&self) -> (u32, u32, u32) {
        (
            self.register(I2C_PSC),
            self.register(I2C_SCLL),
            self.register(I2C_SCLH),
        )
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.state).records.clone()
    }

    pub fn dummy_reads(&self) -> usize {
        lock(&self.state).dummy_reads
    }

    pub fn soft_resets(&self) -> u32 {
        lock(&self.state).soft_resets
    }
}

impl RegisterAccess for SimI2c {
    fn read(&self, offset: usize) -> u32 {
        let mut state = lock(&self.state);
        match offset {
            I2C_IRQSTATUS_RAW => state.status,
            I2C_IRQSTATUS => state.status & state.enabled,
            I2C_IRQENABLE_SET | I2C_IRQENABLE_CLR => state.enabled,
            I2C_SYSS => {
                if state.reset_stuck {
                    0
                } else {
                    Syss::RDONE.bits()
                }
            }
            I2C_DATA => match state.rx_latch.take() {
                Some(byte) => u32::from(byte),
                None => {
                    state.dummy_reads += 1;
                    0
                }
            },
            _ => state.regs.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = lock(&self.state);
        match offset {
            I2C_IRQSTATUS => state.status &= !value,
            I2C_IRQENABLE_SET => state.enabled |= value,
            I2C_IRQENABLE_CLR => state.enabled &= !value,
            I2C_DATA => state.accept_tx((value & 0xFF) as u8),
            I2C_SYSC => {
                if Sysc::from_bits_truncate(value).contains(Sysc::SOFTRESET) {
                    state.soft_resets += 1;
                    state.regs.clear();
                    state.status = 0;
                    state.enabled = 0;
                    state.active = None;
                    state.rx_latch = None;
                }
            }
            I2C_CON => {
                let con = Con::from_bits_truncate(value);
                state.regs.insert(I2C_CON, con.bits());
                if con.contains(Con::STT | Con::EN | Con::MST) {
                    state.start();
                }
                // STT self-clears once the START condition is on the bus.
                state.regs.insert(I2C_CON, (con - Con::STT).bits());
            }
            _ => {
                state.regs.insert(offset, value);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct IrqBusy;

#[derive(Default)]
struct IrqLog {
    requested: Vec<u32>,
    released: Vec<u32>,
    fail: bool,
}

/// Interrupt controller glue recording every request and release.
#[derive(Clone, Default)]
pub struct SimIrq {
    log: Arc<Mutex<IrqLog>>,
}

impl SimIrq {
    pub fn set_fail(&self, fail: bool) {
        lock(&self.log).fail = fail;
    }

    pub fn requested(&self) -> Vec<u32> {
        lock(&self.log).requested.clone()
    }

    pub fn released(&self) -> Vec<u32> {
        lock(&self.log).released.clone()
    }
}

impl IrqControl for SimIrq {
    type Error = IrqBusy;

    fn request(&mut self, line: u32) -> Result<(), Self::Error> {
        let mut log = lock(&self.log);
        if log.fail {
            return Err(IrqBusy);
        }
        log.requested.push(line);
        Ok(())
    }

    fn release(&mut self, line: u32) {
        lock(&self.log).released.push(line);
    }
}

/// Logger keeping every record as `[LEVEL] message`.
#[derive(Clone, Default)]
pub struct RecordingLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|line| line.contains(needle))
    }
}

impl Logger for RecordingLogger {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>) {
        lock(&self.lines).push(format!("[{}] {}", level.as_str(), args));
    }
}

const IDLE_POLL: Duration = Duration::from_micros(20);

/// Host thread standing in for the interrupt vector: it advances the bus model
/// and calls `handler` while the simulated interrupt line is high.
pub struct IrqThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IrqThread {
    pub fn spawn<F>(sim: SimI2c, mut handler: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                let raised = sim.step();
                if sim.irq_pending() {
                    handler();
                } else if !raised {
                    thread::sleep(IDLE_POLL);
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for IrqThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Interrupt line used by every bench.
pub const LINE: u32 = 30;
/// `CM_PER_I2C2_CLKCTRL`.
pub const CLKCTRL: usize = 0x44;

pub type TestI2c = Am335xI2c<SimI2c, SimClock, SimIrq, StdDelay, RecordingLogger, YieldRelax>;

/// A controller wired to the models, with an interrupt thread running.
pub struct Bench {
    pub sim: SimI2c,
    pub cm: SimClock,
    pub irq: SimIrq,
    pub log: RecordingLogger,
    pub i2c: Arc<TestI2c>,
    _isr: IrqThread,
}

impl Bench {
    /// Not initialized yet.
    pub fn new() -> Self {
        let sim = SimI2c::new();
        let cm = SimClock::new(CLKCTRL);
        let irq = SimIrq::default();
        let log = RecordingLogger::default();
        let i2c = Arc::new(TestI2c::new(
            sim.clone(),
            ClockDomain::new(cm.clone(), CLKCTRL),
            irq.clone(),
            StdDelay,
            log.clone(),
        ));
        let vector = Arc::clone(&i2c);
        let isr = IrqThread::spawn(sim.clone(), move || {
            vector.handle_interrupt();
        });
        Self {
            sim,
            cm,
            irq,
            log,
            i2c,
            _isr: isr,
        }
    }

    pub fn ready(bus_speed_khz: u32) -> Self {
        let bench = Self::new();
        bench.i2c.init(bus_speed_khz, LINE).unwrap();
        bench
    }

    pub fn ready_with(config: &I2cConfig) -> Self {
        let bench = Self::new();
        bench.i2c.init_with_config(config, LINE).unwrap();
        bench
    }
}
