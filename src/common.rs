// Licensed under the Apache-2.0 license

//! Driver-wide utilities shared by the peripheral modules.
//!
//! Drivers never print directly. They report through a [`Logger`] supplied by
//! the platform, which keeps the crate free of any console dependency: boards
//! with a debug UART plug in a [`UartLogger`], everything else uses
//! [`NoOpLogger`].

use core::fmt;
use embedded_io::Write as _;

/// Severity attached to every log record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Sink for driver diagnostics.
///
/// Loggers are only invoked from thread context. Interrupt handlers never log,
/// so implementations are free to block on their output device.
pub trait Logger {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>);

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    fn warn(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn info(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

/// Logger that discards everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&mut self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// Line-oriented logger on top of any `embedded_io::Write` sink.
///
/// Each record is emitted as `[LEVEL] message\r\n`. Records above the
/// configured level are dropped. Write errors are ignored: a broken console
/// must never turn into a driver failure.
pub struct UartLogger<W: embedded_io::Write> {
    writer: W,
    max_level: LogLevel,
}

impl<W: embedded_io::Write> UartLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            max_level: LogLevel::Info,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.max_level = level;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: embedded_io::Write> Logger for UartLogger<W> {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level > self.max_level {
            return;
        }
        let _ = write!(self.writer, "[{}] ", level.as_str());
        let _ = self.writer.write_fmt(args);
        let _ = self.writer.write_all(b"\r\n");
    }
}
