//! Transport layer for the oscilloscope link.
//!
//! This module provides the abstraction over the serial device. A
//! [`PortOpener`] turns a device id into an open [`SerialHandle`]; the
//! native implementation over `tokio-serial` lives in [`serial`].

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::config::LineConfig;
use crate::error::{OpenFailure, Result};

/// How a read waits for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Complete as soon as any byte is available.
    Partial,
    /// Keep reading until the requested length arrives or the line's read
    /// timeout elapses without more input.
    ReadAhead,
}

/// An open serial device.
///
/// Reads and writes may run concurrently with each other.
pub trait SerialHandle: Send + Sync {
    /// Applies line parameters.
    fn configure<'a>(&'a self, config: &'a LineConfig) -> BoxFuture<'a, Result<()>>;

    /// Writes all of `data`, returning the number of bytes stored.
    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<usize>>;

    /// Reads up to `max_len` bytes.
    fn read(&self, max_len: usize, mode: ReadMode) -> BoxFuture<'_, Result<Bytes>>;

    /// Releases the reader after a read attempt, dropping unconsumed input.
    fn detach_reader(&self) -> Result<()>;

    /// Releases the device. Pending and later I/O fails.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens devices by id.
pub trait PortOpener: Send + Sync {
    /// Handle type produced by this opener.
    type Handle: SerialHandle + 'static;

    /// Opens the device, classifying failures.
    fn open<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Self::Handle, OpenFailure>>;
}

pub use serial::{NativeOpener, NativePort};
