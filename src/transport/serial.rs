//! Serial/USB transport implementation.
//!
//! This module provides serial port communication for the oscilloscope
//! firmware over `tokio-serial`.

use std::io;
use std::sync::Mutex as StdMutex;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::config::{DEFAULT_BAUD_RATE, LineConfig};
use crate::discovery::{DeviceInfo, DeviceSelector};
use crate::error::{Error, OpenFailure, Result};
use crate::slot::lock;
use crate::transport::{PortOpener, ReadMode, SerialHandle};

/// Opens serial ports by path (e.g. "/dev/ttyACM0" or "COM3").
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl NativeOpener {
    /// Creates a native opener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PortOpener for NativeOpener {
    type Handle = NativePort;

    fn open<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, std::result::Result<NativePort, OpenFailure>> {
        Box::pin(async move {
            tracing::info!("opening serial port: {}", device_id);

            let stream = tokio_serial::new(device_id, DEFAULT_BAUD_RATE)
                .open_native_async()
                .map_err(|e| {
                    tracing::warn!("failed to open {}: {}", device_id, e);
                    classify_open_error(&e)
                })?;

            Ok(NativePort::new(device_id, stream))
        })
    }
}

/// Maps a serial open error onto the open failure taxonomy.
fn classify_open_error(error: &tokio_serial::Error) -> OpenFailure {
    match error.kind() {
        tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => OpenFailure::DeniedBySystem,
        _ => OpenFailure::Unknown,
    }
}

/// An open serial port.
///
/// Uses split read/write halves to allow concurrent reading and writing.
pub struct NativePort {
    port_name: String,
    reader: Mutex<Option<ReadHalf<SerialStream>>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    // Bytes read from the port but not handed out yet
    pending: StdMutex<BytesMut>,
    line: StdMutex<LineConfig>,
}

impl NativePort {
    fn new(port_name: &str, stream: SerialStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            port_name: port_name.to_string(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            pending: StdMutex::new(BytesMut::new()),
            line: StdMutex::new(LineConfig::default()),
        }
    }

    fn line(&self) -> LineConfig {
        lock(&self.line).clone()
    }
}

impl SerialHandle for NativePort {
    fn configure<'a>(&'a self, config: &'a LineConfig) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;
            let mut writer = self.writer.lock().await;
            let (Some(read_half), Some(write_half)) = (reader.take(), writer.take()) else {
                return Err(Error::NotConnected);
            };

            let mut stream = read_half.unsplit(write_half);
            let applied = apply_line_config(&mut stream, config);

            let (read_half, write_half) = tokio::io::split(stream);
            *reader = Some(read_half);
            *writer = Some(write_half);

            applied?;
            *lock(&self.line) = config.clone();
            tracing::debug!(
                "configured {}: {} baud, {:?} parity, {:?} stop bits, {:?} data bits",
                self.port_name,
                config.baud_rate,
                config.parity,
                config.stop_bits,
                config.data_bits
            );
            Ok(())
        })
    }

    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            let timeout = self.line().write_timeout;
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(Error::NotConnected)?;

            tracing::trace!("writing {} bytes: {}", data.len(), hex::encode(&data));
            tokio::time::timeout(timeout, async {
                writer.write_all(&data).await?;
                writer.flush().await
            })
            .await
            .map_err(|_| Error::timeout(timeout))??;

            Ok(data.len())
        })
    }

    fn read(&self, max_len: usize, mode: ReadMode) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let read_timeout = self.line().read_timeout;
            let mut reader = self.reader.lock().await;
            let reader = reader.as_mut().ok_or(Error::NotConnected)?;

            let mut staged = std::mem::take(&mut *lock(&self.pending));
            let mut chunk = vec![0u8; max_len.max(1)];

            match mode {
                ReadMode::Partial => {
                    if staged.is_empty() {
                        let n = reader.read(&mut chunk).await?;
                        staged.extend_from_slice(&chunk[..n]);
                    }
                }
                ReadMode::ReadAhead => {
                    let deadline = tokio::time::Instant::now() + read_timeout;
                    while staged.len() < max_len {
                        match tokio::time::timeout_at(deadline, reader.read(&mut chunk)).await {
                            Ok(Ok(0)) | Err(_) => break,
                            Ok(Ok(n)) => staged.extend_from_slice(&chunk[..n]),
                            Ok(Err(e)) => return Err(Error::Io(e)),
                        }
                    }
                }
            }

            let data = staged.split_to(staged.len().min(max_len)).freeze();
            if !staged.is_empty() {
                lock(&self.pending).extend_from_slice(&staged);
            }

            tracing::trace!("read {} bytes: {}", data.len(), hex::encode(&data));
            Ok(data)
        })
    }

    fn detach_reader(&self) -> Result<()> {
        if let Ok(reader) = self.reader.try_lock() {
            if reader.is_none() {
                return Err(Error::Transport {
                    message: format!("{} closed before the reader was detached", self.port_name),
                });
            }
        }

        let mut pending = lock(&self.pending);
        if !pending.is_empty() {
            tracing::trace!("discarding {} unconsumed bytes", pending.len());
            pending.clear();
        }
        Ok(())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;
            let mut writer = self.writer.lock().await;
            if reader.take().is_some() || writer.take().is_some() {
                tracing::info!("closed serial port: {}", self.port_name);
            }
            lock(&self.pending).clear();
        })
    }
}

fn apply_line_config(stream: &mut SerialStream, config: &LineConfig) -> Result<()> {
    stream.set_baud_rate(config.baud_rate)?;
    stream.set_parity(config.parity)?;
    stream.set_stop_bits(config.stop_bits)?;
    stream.set_data_bits(config.data_bits)?;
    stream.set_flow_control(config.flow_control)?;
    Ok(())
}

/// Lists serial ports matching `selector`.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn scan_ports(selector: DeviceSelector) -> Result<Vec<DeviceInfo>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports
        .into_iter()
        .filter_map(|port| {
            let (usb, name) = match &port.port_type {
                SerialPortType::UsbPort(usb) => (
                    Some((usb.vid, usb.pid)),
                    usb.product.clone().unwrap_or_else(|| port.port_name.clone()),
                ),
                _ => (None, port.port_name.clone()),
            };
            selector
                .matches(usb)
                .then(|| DeviceInfo::new(port.port_name, name))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_classification() {
        let denied = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied),
            "permission denied",
        );
        assert_eq!(classify_open_error(&denied), OpenFailure::DeniedBySystem);

        let missing = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "no such device");
        assert_eq!(classify_open_error(&missing), OpenFailure::Unknown);

        let busy = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(io::ErrorKind::ResourceBusy),
            "device busy",
        );
        assert_eq!(classify_open_error(&busy), OpenFailure::Unknown);
    }

    #[tokio::test]
    async fn test_open_missing_port_is_classified() {
        let result = NativeOpener::new().open("/dev/arduscope-missing-port").await;
        assert!(matches!(result, Err(OpenFailure::Unknown)));
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_scan_ports() {
        // Just verify it doesn't panic
        let _ = scan_ports(DeviceSelector::any());
    }
}
