//! Command/response exchanges with the oscilloscope firmware.
//!
//! The [`ExchangeController`] owns one [`OperationSlot`] per I/O direction.
//! Every write goes through the write slot and every read through the read
//! slot, so at most one write and one read are outstanding and both can be
//! cancelled at any time. The controller borrows the device handle for the
//! duration of one exchange only.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::config::ScopeConfig;
use crate::error::Error;
use crate::event::{Event, EventDispatcher, NotifyKind};
use crate::protocol::{Command, PROBE_ACK, SampleSink};
use crate::slot::OperationSlot;
use crate::transport::SerialHandle;

/// Result of the post-connect probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The firmware answered with the expected sentinel.
    Ready,
    /// Wrong answer, no answer in time, or the exchange failed.
    NotConfigured,
}

/// Drives the stop/probe/sample protocol.
#[derive(Clone)]
pub struct ExchangeController {
    read_slot: Arc<OperationSlot>,
    write_slot: Arc<OperationSlot>,
    samples: Arc<Mutex<SampleSink>>,
    dispatcher: EventDispatcher,
    probe_timeout: Duration,
}

impl ExchangeController {
    /// Creates a controller publishing on `dispatcher`.
    #[must_use]
    pub fn new(config: &ScopeConfig, dispatcher: EventDispatcher) -> Self {
        Self {
            read_slot: Arc::new(OperationSlot::new("read")),
            write_slot: Arc::new(OperationSlot::new("write")),
            samples: Arc::new(Mutex::new(SampleSink::new(config.sample_capacity))),
            dispatcher,
            probe_timeout: config.probe_timeout,
        }
    }

    /// Installs fresh token generations on both slots.
    pub fn reset_slots(&self) {
        self.read_slot.reset();
        self.write_slot.reset();
    }

    /// Cancels the current read.
    pub fn cancel_read(&self) {
        self.read_slot.cancel();
    }

    /// Cancels the current write.
    pub fn cancel_write(&self) {
        self.write_slot.cancel();
    }

    /// Cancels all in-flight I/O.
    pub fn cancel_all(&self) {
        self.cancel_read();
        self.cancel_write();
    }

    /// Returns the retained samples, oldest first.
    pub async fn samples(&self) -> Vec<u8> {
        self.samples.lock().await.snapshot()
    }

    /// Drops all retained samples.
    pub async fn clear_samples(&self) {
        self.samples.lock().await.clear();
    }

    /// Sends the stop command. Failures are only logged.
    pub async fn stop<H: SerialHandle + ?Sized>(&self, handle: &H) {
        if let Err(e) = self.write_command(handle, Command::Stop).await {
            tracing::debug!("stop command not delivered: {}", e);
        }
    }

    /// Sends the probe and checks the answer.
    pub async fn probe<H: SerialHandle + ?Sized>(&self, handle: &H) -> ProbeOutcome {
        let answer = match self.write_command(handle, Command::Probe).await {
            Ok(()) => {
                self.read_response(handle, Command::Probe, Some(self.probe_timeout))
                    .await
            }
            Err(e) => Err(e),
        };

        match answer {
            Ok(data) if data.first() == Some(&PROBE_ACK) => {
                self.dispatcher.notify(NotifyKind::WaitDevice, "ready to plot");
                ProbeOutcome::Ready
            }
            Ok(data) => {
                tracing::warn!("unexpected probe answer: {}", hex::encode(&data));
                self.not_configured()
            }
            Err(e) => {
                tracing::warn!("probe failed: {}", e);
                self.not_configured()
            }
        }
    }

    fn not_configured(&self) -> ProbeOutcome {
        self.dispatcher
            .notify(NotifyKind::Error, "the device is not configured");
        ProbeOutcome::NotConfigured
    }

    /// Requests one burst of samples and appends every decoded byte.
    ///
    /// Returns the number of samples appended.
    pub async fn sample<H: SerialHandle + ?Sized>(&self, handle: &H) -> usize {
        if let Err(e) = self.write_command(handle, Command::Sample).await {
            self.report(&e);
            return 0;
        }

        let result = self.read_response(handle, Command::Sample, None).await;

        match result {
            Ok(data) => {
                let snapshot = {
                    let mut samples = self.samples.lock().await;
                    samples.extend_raw(&data);
                    samples.snapshot()
                };
                tracing::trace!("appended {} samples", data.len());
                self.dispatcher.dispatch(Event::Samples(snapshot));
                data.len()
            }
            Err(e) => {
                self.report(&e);
                0
            }
        }
    }

    async fn write_command<H: SerialHandle + ?Sized>(
        &self,
        handle: &H,
        command: Command,
    ) -> Result<(), Error> {
        let payload = Bytes::from_static(command.as_bytes());
        let written = self.write_slot.run(|| handle.write(payload)).await?;
        tracing::trace!("sent {} command ({} bytes)", command, written);
        Ok(())
    }

    /// Reads the answer to `command`, then detaches the reader whatever happened.
    async fn read_response<H: SerialHandle + ?Sized>(
        &self,
        handle: &H,
        command: Command,
        timeout: Option<Duration>,
    ) -> Result<Bytes, Error> {
        let Some((max_len, mode)) = command.response() else {
            return Ok(Bytes::new());
        };
        let result = match timeout {
            Some(timeout) => {
                self.read_slot
                    .run_with_timeout(timeout, || handle.read(max_len, mode))
                    .await
            }
            None => self.read_slot.run(|| handle.read(max_len, mode)).await,
        };
        self.detach_reader(handle);
        result
    }

    fn detach_reader<H: SerialHandle + ?Sized>(&self, handle: &H) {
        if let Err(e) = handle.detach_reader() {
            self.dispatcher
                .notify(NotifyKind::Error, format!("failed to release the reader: {e}"));
        }
    }

    fn report(&self, error: &Error) {
        if error.is_cancelled() {
            self.dispatcher.notify(NotifyKind::DeviceRemoved, "I/O stopped");
        } else if error.is_transport_fault() {
            self.dispatcher
                .notify(NotifyKind::Error, format!("communication error: {error}"));
        } else {
            tracing::error!("unexpected exchange failure: {}", error);
            self.dispatcher.notify(NotifyKind::Error, error.to_string());
        }
    }
}
