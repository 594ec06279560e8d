//! Scripted transport and discovery used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::config::LineConfig;
use crate::discovery::{DeviceDiscovery, DeviceEvent, DeviceSelector, DeviceWatcher, WatcherStatus};
use crate::error::{Error, OpenFailure, Result};
use crate::slot::lock;
use crate::transport::{PortOpener, ReadMode, SerialHandle};

/// Installs a test subscriber honoring `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted answer to one read.
#[derive(Debug, Clone)]
pub(crate) enum MockRead {
    /// Answer immediately.
    Data(&'static [u8]),
    /// Answer after a delay.
    Delayed(Duration, &'static [u8]),
    /// Never answer.
    Hang,
    /// Fail with a communication error.
    Fail,
}

#[derive(Debug, Default)]
struct MockState {
    open_results: VecDeque<std::result::Result<(), OpenFailure>>,
    opened: Vec<String>,
    writes: Vec<Bytes>,
    reads: VecDeque<MockRead>,
    read_requests: Vec<(usize, ReadMode)>,
    configured: Vec<LineConfig>,
    detaches: usize,
    closes: usize,
    fail_detach: bool,
    fail_writes: bool,
    hang_configure: bool,
}

/// Shared script and record of everything the code under test did.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn opener(&self) -> MockOpener {
        MockOpener {
            device: self.clone(),
        }
    }

    /// Makes the next open fail.
    pub(crate) fn fail_next_open(&self, failure: OpenFailure) {
        lock(&self.state).open_results.push_back(Err(failure));
    }

    pub(crate) fn push_read(&self, read: MockRead) {
        lock(&self.state).reads.push_back(read);
    }

    pub(crate) fn set_fail_detach(&self, fail: bool) {
        lock(&self.state).fail_detach = fail;
    }

    pub(crate) fn set_fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Makes configuration wait forever, like a port whose reader is busy.
    pub(crate) fn set_hang_configure(&self, hang: bool) {
        lock(&self.state).hang_configure = hang;
    }

    pub(crate) fn opened(&self) -> Vec<String> {
        lock(&self.state).opened.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Bytes> {
        lock(&self.state).writes.clone()
    }

    pub(crate) fn read_requests(&self) -> Vec<(usize, ReadMode)> {
        lock(&self.state).read_requests.clone()
    }

    pub(crate) fn configured(&self) -> Vec<LineConfig> {
        lock(&self.state).configured.clone()
    }

    pub(crate) fn detaches(&self) -> usize {
        lock(&self.state).detaches
    }

    pub(crate) fn closes(&self) -> usize {
        lock(&self.state).closes
    }
}

/// Opener handing out [`MockPort`]s.
#[derive(Debug, Clone)]
pub(crate) struct MockOpener {
    device: MockDevice,
}

impl PortOpener for MockOpener {
    type Handle = MockPort;

    fn open<'a>(
        &'a self,
        device_id: &'a str,
    ) -> BoxFuture<'a, std::result::Result<MockPort, OpenFailure>> {
        Box::pin(async move {
            let mut state = lock(&self.device.state);
            state.opened.push(device_id.to_string());
            state.open_results.pop_front().unwrap_or(Ok(()))?;
            Ok(MockPort {
                device: self.device.clone(),
                closed: AtomicBool::new(false),
            })
        })
    }
}

/// Handle driven by the [`MockDevice`] script.
#[derive(Debug)]
pub(crate) struct MockPort {
    device: MockDevice,
    closed: AtomicBool,
}

impl MockPort {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl SerialHandle for MockPort {
    fn configure<'a>(&'a self, config: &'a LineConfig) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            let hang = {
                let mut state = lock(&self.device.state);
                if !state.hang_configure {
                    state.configured.push(config.clone());
                }
                state.hang_configure
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        })
    }

    fn write(&self, data: Bytes) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut state = lock(&self.device.state);
            if state.fail_writes {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device stopped responding",
                )));
            }
            let len = data.len();
            state.writes.push(data);
            Ok(len)
        })
    }

    fn read(&self, max_len: usize, mode: ReadMode) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            self.ensure_open()?;
            let next = {
                let mut state = lock(&self.device.state);
                state.read_requests.push((max_len, mode));
                state.reads.pop_front().unwrap_or(MockRead::Hang)
            };
            let data = match next {
                MockRead::Data(data) => data,
                MockRead::Delayed(delay, data) => {
                    tokio::time::sleep(delay).await;
                    data
                }
                MockRead::Hang => std::future::pending().await,
                MockRead::Fail => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "device stopped responding",
                    )));
                }
            };
            Ok(Bytes::from_static(&data[..data.len().min(max_len)]))
        })
    }

    fn detach_reader(&self) -> Result<()> {
        let mut state = lock(&self.device.state);
        state.detaches += 1;
        if state.fail_detach {
            return Err(Error::Transport {
                message: "reader detach failed".into(),
            });
        }
        Ok(())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                lock(&self.device.state).closes += 1;
            }
        })
    }
}

#[derive(Debug)]
struct WatcherRecord {
    selector: DeviceSelector,
    events: mpsc::Sender<DeviceEvent>,
    status: Arc<Mutex<WatcherStatus>>,
}

/// Discovery whose watchers are driven by the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockDiscovery {
    watchers: Arc<Mutex<Vec<WatcherRecord>>>,
}

impl MockDiscovery {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn watcher_count(&self) -> usize {
        lock(&self.watchers).len()
    }

    pub(crate) fn status(&self, index: usize) -> WatcherStatus {
        *lock(&lock(&self.watchers)[index].status)
    }

    pub(crate) fn selector(&self, index: usize) -> DeviceSelector {
        lock(&self.watchers)[index].selector
    }

    /// Delivers an event through the watcher at `index`.
    pub(crate) async fn emit(&self, index: usize, event: DeviceEvent) {
        let events = lock(&self.watchers)[index].events.clone();
        events.send(event).await.expect("watcher receiver dropped");
    }
}

impl DeviceDiscovery for MockDiscovery {
    type Watcher = MockWatcher;

    fn create_watcher(
        &self,
        selector: DeviceSelector,
        events: mpsc::Sender<DeviceEvent>,
    ) -> MockWatcher {
        let status = Arc::new(Mutex::new(WatcherStatus::Created));
        lock(&self.watchers).push(WatcherRecord {
            selector,
            events,
            status: Arc::clone(&status),
        });
        MockWatcher { status }
    }
}

/// Watcher that only tracks its status.
#[derive(Debug)]
pub(crate) struct MockWatcher {
    status: Arc<Mutex<WatcherStatus>>,
}

impl DeviceWatcher for MockWatcher {
    fn start(&mut self) {
        let mut status = lock(&self.status);
        if !status.is_running() {
            *status = WatcherStatus::Started;
        }
    }

    fn stop(&mut self) {
        let mut status = lock(&self.status);
        if status.is_running() {
            *status = WatcherStatus::Stopped;
        }
    }

    fn status(&self) -> WatcherStatus {
        *lock(&self.status)
    }
}
