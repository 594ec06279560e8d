//! Main [`Scope`] client implementation.
//!
//! A [`Scope`] owns the [`ConnectionManager`] and the [`ExchangeController`]
//! and drives both from a single event loop, so every state change happens
//! on one task. Callers talk to it through a cloneable [`ScopeHandle`] and
//! observe it through [`Subscription`]s.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::ScopeConfig;
use crate::connection::ConnectionManager;
use crate::discovery::{
    DeviceDiscovery, DeviceEvent, DeviceInfo, DeviceSelector, DeviceWatcher, PortScanner,
};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, NotifyKind, Subscription};
use crate::exchange::{ExchangeController, ProbeOutcome};
use crate::transport::{NativeOpener, PortOpener, SerialHandle};

const REQUEST_CAPACITY: usize = 32;
const WATCH_CAPACITY: usize = 64;

enum Request {
    Connect {
        device_id: String,
        reply: oneshot::Sender<bool>,
    },
    Disconnect(oneshot::Sender<()>),
    SetStreaming {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    Suspend(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Devices(oneshot::Sender<Vec<DeviceInfo>>),
    Shutdown(oneshot::Sender<()>),
}

/// Messages from callbacks and spawned exchanges back into the loop.
enum Internal {
    Connected(DeviceInfo),
    Closing(DeviceInfo),
    ProbeFinished {
        generation: u64,
        outcome: ProbeOutcome,
    },
    SampleFinished,
}

/// Cloneable front end of a running [`Scope`].
#[derive(Clone)]
pub struct ScopeHandle {
    requests: mpsc::Sender<Request>,
    dispatcher: EventDispatcher,
}

impl ScopeHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response.await.map_err(|_| Error::ChannelClosed)
    }

    /// Opens the device with the given id and probes it.
    ///
    /// Returns false if the device could not be opened. Whether the probe
    /// succeeded is reported as [`Event::Ready`] or [`Event::NotConfigured`].
    pub async fn connect(&self, device_id: impl Into<String>) -> Result<bool> {
        let device_id = device_id.into();
        self.request(|reply| Request::Connect { device_id, reply })
            .await
    }

    /// Stops streaming, quiesces the device and releases it.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect).await
    }

    /// Starts or stops the sample cadence.
    ///
    /// Returns whether samples are being streamed afterwards.
    pub async fn set_streaming(&self, enabled: bool) -> Result<bool> {
        self.request(|reply| Request::SetStreaming { enabled, reply })
            .await
    }

    /// Signals that the host process is being suspended.
    pub async fn suspend(&self) -> Result<()> {
        self.request(Request::Suspend).await
    }

    /// Signals that the host process resumed.
    pub async fn resume(&self) -> Result<()> {
        self.request(Request::Resume).await
    }

    /// Returns the devices currently present.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.request(Request::Devices).await
    }

    /// Releases the device and stops the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Request::Shutdown).await
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

/// Single-owner event loop for one oscilloscope.
pub struct Scope<P: PortOpener, D: DeviceDiscovery> {
    manager: ConnectionManager<P, D>,
    exchange: ExchangeController,
    dispatcher: EventDispatcher,
    selector: DeviceSelector,
    sample_interval: Duration,

    requests: mpsc::Receiver<Request>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    manager_events: mpsc::Receiver<DeviceEvent>,
    list_events: mpsc::Receiver<DeviceEvent>,

    list_watcher: D::Watcher,
    list_suspended: bool,
    devices: Vec<DeviceInfo>,

    generation: u64,
    ready: bool,
    ticker: Option<Interval>,
    in_flight: usize,
}

impl Scope<NativeOpener, PortScanner> {
    /// Creates a scope over the native serial ports.
    #[must_use]
    pub fn native(config: ScopeConfig) -> (Self, ScopeHandle) {
        Self::new(NativeOpener::new(), PortScanner::default(), config)
    }
}

impl<P: PortOpener + 'static, D: DeviceDiscovery + 'static> Scope<P, D> {
    /// Creates a scope and its handle.
    ///
    /// Nothing happens until [`run`](Self::run) is awaited or spawned.
    pub fn new(opener: P, discovery: D, config: ScopeConfig) -> (Self, ScopeHandle) {
        let dispatcher = EventDispatcher::new(config.channel_capacity);
        let exchange = ExchangeController::new(&config, dispatcher.clone());

        let (request_tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (list_tx, list_events) = mpsc::channel(WATCH_CAPACITY);
        let (manager_tx, manager_events) = mpsc::channel(WATCH_CAPACITY);

        let list_watcher = discovery.create_watcher(config.selector, list_tx);
        let mut manager = ConnectionManager::new(
            opener,
            discovery,
            config.line.clone(),
            dispatcher.clone(),
            manager_tx,
        );

        let connected = internal_tx.clone();
        manager.set_on_connected(move |device| {
            let _ = connected.send(Internal::Connected(device.clone()));
        });
        let closing = internal_tx.clone();
        let closing_exchange = exchange.clone();
        manager.set_on_closing(move |device| {
            // Queued ahead of the result of any exchange the cancel unwinds
            let _ = closing.send(Internal::Closing(device.clone()));
            closing_exchange.cancel_all();
        });

        let handle = ScopeHandle {
            requests: request_tx,
            dispatcher: dispatcher.clone(),
        };
        let scope = Self {
            manager,
            exchange,
            dispatcher,
            selector: config.selector,
            sample_interval: config.sample_interval,
            requests,
            internal_tx,
            internal_rx,
            manager_events,
            list_events,
            list_watcher,
            list_suspended: false,
            devices: Vec::new(),
            generation: 0,
            ready: false,
            ticker: None,
            in_flight: 0,
        };
        (scope, handle)
    }

    /// Runs the event loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        self.list_watcher.start();
        tracing::debug!("scope loop started");

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.on_request(request).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(message) = self.internal_rx.recv() => self.on_internal(message).await,
                Some(event) = self.list_events.recv() => self.on_list_event(event),
                Some(event) = self.manager_events.recv() => {
                    self.manager.handle_watch_event(event).await;
                }
                () = next_tick(&mut self.ticker) => self.on_tick(),
            }
        }

        tracing::debug!("scope loop stopped");
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Connect { device_id, reply } => {
                let opened = self.connect(device_id).await;
                let _ = reply.send(opened);
            }
            Request::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Request::SetStreaming { enabled, reply } => {
                let streaming = self.set_streaming(enabled);
                let _ = reply.send(streaming);
            }
            Request::Suspend(reply) => {
                self.suspend().await;
                let _ = reply.send(());
            }
            Request::Resume(reply) => {
                self.resume();
                let _ = reply.send(());
            }
            Request::Devices(reply) => {
                let _ = reply.send(self.devices.clone());
            }
            Request::Shutdown(_) => {}
        }
    }

    async fn connect(&mut self, device_id: String) -> bool {
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .unwrap_or_else(|| DeviceInfo::new(device_id.clone(), device_id));
        self.manager.open_device(device, self.selector).await
    }

    async fn disconnect(&mut self) {
        self.stop_cadence();
        self.cancel_exchanges();
        self.exchange.clear_samples().await;

        match self.manager.handle() {
            Some(handle) => self.exchange.stop(&*handle).await,
            None => self
                .dispatcher
                .notify(NotifyKind::NoDevice, "no device connected"),
        }

        self.manager.set_auto_reconnect(false);
        self.manager.close_device().await;
    }

    fn set_streaming(&mut self, enabled: bool) -> bool {
        if !enabled {
            self.stop_cadence();
            self.cancel_exchanges();
            self.dispatcher
                .notify(NotifyKind::NoDevice, "plotting stopped");
            return false;
        }

        if !self.ready || !self.manager.is_connected() {
            self.dispatcher
                .notify(NotifyKind::NoDevice, "device is not ready");
            return false;
        }

        if self.ticker.is_none() {
            let mut ticker = tokio::time::interval(self.sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.ticker = Some(ticker);
            self.dispatcher.notify(NotifyKind::Status, "plotting");
        }
        true
    }

    async fn suspend(&mut self) {
        self.stop_cadence();
        self.cancel_exchanges();

        if let Some(handle) = self.manager.handle() {
            self.exchange.stop(&*handle).await;
            self.manager.close_current_device().await;
        }

        if self.list_watcher.status().is_running() {
            self.list_watcher.stop();
            self.list_suspended = true;
        }
        self.manager.suspend();
    }

    fn resume(&mut self) {
        self.manager.resume();
        if self.list_suspended {
            self.list_watcher.start();
            self.list_suspended = false;
        }
    }

    async fn shutdown(&mut self) {
        self.stop_cadence();
        self.cancel_exchanges();
        if let Some(handle) = self.manager.handle() {
            self.exchange.stop(&*handle).await;
        }
        self.manager.close_device().await;
        self.list_watcher.stop();
    }

    /// Cancels in-flight I/O and disowns any probe still running.
    fn cancel_exchanges(&mut self) {
        self.generation += 1;
        self.exchange.cancel_all();
    }

    fn stop_cadence(&mut self) {
        if self.ticker.take().is_some() {
            tracing::debug!("sample cadence stopped");
        }
    }

    async fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::Connected(device) => {
                self.generation += 1;
                self.ready = false;
                self.exchange.reset_slots();
                tracing::debug!("probing {}", device.name);
                self.spawn_probe();
            }
            Internal::Closing(device) => {
                tracing::debug!("{} is closing", device.name);
                // A probe still running belongs to the closed connection
                self.generation += 1;
                self.ready = false;
                self.stop_cadence();
            }
            Internal::ProbeFinished {
                generation,
                outcome,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if generation != self.generation {
                    tracing::debug!("ignoring stale probe result");
                    return;
                }
                match outcome {
                    ProbeOutcome::Ready => {
                        self.ready = true;
                        self.dispatcher.dispatch(Event::Ready);
                    }
                    ProbeOutcome::NotConfigured => {
                        self.ready = false;
                        self.dispatcher.dispatch(Event::NotConfigured);
                        self.manager.close_device().await;
                    }
                }
            }
            Internal::SampleFinished => {
                self.in_flight = self.in_flight.saturating_sub(1);
            }
        }
    }

    fn spawn_probe(&mut self) {
        let Some(handle) = self.manager.handle() else {
            return;
        };
        let exchange = self.exchange.clone();
        let done = self.internal_tx.clone();
        let generation = self.generation;

        self.in_flight += 1;
        tokio::spawn(async move {
            let outcome = exchange.probe(&*handle).await;
            drop(handle);
            let _ = done.send(Internal::ProbeFinished {
                generation,
                outcome,
            });
        });
    }

    fn on_tick(&mut self) {
        if self.in_flight > 0 {
            tracing::trace!("exchange still in flight, skipping tick");
            return;
        }
        let Some(handle) = self.manager.handle() else {
            self.stop_cadence();
            return;
        };
        let exchange = self.exchange.clone();
        let done = self.internal_tx.clone();

        self.in_flight += 1;
        tokio::spawn(async move {
            exchange.sample(&*handle).await;
            drop(handle);
            let _ = done.send(Internal::SampleFinished);
        });
    }

    fn on_list_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Added(device) => {
                if self.devices.iter().any(|d| d.id == device.id) {
                    return;
                }
                self.dispatcher
                    .notify(NotifyKind::Status, format!("{} added", device.name));
                self.devices.push(device.clone());
                self.dispatcher.dispatch(Event::DeviceAdded(device));
            }
            DeviceEvent::Removed(id) => {
                let name = match self.devices.iter().position(|d| d.id == id) {
                    Some(index) => self.devices.remove(index).name,
                    None => id.clone(),
                };
                self.stop_cadence();
                self.cancel_exchanges();
                self.dispatcher
                    .notify(NotifyKind::DeviceRemoved, format!("{name} removed"));
                self.dispatcher.dispatch(Event::DeviceRemoved(id));
            }
            DeviceEvent::EnumerationCompleted => self.on_enumeration_completed(),
            DeviceEvent::AccessChanged { .. } => {}
        }
    }

    /// Re-applies the line configuration off the loop.
    ///
    /// The native port serializes configuration with reads, so awaiting it
    /// here would stall the loop behind a pending probe.
    fn spawn_reconfigure(&self) {
        let Some(handle) = self.manager.handle() else {
            return;
        };
        let line = self.manager.line().clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.configure(&line).await {
                dispatcher.notify(
                    NotifyKind::Error,
                    format!("failed to configure the line: {e}"),
                );
            }
        });
    }

    fn on_enumeration_completed(&self) {
        if let Some(device) = self.manager.device().filter(|_| self.manager.is_connected()) {
            let message = format!("connected to {}", device.name);
            self.dispatcher.notify(NotifyKind::Status, message);
            self.spawn_reconfigure();
        } else if let Some(device) = self
            .manager
            .device()
            .filter(|_| self.manager.auto_reconnect_enabled())
        {
            let message = format!("waiting to connect to {}", device.name);
            self.dispatcher.notify(NotifyKind::Status, message);
        } else if self.devices.is_empty() {
            self.dispatcher
                .notify(NotifyKind::NoDevice, "no device connected");
        } else {
            self.dispatcher
                .notify(NotifyKind::WaitDevice, "connect a device");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
