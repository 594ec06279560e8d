//! Ownership of the single device connection.
//!
//! The [`ConnectionManager`] opens, configures and releases the device
//! handle, watches for the device leaving and coming back, and reopens it
//! automatically while auto-reconnect is enabled. It is constructed
//! explicitly and owned by one task; collaborators receive the handle for
//! the duration of one exchange.
//!
//! Presence watching follows a small state machine:
//!
//! ```text
//!  Stopped --start--> Watching --suspend--> Suspended
//!     ^                  |  ^                  |
//!     +------close-------+  +------resume------+
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::LineConfig;
use crate::discovery::{
    AccessStatus, DeviceDiscovery, DeviceEvent, DeviceInfo, DeviceSelector, DeviceWatcher,
};
use crate::error::{OpenFailure, Result};
use crate::event::{Event, EventDispatcher, NotifyKind};
use crate::transport::{PortOpener, SerialHandle};

/// Callback invoked with the identity of the device.
pub type DeviceCallback = Box<dyn FnMut(&DeviceInfo) + Send + Sync>;

/// State of the presence watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Not watching.
    Stopped,
    /// Watching for the device.
    Watching,
    /// Watch paused by a process suspend; resumes on resume.
    Suspended,
}

/// Owner of the device connection.
pub struct ConnectionManager<P: PortOpener, D: DeviceDiscovery> {
    opener: P,
    discovery: D,
    line: LineConfig,
    dispatcher: EventDispatcher,
    watch_events: mpsc::Sender<DeviceEvent>,

    handle: Option<Arc<P::Handle>>,
    device: Option<DeviceInfo>,
    selector: Option<DeviceSelector>,
    watcher: Option<D::Watcher>,
    watch_state: WatchState,
    lifecycle_registered: bool,
    auto_reconnect: bool,

    on_connected: Option<DeviceCallback>,
    on_closing: Option<DeviceCallback>,
}

impl<P: PortOpener, D: DeviceDiscovery> ConnectionManager<P, D> {
    /// Creates a manager with no device.
    ///
    /// Events of the presence watch are delivered on `watch_events`; feed
    /// them back through [`handle_watch_event`](Self::handle_watch_event).
    pub fn new(
        opener: P,
        discovery: D,
        line: LineConfig,
        dispatcher: EventDispatcher,
        watch_events: mpsc::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            opener,
            discovery,
            line,
            dispatcher,
            watch_events,
            handle: None,
            device: None,
            selector: None,
            watcher: None,
            watch_state: WatchState::Stopped,
            lifecycle_registered: false,
            auto_reconnect: true,
            on_connected: None,
            on_closing: None,
        }
    }

    /// Registers the callback run after a device is opened and configured.
    ///
    /// Only the last registration is kept.
    pub fn set_on_connected<F>(&mut self, callback: F)
    where
        F: FnMut(&DeviceInfo) + Send + Sync + 'static,
    {
        self.on_connected = Some(Box::new(callback));
    }

    /// Registers the callback run right before the handle is released.
    ///
    /// The handle is still open while the callback runs. Only the last
    /// registration is kept.
    pub fn set_on_closing<F>(&mut self, callback: F)
    where
        F: FnMut(&DeviceInfo) + Send + Sync + 'static,
    {
        self.on_closing = Some(Box::new(callback));
    }

    /// Returns true while a handle is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the open handle.
    #[must_use]
    pub fn handle(&self) -> Option<Arc<P::Handle>> {
        self.handle.clone()
    }

    /// Returns the connected or remembered device.
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Returns the selector the device was found with.
    #[must_use]
    pub const fn selector(&self) -> Option<DeviceSelector> {
        self.selector
    }

    /// Returns true if the device is reopened when it comes back.
    #[must_use]
    pub const fn auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect
    }

    /// Enables or disables reopening the device when it comes back.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    /// Returns the line configuration applied on open.
    #[must_use]
    pub const fn line(&self) -> &LineConfig {
        &self.line
    }

    /// Returns the state of the presence watch.
    #[must_use]
    pub const fn watch_state(&self) -> WatchState {
        self.watch_state
    }

    /// Opens `device` and starts watching for it.
    ///
    /// Returns false if the device could not be opened; the failure is
    /// classified and notified, never returned.
    pub async fn open_device(&mut self, device: DeviceInfo, selector: DeviceSelector) -> bool {
        if self.handle.is_some() {
            self.close_current_device().await;
        }

        let handle = match self.opener.open(&device.id).await {
            Ok(handle) => Arc::new(handle),
            Err(reason) => {
                self.report_open_failure(device, reason);
                return false;
            }
        };

        tracing::info!("opened device {} ({})", device.name, device.id);
        self.handle = Some(handle);
        self.device = Some(device.clone());
        self.selector = Some(selector);

        if let Err(e) = self.configure_connection().await {
            self.dispatcher.notify(
                NotifyKind::Error,
                format!("{}: failed to configure the line: {e}", device.name),
            );
        }

        self.dispatcher
            .notify(NotifyKind::Status, format!("device {} opened", device.name));
        self.dispatcher.dispatch(Event::Connected(device.clone()));
        if let Some(callback) = self.on_connected.as_mut() {
            callback(&device);
        }

        self.lifecycle_registered = true;
        if self.watcher.is_none() {
            self.watcher = Some(
                self.discovery
                    .create_watcher(selector, self.watch_events.clone()),
            );
        }
        if self.watch_state != WatchState::Watching {
            self.start_watch();
        }

        true
    }

    fn report_open_failure(&self, device: DeviceInfo, reason: OpenFailure) {
        self.dispatcher
            .notify(NotifyKind::Error, format!("{}: {reason}", device.name));
        self.dispatcher
            .dispatch(Event::OpenFailed { device, reason });
    }

    /// Applies the line configuration to the open handle.
    ///
    /// Does nothing when no handle is open.
    pub async fn configure_connection(&self) -> Result<()> {
        match &self.handle {
            Some(handle) => handle.configure(&self.line).await,
            None => Ok(()),
        }
    }

    /// Releases the device and forgets it.
    ///
    /// Stops the presence watch, stops reacting to suspend and resume, and
    /// re-enables auto-reconnect. Calling it again is a no-op.
    pub async fn close_device(&mut self) {
        self.close_current_device().await;

        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.watch_state = WatchState::Stopped;
        self.lifecycle_registered = false;
        self.device = None;
        self.selector = None;
        self.auto_reconnect = true;
    }

    /// Releases the handle but keeps watching for the device.
    ///
    /// The closing callback runs before the handle is released.
    pub async fn close_current_device(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let device = self
            .device
            .clone()
            .unwrap_or_else(|| DeviceInfo::new("", "device"));
        if let Some(callback) = self.on_closing.as_mut() {
            callback(&device);
        }

        handle.close().await;
        tracing::info!("closed device {} ({})", device.name, device.id);
        self.dispatcher.dispatch(Event::Disconnected(device));
    }

    /// Routes an event of the presence watch.
    pub async fn handle_watch_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Added(info) => self.on_device_added(&info).await,
            DeviceEvent::Removed(id) => self.on_device_removed(&id).await,
            DeviceEvent::AccessChanged { id, status } => self.on_access_changed(&id, status).await,
            DeviceEvent::EnumerationCompleted => {
                tracing::trace!("presence watch enumeration completed");
            }
        }
    }

    async fn on_device_added(&mut self, info: &DeviceInfo) {
        if self.handle.is_some() || !self.auto_reconnect {
            return;
        }
        if let Some((device, selector)) = self.remembered(&info.id) {
            tracing::debug!("device {} is back, reopening", device.name);
            self.open_device(device, selector).await;
        }
    }

    async fn on_device_removed(&mut self, id: &str) {
        if self.handle.is_some() && self.device.as_ref().is_some_and(|d| d.id == id) {
            tracing::debug!("connected device {} was removed", id);
            self.close_current_device().await;
        }
    }

    async fn on_access_changed(&mut self, id: &str, status: AccessStatus) {
        if status.is_denied() {
            if self.handle.is_some() && self.device.as_ref().is_some_and(|d| d.id == id) {
                tracing::debug!("access to {} revoked: {:?}", id, status);
                self.close_current_device().await;
            }
        } else if status == AccessStatus::Allowed && self.handle.is_none() && self.auto_reconnect {
            if let Some((device, selector)) = self.remembered(id) {
                self.open_device(device, selector).await;
            }
        }
    }

    fn remembered(&self, id: &str) -> Option<(DeviceInfo, DeviceSelector)> {
        match (&self.device, self.selector) {
            (Some(device), Some(selector)) if device.id == id => Some((device.clone(), selector)),
            _ => None,
        }
    }

    /// Pauses the presence watch for a process suspend.
    pub fn suspend(&mut self) {
        if !self.lifecycle_registered {
            return;
        }
        if self.watch_state == WatchState::Watching {
            if let Some(watcher) = self.watcher.as_mut() {
                watcher.stop();
            }
            self.watch_state = WatchState::Suspended;
            tracing::debug!("presence watch suspended");
        }
    }

    /// Restarts a presence watch paused by [`suspend`](Self::suspend).
    pub fn resume(&mut self) {
        if self.watch_state == WatchState::Suspended {
            self.start_watch();
            tracing::debug!("presence watch resumed");
        }
    }

    fn start_watch(&mut self) {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.start();
            self.watch_state = WatchState::Watching;
        }
    }
}
