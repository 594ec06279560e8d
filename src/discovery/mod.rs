//! Device discovery.
//!
//! A [`DeviceDiscovery`] creates [`DeviceWatcher`]s for a [`DeviceSelector`].
//! Watchers report presence changes as [`DeviceEvent`]s on a channel handed
//! to them at creation. The native implementation polls the serial port
//! list; see [`scanner`].

pub mod scanner;

use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

use crate::error::Error;

pub use scanner::{PortScanner, ScanWatcher};

/// USB vendor id of genuine Arduino boards.
pub const ARDUINO_VID: u16 = 0x2341;

/// USB product id of the Arduino Uno.
pub const ARDUINO_UNO_PID: u16 = 0x0043;

/// Identity of a device as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    /// Identifier the transport opens (a port path for native serial).
    pub id: String,
    /// Human readable name.
    pub name: String,
}

impl DeviceInfo {
    /// Creates a device identity.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Selects which devices a watcher reports.
///
/// The textual form is `any`, `usb:VVVV` or `usb:VVVV:PPPP` with
/// hexadecimal vendor and product ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceSelector {
    vid: Option<u16>,
    pid: Option<u16>,
}

impl DeviceSelector {
    /// Matches every serial device.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            vid: None,
            pid: None,
        }
    }

    /// Matches USB devices with the given vendor and product id.
    #[must_use]
    pub const fn usb(vid: u16, pid: u16) -> Self {
        Self {
            vid: Some(vid),
            pid: Some(pid),
        }
    }

    /// Matches USB devices from one vendor.
    #[must_use]
    pub const fn usb_vendor(vid: u16) -> Self {
        Self {
            vid: Some(vid),
            pid: None,
        }
    }

    /// Selector for an Arduino Uno.
    #[must_use]
    pub const fn arduino_uno() -> Self {
        Self::usb(ARDUINO_VID, ARDUINO_UNO_PID)
    }

    /// Checks a port against this selector. `usb` is `None` for non-USB ports.
    #[must_use]
    pub fn matches(&self, usb: Option<(u16, u16)>) -> bool {
        match (self.vid, usb) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(vid), Some((port_vid, port_pid))) => {
                vid == port_vid && self.pid.is_none_or(|pid| pid == port_pid)
            }
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vid, self.pid) {
            (None, _) => f.write_str("any"),
            (Some(vid), None) => write!(f, "usb:{vid:04x}"),
            (Some(vid), Some(pid)) => write!(f, "usb:{vid:04x}:{pid:04x}"),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidSelector {
            selector: s.to_string(),
        };
        if s.eq_ignore_ascii_case("any") {
            return Ok(Self::any());
        }
        let rest = s.strip_prefix("usb:").ok_or_else(invalid)?;
        let mut parts = rest.split(':');
        let vid = parts
            .next()
            .and_then(|v| u16::from_str_radix(v, 16).ok())
            .ok_or_else(invalid)?;
        let pid = match parts.next() {
            Some(p) => Some(u16::from_str_radix(p, 16).map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { vid: Some(vid), pid })
    }
}

/// Device access permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    /// Access state is unknown.
    Unspecified,
    /// Access is allowed.
    Allowed,
    /// The user revoked access.
    DeniedByUser,
    /// The system revoked access.
    DeniedBySystem,
}

impl AccessStatus {
    /// Returns true for either denial.
    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::DeniedByUser | Self::DeniedBySystem)
    }
}

/// Presence notifications emitted by a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A matching device appeared.
    Added(DeviceInfo),
    /// A device disappeared. Carries the device id.
    Removed(String),
    /// The initial enumeration after a start finished.
    EnumerationCompleted,
    /// Access permission of a device changed.
    AccessChanged { id: String, status: AccessStatus },
}

/// Lifecycle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    /// Created but never started.
    Created,
    /// Running its initial enumeration.
    Started,
    /// Initial enumeration done, still reporting changes.
    EnumerationCompleted,
    /// Stopped.
    Stopped,
}

impl WatcherStatus {
    /// Returns true while the watcher reports events.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::EnumerationCompleted)
    }
}

/// A running or stoppable presence watch.
pub trait DeviceWatcher: Send + Sync {
    /// Starts reporting. Does nothing if already running.
    fn start(&mut self);

    /// Stops reporting. Does nothing unless running.
    fn stop(&mut self);

    /// Returns the current status.
    fn status(&self) -> WatcherStatus;
}

/// Factory for watchers.
pub trait DeviceDiscovery: Send + Sync {
    /// Watcher type produced by this discovery.
    type Watcher: DeviceWatcher + 'static;

    /// Creates a stopped watcher that will send its events on `events`.
    fn create_watcher(
        &self,
        selector: DeviceSelector,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Self::Watcher;
}
