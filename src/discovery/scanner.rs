//! Native device watcher that polls the serial port list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_SCAN_INTERVAL;
use crate::discovery::{
    DeviceDiscovery, DeviceEvent, DeviceInfo, DeviceSelector, DeviceWatcher, WatcherStatus,
};
use crate::slot::lock;
use crate::transport::serial::scan_ports;

/// Discovery backed by periodic port scans.
#[derive(Debug, Clone)]
pub struct PortScanner {
    interval: Duration,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_INTERVAL)
    }
}

impl PortScanner {
    /// Creates a scanner polling every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl DeviceDiscovery for PortScanner {
    type Watcher = ScanWatcher;

    fn create_watcher(
        &self,
        selector: DeviceSelector,
        events: mpsc::Sender<DeviceEvent>,
    ) -> ScanWatcher {
        ScanWatcher {
            selector,
            interval: self.interval,
            events,
            status: Arc::new(Mutex::new(WatcherStatus::Created)),
            task: None,
        }
    }
}

/// Watcher produced by [`PortScanner`].
///
/// Must be started from within a Tokio runtime.
pub struct ScanWatcher {
    selector: DeviceSelector,
    interval: Duration,
    events: mpsc::Sender<DeviceEvent>,
    status: Arc<Mutex<WatcherStatus>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceWatcher for ScanWatcher {
    fn start(&mut self) {
        if self.status().is_running() {
            return;
        }
        *lock(&self.status) = WatcherStatus::Started;
        tracing::debug!("starting port scan for {}", self.selector);

        let selector = self.selector;
        let interval = self.interval;
        let events = self.events.clone();
        let status = Arc::clone(&self.status);
        self.task = Some(tokio::spawn(async move {
            run_scan_loop(selector, interval, events, status).await;
        }));
    }

    fn stop(&mut self) {
        if !self.status().is_running() {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        *lock(&self.status) = WatcherStatus::Stopped;
        tracing::debug!("stopped port scan for {}", self.selector);
    }

    fn status(&self) -> WatcherStatus {
        *lock(&self.status)
    }
}

impl Drop for ScanWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_scan_loop(
    selector: DeviceSelector,
    interval: Duration,
    events: mpsc::Sender<DeviceEvent>,
    status: Arc<Mutex<WatcherStatus>>,
) {
    let mut known: HashMap<String, DeviceInfo> = HashMap::new();
    let mut enumerated = false;

    loop {
        let current = match tokio::task::spawn_blocking(move || scan_ports(selector)).await {
            Ok(Ok(ports)) => ports,
            Ok(Err(e)) => {
                tracing::warn!("port scan failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("port scan task failed: {}", e);
                Vec::new()
            }
        };

        for event in diff_ports(&mut known, current) {
            if events.send(event).await.is_err() {
                tracing::debug!("device event receiver dropped");
                return;
            }
        }

        if !enumerated {
            enumerated = true;
            {
                let mut status = lock(&status);
                if *status == WatcherStatus::Started {
                    *status = WatcherStatus::EnumerationCompleted;
                }
            }
            if events.send(DeviceEvent::EnumerationCompleted).await.is_err() {
                return;
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Updates `known` to `current` and returns the presence changes.
fn diff_ports(known: &mut HashMap<String, DeviceInfo>, current: Vec<DeviceInfo>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();

    let removed: Vec<String> = known
        .keys()
        .filter(|id| !current.iter().any(|d| &d.id == *id))
        .cloned()
        .collect();
    for id in removed {
        known.remove(&id);
        events.push(DeviceEvent::Removed(id));
    }

    for device in current {
        if !known.contains_key(&device.id) {
            known.insert(device.id.clone(), device.clone());
            events.push(DeviceEvent::Added(device));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_reports_additions_and_removals() {
        let mut known = HashMap::new();

        let events = diff_ports(
            &mut known,
            vec![
                DeviceInfo::new("/dev/ttyACM0", "Arduino Uno"),
                DeviceInfo::new("/dev/ttyACM1", "Arduino Uno"),
            ],
        );
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, DeviceEvent::Added(_))));

        let events = diff_ports(
            &mut known,
            vec![DeviceInfo::new("/dev/ttyACM1", "Arduino Uno")],
        );
        assert_eq!(events, vec![DeviceEvent::Removed("/dev/ttyACM0".into())]);
        assert_eq!(known.len(), 1);
    }

    #[test]
    fn test_diff_is_quiet_without_changes() {
        let mut known = HashMap::new();
        let ports = vec![DeviceInfo::new("COM3", "Arduino Uno")];
        diff_ports(&mut known, ports.clone());
        assert!(diff_ports(&mut known, ports).is_empty());
    }

    #[tokio::test]
    async fn test_watcher_status_transitions() {
        let (tx, _rx) = mpsc::channel(16);
        let mut watcher = PortScanner::default().create_watcher(DeviceSelector::arduino_uno(), tx);
        assert_eq!(watcher.status(), WatcherStatus::Created);

        // Stop before start is ignored
        watcher.stop();
        assert_eq!(watcher.status(), WatcherStatus::Created);

        watcher.start();
        assert!(watcher.status().is_running());

        watcher.stop();
        assert_eq!(watcher.status(), WatcherStatus::Stopped);
    }
}
