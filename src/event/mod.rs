//! Event system for observers of the oscilloscope.
//!
//! Everything a front end needs to render, from status banners to the
//! sample trace, is published as an [`Event`] on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::discovery::DeviceInfo;
use crate::error::OpenFailure;

/// Classification of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    /// Normal progress.
    Status,
    /// Something failed.
    Error,
    /// No device is connected or selected.
    NoDevice,
    /// The device went away or its I/O was stopped.
    DeviceRemoved,
    /// Waiting for the user or the device.
    WaitDevice,
}

/// A classified message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Classification.
    pub kind: NotifyKind,
    /// Message text.
    pub message: String,
}

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User-facing notification.
    Notification(Notification),
    /// A device handle was opened.
    Connected(DeviceInfo),
    /// The device handle was released.
    Disconnected(DeviceInfo),
    /// Opening a device failed.
    OpenFailed {
        device: DeviceInfo,
        reason: OpenFailure,
    },
    /// The probe was answered; samples can be streamed.
    Ready,
    /// The probe was not answered correctly.
    NotConfigured,
    /// A device appeared in the device list.
    DeviceAdded(DeviceInfo),
    /// A device left the device list. Carries the device id.
    DeviceRemoved(String),
    /// Retained samples after a sample exchange, oldest first.
    Samples(Vec<u8>),
}

impl Event {
    /// Returns the notification if this is one.
    #[must_use]
    pub const fn as_notification(&self) -> Option<&Notification> {
        match self {
            Self::Notification(n) => Some(n),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscription lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Receives the next event matching `predicate`, or `None` on timeout.
    pub async fn wait_for<F>(&mut self, mut predicate: F, timeout: Duration) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        tokio::time::timeout(timeout, async {
            while let Some(event) = self.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Dispatches a notification and mirrors it to the log.
    pub fn notify(&self, kind: NotifyKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            NotifyKind::Error => tracing::warn!("{}", message),
            NotifyKind::DeviceRemoved | NotifyKind::NoDevice => tracing::info!("{}", message),
            NotifyKind::Status | NotifyKind::WaitDevice => tracing::debug!("{}", message),
        }
        self.dispatch(Event::Notification(Notification { kind, message }));
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching `predicate` with timeout.
    ///
    /// Only events dispatched after this call are seen.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        self.subscribe().wait_for(predicate, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(Event::Ready);

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();

        assert_eq!(event, Some(Event::Ready));
    }

    #[tokio::test]
    async fn test_notify_carries_kind() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.notify(NotifyKind::WaitDevice, "ready to plot");

        let event = sub.recv().await.unwrap();
        let notification = event.as_notification().unwrap();
        assert_eq!(notification.kind, NotifyKind::WaitDevice);
        assert_eq!(notification.message, "ready to plot");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_wait_for_sees_later_events() {
        let dispatcher = EventDispatcher::new(16);
        let sender = dispatcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender.dispatch(Event::DeviceRemoved("COM3".into()));
        });

        let event = dispatcher
            .wait_for(|e| matches!(e, Event::DeviceRemoved(_)), Duration::from_secs(1))
            .await;
        assert_eq!(event, Some(Event::DeviceRemoved("COM3".into())));

        let none = dispatcher
            .wait_for(|e| matches!(e, Event::Ready), Duration::from_millis(100))
            .await;
        assert!(none.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_skips_other_events() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(Event::Samples(vec![1, 2]));
        dispatcher.dispatch(Event::NotConfigured);

        let event = sub
            .wait_for(|e| matches!(e, Event::NotConfigured), Duration::from_secs(1))
            .await;
        assert_eq!(event, Some(Event::NotConfigured));

        let none = sub
            .wait_for(|e| matches!(e, Event::Ready), Duration::from_secs(1))
            .await;
        assert!(none.is_none());
    }
}
