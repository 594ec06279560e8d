//! # arduscope
//!
//! A Rust client library for Arduino serial oscilloscopes.
//!
//! This library keeps a single USB/serial connection to the oscilloscope
//! firmware alive and runs its command/response protocol: a probe after
//! every connect, then a sample request on a fixed cadence.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Automatic reconnection when the device is unplugged and plugged back in
//! - Cancellable I/O with at most one read and one write in flight
//! - Event-driven architecture for status, errors and sample data
//!
//! ## Quick Start
//!
//! ```no_run
//! use arduscope::{Event, Scope, ScopeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), arduscope::Error> {
//!     let (scope, handle) = Scope::native(ScopeConfig::new());
//!     tokio::spawn(scope.run());
//!
//!     let mut events = handle.subscribe();
//!     handle.connect("/dev/ttyACM0").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Event::Ready => {
//!                 handle.set_streaming(true).await?;
//!             }
//!             Event::Samples(samples) => println!("{samples:?}"),
//!             Event::Notification(n) => println!("{:?}: {}", n.kind, n.message),
//!             Event::Disconnected(_) => break,
//!             _ => {}
//!         }
//!     }
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Wire commands and sample decoding
//! - [`transport`] - Serial transport traits and the `tokio-serial` implementation
//! - [`discovery`] - Device selectors and presence watchers
//! - [`slot`] - Generational cancellation slots
//! - [`connection`] - [`ConnectionManager`], owner of the device connection
//! - [`exchange`] - [`ExchangeController`], the probe/sample protocol driver
//! - [`event`] - Async event system for observers
//! - [`client`] - High-level [`Scope`] event loop and its [`ScopeHandle`]

pub mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod event;
pub mod exchange;
pub mod protocol;
pub mod slot;
pub mod transport;

// Re-exports for convenience
pub use client::{Scope, ScopeHandle};
pub use config::{LineConfig, ScopeConfig};
pub use connection::{ConnectionManager, WatchState};
pub use discovery::{
    AccessStatus, DeviceDiscovery, DeviceEvent, DeviceInfo, DeviceSelector, DeviceWatcher,
    PortScanner, WatcherStatus,
};
pub use error::{Error, OpenFailure, Result};
pub use event::{Event, EventDispatcher, Notification, NotifyKind, Subscription};
pub use exchange::{ExchangeController, ProbeOutcome};
pub use protocol::{Command, SampleSink, decode_sample};
pub use slot::OperationSlot;
pub use transport::{NativeOpener, NativePort, PortOpener, ReadMode, SerialHandle};
