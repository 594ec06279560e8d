//! Line and runtime configuration.

use std::time::Duration;

use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

use crate::discovery::DeviceSelector;

/// Default baud rate of the oscilloscope firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default time the transport waits for more input in read-ahead mode.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(95);

/// Default time allowed for a single write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default cadence of sample commands while streaming.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Default time the device has to answer the probe command.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default number of decoded samples kept for rendering.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 50;

/// Default polling period of the native device scanner.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Default capacity of the event and request channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Serial line parameters applied right after a device is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    /// Baud rate.
    pub baud_rate: u32,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Data bits.
    pub data_bits: DataBits,
    /// Handshake.
    pub flow_control: FlowControl,
    /// How long a read-ahead read keeps waiting for more bytes.
    pub read_timeout: Duration,
    /// How long a write may take.
    pub write_timeout: Duration,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl LineConfig {
    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the read-ahead timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub const fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Runtime configuration of a [`Scope`](crate::Scope).
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Which devices are listed and watched.
    pub selector: DeviceSelector,
    /// Serial line parameters.
    pub line: LineConfig,
    /// Period between sample commands while streaming.
    pub sample_interval: Duration,
    /// Time the device has to answer the probe.
    pub probe_timeout: Duration,
    /// Number of decoded samples retained.
    pub sample_capacity: usize,
    /// Capacity of the event broadcast and request channels.
    pub channel_capacity: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            selector: DeviceSelector::arduino_uno(),
            line: LineConfig::default(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ScopeConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the device selector.
    #[must_use]
    pub fn selector(mut self, selector: DeviceSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Sets the line configuration.
    #[must_use]
    pub fn line(mut self, line: LineConfig) -> Self {
        self.line = line;
        self
    }

    /// Sets the sample cadence.
    #[must_use]
    pub const fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets the probe timeout.
    #[must_use]
    pub const fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets how many samples are retained.
    #[must_use]
    pub const fn sample_capacity(mut self, capacity: usize) -> Self {
        self.sample_capacity = capacity;
        self
    }
}
