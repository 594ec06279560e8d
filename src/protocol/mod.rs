//! Wire protocol of the oscilloscope firmware.
//!
//! This module contains:
//! - Command encoding
//! - The probe sentinel
//! - Sample decoding and the bounded sample buffer

pub mod command;
pub mod sample;

pub use command::{Command, PROBE_ACK, PROBE_READ_LEN, SAMPLE_READ_LEN};
pub use sample::{SAMPLE_FULL_SCALE, SampleSink, decode_sample, decode_samples};
