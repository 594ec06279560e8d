//! Commands understood by the oscilloscope firmware.
//!
//! Every command is plain ASCII written in one go. Only the probe and
//! sample commands expect an answer:
//!
//! | Command | Bytes    | Response                              |
//! |---------|----------|---------------------------------------|
//! | Stop    | `s`      | none                                  |
//! | Probe   | `square` | one byte, `a` when the firmware fits  |
//! | Sample  | `r`      | up to 255 raw amplitude bytes         |

use crate::transport::ReadMode;

/// Byte the firmware answers the probe with when it speaks this protocol.
pub const PROBE_ACK: u8 = b'a';

/// Maximum bytes requested when reading the probe answer.
pub const PROBE_READ_LEN: usize = 8;

/// Maximum bytes requested when reading a sample burst.
pub const SAMPLE_READ_LEN: usize = 255;

/// Commands sent to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Quiesce the line. Sent on disconnect and suspend.
    Stop,
    /// Ask the firmware to identify itself. Sent once after connecting.
    Probe,
    /// Request a burst of samples.
    Sample,
}

impl Command {
    /// Returns the bytes written for this command.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Stop => b"s",
            Self::Probe => b"square",
            Self::Sample => b"r",
        }
    }

    /// Returns how the answer is read, or `None` for write-only commands.
    #[must_use]
    pub const fn response(self) -> Option<(usize, ReadMode)> {
        match self {
            Self::Stop => None,
            Self::Probe => Some((PROBE_READ_LEN, ReadMode::Partial)),
            Self::Sample => Some((SAMPLE_READ_LEN, ReadMode::ReadAhead)),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stop => "stop",
            Self::Probe => "probe",
            Self::Sample => "sample",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Stop.as_bytes(), b"s");
        assert_eq!(Command::Probe.as_bytes(), b"square");
        assert_eq!(Command::Sample.as_bytes(), b"r");
    }

    #[test]
    fn test_command_responses() {
        assert_eq!(Command::Stop.response(), None);
        assert_eq!(Command::Probe.response(), Some((8, ReadMode::Partial)));
        assert_eq!(Command::Sample.response(), Some((255, ReadMode::ReadAhead)));
    }
}
