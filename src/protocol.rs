//! Byte layouts of the rig's serial protocol.
//!
//! Every frame starts with a header byte (`0x80` or `0x81`). The 2nd byte is
//! the row selector `k` (or `0x7E` for slave counts), the 3rd byte is the
//! discriminator. There is no checksum.

use crate::metrics::round4;
use std::fmt;

pub const HEADER_BYTES: [u8; 2] = [0x80, 0x81];

pub const MISSING_DATA_MARKER: u8 = 0x7F;
pub const SLAVE_COUNT_MARKER: u8 = 0x7E;
pub const ALARM_MARKER: u8 = 0x7D;
pub const BALANCE_MARKER: u8 = 0x0F;

pub const MISSING_DATA_LENGTH: usize = 5;
pub const SHORT_LENGTH: usize = 6;
pub const CONTROLLER_ALARM_LENGTH: usize = 7;
pub const READING_LENGTH: usize = 11;

/// Row selector of the arm-level sensor row.
pub const ARM_ROW: u8 = 2;

pub const DTYPE_VOLTAGE: u8 = 10;
pub const DTYPE_SOH: u8 = 11;
pub const DTYPE_NTC1: u8 = 12;
pub const DTYPE_NTC2: u8 = 13;
pub const DTYPE_NTC3: u8 = 14;
pub const DTYPE_SOC: u8 = 126;

// dtype 10 and 11 carry a different quantity on the arm row
pub const DTYPE_CURRENT: u8 = DTYPE_VOLTAGE;
pub const DTYPE_HUMIDITY: u8 = DTYPE_SOH;

pub const ARMS: std::ops::RangeInclusive<u8> = 1..=4;

pub fn is_header(byte: u8) -> bool {
    HEADER_BYTES.contains(&byte)
}

/// Selects the length of the frame at the start of a header-aligned buffer.
///
/// Returns `None` while fewer than 3 bytes are buffered. The precedence of the
/// checks matters: a discriminator of `0x7F` only wins once 5 bytes are
/// available, the 6-byte patterns only once 6 are, and so on. Anything else
/// is assumed to be a standard reading.
pub fn frame_length(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < 3 {
        return None;
    }
    let discriminator = buffer[2];
    let length = if discriminator == MISSING_DATA_MARKER && buffer.len() >= MISSING_DATA_LENGTH {
        MISSING_DATA_LENGTH
    } else if buffer.len() >= SHORT_LENGTH
        && (discriminator == BALANCE_MARKER
            || buffer[1] == SLAVE_COUNT_MARKER
            || (discriminator == ALARM_MARKER && buffer[1] == ARM_ROW))
    {
        SHORT_LENGTH
    } else if discriminator == ALARM_MARKER
        && buffer.len() >= CONTROLLER_ALARM_LENGTH
        && buffer[1] > ARM_ROW
    {
        CONTROLLER_ALARM_LENGTH
    } else {
        READING_LENGTH
    };
    Some(length)
}

/// One frame cut out of the byte stream by the assembler.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame(Vec<u8>);

impl RawFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Each byte as a two-hex-digit token.
    pub fn hex_tokens(&self) -> Vec<String> {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.hex_tokens().join(" "))
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RawFrame[{self}]")
    }
}

/// A standard 11-byte reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingFrame {
    pub k: u8,
    pub dtype: u8,
    pub arm: u8,
    pub digits: [u8; 6],
}

impl ReadingFrame {
    fn decode(bytes: &[u8]) -> Self {
        let mut digits = [0; 6];
        digits.copy_from_slice(&bytes[4..10]);
        Self {
            k: bytes[1],
            dtype: bytes[2],
            arm: bytes[3],
            digits,
        }
    }

    pub fn is_arm_row(&self) -> bool {
        self.k == ARM_ROW
    }

    pub fn has_valid_arm(&self) -> bool {
        ARMS.contains(&self.arm)
    }

    /// Physical value carried by the digit bytes, rounded to 4 decimals.
    ///
    /// Humidity (arm row) and SOH (battery rows) only use the tens, units and
    /// two fractional digits; an SOH frame with a leading `1` means 100%.
    pub fn value(&self) -> f64 {
        let d: [f64; 6] = self.digits.map(f64::from);
        if self.dtype == DTYPE_SOH {
            if !self.is_arm_row() && self.digits[0] == 1 {
                return 100.0;
            }
            return round4(d[1] * 10.0 + d[2] + d[3] * 0.1 + d[4] * 0.01);
        }
        round4(d[0] * 100.0 + d[1] * 10.0 + d[2] + d[3] * 0.1 + d[4] * 0.01 + d[5] * 0.001)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 5 bytes, discriminator `0x7F`
    MissingData,
    /// 6 bytes, 2nd byte `0x7E`; trailing bytes are the counts of arms 1..4
    SlaveCounts([u8; 4]),
    /// 6 bytes, discriminator `0x0F`
    BalanceCommand,
    /// 6 bytes, discriminator `0x7D` on the arm row
    ShortAlarm,
    /// 7 bytes, discriminator `0x7D` on a battery row
    ControllerAlarm,
    Reading(ReadingFrame),
    /// 6 bytes not matching any known pattern
    Unclassified,
}

impl Frame {
    /// Classifies an emitted frame purely by its length and, for 6-byte
    /// frames, its marker bytes. Returns `None` for lengths the assembler
    /// never produces.
    pub fn classify(raw: &RawFrame) -> Option<Self> {
        let bytes = raw.as_bytes();
        let frame = match bytes.len() {
            MISSING_DATA_LENGTH => Frame::MissingData,
            CONTROLLER_ALARM_LENGTH => Frame::ControllerAlarm,
            READING_LENGTH => Frame::Reading(ReadingFrame::decode(bytes)),
            SHORT_LENGTH => {
                if bytes[1] == SLAVE_COUNT_MARKER {
                    Frame::SlaveCounts([bytes[2], bytes[3], bytes[4], bytes[5]])
                } else if bytes[2] == BALANCE_MARKER {
                    Frame::BalanceCommand
                } else if bytes[2] == ALARM_MARKER && bytes[1] == ARM_ROW {
                    Frame::ShortAlarm
                } else {
                    Frame::Unclassified
                }
            }
            _ => return None,
        };
        Some(frame)
    }
}
