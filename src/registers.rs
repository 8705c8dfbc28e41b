//! Register view of the telemetry store and the Modbus TCP framing around it.
//!
//! Address `0` starts a 4-register block with the slave counts of arms 1..4.
//! Addresses from `1` on form one linear index over the arms that currently
//! report batteries, in ascending arm order:
//!
//! ```text
//! arm row   : current, humidity, NTC1, NTC2                 (4 registers)
//! battery n : voltage, SOH, NTC1, NTC2, NTC3, SOC            (6 registers each)
//! ```
//!
//! The layout follows the slave counts, so it shifts whenever an arm gains or
//! loses batteries. Addresses that resolve to nothing read as `0.0`.

use crate::{
    protocol::{
        ARM_ROW, DTYPE_CURRENT, DTYPE_HUMIDITY, DTYPE_NTC1, DTYPE_NTC2, DTYPE_NTC3, DTYPE_SOC,
        DTYPE_SOH, DTYPE_VOLTAGE,
    },
    store::{Snapshot, TelemetryStore, ARM_COUNT},
};
use std::sync::Arc;

pub const SLAVE_COUNT_ADDRESS: u16 = 0;
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

pub const MBAP_HEADER_LENGTH: usize = 7;
const MAX_PDU_LENGTH: usize = 253;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const ILLEGAL_FUNCTION: u8 = 0x01;
pub const ILLEGAL_DATA_VALUE: u8 = 0x03;

const ARM_FIELDS: [(u8, &str); 4] = [
    (DTYPE_CURRENT, "Current(A)"),
    (DTYPE_HUMIDITY, "Humidity(%)"),
    (DTYPE_NTC1, "NTC1(C)"),
    (DTYPE_NTC2, "NTC2(C)"),
];

const BATTERY_FIELDS: [(u8, &str); 6] = [
    (DTYPE_VOLTAGE, "Voltage(V)"),
    (DTYPE_SOH, "SOH(%)"),
    (DTYPE_NTC1, "NTC1(C)"),
    (DTYPE_NTC2, "NTC2(C)"),
    (DTYPE_NTC3, "NTC3(C)"),
    (DTYPE_SOC, "SOC(%)"),
];

/// What a single register address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    SlaveCount { arm: u8 },
    Arm { arm: u8, field: usize },
    Battery { arm: u8, battery: u8, field: usize },
    Unused,
}

impl Slot {
    /// Store key `(arm, k, dtype)` behind the slot.
    pub fn key(&self) -> Option<(u8, u8, u8)> {
        match *self {
            Slot::Arm { arm, field } => Some((arm, ARM_ROW, ARM_FIELDS[field].0)),
            Slot::Battery {
                arm,
                battery,
                field,
            } => Some((arm, battery + ARM_ROW, BATTERY_FIELDS[field].0)),
            Slot::SlaveCount { .. } | Slot::Unused => None,
        }
    }

    pub fn name(&self) -> String {
        match *self {
            Slot::SlaveCount { arm } => format!("Arm{arm}"),
            Slot::Arm { arm, field } => format!("Arm{arm}_{}", ARM_FIELDS[field].1),
            Slot::Battery {
                arm,
                battery,
                field,
            } => format!("Arm{arm}_Bat{battery}_{}", BATTERY_FIELDS[field].1),
            Slot::Unused => "Unused".into(),
        }
    }

    fn value(&self, snapshot: &Snapshot) -> f64 {
        match *self {
            Slot::SlaveCount { arm } => f64::from(snapshot.slave_count(arm)),
            Slot::Unused => 0.0,
            _ => self
                .key()
                .and_then(|(arm, k, dtype)| snapshot.get(arm, k, dtype))
                .map_or(0.0, |r| r.value),
        }
    }
}

/// Resolves a linear index (starting at 1) against the current slave counts.
fn slot_at(counts: &[u8; ARM_COUNT], index: u32) -> Slot {
    if index == 0 {
        return Slot::Unused;
    }
    let mut offset = index - 1;
    for (arm, &count) in (1u8..).zip(counts.iter()) {
        if count == 0 {
            continue;
        }
        let arm_span = ARM_FIELDS.len() as u32;
        if offset < arm_span {
            return Slot::Arm {
                arm,
                field: offset as usize,
            };
        }
        offset -= arm_span;
        let battery_span = BATTERY_FIELDS.len() as u32 * u32::from(count);
        if offset < battery_span {
            let per_battery = BATTERY_FIELDS.len() as u32;
            return Slot::Battery {
                arm,
                battery: (offset / per_battery) as u8 + 1,
                field: (offset % per_battery) as usize,
            };
        }
        offset -= battery_span;
    }
    Slot::Unused
}

/// One register as returned to a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub name: String,
    pub value: f64,
}

/// Encodes a value as a 16-bit register: integral values as-is, anything
/// else with two implied decimals (truncated). Out-of-range values saturate.
pub fn encode_register(value: f64) -> u16 {
    if value.fract() == 0.0 {
        value as u16
    } else {
        (value * 100.0) as u16
    }
}

#[derive(Debug, Clone)]
pub struct RegisterMapper {
    store: Arc<TelemetryStore>,
}

impl RegisterMapper {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    /// Slots covered by a read of `quantity` registers starting at `start`.
    pub fn slots(counts: &[u8; ARM_COUNT], start: u16, quantity: u16) -> Vec<Slot> {
        let quantity = quantity.min(MAX_REGISTERS_PER_REQUEST);
        (0..quantity)
            .map(|i| {
                if start == SLAVE_COUNT_ADDRESS {
                    match i {
                        0..=3 => Slot::SlaveCount { arm: i as u8 + 1 },
                        _ => Slot::Unused,
                    }
                } else {
                    slot_at(counts, u32::from(start) + u32::from(i))
                }
            })
            .collect()
    }

    pub fn read(&self, start: u16, quantity: u16) -> Vec<Register> {
        let snapshot = self.store.snapshot();
        Self::slots(&snapshot.slave_counts, start, quantity)
            .into_iter()
            .map(|slot| Register {
                name: slot.name(),
                value: slot.value(&snapshot),
            })
            .collect()
    }

    pub fn values(&self, start: u16, quantity: u16) -> Vec<f64> {
        self.read(start, quantity).into_iter().map(|r| r.value).collect()
    }

    pub fn names(&self, start: u16, quantity: u16) -> Vec<String> {
        let counts = self.store.arm_slave_counts();
        Self::slots(&counts, start, quantity)
            .iter()
            .map(Slot::name)
            .collect()
    }

    /// Answers one complete request frame (MBAP header + PDU).
    pub fn handle(&self, frame: &[u8]) -> Result<Vec<u8>, RequestError> {
        let request = Request::decode(frame)?;
        let header = request.header;
        let response = match request.pdu {
            Pdu::ReadRegisters {
                function,
                quantity,
                ..
            } if !(1..=MAX_REGISTERS_PER_REQUEST).contains(&quantity) => {
                log::warn!("Register quantity {quantity} out of range");
                encode_exception(
                    header.transaction_id,
                    header.unit_id,
                    function,
                    ILLEGAL_DATA_VALUE,
                )
            }
            Pdu::ReadRegisters {
                function,
                start,
                quantity,
            } => {
                let registers = self.read(start, quantity);
                log::debug!(
                    "read fc={function:#04x} start={start} quantity={quantity}: {registers:?}"
                );
                let values: Vec<f64> = registers.iter().map(|r| r.value).collect();
                encode_read_response(header.transaction_id, header.unit_id, &values)
            }
            Pdu::Unsupported { function } => {
                log::warn!("Unsupported function code {function:#04x}");
                encode_exception(
                    header.transaction_id,
                    header.unit_id,
                    function,
                    ILLEGAL_FUNCTION,
                )
            }
        };
        Ok(response)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),
    #[error("Invalid protocol ID: {0}")]
    InvalidProtocolId(u16),
    #[error("Invalid length field: {0}")]
    InvalidLength(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn decode(buffer: &[u8; MBAP_HEADER_LENGTH]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([buffer[0], buffer[1]]),
            protocol_id: u16::from_be_bytes([buffer[2], buffer[3]]),
            length: u16::from_be_bytes([buffer[4], buffer[5]]),
            unit_id: buffer[6],
        }
    }

    /// Bytes following the header (the length field also counts the unit id).
    pub fn pdu_length(&self) -> Result<usize, RequestError> {
        let pdu_length = usize::from(self.length)
            .checked_sub(1)
            .filter(|&n| (1..=MAX_PDU_LENGTH).contains(&n))
            .ok_or(RequestError::InvalidLength(self.length))?;
        Ok(pdu_length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdu {
    ReadRegisters { function: u8, start: u16, quantity: u16 },
    Unsupported { function: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub header: MbapHeader,
    pub pdu: Pdu,
}

impl Request {
    pub fn decode(frame: &[u8]) -> Result<Self, RequestError> {
        let Some(header_bytes) = frame.first_chunk::<MBAP_HEADER_LENGTH>() else {
            return Err(RequestError::FrameTooShort(frame.len()));
        };
        let header = MbapHeader::decode(header_bytes);
        if header.protocol_id != 0 {
            return Err(RequestError::InvalidProtocolId(header.protocol_id));
        }
        let pdu = &frame[MBAP_HEADER_LENGTH..];
        let Some(&function) = pdu.first() else {
            return Err(RequestError::FrameTooShort(frame.len()));
        };
        let pdu = match function {
            READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
                if pdu.len() < 5 {
                    return Err(RequestError::FrameTooShort(frame.len()));
                }
                Pdu::ReadRegisters {
                    function,
                    start: u16::from_be_bytes([pdu[1], pdu[2]]),
                    quantity: u16::from_be_bytes([pdu[3], pdu[4]]),
                }
            }
            _ => Pdu::Unsupported { function },
        };
        Ok(Self { header, pdu })
    }
}

/// Read response: MBAP header, function code 3, byte count, registers.
///
/// Holding and input reads share this response, including its function code.
pub fn encode_read_response(transaction_id: u16, unit_id: u8, values: &[f64]) -> Vec<u8> {
    let byte_count = values.len() * 2;
    let mut response = Vec::with_capacity(MBAP_HEADER_LENGTH + 2 + byte_count);
    response.extend_from_slice(&transaction_id.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]);
    response.extend_from_slice(&(byte_count as u16 + 3).to_be_bytes());
    response.push(unit_id);
    response.push(READ_HOLDING_REGISTERS);
    response.push(byte_count as u8);
    for &value in values {
        response.extend_from_slice(&encode_register(value).to_be_bytes());
    }
    response
}

pub fn encode_exception(transaction_id: u16, unit_id: u8, function: u8, code: u8) -> Vec<u8> {
    let mut response = Vec::with_capacity(MBAP_HEADER_LENGTH + 2);
    response.extend_from_slice(&transaction_id.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00, 0x00, 0x03]);
    response.push(unit_id);
    response.push(function | 0x80);
    response.push(code);
    response
}
