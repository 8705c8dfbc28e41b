use crate::{registers::RequestError, snmp::DecodeError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Arm {0} out of range 1..=4")]
    InvalidArm(u8),
    #[error("Invalid OID '{0}'")]
    InvalidOid(String),
    #[error("SNMP decode error: {0}")]
    Snmp(#[from] DecodeError),
    #[error("Register request error: {0}")]
    Request(#[from] RequestError),
}
