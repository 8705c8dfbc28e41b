use crate::Error;
use std::{
    io::{self, Read},
    time::Duration,
};

/// Blocking byte source on a serial port, 8N1 without flow control.
///
/// Reads that hit the port timeout surface as [`io::ErrorKind::TimedOut`],
/// which [`crate::assembler::Frames`] treats as "no data yet".
pub struct SerialSource {
    serial: Box<dyn serialport::SerialPort>,
}

impl std::fmt::Debug for SerialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SerialSource({:?})", self.serial.name())
    }
}

impl SerialSource {
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, Error> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        log::info!("Opened serial port '{port}' at {baud_rate} baud");
        Ok(Self { serial })
    }
}

impl Read for SerialSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.serial.read(buf)
    }
}
