//! Asynchronous byte source for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use armbms_lib::{decoder::FrameDecoder, store::TelemetryStore, tokio_serial_async};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), armbms_lib::Error> {
//!     let store = Arc::new(TelemetryStore::new());
//!     let port = tokio_serial_async::open("/dev/ttyUSB0", 9600)?;
//!     let frames = tokio_serial_async::ingest(port, &FrameDecoder::new(store.clone())).await?;
//!     println!("{frames} frames, {} arms", store.get_all().len());
//!     Ok(())
//! }
//! ```

use crate::{assembler::FrameAssembler, decoder::FrameDecoder, Error};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::SerialPortBuilderExt;

const READ_CHUNK: usize = 64;

/// Opens `port` at `baud_rate`, 8N1 without flow control.
pub fn open(port: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream, Error> {
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(std::io::Error::from)?;
    log::info!("Opened serial port '{port}' at {baud_rate} baud");
    Ok(stream)
}

/// Feeds `reader` through a [`FrameAssembler`] into `decoder` until end of
/// file. Returns the number of frames applied.
pub async fn ingest<R>(mut reader: R, decoder: &FrameDecoder) -> Result<usize, Error>
where
    R: AsyncRead + Unpin,
{
    let mut assembler = FrameAssembler::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut applied = 0;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for frame in assembler.push(&chunk[..n]) {
            decoder.apply(&frame);
            applied += 1;
        }
    }
    if !assembler.pending().is_empty() {
        log::debug!("{} trailing bytes discarded", assembler.pending().len());
    }
    Ok(applied)
}
