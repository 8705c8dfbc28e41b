//! Serial ingestion pipeline.
//!
//! Two named threads joined by an unbounded queue: `frame-assembler` pulls
//! bytes from the source and cuts frames, `frame-decoder` applies them to the
//! store in arrival order. The assembler never waits on the decoder.

use crate::{assembler::Frames, decoder::FrameDecoder, protocol::RawFrame};
use std::{
    io::{self, Read},
    thread::{self, JoinHandle},
};

/// Running pipeline.
#[derive(Debug)]
pub struct Ingest {
    assembler: JoinHandle<io::Result<()>>,
    decoder: JoinHandle<usize>,
}

impl Ingest {
    /// Starts both threads. The pipeline winds down by itself once `source`
    /// reports end of file or a fatal read error.
    pub fn spawn<R>(source: R, decoder: FrameDecoder) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = flume::unbounded::<RawFrame>();

        let decoder = thread::Builder::new()
            .name("frame-decoder".into())
            .spawn(move || {
                let mut applied = 0;
                for frame in rx.iter() {
                    decoder.apply(&frame);
                    applied += 1;
                }
                log::debug!("decoder finished after {applied} frames");
                applied
            })?;

        let assembler = thread::Builder::new()
            .name("frame-assembler".into())
            .spawn(move || {
                for frame in Frames::new(source) {
                    let frame = frame.inspect_err(|err| log::error!("Serial read failed: {err}"))?;
                    if tx.send(frame).is_err() {
                        log::warn!("decoder gone, stopping assembler");
                        break;
                    }
                }
                log::info!("byte source exhausted");
                Ok(())
            })?;

        Ok(Self { assembler, decoder })
    }

    pub fn is_finished(&self) -> bool {
        self.assembler.is_finished() && self.decoder.is_finished()
    }

    /// Waits for both threads and returns the number of frames applied.
    pub fn join(self) -> io::Result<usize> {
        let read_result = self
            .assembler
            .join()
            .map_err(|_| io::Error::other("frame-assembler panicked"))?;
        let applied = self
            .decoder
            .join()
            .map_err(|_| io::Error::other("frame-decoder panicked"))?;
        read_result.map(|_| applied)
    }
}

/// Single-threaded variant: reads, assembles and applies on the caller's
/// thread until end of file.
pub fn run<R: Read>(source: R, decoder: &FrameDecoder) -> io::Result<usize> {
    let mut applied = 0;
    for frame in Frames::new(source) {
        decoder.apply(&frame?);
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TelemetryStore;
    use std::sync::Arc;

    fn stream() -> Vec<u8> {
        let mut bytes = vec![0x81, 0x7E, 0x00, 0x00, 0x02, 0x00];
        bytes.extend_from_slice(&[0x80, 2, 10, 3, 0, 0, 2, 5, 0, 0, 0]);
        bytes.extend_from_slice(&[0x13, 0x37]);
        bytes.extend_from_slice(&[0x80, 3, 10, 3, 0, 1, 3, 2, 0, 0, 0]);
        bytes.extend_from_slice(&[0x80, 3, 10, 3, 0, 1, 3, 3, 0, 0, 0]);
        bytes
    }

    #[test]
    fn threaded_pipeline_applies_frames_in_order() {
        let store = Arc::new(TelemetryStore::new());
        let ingest = Ingest::spawn(io::Cursor::new(stream()), FrameDecoder::new(store.clone())).unwrap();
        assert_eq!(ingest.join().unwrap(), 4);
        assert_eq!(store.arm_slave_counts(), [0, 0, 2, 0]);
        assert_eq!(store.get(3, 2, 10), Some(2.5));
        // the later frame wins
        assert_eq!(store.get(3, 3, 10), Some(13.3));
        assert_eq!(store.last_k(), Some(3));
    }

    #[test]
    fn inline_run_matches_threaded() {
        let store = Arc::new(TelemetryStore::new());
        let decoder = FrameDecoder::new(store.clone());
        assert_eq!(run(stream().as_slice(), &decoder).unwrap(), 4);
        assert_eq!(store.get(3, 3, 10), Some(13.3));
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[test]
    fn read_error_ends_the_pipeline() {
        let store = Arc::new(TelemetryStore::new());
        let ingest = Ingest::spawn(Broken, FrameDecoder::new(store)).unwrap();
        let err = ingest.join().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
