//! Turns an arbitrarily chunked byte stream into frames.
//!
//! The link has no checksum, so the assembler re-synchronises on the next
//! header byte whenever it sees garbage.

use crate::protocol::{self, RawFrame};
use std::io::{ErrorKind, Read};

const READ_CHUNK: usize = 64;

#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes retained while waiting for the rest of a frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends a chunk and returns every frame that is now complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    fn next_frame(&mut self) -> Option<RawFrame> {
        match self.buffer.iter().position(|&b| protocol::is_header(b)) {
            None => {
                if !self.buffer.is_empty() {
                    log::trace!("dropping {} bytes without header", self.buffer.len());
                }
                self.buffer.clear();
                return None;
            }
            Some(0) => {}
            Some(start) => {
                log::trace!(
                    "resync: dropping {:02X?} before header",
                    &self.buffer[..start]
                );
                self.buffer.drain(..start);
            }
        }

        let length = protocol::frame_length(&self.buffer)?;
        if self.buffer.len() < length {
            return None;
        }
        let frame = RawFrame::new(self.buffer.drain(..length).collect());
        log::trace!("frame: {frame}");
        Some(frame)
    }
}

/// Lazy sequence of frames read from a blocking byte source.
///
/// Read timeouts are treated as "no data yet". The iterator ends when the
/// source reports end of file; any other I/O error is yielded once and ends
/// the iteration as well.
pub struct Frames<R> {
    source: R,
    assembler: FrameAssembler,
    ready: std::collections::VecDeque<RawFrame>,
    done: bool,
}

impl<R: Read> Frames<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            assembler: FrameAssembler::new(),
            ready: Default::default(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for Frames<R> {
    type Item = std::io::Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }
            if self.done {
                return None;
            }
            match self.source.read(&mut chunk) {
                Ok(0) => self.done = true,
                Ok(n) => {
                    log::trace!("read {n} bytes: {:02X?}", &chunk[..n]);
                    self.ready.extend(self.assembler.push(&chunk[..n]));
                }
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
