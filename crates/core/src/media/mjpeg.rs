//! Length-prefixed MJPEG frame source.
//!
//! The demo stream format is a plain concatenation of JPEG images, each
//! preceded by its length as five ASCII decimal digits:
//!
//! ```text
//! 00931<931 bytes of JPEG>01207<1207 bytes of JPEG>...
//! ```
//!
//! Frames are stamped 40ms apart (25 fps) starting at 0.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

use bytes::Bytes;

use super::rtp::PayloadType;
use super::{FrameSource, VideoFrame};
use crate::error::{Error, Result};

const LENGTH_DIGITS: usize = 5;

/// Timestamp advance per frame, in milliseconds.
pub const FRAME_INTERVAL: u32 = 40;

static SAMPLE: &[u8] = include_bytes!("../../assets/sample.mjpeg");

/// Reads frames from any byte stream in the length-prefixed format.
#[derive(Debug)]
pub struct MjpegReader<R> {
    reader: Option<R>,
    timestamp: u32,
}

impl MjpegReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl MjpegReader<Cursor<&'static [u8]>> {
    /// The short clip bundled with the crate, served as `/sample.mjpeg`.
    pub fn sample() -> Self {
        Self::new(Cursor::new(SAMPLE))
    }
}

impl<R: Read> MjpegReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            timestamp: 0,
        }
    }

    fn read_frame(reader: &mut R, timestamp: u32) -> Result<Option<VideoFrame>> {
        let mut prefix = [0u8; LENGTH_DIGITS];
        let filled = read_up_to(reader, &mut prefix)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < LENGTH_DIGITS {
            return Err(Error::MalformedFrame(format!(
                "truncated length prefix ({} of {} bytes)",
                filled, LENGTH_DIGITS
            )));
        }

        let length = std::str::from_utf8(&prefix)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| {
                Error::MalformedFrame(format!("invalid length prefix {:?}", prefix))
            })?;

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::MalformedFrame(format!("frame truncated before {} bytes", length))
            }
            _ => Error::Io(e),
        })?;

        Ok(Some(VideoFrame {
            payload_type: PayloadType::Jpeg,
            payload: Bytes::from(payload),
            timestamp,
        }))
    }
}

impl<R: Read + Send> FrameSource for MjpegReader<R> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let frame = Self::read_frame(reader, self.timestamp)?;
        match frame {
            Some(_) => self.timestamp = self.timestamp.wrapping_add(FRAME_INTERVAL),
            None => self.reader = None,
        }
        Ok(frame)
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Fill `buf` as far as the stream allows, returning how many bytes were read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
