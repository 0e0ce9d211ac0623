use bytes::{BufMut, BytesMut};

use crate::link::error::FrameError;
use crate::link::message::Message;


pub const FRAME_DELIMITER: u8 = b'\n';

/// Newline-delimited JSON framing. Compact JSON never contains an unescaped newline, so the
///  delimiter can not occur inside a frame.
///
/// Decoding works on a buffer that the caller fills with whatever the stream delivered. A
///  partial frame stays in the buffer until the rest of it arrives, so decoding can be resumed
///  at arbitrary read boundaries. The codec never blocks, it only consumes buffered bytes.
pub struct FrameCodec {
    max_frame_len: usize,
    /// number of bytes at the start of the buffer that are known to contain no delimiter
    scanned: usize,
    /// true while skipping the tail of an oversized frame
    discarding: bool,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> FrameCodec {
        FrameCodec {
            max_frame_len,
            scanned: 0,
            discarding: false,
        }
    }

    pub fn encode(msg: &Message, buf: &mut BytesMut) -> anyhow::Result<()> {
        let start = buf.len();
        if let Err(e) = serde_json::to_writer((&mut *buf).writer(), msg) {
            buf.truncate(start);
            return Err(e.into());
        }
        buf.put_u8(FRAME_DELIMITER);
        Ok(())
    }

    /// Returns the next complete frame from the buffer, removing its bytes, or [None] if more
    ///  bytes are needed.
    ///
    /// A frame that fails to decode is consumed and reported as an error; the next call
    ///  continues with the frame after it. Blank lines are skipped.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Result<Message, FrameError>> {
        loop {
            let delimiter_pos = buf[self.scanned..].iter()
                .position(|&b| b == FRAME_DELIMITER)
                .map(|pos| pos + self.scanned);

            let Some(pos) = delimiter_pos else {
                if self.discarding {
                    buf.clear();
                    self.scanned = 0;
                    return None;
                }
                if buf.len() > self.max_frame_len {
                    buf.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Some(Err(FrameError::TooLong { max_len: self.max_frame_len }));
                }
                self.scanned = buf.len();
                return None;
            };

            let frame = buf.split_to(pos + 1);
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if pos > self.max_frame_len {
                return Some(Err(FrameError::TooLong { max_len: self.max_frame_len }));
            }

            let frame = frame[..pos].trim_ascii();
            if frame.is_empty() {
                continue;
            }
            return Some(Self::parse(frame));
        }
    }

    fn parse(frame: &[u8]) -> Result<Message, FrameError> {
        let text = std::str::from_utf8(frame)
            .map_err(|_| FrameError::NotUtf8)?;
        Ok(serde_json::from_str(text)?)
    }
}
