//! Example codec used by tests and documentation.

use bytes::{BufMut, BytesMut};

use super::{Codec, CodecError, Decoded, Encoded};
use crate::pipe::{Source, pipe, sized_pipe};

/// Frames carried by [`LineCodec`].
#[derive(Debug)]
pub enum LineFrame {
    /// A complete newline-terminated line (terminator stripped).
    Line(String),
    /// A `STREAM <n>` header followed by `n` raw body bytes.
    Stream {
        /// Declared body length, when known.
        expected: Option<usize>,
        /// Consumer handle for the body bytes.
        body: Source,
    },
}

/// Newline-delimited text protocol with streamed bodies.
///
/// Ordinary frames are single lines. A line of the form `STREAM <n>`
/// decodes to [`LineFrame::Stream`] with a bounded body pipe of `n` bytes;
/// a `CHUNKED` line starts an unbounded body that runs until the consumer
/// closes its [`Source`]. In both cases the source is embedded in the frame
/// for the application and the matching sink goes to the controller.
/// Encoding a stream frame writes the body bytes raw, with no header.
#[derive(Clone, Debug)]
pub struct LineCodec {
    max_line: usize,
    body_capacity: usize,
}

impl LineCodec {
    /// Construct a codec refusing lines longer than `max_line` bytes.
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            max_line,
            body_capacity: 8 * 1024,
        }
    }

    /// Override the buffering capacity of inbound body pipes.
    #[must_use]
    pub fn with_body_capacity(mut self, capacity: usize) -> Self {
        self.body_capacity = capacity;
        self
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Codec for LineCodec {
    type Message = LineFrame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded<LineFrame>>, CodecError> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > self.max_line {
                return Err(CodecError::OversizedFrame {
                    size: src.len(),
                    max: self.max_line,
                });
            }
            return Ok(None);
        };
        if pos > self.max_line {
            return Err(CodecError::OversizedFrame {
                size: pos,
                max: self.max_line,
            });
        }

        let line = src.split_to(pos);
        let _newline = src.split_to(1);
        let line = std::str::from_utf8(&line)
            .map_err(|_| CodecError::Malformed {
                reason: "line is not valid UTF-8".to_owned(),
            })?
            .to_owned();

        if let Some(len) = line.strip_prefix("STREAM ") {
            let expected: usize = len.parse().map_err(|_| CodecError::Malformed {
                reason: format!("bad stream length {len:?}"),
            })?;
            let (sink, source) = sized_pipe(self.body_capacity, expected);
            return Ok(Some(Decoded::Streamed {
                message: LineFrame::Stream {
                    expected: Some(expected),
                    body: source,
                },
                body: sink,
            }));
        }
        if line == "CHUNKED" {
            let (sink, source) = pipe(self.body_capacity);
            return Ok(Some(Decoded::Streamed {
                message: LineFrame::Stream {
                    expected: None,
                    body: source,
                },
                body: sink,
            }));
        }

        Ok(Some(Decoded::Complete(LineFrame::Line(line))))
    }

    fn encode(&mut self, message: LineFrame) -> Result<Encoded, CodecError> {
        match message {
            LineFrame::Line(line) => {
                if line.contains('\n') {
                    return Err(CodecError::Unencodable {
                        reason: "line contains embedded newline".to_owned(),
                    });
                }
                let mut buf = BytesMut::with_capacity(line.len() + 1);
                buf.put_slice(line.as_bytes());
                buf.put_u8(b'\n');
                Ok(Encoded::Buffer(buf.freeze()))
            }
            LineFrame::Stream { body, .. } => Ok(Encoded::Stream(body)),
        }
    }
}

impl LineFrame {
    /// Build a plain line frame.
    #[must_use]
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line(text.into())
    }

    /// The line text, when this is a [`LineFrame::Line`].
    #[must_use]
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Self::Line(text) => Some(text),
            Self::Stream { .. } => None,
        }
    }
}
