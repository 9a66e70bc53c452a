//! Git pkt-line framing.
//!
//! Every frame in the smart-HTTP protocol is a four-hex-digit length
//! prefix followed by payload bytes; a length of `0000` is the flush
//! packet. The scanner tokenizes a byte stream into frames without
//! interpreting payload contents -- callers inspect the tokens.

use std::io::Read;

use thiserror::Error;

/// Errors produced while scanning a pkt-line stream.
#[derive(Debug, Error)]
pub enum PktLineError {
    /// The four-byte length prefix was not valid hexadecimal.
    #[error("invalid pkt-line length prefix {0:?}")]
    InvalidLength(String),

    /// A frame declared a length smaller than its own header.
    #[error("pkt-line length {0} is shorter than the 4-byte header")]
    LengthTooSmall(usize),

    /// The stream ended mid-frame or could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single pkt-line frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Payload of a data frame (the bytes following the length prefix).
    Data(Vec<u8>),
    /// The `0000` flush packet.
    Flush,
}

impl PktLine {
    /// Payload as UTF-8, for data frames with valid UTF-8 content.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PktLine::Data(data) => std::str::from_utf8(data).ok(),
            PktLine::Flush => None,
        }
    }
}

/// Tokenizes a byte stream into pkt-line frames.
///
/// EOF on a frame boundary ends the stream cleanly; EOF inside a frame
/// surfaces as an I/O error.
pub struct PktLineScanner<R> {
    reader: R,
}

impl<R: Read> PktLineScanner<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<PktLine>, PktLineError> {
        let mut prefix = [0u8; 4];
        match self.reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let prefix_str = std::str::from_utf8(&prefix)
            .map_err(|_| PktLineError::InvalidLength(format!("{prefix:?}")))?;
        let len = usize::from_str_radix(prefix_str, 16)
            .map_err(|_| PktLineError::InvalidLength(prefix_str.to_string()))?;

        if len == 0 {
            return Ok(Some(PktLine::Flush));
        }
        if len < 4 {
            return Err(PktLineError::LengthTooSmall(len));
        }

        let mut payload = vec![0u8; len - 4];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(PktLine::Data(payload)))
    }
}

impl<R: Read> Iterator for PktLineScanner<R> {
    type Item = Result<PktLine, PktLineError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Extract the capability list from a first-want line.
///
/// The first pkt-line of an upload-pack request reads
/// `want <40-hex-oid> <capability>...`; returns the capabilities when the
/// line has that shape.
pub fn first_want_capabilities(line: &str) -> Option<Vec<&str>> {
    let rest = line.strip_prefix("want ")?;
    let bytes = rest.as_bytes();
    if bytes.len() < 41 || bytes[40] != b' ' {
        return None;
    }
    if !bytes[..40].iter().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(rest[41..].split_whitespace().collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
