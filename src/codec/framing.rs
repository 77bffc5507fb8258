//! Message framing: end-of-message and RFC 6242 chunked.
//!
//! [`NetconfCodec`] turns a byte stream into discrete [`Message`]s and
//! back. Two framing disciplines exist on the wire:
//!
//! ```text
//! EOM:     <xml document>]]>]]>
//! Chunked: \n#<len>\n<len bytes> ... \n##\n
//! ```
//!
//! The hello exchange always runs EOM; negotiation may switch the codec
//! to chunked for the rest of the session. When the EXI transform is
//! active, the document bytes inside the framing are the EXI envelope
//! instead of plaintext XML. Both switches happen only at message
//! boundaries, on the session's single processing pipeline, so no
//! message is ever decoded under the wrong mode.
//!
//! Malformed chunk headers are fatal: the decoder returns an error and
//! the session must be torn down, not retried.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::exi::{ExiParameters, ExiTransform};
use crate::error::{NetconfError, Result};
use crate::protocol::Message;

/// End-of-message framing delimiter
pub const EOM_MARKER: &[u8] = b"]]>]]>";

/// Maximum digits in a chunk-size header (u32 per RFC 6242)
const MAX_CHUNK_DIGITS: usize = 10;

/// Framing discipline in effect for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// Messages delimited by `]]>]]>` (base:1.0)
    EndOfMessage,
    /// Length-prefixed chunks per RFC 6242 (base:1.1)
    Chunked,
}

#[derive(Debug, Clone, Copy)]
enum ChunkState {
    /// Expecting `\n#` followed by a chunk-size or the end marker
    Header,
    /// Collecting the remaining bytes of the current chunk
    Data(usize),
}

/// Framing codec for one session.
#[derive(Debug)]
pub struct NetconfCodec {
    framing: FramingMode,
    exi: Option<ExiTransform>,
    max_chunk_size: usize,
    state: ChunkState,
    /// Chunk payloads assembled so far for the in-progress message
    assembled: Vec<u8>,
    /// EOM scan resume point, so unseen bytes are not rescanned
    scan_offset: usize,
}

impl NetconfCodec {
    /// Default maximum chunk size (16 MB)
    pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

    /// Create a codec in EOM mode, as required for the hello exchange.
    pub fn new() -> Self {
        Self::with_max_chunk_size(Self::DEFAULT_MAX_CHUNK_SIZE)
    }

    /// Create a codec with a custom chunk-size cap.
    pub fn with_max_chunk_size(max_chunk_size: usize) -> Self {
        Self {
            framing: FramingMode::EndOfMessage,
            exi: None,
            max_chunk_size,
            state: ChunkState::Header,
            assembled: Vec::new(),
            scan_offset: 0,
        }
    }

    /// Current framing mode
    pub fn framing(&self) -> FramingMode {
        self.framing
    }

    /// Switch framing. Only valid at a message boundary.
    pub fn set_framing(&mut self, framing: FramingMode) {
        self.framing = framing;
        self.state = ChunkState::Header;
        self.scan_offset = 0;
    }

    /// Whether the EXI transform is active
    pub fn exi_active(&self) -> bool {
        self.exi.is_some()
    }

    /// Activate or deactivate the EXI transform. Only valid at a
    /// message boundary.
    pub fn set_exi(&mut self, params: Option<ExiParameters>) {
        self.exi = params.map(ExiTransform::new);
    }

    /// Parse a complete framed document into a message, applying the
    /// inverse EXI transform when active.
    fn finish(&self, document: Vec<u8>) -> Result<Message> {
        let xml_bytes = match &self.exi {
            Some(transform) => transform.decode(&document)?,
            None => document,
        };
        let xml = std::str::from_utf8(&xml_bytes)
            .map_err(|e| NetconfError::Framing(format!("document is not UTF-8: {e}")))?;
        Message::from_xml(xml)
    }

    fn decode_eom(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < EOM_MARKER.len() {
            return Ok(None);
        }

        // Resume the scan near where the last one ended; the marker may
        // straddle the previous chunk boundary.
        let start = self.scan_offset.saturating_sub(EOM_MARKER.len() - 1);
        match find_subsequence(&src[start..], EOM_MARKER) {
            Some(pos) => {
                let document = src.split_to(start + pos).to_vec();
                src.advance(EOM_MARKER.len());
                self.scan_offset = 0;
                Ok(Some(self.finish(document)?))
            },
            None => {
                self.scan_offset = src.len();
                Ok(None)
            },
        }
    }

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            match self.state {
                ChunkState::Header => {
                    if src.len() < 3 {
                        return Ok(None);
                    }
                    if src[0] != b'\n' || src[1] != b'#' {
                        return Err(NetconfError::Framing(format!(
                            "invalid chunk header: {:02x?}",
                            &src[..2]
                        )));
                    }

                    if src[2] == b'#' {
                        // end-of-chunks: \n##\n
                        if src.len() < 4 {
                            return Ok(None);
                        }
                        if src[3] != b'\n' {
                            return Err(NetconfError::Framing(
                                "malformed end-of-chunks marker".to_string(),
                            ));
                        }
                        src.advance(4);
                        if self.assembled.is_empty() {
                            return Err(NetconfError::Framing(
                                "chunked message with no chunks".to_string(),
                            ));
                        }
                        let document = std::mem::take(&mut self.assembled);
                        return Ok(Some(self.finish(document)?));
                    }

                    let digits_end = match find_byte(&src[2..], b'\n') {
                        Some(rel) => 2 + rel,
                        None if src.len() > 2 + MAX_CHUNK_DIGITS => {
                            return Err(NetconfError::Framing(
                                "chunk-size header too long".to_string(),
                            ));
                        },
                        None => return Ok(None),
                    };

                    let digits = &src[2..digits_end];
                    if digits.is_empty()
                        || digits[0] == b'0'
                        || !digits.iter().all(u8::is_ascii_digit)
                    {
                        return Err(NetconfError::Framing(format!(
                            "invalid chunk-size: {:?}",
                            String::from_utf8_lossy(digits)
                        )));
                    }
                    // All digits, at most 10 of them: fits u64
                    let len = std::str::from_utf8(digits)
                        .ok()
                        .and_then(|s| s.parse::<u64>().ok())
                        .ok_or_else(|| {
                            NetconfError::Framing("invalid chunk-size".to_string())
                        })?;
                    if len > self.max_chunk_size as u64 {
                        return Err(NetconfError::Framing(format!(
                            "chunk of {len} bytes exceeds maximum {}",
                            self.max_chunk_size
                        )));
                    }

                    src.advance(digits_end + 1);
                    self.state = ChunkState::Data(len as usize);
                },
                ChunkState::Data(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    self.assembled.extend_from_slice(&src.split_to(len));
                    self.state = ChunkState::Header;
                },
            }
        }
    }
}

impl Default for NetconfCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NetconfCodec {
    type Item = Message;
    type Error = NetconfError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.framing {
            FramingMode::EndOfMessage => self.decode_eom(src),
            FramingMode::Chunked => self.decode_chunked(src),
        }
    }
}

impl Encoder<Message> for NetconfCodec {
    type Error = NetconfError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let xml = item.to_xml();
        let payload = match &self.exi {
            Some(transform) => transform.encode(xml.as_bytes())?,
            None => xml.into_bytes(),
        };

        match self.framing {
            FramingMode::EndOfMessage => {
                dst.reserve(payload.len() + EOM_MARKER.len());
                dst.extend_from_slice(&payload);
                dst.extend_from_slice(EOM_MARKER);
            },
            FramingMode::Chunked => {
                let header = format!("\n#{}\n", payload.len());
                dst.reserve(header.len() + payload.len() + 4);
                dst.extend_from_slice(header.as_bytes());
                dst.extend_from_slice(&payload);
                dst.extend_from_slice(b"\n##\n");
            },
        }
        Ok(())
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_byte(haystack: &[u8], byte: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == byte)
}
