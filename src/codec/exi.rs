//! EXI binary transform.
//!
//! When both peers advertise the EXI capability and a `start-exi` RPC has
//! been acknowledged, every subsequent message body travels as a binary
//! EXI document instead of plaintext XML. The wire format is a small
//! envelope over a deflate body:
//!
//! ```text
//! +------------+---------+------------------+------------------+
//! | "$EXI" (4) | ver (1) | options (1)      | deflate(body)    |
//! +------------+---------+------------------+------------------+
//! ```
//!
//! The options byte carries the negotiated compression level in the high
//! nibble and the schema mode in the low nibble, so a decoder can verify
//! it is operating under the parameters that were negotiated.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{NetconfError, Result};

/// Envelope magic for EXI-transformed documents
pub const EXI_MAGIC: &[u8; 4] = b"$EXI";

/// Envelope version
const EXI_VERSION: u8 = 1;

/// Schema mode for the EXI transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExiSchemaMode {
    /// Schema-less encoding
    #[default]
    None,
    /// Built-in NETCONF schemas
    Builtin,
    /// Base:1.1 schema set
    Base11,
}

impl ExiSchemaMode {
    /// Parse the `schemas=` capability parameter value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "none" => Ok(Self::None),
            "builtin" => Ok(Self::Builtin),
            "base:1.1" => Ok(Self::Base11),
            other => Err(NetconfError::NegotiationFailed(format!(
                "unknown EXI schema mode: {other}"
            ))),
        }
    }

    fn as_nibble(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Builtin => 1,
            Self::Base11 => 2,
        }
    }

    fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0 => Ok(Self::None),
            1 => Ok(Self::Builtin),
            2 => Ok(Self::Base11),
            other => Err(NetconfError::Exi(format!("unknown schema mode {other}"))),
        }
    }
}

/// Negotiated EXI parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExiParameters {
    compression: u32,
    schemas: ExiSchemaMode,
}

impl ExiParameters {
    /// Compression level used when neither side specified one
    pub const DEFAULT_COMPRESSION: u32 = 6;

    /// Create parameters, clamping the compression level to deflate's 0-9.
    pub fn new(compression: u32, schemas: ExiSchemaMode) -> Self {
        Self {
            compression: compression.min(9),
            schemas,
        }
    }

    /// Negotiated compression level (0-9)
    pub fn compression(&self) -> u32 {
        self.compression
    }

    /// Negotiated schema mode
    pub fn schemas(&self) -> ExiSchemaMode {
        self.schemas
    }
}

impl Default for ExiParameters {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COMPRESSION, ExiSchemaMode::default())
    }
}

/// Stateless transform applying the EXI envelope to message bodies.
#[derive(Debug, Clone)]
pub struct ExiTransform {
    params: ExiParameters,
}

impl ExiTransform {
    /// Create a transform for the negotiated parameters.
    pub fn new(params: ExiParameters) -> Self {
        Self { params }
    }

    /// Parameters this transform was built with
    pub fn params(&self) -> ExiParameters {
        self.params
    }

    /// Transform a plaintext XML document into an EXI envelope.
    pub fn encode(&self, xml: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(6 + xml.len() / 2);
        out.extend_from_slice(EXI_MAGIC);
        out.push(EXI_VERSION);
        out.push((self.params.compression as u8) << 4 | self.params.schemas.as_nibble());

        let mut encoder = ZlibEncoder::new(out, Compression::new(self.params.compression));
        encoder
            .write_all(xml)
            .map_err(|e| NetconfError::Exi(format!("deflate failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| NetconfError::Exi(format!("deflate failed: {e}")))
    }

    /// Recover the plaintext XML document from an EXI envelope.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 6 || &data[..4] != EXI_MAGIC {
            return Err(NetconfError::Exi("missing EXI envelope magic".to_string()));
        }
        if data[4] != EXI_VERSION {
            return Err(NetconfError::Exi(format!(
                "unsupported EXI envelope version {}",
                data[4]
            )));
        }
        // Schema mode must round-trip; compression level is informational
        ExiSchemaMode::from_nibble(data[5] & 0x0f)?;

        let mut xml = Vec::new();
        ZlibDecoder::new(&data[6..])
            .read_to_end(&mut xml)
            .map_err(|e| NetconfError::Exi(format!("inflate failed: {e}")))?;
        Ok(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &[u8] = b"<rpc message-id=\"1\"><get/></rpc>";

    #[test]
    fn test_roundtrip() {
        let transform = ExiTransform::new(ExiParameters::default());
        let encoded = transform.encode(DOC).unwrap();
        assert!(encoded.starts_with(EXI_MAGIC));
        assert_ne!(&encoded[6..], DOC);

        let decoded = transform.decode(&encoded).unwrap();
        assert_eq!(decoded, DOC);
    }

    #[test]
    fn test_roundtrip_all_compression_levels() {
        for level in 0..=9 {
            let transform =
                ExiTransform::new(ExiParameters::new(level, ExiSchemaMode::Builtin));
            let encoded = transform.encode(DOC).unwrap();
            let decoded = transform.decode(&encoded).unwrap();
            assert_eq!(decoded, DOC, "level {level}");
        }
    }

    #[test]
    fn test_rejects_plaintext() {
        let transform = ExiTransform::new(ExiParameters::default());
        assert!(transform.decode(DOC).is_err());
    }

    #[test]
    fn test_rejects_bad_version() {
        let transform = ExiTransform::new(ExiParameters::default());
        let mut encoded = transform.encode(DOC).unwrap();
        encoded[4] = 99;
        assert!(transform.decode(&encoded).is_err());
    }

    #[test]
    fn test_compression_level_clamped() {
        let params = ExiParameters::new(42, ExiSchemaMode::None);
        assert_eq!(params.compression(), 9);
    }

    #[test]
    fn test_schema_mode_parse() {
        assert_eq!(ExiSchemaMode::parse("builtin").unwrap(), ExiSchemaMode::Builtin);
        assert_eq!(ExiSchemaMode::parse("base:1.1").unwrap(), ExiSchemaMode::Base11);
        assert_eq!(ExiSchemaMode::parse("none").unwrap(), ExiSchemaMode::None);
        assert!(ExiSchemaMode::parse("exotic").is_err());
    }
}
