//! Capability parsing and negotiation.
//!
//! Capabilities are advertised in the `hello` exchange to establish the
//! base protocol version, framing discipline and optional features both
//! peers support. A capability is a URN, optionally parameterized with a
//! flat query-string suffix:
//!
//! ```text
//! urn:ietf:params:netconf:base:1.1
//! urn:example:yang:widgets?module=widgets&revision=2024-01-15&features=fast,wide
//! urn:ietf:params:netconf:capability:exi:1.0?compression=6&schemas=builtin
//! ```
//!
//! Unknown parameter keys and unrecognized URNs are retained verbatim as
//! opaque capabilities so upper layers can still act on them.

use crate::codec::{ExiParameters, ExiSchemaMode, FramingMode};
use crate::error::{NetconfError, Result};

/// Base protocol, end-of-message framing
pub const CAP_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// Base protocol, chunked framing (RFC 6242)
pub const CAP_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// Notification streams (RFC 5277)
pub const CAP_NOTIFICATION_1_0: &str = "urn:ietf:params:netconf:capability:notification:1.0";
/// EXI binary encoding extension
pub const CAP_EXI_1_0: &str = "urn:ietf:params:netconf:capability:exi:1.0";

/// A single advertised capability.
///
/// The full URI is kept verbatim; recognized parameters are decomposed
/// for capability-driven feature negotiation by upper layers. Absent
/// parameters stay `None`, never fabricated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// Full URI as advertised, including any parameter suffix
    uri: String,
    /// URN part before the `?` separator
    base: String,
    /// YANG module name (`module=` parameter)
    module: Option<String>,
    /// YANG module revision (`revision=` parameter)
    revision: Option<String>,
    /// Enabled YANG features (`features=` comma list)
    features: Vec<String>,
    /// Applied deviations (`deviations=` comma list)
    deviations: Vec<String>,
    /// EXI compression level (`compression=` parameter)
    exi_compression: Option<u32>,
    /// EXI schema mode (`schemas=` parameter)
    exi_schemas: Option<String>,
}

impl Capability {
    /// Parse a capability URI.
    ///
    /// Fails only on URIs that cannot be a capability at all (empty or
    /// containing whitespace); anything else is retained, with recognized
    /// parameters decomposed.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() || uri.chars().any(char::is_whitespace) {
            return Err(NetconfError::NegotiationFailed(format!(
                "unparsable capability URI: {uri:?}"
            )));
        }

        let (base, query) = match uri.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (uri, None),
        };

        let mut cap = Self {
            uri: uri.to_string(),
            base: base.to_string(),
            module: None,
            revision: None,
            features: Vec::new(),
            deviations: Vec::new(),
            exi_compression: None,
            exi_schemas: None,
        };

        if let Some(query) = query {
            for pair in query.split('&') {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                match key {
                    "module" => cap.module = Some(value.to_string()),
                    "revision" => cap.revision = Some(value.to_string()),
                    "features" => {
                        cap.features = value
                            .split(',')
                            .filter(|f| !f.is_empty())
                            .map(str::to_string)
                            .collect();
                    },
                    "deviations" => {
                        cap.deviations = value
                            .split(',')
                            .filter(|d| !d.is_empty())
                            .map(str::to_string)
                            .collect();
                    },
                    "compression" => cap.exi_compression = value.parse().ok(),
                    "schemas" => cap.exi_schemas = Some(value.to_string()),
                    // Unknown parameters stay opaque inside `uri`
                    _ => {},
                }
            }
        }

        Ok(cap)
    }

    /// Build a bare capability from a URN with no parameters.
    pub fn plain(urn: &str) -> Self {
        Self {
            uri: urn.to_string(),
            base: urn.to_string(),
            module: None,
            revision: None,
            features: Vec::new(),
            deviations: Vec::new(),
            exi_compression: None,
            exi_schemas: None,
        }
    }

    /// Full URI as advertised
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// URN part before any parameter suffix
    pub fn base_urn(&self) -> &str {
        &self.base
    }

    /// YANG module name, if this is a module capability
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// YANG module revision
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Enabled YANG features
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Applied deviations
    pub fn deviations(&self) -> &[String] {
        &self.deviations
    }

    /// EXI compression level parameter
    pub fn exi_compression(&self) -> Option<u32> {
        self.exi_compression
    }

    /// EXI schema mode parameter
    pub fn exi_schemas(&self) -> Option<&str> {
        self.exi_schemas.as_deref()
    }

    /// Whether this capability names a YANG module
    pub fn is_yang_module(&self) -> bool {
        self.module.is_some()
    }
}

/// An ordered, URI-unique set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

impl CapabilitySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a set from URI strings, preserving order.
    pub fn parse_all<'a>(uris: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut set = Self::new();
        for uri in uris {
            set.add(Capability::parse(uri)?);
        }
        Ok(set)
    }

    /// Add a capability. Duplicate URIs are ignored (first wins).
    /// Returns whether the capability was inserted.
    pub fn add(&mut self, cap: Capability) -> bool {
        if self.caps.iter().any(|c| c.uri == cap.uri) {
            return false;
        }
        self.caps.push(cap);
        true
    }

    /// Look up a capability by its base URN.
    pub fn get(&self, base_urn: &str) -> Option<&Capability> {
        self.caps.iter().find(|c| c.base == base_urn)
    }

    /// Whether a capability with the given base URN is present.
    pub fn contains(&self, base_urn: &str) -> bool {
        self.get(base_urn).is_some()
    }

    /// Iterate in advertisement order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.caps.iter()
    }

    /// Number of capabilities in the set.
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Intersect with a peer set by base URN, keeping our entries
    /// (and therefore our parameter values) for the common URNs.
    pub fn intersect(&self, peer: &CapabilitySet) -> CapabilitySet {
        let caps = self
            .caps
            .iter()
            .filter(|c| peer.contains(&c.base))
            .cloned()
            .collect();
        CapabilitySet { caps }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = Self::new();
        for cap in iter {
            set.add(cap);
        }
        set
    }
}

/// Result of capability negotiation
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Effective (intersected) capability set
    pub capabilities: CapabilitySet,
    /// Framing discipline for the rest of the session
    pub framing: FramingMode,
    /// EXI parameters if both sides are eligible; `None` otherwise.
    /// Eligibility does not activate EXI, a `start-exi` RPC does.
    pub exi: Option<ExiParameters>,
}

/// Negotiate the effective capability set and session parameters.
///
/// Chunked framing is selected only when both sides advertise base:1.1.
/// EXI parameters are taken from whichever side specified them, local
/// values winning on conflict. A peer set with no common base protocol
/// version fails fatally; the session never reaches Established.
pub fn negotiate(local: &CapabilitySet, peer: &CapabilitySet) -> Result<Negotiated> {
    if peer.is_empty() {
        return Err(NetconfError::NegotiationFailed(
            "peer advertised no capabilities".to_string(),
        ));
    }

    let framing = if local.contains(CAP_BASE_1_1) && peer.contains(CAP_BASE_1_1) {
        FramingMode::Chunked
    } else if local.contains(CAP_BASE_1_0) && peer.contains(CAP_BASE_1_0) {
        FramingMode::EndOfMessage
    } else {
        return Err(NetconfError::NegotiationFailed(
            "no common base protocol version".to_string(),
        ));
    };

    // The EXI extension rides on chunked framing; an EOM session is
    // never EXI-eligible even if both sides advertise the capability.
    let exi = match (local.get(CAP_EXI_1_0), peer.get(CAP_EXI_1_0)) {
        (Some(ours), Some(theirs)) if framing == FramingMode::Chunked => {
            let compression = ours
                .exi_compression()
                .or(theirs.exi_compression())
                .unwrap_or(ExiParameters::DEFAULT_COMPRESSION);
            let schemas = ours
                .exi_schemas()
                .or(theirs.exi_schemas())
                .map(ExiSchemaMode::parse)
                .transpose()?
                .unwrap_or_default();
            Some(ExiParameters::new(compression, schemas))
        },
        _ => None,
    };

    Ok(Negotiated {
        capabilities: local.intersect(peer),
        framing,
        exi,
    })
}
