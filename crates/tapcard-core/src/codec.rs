// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Card-link URL codec.
//!
//! A card link is `{base}/{owner_id}/{slot_index}`. The base is shared with the
//! backend's link resolver, so the rendered form must be bit-exact on both
//! sides:
//!
//! - `owner_id` is percent-encoded, leaving only RFC 3986 unreserved bytes
//!   (`A-Z a-z 0-9 - . _ ~`) literal.
//! - `slot_index` is plain decimal: no sign, no leading zeros.
//! - No query, no fragment, no trailing slash.
//!
//! Decoding is the exact inverse and rejects every non-canonical spelling, so
//! `decode(encode(t)) == t` and `encode(decode(s)?) == s` both hold.

use std::fmt;

use thiserror::Error;
use url::Url;

/// Template base used when no setting overrides it.
pub const DEFAULT_URL_BASE: &str = "https://tapcard.app/p";

/// The (owner, slot) pair a tag points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvisioningTarget {
    owner_id: String,
    slot_index: u32,
}

/// Rejected [`ProvisioningTarget`] construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Owner identifier was empty.
    #[error("owner id must not be empty")]
    EmptyOwnerId,
}

impl ProvisioningTarget {
    /// Build a target. The slot index is unsigned, so only the owner is checked.
    pub fn new(owner_id: impl Into<String>, slot_index: u32) -> Result<Self, TargetError> {
        let owner_id = owner_id.into();
        if owner_id.is_empty() {
            return Err(TargetError::EmptyOwnerId);
        }
        Ok(Self {
            owner_id,
            slot_index,
        })
    }

    /// Card owner identifier.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Card slot within the owner's profile.
    pub fn slot_index(&self) -> u32 {
        self.slot_index
    }
}

/// Canonical card-link URI produced by [`UrlCodec::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedUrl(String);

impl EncodedUrl {
    /// View as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTF-8 byte length of the URI.
    pub fn byte_len(&self) -> usize {
        self.0.len()
    }

    /// Unwrap into the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for EncodedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invalid template base.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The base did not parse as an absolute URL.
    #[error("url base does not parse: {0}")]
    Parse(String),
    /// Only `http` and `https` links are resolvable by the backend.
    #[error("unsupported url scheme `{0}`")]
    Scheme(String),
    /// The base has no host component.
    #[error("url base has no host")]
    MissingHost,
    /// Query or fragment present on the base.
    #[error("url base must not carry a query or fragment")]
    QueryOrFragment,
}

/// Why a string read from a tag is not a card link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Nothing to decode.
    #[error("no payload")]
    Empty,
    /// The string does not match the card-link template.
    #[error("malformed card link: {0}")]
    Malformed(&'static str),
}

/// Encoder/decoder bound to one template base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCodec {
    base: String,
}

impl Default for UrlCodec {
    fn default() -> Self {
        Self {
            base: DEFAULT_URL_BASE.to_owned(),
        }
    }
}

impl UrlCodec {
    /// Validate `base` and normalize it (lowercase scheme/host, no trailing `/`).
    pub fn new(base: &str) -> Result<Self, TemplateError> {
        let url = Url::parse(base).map_err(|e| TemplateError::Parse(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(TemplateError::Scheme(other.to_owned())),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(TemplateError::MissingHost);
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(TemplateError::QueryOrFragment);
        }
        let base = url.as_str().trim_end_matches('/').to_owned();
        Ok(Self { base })
    }

    /// Normalized base this codec renders against.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Render the card link for `target`.
    pub fn encode(&self, target: &ProvisioningTarget) -> EncodedUrl {
        let owner = urlencoding::encode(target.owner_id());
        EncodedUrl(format!("{}/{}/{}", self.base, owner, target.slot_index()))
    }

    /// Parse a card link back into its target.
    pub fn decode(&self, raw: &str) -> Result<ProvisioningTarget, DecodeError> {
        if raw.trim().is_empty() {
            return Err(DecodeError::Empty);
        }
        let rest = raw
            .strip_prefix(self.base.as_str())
            .ok_or(DecodeError::Malformed("unexpected scheme, host or base path"))?;
        let rest = rest
            .strip_prefix('/')
            .ok_or(DecodeError::Malformed("missing path separator"))?;
        if rest.contains(['?', '#']) {
            return Err(DecodeError::Malformed("query or fragment present"));
        }

        let mut segments = rest.split('/');
        let (Some(owner_seg), Some(slot_seg), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(DecodeError::Malformed("expected owner and slot segments"));
        };

        let owner_id = decode_owner(owner_seg)?;
        let slot_index = decode_slot(slot_seg)?;
        ProvisioningTarget::new(owner_id, slot_index)
            .map_err(|_| DecodeError::Malformed("empty owner id"))
    }
}

fn decode_owner(segment: &str) -> Result<String, DecodeError> {
    if segment.is_empty() {
        return Err(DecodeError::Malformed("empty owner id"));
    }
    let owner = urlencoding::decode(segment)
        .map_err(|_| DecodeError::Malformed("owner id is not valid UTF-8"))?;
    // Only the canonical escape spelling is accepted.
    if urlencoding::encode(&owner) != segment {
        return Err(DecodeError::Malformed("owner id is not canonically encoded"));
    }
    Ok(owner.into_owned())
}

fn decode_slot(segment: &str) -> Result<u32, DecodeError> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::Malformed("slot index is not a decimal number"));
    }
    if segment.len() > 1 && segment.starts_with('0') {
        return Err(DecodeError::Malformed("slot index has leading zeros"));
    }
    segment
        .parse::<u32>()
        .map_err(|_| DecodeError::Malformed("slot index out of range"))
}
