//! Hierarchical resource names and the bytewise ordering pagination relies on.
//!
//! Grammar: `<parent>/results/<id>` or
//! `<parent>/results/<result-id>/records/<id>`, where `<parent>` is a
//! non-empty slash-separated path of non-empty segments, none containing
//! a literal `/`.

use crate::error::ArchiveError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated resource name. `Ord` is exactly bytewise `str` comparison —
/// the sole basis for pagination cursors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    pub fn new(raw: impl Into<String>) -> Self {
        Name(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// `parent/results/<id>`
    pub fn for_result(parent: &str, id: &str) -> ArchiveResult<Self> {
        validate_parent(parent)?;
        validate_segment(id)?;
        Ok(Name(format!("{parent}/results/{id}")))
    }

    /// `<result_name>/records/<id>`
    pub fn for_record(result_name: &Name, id: &str) -> ArchiveResult<Self> {
        validate_segment(id)?;
        Ok(Name(format!("{}/records/{}", result_name.0, id)))
    }

    /// True iff `self` names a Record and `other` is its parent Result,
    /// i.e. `self`'s name strictly extends `other`'s with `/records/<id>`.
    pub fn is_child_of(&self, other: &Name) -> bool {
        self.0
            .strip_prefix(other.0.as_str())
            .map(|rest| rest.starts_with("/records/") && rest.len() > "/records/".len())
            .unwrap_or(false)
    }

    /// Parses a `.../results/<id>` name, returning the parent path and id.
    pub fn parse_result(raw: &str) -> ArchiveResult<(String, String)> {
        let (parent, rest) = split_last_segment_pair(raw, "results")?;
        Ok((parent, rest))
    }

    /// Parses a `.../results/<rid>/records/<id>` name, returning the
    /// owning Result's name and the record id.
    pub fn parse_record(raw: &str) -> ArchiveResult<(Name, String)> {
        let (result_part, record_id) = split_last_segment_pair(raw, "records")?;
        Ok((Name(result_part), record_id))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

use crate::error::ArchiveResult;

fn validate_segment(segment: &str) -> ArchiveResult<()> {
    if segment.is_empty() || segment.contains('/') {
        return Err(ArchiveError::invalid_argument(format!(
            "invalid name segment: {segment:?}"
        )));
    }
    Ok(())
}

fn validate_parent(parent: &str) -> ArchiveResult<()> {
    if parent.is_empty() {
        return Err(ArchiveError::invalid_argument("parent must not be empty"));
    }
    for segment in parent.split('/') {
        validate_segment(segment)?;
    }
    Ok(())
}

/// Splits `<prefix>/<collection>/<id>` into `(prefix, id)`, validating
/// that `<collection>` is the expected literal and both surrounding parts
/// are non-empty.
fn split_last_segment_pair(raw: &str, collection: &str) -> ArchiveResult<(String, String)> {
    let marker = format!("/{collection}/");
    let idx = raw.rfind(&marker).ok_or_else(|| {
        ArchiveError::invalid_argument(format!("name {raw:?} missing /{collection}/ segment"))
    })?;
    let prefix = &raw[..idx];
    let id = &raw[idx + marker.len()..];
    validate_segment(id)?;
    if prefix.is_empty() {
        return Err(ArchiveError::invalid_argument(format!(
            "name {raw:?} has empty prefix before /{collection}/"
        )));
    }
    Ok((prefix.to_string(), id.to_string()))
}
