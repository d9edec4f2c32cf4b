//! Reconciles an incoming write with the record it replaces.
//!
//! Core fields always come from the candidate. Each metadata field is
//! inherited when the write did not mention it, cleared when it was sent
//! empty, and replaced otherwise.

use super::schema::{Candidate, FieldValue, File, MetaField, Metadata};

/// Produce the record to persist for `candidate`, given the currently stored
/// record (if any).
pub fn merge(candidate: Candidate, prior: Option<&File>) -> File {
    let Candidate { name, content, etag, modified, fields } = candidate;

    let mut meta = Metadata::default();
    for (field, value) in MetaField::ALL.into_iter().zip(fields) {
        let resolved = match value {
            FieldValue::Set(v) => Some(v),
            FieldValue::Clear => None,
            FieldValue::Absent => prior
                .and_then(|p| p.get(field))
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
        };
        meta.set(field, resolved);
    }

    File { name, content, etag, modified, meta }
}
