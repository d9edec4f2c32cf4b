//! Precondition evaluation for reads, writes and deletes.
//!
//! Every check here runs before anything is mutated. The first failing
//! write/delete precondition aborts the operation.

use super::schema::{parse_timestamp, File};
use crate::error::{FileError, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

pub const IF_MATCH: &str = "If-Match";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
pub const IF_UNMODIFIED_SINCE: &str = "If-Unmodified-Since";

/// A caller-supplied set of version tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSet {
    Any,
    Tags(Vec<String>),
}

impl TagSet {
    /// Parse a comma-separated tag list. `*` matches every tag.
    pub fn parse(raw: &str) -> Self {
        let tags: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        if tags.iter().any(|t| t == "*") {
            Self::Any
        } else {
            Self::Tags(tags)
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Tags(tags) => tags.iter().any(|t| t == tag),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Preconditions {
    pub if_match: Option<TagSet>,
    pub if_none_match: Option<TagSet>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl Preconditions {
    /// Collect preconditions through a header lookup. Timestamps that do not
    /// parse are a validation error.
    pub fn from_headers<F>(mut lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let time = |raw: Option<String>| raw.as_deref().map(parse_timestamp).transpose();
        Ok(Self {
            if_match: lookup(IF_MATCH).as_deref().map(TagSet::parse),
            if_none_match: lookup(IF_NONE_MATCH).as_deref().map(TagSet::parse),
            if_modified_since: time(lookup(IF_MODIFIED_SINCE))?,
            if_unmodified_since: time(lookup(IF_UNMODIFIED_SINCE))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDecision {
    Full,
    NotModified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    Create,
    Update,
}

impl WriteDecision {
    pub fn status(self) -> u16 {
        match self {
            Self::Create => 201,
            Self::Update => 204,
        }
    }
}

pub fn check_read(pre: &Preconditions, stored: &File) -> ReadDecision {
    if let Some(t) = pre.if_modified_since {
        if stored.modified <= t {
            debug!(name = %stored.name, "not modified since {t}");
            return ReadDecision::NotModified;
        }
    }
    if let Some(tags) = &pre.if_none_match {
        if tags.contains(&stored.etag) {
            debug!(name = %stored.name, "etag matched");
            return ReadDecision::NotModified;
        }
    }
    ReadDecision::Full
}

/// Without a stored record the write is an initial write and preconditions
/// against prior state are skipped.
pub fn check_write(pre: &Preconditions, stored: Option<&File>) -> Result<WriteDecision> {
    match stored {
        None => Ok(WriteDecision::Create),
        Some(file) => {
            guard(pre, file)?;
            Ok(WriteDecision::Update)
        }
    }
}

pub fn check_delete(pre: &Preconditions, stored: &File) -> Result<()> {
    guard(pre, stored)
}

fn guard(pre: &Preconditions, stored: &File) -> Result<()> {
    if let Some(tags) = &pre.if_match {
        if !tags.contains(&stored.etag) {
            debug!(name = %stored.name, "etag mismatch");
            return Err(FileError::PreconditionFailed("Etag mismatch"));
        }
    }
    if let Some(t) = pre.if_unmodified_since {
        if stored.modified > t {
            debug!(name = %stored.name, "modified after {t}");
            return Err(FileError::PreconditionFailed("File modified"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::schema::{version_tag, Metadata};
    use chrono::{Duration, TimeZone};

    fn stored() -> File {
        File {
            name: "test.txt".into(),
            content: b"Lorem Ipsum".to_vec(),
            etag: version_tag(b"Lorem Ipsum"),
            modified: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            meta: Metadata::default(),
        }
    }

    fn tags(list: &[&str]) -> Option<TagSet> {
        Some(TagSet::parse(&list.join(", ")))
    }

    #[test]
    fn tag_set_parsing() {
        let set = TagSet::parse(r#""a", "b""#);
        assert!(set.contains(r#""a""#));
        assert!(set.contains(r#""b""#));
        assert!(!set.contains(r#""c""#));
        assert_eq!(TagSet::parse("*"), TagSet::Any);
        assert!(TagSet::parse(" * ").contains("anything"));
    }

    #[test]
    fn read_not_modified_since() {
        let file = stored();
        let at = |t| Preconditions { if_modified_since: Some(t), ..Default::default() };
        assert_eq!(check_read(&at(file.modified), &file), ReadDecision::NotModified);
        assert_eq!(check_read(&at(file.modified + Duration::seconds(1)), &file), ReadDecision::NotModified);
        assert_eq!(check_read(&at(file.modified - Duration::seconds(1)), &file), ReadDecision::Full);
    }

    #[test]
    fn read_none_match() {
        let file = stored();
        let pre = Preconditions { if_none_match: tags(&[file.etag.as_str(), r#""123""#]), ..Default::default() };
        assert_eq!(check_read(&pre, &file), ReadDecision::NotModified);
        let pre = Preconditions { if_none_match: tags(&[r#""123""#]), ..Default::default() };
        assert_eq!(check_read(&pre, &file), ReadDecision::Full);
        assert_eq!(check_read(&Preconditions::default(), &file), ReadDecision::Full);
    }

    #[test]
    fn write_without_prior_is_create_regardless_of_preconditions() {
        let pre = Preconditions {
            if_match: tags(&[r#""nope""#]),
            if_unmodified_since: Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert_eq!(check_write(&pre, None).unwrap(), WriteDecision::Create);
    }

    #[test]
    fn write_if_match() {
        let file = stored();
        let pre = Preconditions { if_match: tags(&[r#""old""#, file.etag.as_str()]), ..Default::default() };
        assert_eq!(check_write(&pre, Some(&file)).unwrap(), WriteDecision::Update);
        let pre = Preconditions { if_match: tags(&[r#""old""#]), ..Default::default() };
        let err = check_write(&pre, Some(&file)).unwrap_err();
        assert_eq!(err.status(), 412);
    }

    #[test]
    fn write_if_unmodified_since() {
        let file = stored();
        let at = |t| Preconditions { if_unmodified_since: Some(t), ..Default::default() };
        assert!(check_write(&at(file.modified), Some(&file)).is_ok());
        assert!(check_write(&at(file.modified + Duration::hours(1)), Some(&file)).is_ok());
        let err = check_write(&at(file.modified - Duration::seconds(1)), Some(&file)).unwrap_err();
        assert!(matches!(err, FileError::PreconditionFailed("File modified")));
    }

    #[test]
    fn delete_uses_write_guards() {
        let file = stored();
        let pre = Preconditions { if_match: tags(&[r#""123""#]), ..Default::default() };
        assert!(check_delete(&pre, &file).is_err());
        let pre = Preconditions {
            if_unmodified_since: Some(file.modified - Duration::seconds(5)),
            ..Default::default()
        };
        assert!(check_delete(&pre, &file).is_err());
        assert!(check_delete(&Preconditions::default(), &file).is_ok());
    }

    #[test]
    fn headers_parse_into_preconditions() {
        let pre = Preconditions::from_headers(|h| match h {
            IF_MATCH => Some(r#""a","b""#.to_string()),
            IF_UNMODIFIED_SINCE => Some("2024-01-01T12:00:00+00:00".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(pre.if_match.unwrap().contains(r#""b""#));
        assert!(pre.if_none_match.is_none());
        assert_eq!(pre.if_unmodified_since, Some(stored().modified));

        let bad = Preconditions::from_headers(|h| {
            (h == IF_MODIFIED_SINCE).then(|| "not a date".to_string())
        });
        assert!(matches!(bad, Err(FileError::Validation(_))));
    }
}
