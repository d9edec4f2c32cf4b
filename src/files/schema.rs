use crate::error::{FileError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use sha2::{Digest, Sha256};

/// One entry of the storage schema: how a `File` field is persisted and how
/// it is named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub field: &'static str,
    pub column: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
    pub header: Option<&'static str>,
}

const fn core_column(field: &'static str, sql_type: &'static str, header: Option<&'static str>) -> Column {
    Column { field, column: field, sql_type, nullable: false, header }
}

const fn meta_column(field: &'static str, header: &'static str) -> Column {
    Column { field, column: field, sql_type: "TEXT", nullable: true, header: Some(header) }
}

pub const ETAG_HEADER: &str = "Etag";
pub const MODIFIED_HEADER: &str = "Last-Modified";

/// Identity column of the `Files` table.
pub const KEY_COLUMN: &str = "name";

/// Number of leading core columns in [`COLUMNS`].
pub const CORE_COLUMNS: usize = 4;

/// Ordered schema descriptor. The repository builds its statements from it
/// and the gateway derives header names from it.
pub const COLUMNS: [Column; CORE_COLUMNS + MetaField::COUNT] = [
    core_column("name", "TEXT", None),
    core_column("content", "BLOB", None),
    core_column("etag", "TEXT", Some(ETAG_HEADER)),
    core_column("modified", "TEXT", Some(MODIFIED_HEADER)),
    meta_column("mime", "Content-Type"),
    meta_column("encoding", "Content-Encoding"),
    meta_column("description", "File-Description"),
    meta_column("tag", "File-Tag"),
    meta_column("tag2", "File-Tag2"),
    meta_column("tag3", "File-Tag3"),
    meta_column("data", "File-Data"),
    meta_column("data2", "File-Data2"),
    meta_column("data3", "File-Data3"),
    meta_column("data4", "File-Data4"),
    meta_column("data5", "File-Data5"),
];

/// Optional metadata carried next to the content. Order matches [`COLUMNS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaField {
    Mime,
    Encoding,
    Description,
    Tag,
    Tag2,
    Tag3,
    Data,
    Data2,
    Data3,
    Data4,
    Data5,
}

impl MetaField {
    pub const COUNT: usize = 11;

    pub const ALL: [MetaField; Self::COUNT] = [
        Self::Mime,
        Self::Encoding,
        Self::Description,
        Self::Tag,
        Self::Tag2,
        Self::Tag3,
        Self::Data,
        Self::Data2,
        Self::Data3,
        Self::Data4,
        Self::Data5,
    ];

    pub fn column(self) -> &'static Column {
        &COLUMNS[CORE_COLUMNS + self as usize]
    }

    pub fn name(self) -> &'static str {
        self.column().field
    }

    pub fn header(self) -> &'static str {
        self.column().header.unwrap_or(self.column().field)
    }
}

/// Stored metadata values, indexed by [`MetaField`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata([Option<String>; MetaField::COUNT]);

impl Metadata {
    pub fn get(&self, field: MetaField) -> Option<&str> {
        self.0[field as usize].as_deref()
    }

    pub fn set(&mut self, field: MetaField, value: Option<String>) {
        self.0[field as usize] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetaField, Option<&str>)> + '_ {
        MetaField::ALL.into_iter().map(move |f| (f, self.get(f)))
    }
}

/// A stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub content: Vec<u8>,
    pub etag: String,
    pub modified: DateTime<Utc>,
    pub meta: Metadata,
}

impl File {
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn get(&self, field: MetaField) -> Option<&str> {
        self.meta.get(field)
    }

    pub fn modified_string(&self) -> String {
        format_timestamp(&self.modified)
    }
}

/// What a write request says about one metadata field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldValue {
    /// Not mentioned; the prior value is inherited.
    #[default]
    Absent,
    /// Mentioned with an empty value; the field is cleared.
    Clear,
    /// Mentioned with a value; the field is replaced.
    Set(String),
}

impl FieldValue {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Absent,
            Some("") => Self::Clear,
            Some(v) => Self::Set(v.to_string()),
        }
    }
}

/// A file built from an incoming write, before it is reconciled with the
/// stored record.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub content: Vec<u8>,
    pub etag: String,
    pub modified: DateTime<Utc>,
    pub fields: [FieldValue; MetaField::COUNT],
}

impl Candidate {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(FileError::validation("Missing required data: name"));
        }
        Ok(Self {
            etag: version_tag(&content),
            modified: Utc::now().trunc_subsecs(6),
            name,
            content,
            fields: Default::default(),
        })
    }

    /// Build a candidate from raw transport values. `raw` yields the value
    /// sent for a field, `None` when the request did not mention it.
    pub fn from_raw<'a>(
        name: impl Into<String>,
        content: Vec<u8>,
        mut raw: impl FnMut(MetaField) -> Option<&'a str>,
    ) -> Result<Self> {
        let mut candidate = Self::new(name, content)?;
        for field in MetaField::ALL {
            candidate.fields[field as usize] = FieldValue::from_raw(raw(field));
        }
        Ok(candidate)
    }

    pub fn with(mut self, field: MetaField, value: FieldValue) -> Self {
        self.fields[field as usize] = value;
        self
    }

    pub fn field(&self, field: MetaField) -> &FieldValue {
        &self.fields[field as usize]
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Quoted SHA-256 of the content.
pub fn version_tag(content: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(content)))
}

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse a caller-supplied timestamp. Accepts RFC 3339, HTTP dates and naive
/// ISO-8601 (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(t.and_utc());
        }
    }
    if let Some(t) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc());
    }
    Err(FileError::validation(format!("Invalid timestamp: {raw}")))
}
