//! Structured search over stored metadata.
//!
//! A [`Finder`] is built from [`FindParams`], validated on construction and
//! executed once against a [`Repository`]. Recursion scoping and regex name
//! matching run over the names the store returns.

use super::index::Repository;
use super::predicate::{Clause, Op, Predicate};
use super::schema::parse_timestamp;
use crate::error::{FileError, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

const TAG_COLUMNS: &[&str] = &["tag", "tag2", "tag3"];

/// Raw search parameters, keyed by snake-case name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindParams {
    pub name: Option<String>,
    pub name_re: Option<String>,

    pub encoding: Option<String>,
    pub mime: Option<String>,

    pub size: Option<i64>,
    pub size_gt: Option<i64>,
    pub size_lt: Option<i64>,

    pub modified: Option<String>,
    pub mod_before: Option<String>,
    pub mod_after: Option<String>,

    pub tag: Option<String>,
    pub tag1: Option<String>,
    pub tag2: Option<String>,
    pub tag3: Option<String>,

    pub recursive: Option<bool>,
}

impl FindParams {
    /// Read parameters from a JSON object whose keys may be in Pascal or
    /// camel case. `null` means no parameters.
    pub fn from_json(value: Value) -> Result<Self> {
        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => return Err(invalid("expected a JSON object")),
        };
        let snake: Map<String, Value> = object
            .into_iter()
            .map(|(key, val)| (pascal_to_snake(&key), val))
            .collect();
        serde_json::from_value(Value::Object(snake)).map_err(|e| invalid(&e.to_string()))
    }
}

pub fn pascal_to_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out.trim_start_matches('_').to_string()
}

/// An empty string is the same as leaving the filter out.
fn given(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn invalid(msg: &str) -> FileError {
    FileError::validation(format!("Invalid find parameters: {msg}"))
}

/// Take at most one set member of a mutually exclusive group.
fn exclusive<T>(members: Vec<(&'static str, Option<T>)>) -> Result<Option<(&'static str, T)>> {
    let names: Vec<&str> = members.iter().map(|(n, _)| *n).collect();
    let mut set = members.into_iter().filter_map(|(n, v)| v.map(|v| (n, v)));
    let first = set.next();
    if set.next().is_some() {
        return Err(invalid(&format!(
            "Cannot specify more than one of {}",
            names.join(", ")
        )));
    }
    Ok(first)
}

#[derive(Debug, Clone)]
pub struct Finder {
    prefix: String,
    recursive: bool,
    name_re: Option<Regex>,
    predicate: Predicate,
}

impl Finder {
    pub fn new(path_prefix: &str, params: FindParams) -> Result<Self> {
        let FindParams {
            name,
            name_re,
            encoding,
            mime,
            size,
            size_gt,
            size_lt,
            modified,
            mod_before,
            mod_after,
            tag,
            tag1,
            tag2,
            tag3,
            recursive,
        } = params;
        let [name, name_re, encoding, mime, modified, mod_before, mod_after, tag, tag1, tag2, tag3] =
            [name, name_re, encoding, mime, modified, mod_before, mod_after, tag, tag1, tag2, tag3]
                .map(given);

        // Group exclusivity is checked before any value is interpreted.
        let name = exclusive(vec![("name", name), ("name_re", name_re)])?;
        let size = exclusive(vec![("size", size), ("size_gt", size_gt), ("size_lt", size_lt)])?;
        let modified = exclusive(vec![
            ("modified", modified),
            ("mod_before", mod_before),
            ("mod_after", mod_after),
        ])?;

        let prefix = path_prefix.trim_matches('/').to_string();
        let mut predicate = Predicate::default();

        let name_re = match name {
            // SQLite GLOB accepts any pattern; a malformed one just never matches.
            Some(("name", pattern)) => {
                predicate.push(Clause::new("name", Op::Glob, pattern));
                None
            }
            // Anchored at the start only: a prefix match, not a full match.
            Some((_, pattern)) => Some(
                Regex::new(&format!("^(?:{pattern})"))
                    .map_err(|e| invalid(&format!("name_re: {e}")))?,
            ),
            None => None,
        };

        if let Some(encoding) = encoding {
            predicate.push(Clause::new("encoding", Op::Eq, encoding));
        }
        if let Some(mime) = mime {
            predicate.push(Clause::new("mime", Op::Glob, mime));
        }

        if let Some((key, n)) = size {
            let op = match key {
                "size" => Op::Eq,
                "size_gt" => Op::Gt,
                _ => Op::Lt,
            };
            predicate.push(Clause::new("size", op, n));
        }

        if let Some((key, raw)) = modified {
            let secs = parse_timestamp(&raw)?.timestamp();
            let op = match key {
                "modified" => Op::Eq,
                "mod_before" => Op::Lt,
                _ => Op::Gt,
            };
            predicate.push(Clause::new("modified", op, secs));
        }

        if let Some(tag) = tag {
            predicate.push(Clause::new("tag", Op::InAny(TAG_COLUMNS), tag));
        }
        for (column, value) in TAG_COLUMNS.iter().zip([tag1, tag2, tag3]) {
            if let Some(value) = value {
                predicate.push(Clause::new(*column, Op::Eq, value));
            }
        }

        if !prefix.is_empty() {
            predicate.push(Clause::new("name", Op::Under, prefix.clone()));
        }

        Ok(Self {
            prefix,
            recursive: recursive.unwrap_or(true),
            name_re,
            predicate,
        })
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Run the query. An empty result is a valid outcome here; callers decide
    /// how to report it.
    pub fn run<R: Repository + ?Sized>(&self, repo: &mut R) -> Result<Vec<String>> {
        let names = repo.find_names(&self.predicate)?;
        let total = names.len();
        let names: Vec<String> = names.into_iter().filter(|n| self.keep(n)).collect();
        debug!(prefix = %self.prefix, total, kept = names.len(), "find");
        Ok(names)
    }

    fn keep(&self, name: &str) -> bool {
        if !self.recursive {
            let rest = name
                .strip_prefix(self.prefix.as_str())
                .unwrap_or(name)
                .trim_start_matches('/');
            if rest.contains('/') {
                return false;
            }
        }
        self.name_re.as_ref().is_none_or(|re| re.is_match(name))
    }
}
