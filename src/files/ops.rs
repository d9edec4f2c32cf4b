//! Read, write, delete and search, in the order: fetch, evaluate
//! preconditions, merge, persist.

use super::conditional::{check_delete, check_read, check_write, Preconditions, ReadDecision, WriteDecision};
use super::finder::Finder;
use super::index::Repository;
use super::merge::merge;
use super::schema::{Candidate, File};
use crate::error::{FileError, Result};
use chrono::{DateTime, Utc};
use tracing::info;

#[derive(Debug)]
pub enum ReadOutcome {
    /// Full body and metadata.
    Full(File),
    /// Cache hit: only validation metadata should be sent.
    NotModified(File),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub decision: WriteDecision,
    pub etag: String,
    pub modified: DateTime<Utc>,
}

pub fn read<R: Repository + ?Sized>(repo: &mut R, name: &str, pre: &Preconditions) -> Result<ReadOutcome> {
    let file = repo.fetch(name)?;
    Ok(match check_read(pre, &file) {
        ReadDecision::Full => ReadOutcome::Full(file),
        ReadDecision::NotModified => ReadOutcome::NotModified(file),
    })
}

pub fn write<R: Repository + ?Sized>(repo: &mut R, candidate: Candidate, pre: &Preconditions) -> Result<WriteOutcome> {
    let prior = match repo.fetch(&candidate.name) {
        Ok(file) => Some(file),
        Err(FileError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let decision = check_write(pre, prior.as_ref())?;
    let file = merge(candidate, prior.as_ref());
    match decision {
        WriteDecision::Create => repo.create(&file)?,
        WriteDecision::Update => repo.update(&file)?,
    }
    info!(name = %file.name, size = file.len(), ?decision, "file written");

    Ok(WriteOutcome { decision, etag: file.etag, modified: file.modified })
}

pub fn delete<R: Repository + ?Sized>(repo: &mut R, name: &str, pre: &Preconditions) -> Result<()> {
    let file = repo.fetch(name)?;
    check_delete(pre, &file)?;
    repo.delete(name)?;
    info!(name, "file deleted");
    Ok(())
}

/// Run a search; zero results is reported as `NoMatches`.
pub fn search<R: Repository + ?Sized>(repo: &mut R, finder: &Finder) -> Result<Vec<String>> {
    let names = finder.run(repo)?;
    if names.is_empty() {
        return Err(FileError::NoMatches);
    }
    Ok(names)
}
