//! File store: entity model, merge-on-update, precondition evaluation, the
//! SQLite repository and metadata search.

pub mod conditional;
pub mod finder;
pub mod index;
pub mod merge;
pub mod ops;
pub mod predicate;
pub mod schema;

pub use conditional::{Preconditions, TagSet, WriteDecision};
pub use finder::{FindParams, Finder};
pub use index::{Repository, Session, Store, SCHEMA_VERSION};
pub use ops::{ReadOutcome, WriteOutcome};
pub use schema::{Candidate, FieldValue, File, MetaField};
