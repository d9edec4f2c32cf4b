use super::predicate::Predicate;
use super::schema::{Column, File, MetaField, Metadata, COLUMNS, CORE_COLUMNS, KEY_COLUMN};
use crate::error::{FileError, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Current schema version recorded in `Meta`.
pub const SCHEMA_VERSION: i64 = 0;

/// Persistence contract used by the file operations and the finder.
pub trait Repository {
    /// Fetch a file by name; `NotFound` when absent.
    fn fetch(&mut self, name: &str) -> Result<File>;
    fn create(&mut self, file: &File) -> Result<()>;
    fn update(&mut self, file: &File) -> Result<()>;
    /// Absence is not an error.
    fn delete(&mut self, name: &str) -> Result<()>;
    fn find_names(&mut self, predicate: &Predicate) -> Result<Vec<String>>;
}

/// Handle to the SQLite file store. Cheap to clone; connections are opened
/// per [`Session`].
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let store = Self { path };
        let conn = store
            .connect()
            .with_context(|| format!("Failed to open {}", store.path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        Self::init_schema(&conn).context("Failed to init file schema")?;

        let current = read_meta(&conn, "schema_version")?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1);
        if current < SCHEMA_VERSION {
            write_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
            info!(from = current, to = SCHEMA_VERSION, "schema version recorded");
        }
        Ok(store)
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS Meta (
                key     TEXT PRIMARY KEY NOT NULL,
                value   TEXT
            );

            CREATE TABLE IF NOT EXISTS Files (
                {}
            );

            CREATE VIEW IF NOT EXISTS FindView AS
            SELECT
                name,
                mime,
                encoding,
                length(content)     AS size,
                unixepoch(modified) AS modified,
                tag,
                tag2,
                tag3
            FROM Files;",
            COLUMNS.iter().map(column_ddl).collect::<Vec<_>>().join(",\n                ")
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a request-scoped session.
    pub fn session(&self) -> Session<'_> {
        Session { store: self, conn: None }
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        Ok(read_meta(&conn, key)?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        Ok(write_meta(&conn, key, value)?)
    }

    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .get_meta("schema_version")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(-1))
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

fn column_ddl(c: &Column) -> String {
    let mut ddl = format!("{} {}", c.column, c.sql_type);
    if c.column == KEY_COLUMN {
        ddl.push_str(" PRIMARY KEY");
    }
    if !c.nullable {
        ddl.push_str(" NOT NULL");
    }
    ddl
}

fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM Meta WHERE key = ?1", params![key], |row| {
        row.get::<_, Option<String>>(0)
    })
    .optional()
    .map(Option::flatten)
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO Meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Request-scoped access to the store. The connection is opened on first use
/// and closed when the session is dropped.
pub struct Session<'a> {
    store: &'a Store,
    conn: Option<Connection>,
}

impl Session<'_> {
    fn conn(&mut self) -> Result<&Connection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                debug!(path = %self.store.path.display(), "opening connection");
                self.store.connect().map_err(|e| {
                    error!("failed to open store: {e}");
                    FileError::from(e)
                })?
            }
        };
        Ok(&*self.conn.insert(conn))
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            debug!("connection released");
        }
    }
}

fn select_sql() -> String {
    let names: Vec<&str> = COLUMNS.iter().map(|c| c.column).collect();
    format!("SELECT {} FROM Files WHERE {KEY_COLUMN} = ?1", names.join(", "))
}

fn insert_sql() -> String {
    let names: Vec<&str> = COLUMNS.iter().map(|c| c.column).collect();
    let slots: Vec<String> = (1..=COLUMNS.len()).map(|i| format!("?{i}")).collect();
    format!("INSERT INTO Files ({}) VALUES ({})", names.join(", "), slots.join(", "))
}

fn update_sql() -> String {
    let assignments: Vec<String> = COLUMNS
        .iter()
        .enumerate()
        .filter(|(_, c)| c.column != KEY_COLUMN)
        .map(|(i, c)| format!("{} = ?{}", c.column, i + 1))
        .collect();
    format!("UPDATE Files SET {} WHERE {KEY_COLUMN} = ?1", assignments.join(", "))
}

/// Parameters in [`COLUMNS`] order.
fn row_values(file: &File) -> Vec<Value> {
    let mut values = vec![
        Value::Text(file.name.clone()),
        Value::Blob(file.content.clone()),
        Value::Text(file.etag.clone()),
        Value::Text(file.modified_string()),
    ];
    values.extend(
        file.meta
            .iter()
            .map(|(_, v)| v.map_or(Value::Null, |v| Value::Text(v.to_string()))),
    );
    values
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<File> {
    let modified: String = row.get(3)?;
    let modified = DateTime::parse_from_rfc3339(&modified)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let mut meta = Metadata::default();
    for field in MetaField::ALL {
        meta.set(field, row.get(CORE_COLUMNS + field as usize)?);
    }

    Ok(File {
        name: row.get(0)?,
        content: row.get(1)?,
        etag: row.get(2)?,
        modified,
        meta,
    })
}

impl Repository for Session<'_> {
    fn fetch(&mut self, name: &str) -> Result<File> {
        let conn = self.conn()?;
        let file = conn
            .query_row(&select_sql(), params![name], row_to_file)
            .optional()?;
        debug!(name, found = file.is_some(), "fetch");
        file.ok_or_else(|| FileError::NotFound(name.to_string()))
    }

    fn create(&mut self, file: &File) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(&insert_sql(), params_from_iter(row_values(file)))?;
        debug!(name = %file.name, size = file.len(), "created");
        Ok(())
    }

    fn update(&mut self, file: &File) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(&update_sql(), params_from_iter(row_values(file)))?;
        if changed == 0 {
            warn!(name = %file.name, "update hit no row");
            return Err(FileError::NotFound(file.name.clone()));
        }
        debug!(name = %file.name, size = file.len(), "updated");
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM Files WHERE name = ?1", params![name])?;
        debug!(name, removed, "delete");
        Ok(())
    }

    fn find_names(&mut self, predicate: &Predicate) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let (sql, values) = predicate.to_sql();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::predicate::{Clause, Op};
    use crate::files::schema::{version_tag, Candidate, FieldValue};
    use crate::files::merge::merge;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("db").join("ugor.sqlite3")).unwrap();
        (dir, store)
    }

    fn file(name: &str, content: &[u8]) -> File {
        let c = Candidate::new(name, content.to_vec())
            .unwrap()
            .with(MetaField::Tag, FieldValue::Set("Griffin".into()));
        merge(c, None)
    }

    #[test]
    fn statements_follow_descriptor() {
        assert_eq!(
            insert_sql(),
            "INSERT INTO Files (name, content, etag, modified, mime, encoding, description, tag, tag2, tag3, data, data2, data3, data4, data5) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        );
        assert!(update_sql().starts_with("UPDATE Files SET content = ?2, etag = ?3"));
        assert!(update_sql().ends_with("data5 = ?15 WHERE name = ?1"));
        assert_eq!(column_ddl(&COLUMNS[0]), "name TEXT PRIMARY KEY NOT NULL");
        assert_eq!(column_ddl(&COLUMNS[4]), "mime TEXT");
    }

    #[test]
    fn open_records_schema_version() {
        let (_dir, store) = store();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        store.set_meta("note", "hi").unwrap();
        assert_eq!(store.get_meta("note").unwrap().as_deref(), Some("hi"));
        assert_eq!(store.get_meta("missing").unwrap(), None);
        // Reopening keeps the existing schema.
        Store::open(store.path()).unwrap();
    }

    #[test]
    fn create_fetch_update_delete() {
        let (_dir, store) = store();
        let mut session = store.session();

        let original = file("a.txt", b"Lorem Ipsum");
        session.create(&original).unwrap();
        let fetched = session.fetch("a.txt").unwrap();
        assert_eq!(fetched, original);

        let mut changed = file("a.txt", b"Lorem Ipsum 2");
        changed.meta.set(MetaField::Tag, None);
        session.update(&changed).unwrap();
        let fetched = session.fetch("a.txt").unwrap();
        assert_eq!(fetched.content, b"Lorem Ipsum 2");
        assert_eq!(fetched.etag, version_tag(b"Lorem Ipsum 2"));
        assert_eq!(fetched.get(MetaField::Tag), None);

        session.delete("a.txt").unwrap();
        assert!(matches!(session.fetch("a.txt"), Err(FileError::NotFound(_))));
        // Deleting again is fine.
        session.delete("a.txt").unwrap();
    }

    #[test]
    fn update_of_missing_row_is_not_found() {
        let (_dir, store) = store();
        let mut session = store.session();
        assert!(matches!(
            session.update(&file("ghost", b"x")),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_create_is_unclassified() {
        let (_dir, store) = store();
        let mut session = store.session();
        session.create(&file("a", b"x")).unwrap();
        assert!(matches!(session.create(&file("a", b"y")), Err(FileError::Storage(_))));
    }

    #[test]
    fn find_view_exposes_size_and_tags() {
        let (_dir, store) = store();
        let mut session = store.session();
        session.create(&file("children/meg.txt", b"Lorem Ipsum")).unwrap();
        session.create(&file("children/chris.txt", b"A longer body of text")).unwrap();
        session.create(&file("child.txt", b"x")).unwrap();

        let mut p = Predicate::default();
        p.push(Clause::new("size", Op::Gt, 11i64));
        assert_eq!(session.find_names(&p).unwrap(), vec!["children/chris.txt"]);

        let mut p = Predicate::default();
        p.push(Clause::new("name", Op::Under, "children".to_string()));
        p.push(Clause::new("tag", Op::InAny(&["tag", "tag2", "tag3"]), "Griffin".to_string()));
        assert_eq!(
            session.find_names(&p).unwrap(),
            vec!["children/chris.txt", "children/meg.txt"]
        );

        let mut p = Predicate::default();
        p.push(Clause::new("modified", Op::Gt, 0i64));
        assert_eq!(session.find_names(&p).unwrap().len(), 3);
    }

    #[test]
    fn sessions_are_independent() {
        let (_dir, store) = store();
        store.session().create(&file("a", b"x")).unwrap();
        assert!(store.session().fetch("a").is_ok());
    }
}
