//! SQLite source implementation
//!
//! Rows are read in pages with keyset pagination:
//! `SELECT .. FROM (<base>) AS src WHERE id > ?1 ORDER BY id LIMIT n`.
//! No statement stays open between fetches. Tables are paged on
//! `(id, rowid)` so repeated ids survive page boundaries. Views and
//! `sql` statements have no rowid; an id repeating across a page boundary
//! there is reported as a query error.

use std::collections::VecDeque;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};

use crate::config::ReaderConfig;
use crate::{Error, Result};
use super::framework::{DocumentSource, RawDocument};

/// Column the table rowid is exposed under inside the base query
const ROW_KEY: &str = "\"_reader_row\"";

/// Relational backend over a single SQLite connection
pub struct SqlSource {
    conn: Option<Connection>,
    base: String,
    id_column: String,
    text_expr: String,
    language_expr: String,
    /// Whether the base query exposes `ROW_KEY`
    tiebreak: bool,
    batch_size: u64,
    max_items: Option<u64>,
    /// Documents still allowed by `max_items`
    budget: Option<u64>,
    /// Resume position from the configuration
    start: Option<Value>,
    /// Id of the last row fetched
    after: Option<Value>,
    /// Rowid of the last row fetched, when paging on `(id, rowid)`
    after_row: Option<i64>,
    /// Rows at the end of the last full page sharing its last id
    tail_run: u64,
    page: VecDeque<RawDocument>,
    done: bool,
}

impl SqlSource {
    /// Open the database named by `config.uri` read-only
    pub fn open(config: &ReaderConfig) -> Result<Self> {
        let path = database_path(&config.uri);
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| Error::Connection(format!("cannot open {}: {}", path, e)))?;
        tracing::info!("Connected to SQLite database {}", path);
        Self::with_connection(conn, config)
    }

    /// Wrap an already-open connection (used for tests and embedding)
    pub fn with_connection(conn: Connection, config: &ReaderConfig) -> Result<Self> {
        let tiebreak = match (&config.sql, &config.collection) {
            (None, Some(table)) => has_rowid(&conn, table)?,
            _ => false,
        };
        let base = base_query(config, tiebreak)?;

        let columns: Vec<String> = {
            let probe = format!("SELECT * FROM ({}) AS src LIMIT 0", base);
            let stmt = conn.prepare(&probe).map_err(classify_error)?;
            stmt.column_names().into_iter().map(String::from).collect()
        };
        let find = |field: &str| columns.iter().find(|c| c.eq_ignore_ascii_case(field)).cloned();

        let id_column = find(&config.id_field).ok_or_else(|| {
            Error::Mapping(format!(
                "id column `{}` not found (result columns: {})",
                config.id_field,
                columns.join(", ")
            ))
        })?;

        let text_expr = match find(&config.text_field) {
            Some(col) => quote_identifier(&col),
            None => {
                tracing::warn!("Text column `{}` not found; documents will have empty text", config.text_field);
                "NULL".to_string()
            }
        };

        // A literal override makes the per-row language irrelevant
        let language_expr = match (&config.language, &config.language_field) {
            (None, Some(field)) => match find(field) {
                Some(col) => quote_identifier(&col),
                None => {
                    tracing::warn!("Language column `{}` not found; documents will have no language", field);
                    "NULL".to_string()
                }
            },
            _ => "NULL".to_string(),
        };

        let start = config.resume_after.as_deref().map(resume_value);
        tracing::debug!("SQL base query: {}", base);

        Ok(Self {
            conn: Some(conn),
            base,
            id_column: quote_identifier(&id_column),
            text_expr,
            language_expr,
            tiebreak,
            batch_size: u64::from(config.batch_size.max(1)),
            max_items: config.max_items,
            budget: config.max_items,
            after: start.clone(),
            after_row: None,
            tail_run: 0,
            start,
            page: VecDeque::new(),
            done: false,
        })
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| Error::Query("source is closed".into()))
    }

    fn page_sql(&self, limit: u64) -> String {
        let id = &self.id_column;
        let row_key = if self.tiebreak { format!(", {}", ROW_KEY) } else { String::new() };
        let mut sql = format!(
            "SELECT {id}, {text}, {lang}{row_key} FROM ({base}) AS src",
            text = self.text_expr,
            lang = self.language_expr,
            base = self.base,
        );
        if self.after.is_some() {
            // NULL ids sort first; once past them every non-NULL id qualifies
            let tie = match self.after_row {
                Some(_) => format!(" OR ({id} IS ?1 AND {ROW_KEY} > ?2)"),
                None => String::new(),
            };
            sql.push_str(&format!(
                " WHERE ({id} > ?1{tie} OR (?1 IS NULL AND {id} IS NOT NULL))"
            ));
        }
        sql.push_str(&format!(" ORDER BY {id}{row_key} LIMIT {limit}"));
        sql
    }

    fn page_params(&self) -> Vec<Value> {
        let mut params: Vec<Value> = self.after.iter().cloned().collect();
        if let (Some(_), Some(row)) = (&self.after, self.after_row) {
            params.push(Value::Integer(row));
        }
        params
    }

    /// Fail when rows sharing the last id of the previous page were cut off
    fn check_page_boundary(&self) -> Result<()> {
        let Some(after) = self.after.as_ref().filter(|_| !self.tiebreak && self.tail_run > 0) else {
            return Ok(());
        };
        let sql = format!("SELECT COUNT(*) FROM ({}) AS src WHERE {} IS ?1", self.base, self.id_column);
        let total: i64 = self
            .connection()?
            .query_row(&sql, [after], |row| row.get(0))
            .map_err(classify_error)?;
        if total.max(0) as u64 > self.tail_run {
            return Err(Error::Query(format!(
                "id {} is shared by {} rows across a page boundary; ids must be unique when reading a view or `sql` statement",
                value_to_string(after.into()).unwrap_or_else(|| "NULL".to_string()),
                total
            )));
        }
        Ok(())
    }

    /// Load the next page into the buffer
    fn fetch_page(&mut self) -> Result<()> {
        let limit = match self.budget {
            Some(0) => {
                self.done = true;
                return Ok(());
            }
            Some(budget) => budget.min(self.batch_size),
            None => self.batch_size,
        };
        self.check_page_boundary()?;

        let sql = self.page_sql(limit);
        let params = self.page_params();
        let conn = self.conn.as_ref().ok_or_else(|| Error::Query("source is closed".into()))?;
        let mut stmt = conn.prepare(&sql).map_err(classify_error)?;
        let mut rows = stmt.query(params_from_iter(params)).map_err(classify_error)?;

        let mut fetched = 0u64;
        let mut last: Option<Value> = None;
        let mut last_row = None;
        let mut run = 0u64;
        while let Some(row) = rows.next().map_err(classify_error)? {
            let id = row.get_ref(0).map_err(classify_error)?;
            let text = row.get_ref(1).map_err(classify_error)?;
            let language = row.get_ref(2).map_err(classify_error)?;
            if self.tiebreak {
                last_row = Some(row.get::<_, i64>(3).map_err(classify_error)?);
            }

            self.page.push_back(RawDocument::new(
                value_to_string(id),
                value_to_string(text),
                value_to_string(language),
            ));
            let id = Value::from(id);
            run = if last.as_ref() == Some(&id) { run + 1 } else { 1 };
            last = Some(id);
            fetched += 1;
        }

        tracing::debug!("Fetched page of {} rows (limit {})", fetched, limit);

        if fetched < limit {
            self.done = true;
        }
        if let Some(budget) = self.budget.as_mut() {
            *budget = budget.saturating_sub(fetched);
        }
        if last.is_some() {
            self.after = last;
            self.after_row = last_row;
            self.tail_run = run;
        }
        Ok(())
    }
}

impl DocumentSource for SqlSource {
    fn backend_name(&self) -> &str {
        "sql"
    }

    fn count(&mut self) -> Result<u64> {
        let conn = self.connection()?;
        let mut sql = format!("SELECT COUNT(*) FROM ({}) AS src", self.base);
        if self.start.is_some() {
            sql.push_str(&format!(" WHERE {} > ?1", self.id_column));
        }
        let count: i64 = conn
            .query_row(&sql, params_from_iter(self.start.iter()), |row| row.get(0))
            .map_err(classify_error)?;
        let count = count.max(0) as u64;
        Ok(self.max_items.map_or(count, |max| count.min(max)))
    }

    fn fetch(&mut self) -> Result<Option<RawDocument>> {
        if self.page.is_empty() && !self.done {
            self.fetch_page()?;
        }
        Ok(self.page.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.page.clear();
        self.done = true;
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| classify_error(e))?;
            tracing::info!("SQLite connection closed");
        }
        Ok(())
    }
}

/// Strip an optional `sqlite://` / `sqlite:` scheme
fn database_path(uri: &str) -> &str {
    uri.strip_prefix("sqlite://")
        .or_else(|| uri.strip_prefix("sqlite:"))
        .unwrap_or(uri)
}

/// Whether `table` is an ordinary rowid table
fn has_rowid(conn: &Connection, table: &str) -> Result<bool> {
    let kind: Option<String> = conn
        .query_row("SELECT type FROM sqlite_master WHERE name = ?1 COLLATE NOCASE", [table], |row| row.get(0))
        .optional()
        .map_err(classify_error)?;
    if kind.as_deref() != Some("table") {
        return Ok(false);
    }
    // WITHOUT ROWID tables reject the column
    Ok(conn
        .prepare(&format!("SELECT rowid FROM {} LIMIT 0", quote_identifier(table)))
        .is_ok())
}

fn base_query(config: &ReaderConfig, tiebreak: bool) -> Result<String> {
    if let Some(sql) = &config.sql {
        return Ok(sql.trim().trim_end_matches(';').to_string());
    }
    let table = config
        .collection
        .as_deref()
        .ok_or_else(|| Error::Config("sql backend requires `collection` or `sql`".into()))?;
    let mut sql = if tiebreak {
        format!("SELECT rowid AS {}, * FROM {}", ROW_KEY, quote_identifier(table))
    } else {
        format!("SELECT * FROM {}", quote_identifier(table))
    };
    if let Some(filter) = config.query.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    Ok(sql)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Integer-looking resume positions compare numerically
fn resume_value(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map(Value::Integer)
        .unwrap_or_else(|_| Value::Text(raw.to_string()))
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(format!("{:?}", f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Split driver failures into connection and query problems
fn classify_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::PermissionDenied
                    | ErrorCode::DatabaseCorrupt
                    | ErrorCode::SystemIoFailure
            ) =>
        {
            Error::Connection(err.to_string())
        }
        _ => Error::Query(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use rusqlite::params;

    fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE docs (
                doc_id INTEGER PRIMARY KEY,
                body TEXT,
                lang TEXT,
                status TEXT NOT NULL
            );
            "#,
        )
        .unwrap();
        // Inserted out of id order on purpose
        for (id, body, lang, status) in [
            (4, Some("four"), Some("es"), "published"),
            (1, Some("one"), Some("en"), "published"),
            (5, None, Some("en"), "published"),
            (2, Some("two"), None, "draft"),
            (3, Some("three"), Some("ca"), "published"),
        ] {
            conn.execute(
                "INSERT INTO docs (doc_id, body, lang, status) VALUES (?1, ?2, ?3, ?4)",
                params![id, body, lang, status],
            )
            .unwrap();
        }
        conn
    }

    fn config() -> ReaderConfig {
        ReaderConfig {
            backend: BackendKind::Sql,
            uri: ":memory:".to_string(),
            collection: Some("docs".to_string()),
            id_field: "doc_id".to_string(),
            text_field: "body".to_string(),
            batch_size: 2,
            ..ReaderConfig::default()
        }
    }

    fn drain(source: &mut SqlSource) -> Vec<RawDocument> {
        let mut out = Vec::new();
        while let Some(doc) = source.fetch().unwrap() {
            out.push(doc);
        }
        out
    }

    fn ids(docs: &[RawDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id().unwrap()).collect()
    }

    #[test]
    fn test_pages_in_id_order() {
        let mut source = SqlSource::with_connection(seeded_connection(), &config()).unwrap();
        assert_eq!(source.count().unwrap(), 5);

        let docs = drain(&mut source);
        assert_eq!(ids(&docs), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(docs[0].text(), Some("one"));
        assert_eq!(docs[4].text(), None);
        // No language mapping configured
        assert!(docs.iter().all(|d| d.language().is_none()));
    }

    #[test]
    fn test_filter_and_max_items() {
        let config = ReaderConfig {
            query: Some("status = 'published'".to_string()),
            max_items: Some(3),
            ..config()
        };
        let mut source = SqlSource::with_connection(seeded_connection(), &config).unwrap();
        assert_eq!(source.count().unwrap(), 3);
        assert_eq!(ids(&drain(&mut source)), vec!["1", "3", "4"]);
    }

    #[test]
    fn test_language_column() {
        let config = ReaderConfig {
            language_field: Some("lang".to_string()),
            ..config()
        };
        let mut source = SqlSource::with_connection(seeded_connection(), &config).unwrap();
        let docs = drain(&mut source);
        assert_eq!(docs[0].language(), Some("en"));
        assert_eq!(docs[1].language(), None);
        assert_eq!(docs[2].language(), Some("ca"));
    }

    #[test]
    fn test_sql_statement() {
        let config = ReaderConfig {
            collection: None,
            sql: Some("SELECT doc_id, upper(body) AS body FROM docs WHERE doc_id > 2;".to_string()),
            ..config()
        };
        let mut source = SqlSource::with_connection(seeded_connection(), &config).unwrap();
        assert_eq!(source.count().unwrap(), 3);
        let docs = drain(&mut source);
        assert_eq!(ids(&docs), vec!["3", "4", "5"]);
        assert_eq!(docs[0].text(), Some("THREE"));
    }

    #[test]
    fn test_resume_after() {
        let config = ReaderConfig {
            resume_after: Some("3".to_string()),
            ..config()
        };
        let mut source = SqlSource::with_connection(seeded_connection(), &config).unwrap();
        assert_eq!(source.count().unwrap(), 2);
        assert_eq!(ids(&drain(&mut source)), vec!["4", "5"]);
    }

    #[test]
    fn test_missing_id_column_is_mapping_error() {
        let config = ReaderConfig {
            id_field: "uuid".to_string(),
            ..config()
        };
        let result = SqlSource::with_connection(seeded_connection(), &config);
        assert!(matches!(result, Err(Error::Mapping(_))));
    }

    #[test]
    fn test_missing_text_column_yields_no_text() {
        let config = ReaderConfig {
            text_field: "content".to_string(),
            ..config()
        };
        let mut source = SqlSource::with_connection(seeded_connection(), &config).unwrap();
        let docs = drain(&mut source);
        assert_eq!(docs.len(), 5);
        assert!(docs.iter().all(|d| d.text().is_none()));
    }

    #[test]
    fn test_malformed_filter_is_query_error() {
        let config = ReaderConfig {
            query: Some("status = = 'x'".to_string()),
            ..config()
        };
        let result = SqlSource::with_connection(seeded_connection(), &config);
        assert!(matches!(result, Err(Error::Query(_))));
    }

    #[test]
    fn test_blob_text_and_text_ids() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE xmi (name TEXT PRIMARY KEY, data BLOB)").unwrap();
        conn.execute("INSERT INTO xmi VALUES ('b', ?1)", params![b"<xmi>beta</xmi>".to_vec()]).unwrap();
        conn.execute("INSERT INTO xmi VALUES ('a', ?1)", params![b"<xmi>alpha</xmi>".to_vec()]).unwrap();

        let config = ReaderConfig {
            collection: Some("xmi".to_string()),
            id_field: "name".to_string(),
            text_field: "data".to_string(),
            ..config()
        };
        let mut source = SqlSource::with_connection(conn, &config).unwrap();
        let docs = drain(&mut source);
        assert_eq!(ids(&docs), vec!["a", "b"]);
        assert_eq!(docs[0].text(), Some("<xmi>alpha</xmi>"));
    }

    fn repeated_ids() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE d (doc_id INTEGER, body TEXT);
             INSERT INTO d VALUES (1, 'a'), (1, 'b'), (2, 'c');",
        )
        .unwrap();
        conn
    }

    fn texts(docs: &[RawDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.text().unwrap()).collect()
    }

    #[test]
    fn test_repeated_ids_span_pages() {
        let config = ReaderConfig {
            collection: Some("d".to_string()),
            batch_size: 1,
            ..config()
        };
        let mut source = SqlSource::with_connection(repeated_ids(), &config).unwrap();
        assert_eq!(source.count().unwrap(), 3);
        let docs = drain(&mut source);
        assert_eq!(texts(&docs), vec!["a", "b", "c"]);
        assert_eq!(ids(&docs), vec!["1", "1", "2"]);
    }

    #[test]
    fn test_repeated_ids_within_statement_page() {
        let config = ReaderConfig {
            collection: None,
            sql: Some("SELECT doc_id, body FROM d".to_string()),
            batch_size: 3,
            ..config()
        };
        let mut source = SqlSource::with_connection(repeated_ids(), &config).unwrap();
        assert_eq!(drain(&mut source).len(), 3);
    }

    #[test]
    fn test_repeated_id_across_statement_pages_is_query_error() {
        let config = ReaderConfig {
            collection: None,
            sql: Some("SELECT doc_id, body FROM d".to_string()),
            batch_size: 1,
            ..config()
        };
        let mut source = SqlSource::with_connection(repeated_ids(), &config).unwrap();
        assert_eq!(source.fetch().unwrap().unwrap().id(), Some("1"));
        assert!(matches!(source.fetch(), Err(Error::Query(_))));
    }

    #[test]
    fn test_null_id_page_does_not_end_stream() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE d (doc_id INTEGER, body TEXT);
             INSERT INTO d VALUES (2, 'b'), (NULL, 'n'), (1, 'a');",
        )
        .unwrap();
        let config = ReaderConfig {
            collection: Some("d".to_string()),
            batch_size: 1,
            ..config()
        };
        let mut source = SqlSource::with_connection(conn, &config).unwrap();
        let docs = drain(&mut source);
        assert_eq!(texts(&docs), vec!["n", "a", "b"]);
        assert_eq!(docs[0].id(), None);
    }

    #[test]
    fn test_real_ids_keep_fraction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE d (doc_id, body TEXT);
             INSERT INTO d VALUES (1, 'int'), (1.5, 'real'), (2.0, 'whole');",
        )
        .unwrap();
        let config = ReaderConfig {
            collection: Some("d".to_string()),
            ..config()
        };
        let mut source = SqlSource::with_connection(conn, &config).unwrap();
        assert_eq!(ids(&drain(&mut source)), vec!["1", "1.5", "2.0"]);
    }

    #[test]
    fn test_close_then_fetch_is_empty() {
        let mut source = SqlSource::with_connection(seeded_connection(), &config()).unwrap();
        assert!(source.fetch().unwrap().is_some());
        source.close().unwrap();
        source.close().unwrap();
        assert!(source.fetch().unwrap().is_none());
        assert!(source.count().is_err());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE docs (doc_id INTEGER PRIMARY KEY, body TEXT); INSERT INTO docs VALUES (1, 'x');")
                .unwrap();
        }
        let config = ReaderConfig {
            uri: format!("sqlite://{}", path.display()),
            ..config()
        };
        let mut source = SqlSource::open(&config).unwrap();
        assert_eq!(drain(&mut source).len(), 1);
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite:///tmp/a.db"), "/tmp/a.db");
        assert_eq!(database_path("sqlite:a.db"), "a.db");
        assert_eq!(database_path("a.db"), "a.db");
    }
}
