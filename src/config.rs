use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost";
pub const DEFAULT_ID_FIELD: &str = "_id";
pub const DEFAULT_TEXT_FIELD: &str = "text";
pub const DEFAULT_BATCH_SIZE: u32 = 100;

static SQL_IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn sql_identifier() -> &'static Regex {
    SQL_IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

/// Which store a reader pulls from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sql,
    #[default]
    Mongo,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sql => "sql",
            BackendKind::Mongo => "mongo",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sql" | "sqlite" => Ok(BackendKind::Sql),
            "mongo" | "mongodb" => Ok(BackendKind::Mongo),
            other => Err(Error::Config(format!("unknown backend: {}", other))),
        }
    }
}

/// Which source fields feed the record's id, text and language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub id_field: String,
    pub text_field: String,
    pub language_field: Option<String>,
}

/// Reader configuration, validated once when a cursor is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Connection target: a MongoDB URI or an SQLite path / `sqlite://` URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Mongo database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Mongo collection or SQL table
    #[serde(default, alias = "table", skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Native filter: extended JSON for Mongo, a `WHERE` expression for SQL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Full SELECT statement (SQL only); replaces `collection` and `query`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    #[serde(default = "default_text_field")]
    pub text_field: String,

    /// Per-document language field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_field: Option<String>,

    /// Literal language applied to every record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Only read documents whose id sorts after this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_after: Option<String>,
}

fn default_uri() -> String {
    DEFAULT_MONGO_URI.to_string()
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_text_field() -> String {
    DEFAULT_TEXT_FIELD.to_string()
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            uri: default_uri(),
            database: None,
            collection: None,
            query: None,
            sql: None,
            id_field: default_id_field(),
            text_field: default_text_field(),
            language_field: None,
            language: None,
            max_items: None,
            batch_size: default_batch_size(),
            resume_after: None,
        }
    }
}

impl ReaderConfig {
    /// Starting point written by `init`
    pub fn template(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Mongo => Self {
                backend,
                database: Some("corpus".to_string()),
                collection: Some("documents".to_string()),
                query: Some("{}".to_string()),
                ..Self::default()
            },
            BackendKind::Sql => Self {
                backend,
                uri: "sqlite://corpus.db".to_string(),
                collection: Some("documents".to_string()),
                id_field: "id".to_string(),
                ..Self::default()
            },
        }
    }

    pub fn mapping(&self) -> FieldMapping {
        FieldMapping {
            id_field: self.id_field.clone(),
            text_field: self.text_field.clone(),
            language_field: self.language_field.clone(),
        }
    }

    /// Human-readable name of what is being read
    pub fn target(&self) -> String {
        match (self.backend, &self.database, &self.collection) {
            (BackendKind::Sql, _, _) if self.sql.is_some() => "<sql statement>".to_string(),
            (_, Some(db), Some(coll)) => format!("{}.{}", db, coll),
            (_, None, Some(coll)) => coll.clone(),
            _ => "<unset>".to_string(),
        }
    }

    /// Check the configuration before any connection is made
    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(Error::Config("uri must not be empty".into()));
        }
        if self.max_items == Some(0) {
            return Err(Error::Config("max_items must be at least 1 when set".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if let Some(lang) = &self.language {
            if lang.trim().is_empty() {
                return Err(Error::Config("language override must not be empty".into()));
            }
        }

        let mut fields = vec![("id_field", self.id_field.as_str()), ("text_field", self.text_field.as_str())];
        if let Some(lang) = &self.language_field {
            fields.push(("language_field", lang.as_str()));
        }

        match self.backend {
            BackendKind::Mongo => {
                if self.database.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Config("mongo backend requires `database`".into()));
                }
                if self.collection.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Config("mongo backend requires `collection`".into()));
                }
                if self.sql.is_some() {
                    return Err(Error::Config("`sql` is only valid for the sql backend".into()));
                }
                for (key, value) in fields {
                    if value.trim_start_matches('$').is_empty() {
                        return Err(Error::Config(format!("{} must not be empty", key)));
                    }
                }
            }
            BackendKind::Sql => {
                match (&self.sql, &self.collection) {
                    (Some(sql), _) if sql.trim().is_empty() => {
                        return Err(Error::Config("`sql` must not be empty".into()));
                    }
                    (Some(_), _) => {}
                    (None, Some(table)) => fields.push(("collection", table.as_str())),
                    (None, None) => {
                        return Err(Error::Config("sql backend requires `collection` or `sql`".into()));
                    }
                }
                for (key, value) in fields {
                    if !sql_identifier().is_match(value) {
                        return Err(Error::Config(format!("{} is not a valid SQL identifier: {:?}", key, value)));
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("reader.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<ReaderConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        anyhow::bail!("config not found at {} (run `collection-reader init` first)", path.display());
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ReaderConfig = toml::from_str(&contents)?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &ReaderConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
