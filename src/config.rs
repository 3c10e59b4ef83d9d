use anyhow::{anyhow, Result};
use config::Config;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::database::{ConnectionIdentity, PoolOptions};
use crate::pipeline::{DocumentSettings, RelationalSettings};
use crate::schema::TableOptions;

/// Relational destination section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelationalConf {
    /// Path to the relational database file
    pub database: String,
    /// Table defaults for rendered MySQL DDL (`Dialect::Mysql`).
    /// The SQLite store ignores them.
    pub engine: String,
    pub charset: String,
    pub collate: String,
    /// Update the conflicting row on a key conflict
    pub upsert: bool,
    /// Fail instead of skipping on a key conflict
    pub strict: bool,
}

impl Default for RelationalConf {
    fn default() -> Self {
        let table = TableOptions::default();
        Self {
            database: String::new(),
            engine: table.engine,
            charset: table.charset,
            collate: table.collate,
            upsert: false,
            strict: false,
        }
    }
}

/// Document destination section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DocumentConf {
    /// Path to the document database file
    pub database: String,
    pub collection_prefix: String,
}

/// Pool section, shared by both destinations
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConf {
    pub max_size: u32,
    pub min_idle: u32,
    pub recycle_secs: u64,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub busy_timeout_ms: u64,
}

impl Default for PoolConf {
    fn default() -> Self {
        let pool = PoolOptions::default();
        Self {
            max_size: pool.max_size,
            min_idle: pool.min_idle,
            recycle_secs: pool.recycle.as_secs(),
            idle_timeout_secs: pool.idle_timeout.as_secs(),
            connect_timeout_secs: pool.connect_timeout.as_secs(),
            busy_timeout_ms: pool.busy_timeout.as_millis() as u64,
        }
    }
}

impl PoolConf {
    pub fn options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.max_size,
            min_idle: self.min_idle,
            recycle: Duration::from_secs(self.recycle_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub relational: RelationalConf,
    pub document: DocumentConf,
    pub pool: PoolConf,
}

const EMPTY_CONFIG: &str = r#"### scrapesink configuration file

[relational]
### path to the relational database file
# database = "~/.scrapesink/items.sqlite3"
### table defaults used when rendering MySQL DDL; the SQLite store ignores them
# engine = "InnoDB"
# charset = "utf8mb4"
# collate = "utf8mb4_general_ci"
### update the conflicting row on a key conflict instead of skipping
# upsert = false
### fail on a key conflict instead of skipping
# strict = false

[document]
### path to the document database file
# database = "~/.scrapesink/documents.sqlite3"
# collection_prefix = ""

[pool]
# max_size = 8
# min_idle = 1
# recycle_secs = 25200          # 7 hours
# idle_timeout_secs = 600
# connect_timeout_secs = 30
# busy_timeout_ms = 5000
"#;

impl PipelineConfig {
    /// Load the configuration
    ///
    /// Reads the TOML file at `path`, or `$HOME/.scrapesink/scrapesink.toml`
    /// when `path` is `None`, writing a commented template if the file does
    /// not exist yet. Environment variables prefixed with `SCRAPESINK`
    /// override file values, e.g. `SCRAPESINK_RELATIONAL__DATABASE`. A `.env`
    /// file in the working directory is loaded first.
    pub fn new(path: &Option<String>) -> Result<PipelineConfig> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();

        let config_path = match path {
            Some(p) => p.clone(),
            None => {
                let dir = Self::default_dir()?;
                std::fs::create_dir_all(dir.as_str())
                    .map_err(|e| anyhow!("Unable to create scrapesink directory: {}", e))?;
                format!("{}/scrapesink.toml", dir)
            }
        };

        if Path::new(config_path.as_str()).exists() {
            builder = builder.add_source(config::File::with_name(config_path.as_str()));
        } else {
            std::fs::write(config_path.as_str(), EMPTY_CONFIG).map_err(|e| {
                anyhow!("Unable to create config file {}: {}", config_path.as_str(), e)
            })?;
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SCRAPESINK")
                .prefix_separator("_")
                .separator("__"),
        );

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let mut config = settings
            .try_deserialize::<PipelineConfig>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let data_dir = Self::default_dir()?;
        if config.relational.database.is_empty() {
            config.relational.database = format!("{}/items.sqlite3", data_dir);
        }
        if config.document.database.is_empty() {
            config.document.database = format!("{}/documents.sqlite3", data_dir);
        }
        config.relational.database = expand_home(&config.relational.database);
        config.document.database = expand_home(&config.document.database);

        Ok(config)
    }

    /// `$HOME/.scrapesink`
    fn default_dir() -> Result<String> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();
        Ok(format!("{}/.scrapesink", home_dir))
    }

    pub fn relational_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::sqlite(&self.relational.database)
    }

    pub fn document_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::sqlite(&self.document.database)
    }

    /// Settings for a `RelationalWriter`
    pub fn relational_settings(&self) -> RelationalSettings {
        RelationalSettings {
            identity: self.relational_identity(),
            pool: self.pool.options(),
            table: TableOptions {
                engine: self.relational.engine.clone(),
                charset: self.relational.charset.clone(),
                collate: self.relational.collate.clone(),
            },
            upsert: self.relational.upsert,
            strict: self.relational.strict,
        }
    }

    /// Settings for a `DocumentWriter`
    pub fn document_settings(&self) -> DocumentSettings {
        DocumentSettings {
            identity: self.document_identity(),
            pool: self.pool.options(),
            collection_prefix: self.document.collection_prefix.clone(),
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Relational Database: {}", self.relational.database),
            format!(
                "Table Defaults:      ENGINE={} CHARSET={} COLLATE={}",
                self.relational.engine, self.relational.charset, self.relational.collate
            ),
            format!(
                "Key Conflicts:       {}",
                match (self.relational.upsert, self.relational.strict) {
                    (true, _) => "update",
                    (false, true) => "fail",
                    (false, false) => "skip",
                }
            ),
            format!("Document Database:   {}", self.document.database),
            format!("Collection Prefix:   {:?}", self.document.collection_prefix),
            format!(
                "Pool:                max {} / min idle {}, recycle after {} seconds",
                self.pool.max_size, self.pool.min_idle, self.pool.recycle_secs
            ),
        ]
        .join("\n")
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.relational.engine, "InnoDB");
        assert_eq!(config.relational.charset, "utf8mb4");
        assert_eq!(config.pool.recycle_secs, 7 * 3600);
        assert_eq!(config.pool.options(), PoolOptions::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scrapesink.toml");
        std::fs::write(
            &path,
            r#"
            [relational]
            database = "/data/items.db"
            upsert = true

            [document]
            database = "/data/docs.db"
            collection_prefix = "crawl_"

            [pool]
            max_size = 4
            "#,
        )
        .unwrap();

        let config = PipelineConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.relational.database, "/data/items.db");
        assert!(config.relational.upsert);
        assert_eq!(config.relational.collate, "utf8mb4_general_ci");
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.min_idle, 1);

        let relational = config.relational_settings();
        assert_eq!(relational.identity.as_str(), "sqlite:///data/items.db");
        assert!(relational.upsert);

        let document = config.document_settings();
        assert_eq!(document.collection_prefix, "crawl_");
        assert_eq!(document.pool.max_size, 4);
    }

    #[test]
    fn test_table_defaults_reach_mysql_ddl() {
        use crate::item::{Record, TableDescriptor};
        use crate::schema::{reconcile, Dialect};

        let config = PipelineConfig {
            relational: RelationalConf {
                engine: "MyISAM".to_string(),
                charset: "latin1".to_string(),
                collate: "latin1_swedish_ci".to_string(),
                ..RelationalConf::default()
            },
            ..PipelineConfig::default()
        };
        let settings = config.relational_settings();

        let mut record = Record::new();
        record.insert("title", serde_json::json!("hi"));
        let change = reconcile(&record, &TableDescriptor::named("posts"), None, false).unwrap();

        let mysql = Dialect::Mysql.render_change(&change, &settings.table).join("\n");
        assert!(mysql.contains("ENGINE=MyISAM DEFAULT CHARSET=latin1 COLLATE=latin1_swedish_ci"));

        let sqlite = Dialect::Sqlite.render_change(&change, &settings.table).join("\n");
        assert!(!sqlite.contains("MyISAM"));
    }

    #[test]
    fn test_missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.toml");

        let config = PipelineConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert!(path.exists());
        assert!(!config.relational.database.is_empty());
        assert!(config.summary().contains("Key Conflicts:       skip"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/x.db"),
                home.join("x.db").to_string_lossy().to_string()
            );
        }
    }
}
