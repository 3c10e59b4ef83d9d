#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! scrapesink - persistence stage for scraped items
//!
//! scrapesink takes items produced by a crawler and writes them to a
//! relational table or a document collection. Tables are created and widened
//! on demand from the fields an item carries, with per-field annotations kept
//! as column comments. Connections are pooled per destination and shared
//! across every writer in the process.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - **[`item`]**: Record model and shape normalization of incoming items
//! - **[`schema`]**: Column type inference, schema reconciliation and DDL rendering
//! - **[`database`]**: Connection registry, deadlines and the table/collection repositories
//! - **[`pipeline`]**: The relational and document writers behind [`ItemSink`]
//! - **[`config`]**: Configuration management
//! - **[`error`]**: The [`PipelineError`] type shared by all of the above
//!
//! # Quick Start
//!
//! ## Relational destination
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scrapesink::{AnnotatedValue, ConnectionRegistry, ItemInput, ItemSink, PipelineConfig, RelationalWriter, WriteOptions};
//! use serde_json::json;
//!
//! let config = PipelineConfig::new(&None)?;
//! let registry = Arc::new(ConnectionRegistry::new());
//! let writer = RelationalWriter::new(registry.clone(), config.relational_settings());
//!
//! let item = ItemInput::Annotated {
//!     table: "posts".to_string(),
//!     fields: vec![
//!         ("title".to_string(), AnnotatedValue::new(json!("Hello"), "post title")),
//!         ("views".to_string(), AnnotatedValue::new(10, "view count")),
//!     ],
//! };
//! let outcome = writer.write(item, None, &WriteOptions::default())?;
//! println!("{}", outcome);
//! ```
//!
//! ## Document destination with a dedup rule
//!
//! ```rust,ignore
//! use scrapesink::{DedupRule, DocumentWriter};
//!
//! let writer = DocumentWriter::new(registry.clone(), config.document_settings());
//! let rule = DedupRule::single("url", "_url");
//! let outcome = writer.write(item, Some(&rule), &WriteOptions::default())?;
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod schema;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{DocumentConf, PipelineConfig, PoolConf, RelationalConf};

// =============================================================================
// Errors
// =============================================================================

pub use error::{PipelineError, PipelineResult};

// =============================================================================
// Record model
// =============================================================================

pub use item::{
    normalize, AnnotatedValue, ChangeKind, DedupRule, FieldValue, ItemInput, Normalized, Record,
    SchemaChange, ShapeDiagnostic, SkipReason, StructuredItem, TableDescriptor, WriteOutcome,
};

// =============================================================================
// Schema
// =============================================================================

pub use schema::{case_collisions, reconcile, ColumnType, Dialect, InsertMode, TableOptions};

// =============================================================================
// Database
// =============================================================================

pub use database::{ConnectionIdentity, ConnectionRegistry, Deadline, PoolOptions, PooledConnection};

// =============================================================================
// Writers
// =============================================================================

pub use pipeline::{
    DocumentSettings, DocumentWriter, ItemSink, RelationalSettings, RelationalWriter, WriteOptions,
    WriteReport,
};
