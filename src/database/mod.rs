//! Database module
//!
//! This module provides all store access for scrapesink, organized into:
//!
//! - **core**: connection registry, deadlines, schema introspection
//! - **relational**: schema application and single-row writes to a table
//! - **document**: JSON documents in collections, with field-matched updates
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # ConnectionRegistry and pooled handles
//! │   ├── deadline    # Caller deadlines and statement interrupts
//! │   └── schema      # Live schema introspection and comment catalog
//! │
//! ├── relational      # Table repository
//! └── document        # Collection repository
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use scrapesink::database::{ConnectionIdentity, ConnectionRegistry, Deadline, PoolOptions};
//! use scrapesink::database::RelationalTable;
//!
//! let registry = ConnectionRegistry::new();
//! let identity = ConnectionIdentity::sqlite("/var/lib/crawl/items.db");
//! let pooled = registry.acquire(&identity, &PoolOptions::default())?;
//! let conn = pooled.get(&Deadline::none())?;
//!
//! let columns = RelationalTable::new(&conn, pooled.identity(), "posts").live_columns()?;
//! ```

pub mod core;
mod document;
mod relational;

pub use core::{
    Checkout, ConnectionIdentity, ConnectionRegistry, Deadline, PoolOptions, PooledConnection,
    SchemaDefinitions, SchemaManager, DEFAULT_RECYCLE,
};
pub use document::{DocumentCollection, StoredDocument};
pub use relational::RelationalTable;
