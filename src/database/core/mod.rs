//! Core database infrastructure
//!
//! - `ConnectionRegistry`: one pooled handle per destination identity
//! - `Deadline`: caller-supplied bound on checkout and statement execution
//! - `SchemaManager`: live schema introspection and the comment catalog

mod connection;
mod deadline;
mod schema;

pub use connection::{
    Checkout, ConnectionIdentity, ConnectionRegistry, PoolOptions, PooledConnection,
    DEFAULT_RECYCLE, SQLITE_SCHEME,
};
pub use deadline::{is_interrupted, Deadline, InterruptGuard};
pub use schema::{SchemaDefinitions, SchemaManager};
