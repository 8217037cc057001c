//! Query execution over the in-memory table

pub mod engine;
pub mod profile;
pub mod result;
pub mod rewrite;

pub use engine::{PolarsSqlEngine, QueryEngine, RELATION_NAME};
pub use profile::QueryProfile;
pub use result::QueryResult;
pub use rewrite::{rewrite, RewrittenQuery, ROW_MARKER};
