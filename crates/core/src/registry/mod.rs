//! Mirror registry: hosts, categories, reference directories and freshness records.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::*;
pub use store::*;
pub use types::*;
