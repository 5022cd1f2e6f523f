// Database module
// Relational metadata in SQLite, embedding vectors in the similarity index file

pub mod index;
pub mod sqlite;

pub use index::{IndexError, IndexOrigin, SimilarityIndex};
pub use sqlite::*;
