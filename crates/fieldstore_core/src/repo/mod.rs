//! Data access collaborators used by field storage.
//!
//! # Responsibility
//! - Define the narrow table and translation contracts the engine consumes.
//! - Provide SQLite implementations of both.
//!
//! # Invariants
//! - Repositories return semantic errors in addition to transport errors.
//! - Repositories hold no state besides the borrowed connection and config.

pub mod table_repo;
pub mod translation_repo;
