//! Field and storage descriptors consumed by the storage engine.
//!
//! # Responsibility
//! - Describe what a form field is and how its value maps onto tables.
//! - Carry dynamic values between the form layer and storage.
//!
//! # Invariants
//! - Descriptors are immutable once built and carry no persistent identity.
//! - Dynamic table/column names are validated at construction time.

pub mod field;
pub mod ident;
pub mod storage;
pub mod value;
