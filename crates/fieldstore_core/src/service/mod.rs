//! Use-case services over the repository contracts.
//!
//! # Responsibility
//! - Orchestrate table and translation repositories per field strategy.
//! - Keep form callers decoupled from physical storage layout.

pub mod field_storage_service;
