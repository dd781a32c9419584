//! Use-case services layered over the repositories.
//!
//! # Responsibility
//! - Combine repository calls into transactional workflows.
//! - Stay backend-agnostic: every service runs through a `TransactionManager`.

pub mod ingest;
