//! Row models for the local object store.
//!
//! These map the SQLite tables in `migrations/0001_init.sql` via
//! `sqlx::FromRow`. Payload bytes live on disk, not in these rows.

pub mod metadata;
pub mod object;
