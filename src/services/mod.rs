//! Core services: token derivation, the object namespace adapters and the
//! keyed repository built on top of them.

pub mod blob_repository;
pub mod object_store;
pub mod remote_store;
pub mod storage_service;
pub mod token_service;
