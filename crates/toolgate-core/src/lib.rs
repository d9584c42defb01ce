//! # Toolgate Core
//!
//! Pure building blocks of the gateway: data models, effective-access
//! resolution, collection naming, the vector store trait with an in-memory
//! backend, result merging, chunking, and the embedding trait.
//!
//! This crate has no tokio, sqlx, network, or filesystem dependencies.
//! Connections, persistence, and concurrency live in the `toolgate` app
//! crate.

pub mod access;
pub mod chunk;
pub mod collection;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;
