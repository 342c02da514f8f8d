//! Task store engine library
//!
//! A persisted task graph with integrity checking and repair, a bounded
//! write queue, a revision-tagged query cache, search and id resolution,
//! and intent tracking synchronized with a Markdown checklist mirror.
//!
//! [`engine::TaskEngine`] is the entry point; the other modules are usable
//! on their own.

pub mod cache;
pub mod cli;
pub mod config;
pub mod consistency;
pub mod engine;
pub mod error;
pub mod logging;
pub mod queue;
pub mod resolver;
pub mod search;
pub mod store;
pub mod sync;
pub mod types;
pub mod version;
