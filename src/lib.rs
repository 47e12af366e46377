//! # finder
//!
//! Keeps a full-text search index in step with a document store.
//!
//! finder watches the `compendia` and `jobs` collections of the primary
//! store, reshapes every inserted or updated document into an index
//! document, and writes it to Elasticsearch. Compendium documents are
//! enriched with the file tree of their storage directory and the content
//! of every text file in it, so a search can hit the files themselves.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ ChangeSource │──▶│ SyncEngine  │──▶│ SearchBackend│
//! │ feed/channel │   │ Transformer │   │ Elasticsearch│
//! └──────────────┘   └──────┬──────┘   └──────┬───────┘
//!                           │                 │
//!                           ▼                 ▼
//!                    ┌──────────────┐   ┌──────────┐
//!                    │ TransformLog │──▶│  /status │
//!                    └──────────────┘   └──────────┘
//! ```
//!
//! At startup the index is bootstrapped (deleted, created, mapped), then a
//! retry gate waits for the backend before the engine starts syncing.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents, change events, log entries |
//! | [`tree`] | File tree and text extraction for compendia |
//! | [`transform`] | Document transformers |
//! | [`transform_log`] | Bounded log of recent transform outcomes |
//! | [`backend`] | Search backend abstraction (Elasticsearch, in-memory) |
//! | [`mapping`] | Index mapping |
//! | [`bootstrap`] | Startup index bootstrap |
//! | [`gate`] | Connect-with-retry gate |
//! | [`watchers`] | Collection watcher registry |
//! | [`changes`] | Change feeds |
//! | [`engine`] | Sync engine |
//! | [`auth`] | Status caller authentication |
//! | [`server`] | Status HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod auth;
pub mod backend;
pub mod bootstrap;
pub mod changes;
pub mod config;
pub mod engine;
pub mod gate;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod server;
pub mod transform;
pub mod transform_log;
pub mod tree;
pub mod watchers;
