//! # pgdeck
//!
//! pgdeck is a command-line tool for exploring and managing a PostgreSQL schema.
//! Everything goes through one pooled, schema-aware data-access layer that leases
//! connections, applies the active schema and runs statements transactionally.
//!
//! ## Features
//!
//! - **Pooled access**: a bounded connection pool with RAII leases, warm-up and retry with
//!   linear backoff when a connection cannot be obtained
//! - **Schema switching**: the active schema is verified and applied to every leased connection
//! - **Introspection**: list, describe, preview, count and size tables, list schemas and
//!   foreign keys
//! - **Queries and transactions**: parameterized statements with dry-run rollback, and
//!   multi-statement scripts committed atomically
//! - **CSV export**: server-side `COPY` streamed to a file
//! - **User records**: validated CRUD over the `usuarios` table
//! - **Table browser**: a ratatui TUI with paging and column descriptions
//! - **Saved profiles**: AES-256-GCM encrypted passwords in `~/.pgdeck/profiles.json`
//!
//! ## Modules
//!
//! - `config`: layered settings and saved connection profiles
//! - `db`: connection pool, value codec and the `DatabaseManager`
//! - `output`: table and JSON rendering for command output
//! - `tui`: TUI rendering and interaction logic
//! - `users`: the `usuarios` entity

pub mod config;
pub mod db;
pub mod output;
pub mod tui;
pub mod users;

pub use config::Settings;
pub use db::{DatabaseManager, DbError, DbResult};
