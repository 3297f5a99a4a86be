//! # pg-tail
//!
//! A tail reader for PostgreSQL logical replication slots. pg-tail
//! attaches to a named slot emitting the textual `test_decoding` change
//! stream, decodes each committed row change into a structured
//! [`ReplicationOperation`], and delivers operations to a bounded channel
//! in commit order. A periodic standby status loop reports received and
//! applied positions so the server can advance the slot and recycle WAL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pg_tail::{Config, LogicalReceiver, Result};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!
//!     let mut receiver = LogicalReceiver::open(
//!         &config.postgres_url(),
//!         &config.replication.slot_name,
//!         &config.replication.plugin,
//!         &config.replication.plugin_options,
//!     )
//!     .await?;
//!
//!     let (tx, mut rx) = mpsc::channel(config.replication.channel_capacity);
//!     let cancel = CancellationToken::new();
//!
//!     tokio::spawn(async move {
//!         while let Some(op) = rx.recv().await {
//!             println!("{} {} {}", op.position, op.operation, op.target);
//!         }
//!     });
//!
//!     receiver.run(cancel, tx).await?;
//!     receiver.close().await
//! }
//! ```
//!
//! ## Operations
//!
//! The `test_decoding` plugin emits one message per transaction control
//! point or row change:
//!
//! ```text
//! BEGIN 553
//! table public.contents: INSERT: id[integer]:1 value[text]:'a'
//! table public.contents: UPDATE: old-key: id[integer]:1 new-tuple: id[integer]:11 value[text]:'m'
//! table public.contents: DELETE: id[integer]:11
//! COMMIT 553
//! ```
//!
//! Each message becomes one [`ReplicationOperation`]: transaction id or
//! fully-qualified table name in `target`, and the pre- and post-image
//! column/value lists in server order. Values keep their on-the-wire
//! textual form; interpreting them is left to the consumer. Operations
//! arrive strictly in commit order, so a consumer can group rows by the
//! surrounding `BEGIN`/`COMMIT` pair to reconstitute transactions.
//!
//! ## PostgreSQL Setup
//!
//! 1. Enable logical replication in `postgresql.conf`:
//!    ```ini
//!    wal_level = logical
//!    max_replication_slots = 4
//!    max_wal_senders = 4
//!    ```
//!
//! 2. Create a slot using the `test_decoding` plugin:
//!    ```sql
//!    SELECT pg_create_logical_replication_slot('pg_tail_slot', 'test_decoding');
//!    ```
//!
//! ## Architecture
//!
//! - [`postgres::scan`] - zero-copy scanners for identifiers, constants,
//!   and type tokens
//! - [`postgres::decoder`] - the output plugin registry and the
//!   `test_decoding` decoder
//! - [`postgres::receiver`] - the replication connection, receive loop,
//!   and standby status feedback
//! - [`config`] - environment-variable configuration for the binary
//! - [`error`] - error types and handling

/// Configuration structures and environment variable parsing
pub mod config;

/// Error types and result handling
pub mod error;

/// PostgreSQL logical replication connection, decoding, and scanning
pub mod postgres;

pub use config::Config;
pub use error::{Error, Result};
pub use postgres::{AckHandle, LogicalReceiver, ReplicationOperation};
