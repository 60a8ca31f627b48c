// ABOUTME: Storage layer for folio: the single-writer SQLite engine and everything that reaches it.
// ABOUTME: Provides migrations, typed row operations, the request bridge, the change bus, and live queries.

pub mod actor;
pub mod live;
pub mod migrations;
pub mod repo;
pub mod sqlite;

pub use actor::{BridgeConfig, BridgeError, BridgeHandle, BridgeOwner};
pub use live::{HasUids, LiveOptions, LiveQuery, watch_bridge};
pub use migrations::{MIGRATIONS, Migration};
pub use sqlite::{Committed, Database, StoreError, Tx};
