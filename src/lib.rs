#![warn(missing_docs)]

//! # dm-rs
//!
//! A pure Rust async driver for the DM (Dameng) database. No vendor client
//! libraries are required: the frame protocol, handshake, authentication and
//! statement engine are implemented directly on top of Tokio.
//!
//! ## Features
//!
//! - **Async/await** - Built on Tokio
//! - **Encrypted login** - Diffie-Hellman key agreement with the server's cipher suite, optional TLS
//! - **Frame compression** - zlib or Snappy, negotiated at the handshake
//! - **High availability** - Endpoint groups, reconnect on failure, switch-back on recovery
//! - **Read/write split** - Reads distributed to a standby session
//! - **Result cache** - Process-wide cache validated against table timestamps
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dm_rs::{Connection, Value};
//!
//! #[tokio::main]
//! async fn main() -> dm_rs::Result<()> {
//!     let conn = Connection::connect("dm://SYSDBA:SYSDBA@localhost:5236").await?;
//!
//!     let result = conn.query("SELECT id, name FROM users WHERE id < ?", &[Value::Integer(100)]).await?;
//!     for row in &result.rows {
//!         let id = row.get_i64(0).unwrap_or(0);
//!         let name = row.get_string(1).unwrap_or("");
//!         println!("User {}: {}", id, name);
//!     }
//!
//!     conn.close().await
//! }
//! ```
//!
//! ## Connection Options
//!
//! ### DSN
//!
//! ```rust,no_run
//! # async fn example() -> dm_rs::Result<()> {
//! let conn = dm_rs::Connection::connect(
//!     "dm://SYSDBA:SYSDBA@10.0.0.1:5236?autoCommit=false&compress=2&socketTimeout=30",
//! ).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Endpoint groups
//!
//! A host part that names a group from a service-name file expands to the
//! group's endpoints:
//!
//! ```rust,no_run
//! # async fn example() -> dm_rs::Result<()> {
//! dm_rs::driver().load_service_file("/etc/dm_svc.conf")?;
//! let conn = dm_rs::Connection::connect("dm://SYSDBA:SYSDBA@DMCLUSTER?doSwitch=1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Prepared statements and batches
//!
//! ```rust,no_run
//! use dm_rs::{BatchBuilder, Connection, Value};
//!
//! # async fn example(conn: &Connection) -> dm_rs::Result<()> {
//! let stmt = conn.prepare("INSERT INTO t (id, name) VALUES (?, ?)").await?;
//! stmt.execute(&[Value::Integer(1), Value::from("one")]).await?;
//! stmt.close().await?;
//!
//! let batch = BatchBuilder::new("INSERT INTO t (id, name) VALUES (?, ?)")
//!     .add_row(vec![Value::Integer(2), Value::from("two")])
//!     .add_row(vec![Value::Integer(3), Value::from("three")])
//!     .build();
//! let result = conn.execute_batch(&batch).await?;
//! assert_eq!(result.rows_affected, 2);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod buffer;
pub mod compress;
pub mod config;
pub mod connection;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod encoding;
pub mod endpoint;
pub mod error;
pub mod messages;
pub mod packet;
pub mod result_cache;
pub mod row;
pub mod rows;
pub mod session;
pub mod statement;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use batch::{BatchBinds, BatchBuilder, BatchResult};
pub use config::{
    BatchType, ClusterMode, Config, DoSwitch, EpSelector, HostPort, LobMode, LoginMode, ServiceFile,
};
pub use connection::{Connection, ExecResult, QueryResult, ServerInfo};
pub use constants::{IoType, IsolationLevel, Locale, ServerMode, ServerStatus};
pub use context::{driver, DriverContext};
pub use crypto::{register_external_cipher, Cipher};
pub use error::{Error, Result, RowError};
pub use messages::{ColumnInfo, ParamInfo};
pub use row::{CursorRef, Row, Value};
pub use rows::Rows;
pub use session::CancelGuard;
pub use statement::{BindParam, CallResult, Statement, StatementType};
pub use transport::TlsConfig;
pub use types::{Decimal, DmDateTime, IntervalDT, IntervalYM, LobData, LobLocator};
