//! Dialect-driven SQL generation for Tessera
//!
//! Given a table mapping and a target dialect, emits CREATE/SELECT/INSERT/
//! UPDATE/DELETE text with positional placeholders. Five dialects ship:
//! ANSI, PostgreSQL, MySQL, SQLite and SQL Server.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dialect;
pub mod dialects;
pub mod generator;

pub use dialect::{Dialect, DialectKind, UNKNOWN_TYPE};
pub use dialects::{Ansi, MySql, Postgres, SqlServer, Sqlite};
pub use generator::{SqlGenerator, Statement};
