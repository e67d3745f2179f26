//! Store backends

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;
