//! Persistence for the laboratory gateway.
//!
//! The gateway reads device rows and code maps from the laboratory
//! database and writes one row per reported analyte. Everything goes
//! through the [`LabStore`] trait so sessions can run against SQLite in
//! production and [`MemoryLabStore`] in tests.
//!
//! # Tables
//!
//! | Table            | Used for                                        |
//! |------------------|-------------------------------------------------|
//! | `machines`       | Device list read at startup and on reload       |
//! | `machine_params` | Instrument code to laboratory code pairs        |
//! | `lab_results`    | Orders (empty result) and reported results      |
//!
//! # Example
//!
//! ```no_run
//! use labgate_core::NormalizedResult;
//! use labgate_storage::{Database, DatabaseConfig, LabStore, SqliteLabStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("labgate.db")).await?;
//! let store = SqliteLabStore::new(db.pool().clone());
//!
//! for device in store.get_devices().await? {
//!     println!("{}", device.machine_name);
//! }
//!
//! store
//!     .update_lab_result(&NormalizedResult::new("M1", "778", "WBC", "5.6"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use models::{LabResultRow, MachineParamRow, MachineRow, RecentSample};
pub use repositories::{LabStore, MemoryLabStore, SqliteLabStore};
