//! Listener sessions and their supervisor.
//!
//! Every active device runs one [`ListenerSession`] on its own task. The
//! session reads bytes from a TCP connection or a serial port, turns them
//! into messages with the `labgate-protocol` codec, and hands each message
//! to a [`MessagePipeline`] that stores the results and builds the reply.
//! The [`Supervisor`] owns the device registry and starts or stops sessions
//! on request.
//!
//! ```text
//! instrument ─► ListenerSession ─► LabCodec ─► MessagePipeline ─► LabStore
//!     ▲                                              │
//!     └──────────────── ACK / NAK / order ◄──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use labgate_network::{SessionSettings, Supervisor, TracingNotifier};
//! use labgate_storage::{Database, DatabaseConfig, SqliteLabStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("labgate.db")).await?;
//! let store = Arc::new(SqliteLabStore::new(db.pool().clone()));
//! let supervisor = Supervisor::new(store, Arc::new(TracingNotifier), SessionSettings::default());
//!
//! supervisor.reload().await?;
//! let outcome = supervisor.start("Cobas").await;
//! println!("{}", outcome.message);
//!
//! supervisor.stop_all().await;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod session;
pub mod settings;

pub use alert::{Alert, ChannelNotifier, NoopNotifier, Notifier, TracingNotifier};
pub use error::{SessionError, SessionResult};
pub use manager::{CommandOutcome, Supervisor};
pub use pipeline::{MessagePipeline, MessageReport};
pub use session::{ListenerSession, StatusCallback};
pub use settings::SessionSettings;
