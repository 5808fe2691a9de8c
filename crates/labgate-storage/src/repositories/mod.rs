pub mod lab;
pub mod memory;

pub use lab::{LabStore, SqliteLabStore};
pub use memory::MemoryLabStore;
