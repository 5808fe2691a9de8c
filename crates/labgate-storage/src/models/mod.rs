pub mod lab_result;
pub mod machine;

pub use lab_result::{LabResultRow, RecentSample};
pub use machine::{MachineParamRow, MachineRow};
