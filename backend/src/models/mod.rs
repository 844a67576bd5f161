//! Domain models.

pub mod gateway;
pub mod probe;
pub mod repair_task;
pub mod snapshot;

pub use gateway::{Gateway, GatewaySeed};
pub use probe::ProbeResult;
pub use repair_task::{NewRepairTask, RepairOutcome, RepairStatus, RepairTask};
