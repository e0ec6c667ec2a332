pub mod record;
pub mod snapshot;

pub use record::{FieldValue, Record};
pub use snapshot::{CtMeterReading, InverterReading, Snapshot, SystemReading};
