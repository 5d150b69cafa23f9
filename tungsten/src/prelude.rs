//! Convenience re-exports for embedders.

pub use crate::error::TungstenError;
pub use crate::worker::{Worker, WorkerBuilder};
pub use tungsten_worker::{
    FunctionError, FunctionInput, FunctionOutput, RequestOutcome, ShutdownSignal, UserFunction,
    WorkerConfig, WorkerEvent, WorkerState,
};
