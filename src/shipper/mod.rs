pub mod batch_buffer;
pub mod line_reader;
pub mod refresh;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use batch_buffer::{BatchBuffer, FlushPolicy};
pub use refresh::RefreshSchedule;
pub use supervisor::{Supervisor, SupervisorError, SupervisorSettings};
pub use worker::{PartitionWorker, WorkerContext, WorkerError, WorkerExit, WorkerSettings};
