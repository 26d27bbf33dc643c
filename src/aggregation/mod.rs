pub mod driver;
pub mod io;
pub mod metrics;
pub mod reduce;
pub mod task;
pub mod types;

pub use driver::*;
pub use io::{MatrixFormat, MatrixSink, write_result};
pub use reduce::{AggregateReport, Aggregator};
pub use task::{SliceTask, TaskContext, TaskFailure, TaskOutcome};
pub use types::{Axis, DayClass, MatrixAxes, PartialMatrix, ResultMatrix, Slice};
