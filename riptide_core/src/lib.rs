pub mod config;
pub mod curriculum;
pub mod engine;
pub mod ffi;
pub mod ops;
pub mod scheduler;
pub mod signal;

pub use config::MutatorConfig;
pub use curriculum::{CurriculumController, ParseStats, Phase};
pub use engine::MutationEngine;
pub use ops::{MutationOp, OpFn, OpRegistry};
pub use scheduler::{EmaScheduler, SchedulerParams};
pub use signal::{PlateauPoller, PlateauSignal, SignalError, read_signal, write_signal};
