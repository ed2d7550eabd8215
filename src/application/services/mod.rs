//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on I/O boundary traits (FileSystem, CommandRunner)
//! but are themselves concrete structs, not traits.

mod estimation;

pub use estimation::{EstimationRequest, EstimationService, OutputPaths, PreparedRun, RunSummary};
