//! Domain layer: trees, calibrations, control files and posterior summaries
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod alignment;
pub mod annotate;
pub mod arena;
pub mod control;
pub mod error;
pub mod newick;
pub mod posterior;
pub mod prior;

pub use alignment::{Alignment, AlignmentFormat};
pub use annotate::{annotate, auto_root_age, AnnotatedTree, CalibrationTable};
pub use arena::{PhyloNode, PhyloTree};
pub use control::{ControlFile, ControlParams, SubstitutionModel};
pub use error::DomainError;
pub use newick::parse_newick;
pub use posterior::{assign_node_times, render_time_table, NodeTime, PosteriorParser, PosteriorRecord};
pub use prior::{Calibration, CalibrationParser, Prior};

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
