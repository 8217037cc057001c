pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod interpreter;
pub mod storage;
pub mod tool_system;
pub mod transport;
pub mod visualization;

pub use cache::SessionCache;
pub use config::DataExpConfig;
pub use dataset::{DatasetAccessor, DatasetSummary};
pub use error::{DataExpError, Result};
pub use execution::{PolarsSqlEngine, QueryEngine};
pub use storage::{ArtifactFormat, ArtifactStore, SavedArtifact};
pub use tool_system::{describe_dataset, run_query, Toolbox};
pub use visualization::{ChartDecision, ChartKind, ChartSpec, VisualizationSelector};
