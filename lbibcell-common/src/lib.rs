pub mod config;
pub mod decay;
pub mod matrix;
pub mod mesh;
pub mod npy;
pub mod profile;
pub mod solver;
pub mod summary;

// Re-export key types for easier use by dependent crates
pub use config::{ToolkitConfig, GridConfig, SolverConfig, RenderConfig, SegmentationConfig, FitConfig, OutputConfig, OutputFormat};
pub use decay::{AnalyticParams, DecayModel, FitResult};
pub use matrix::{ConcentrationMatrix, ValueRange};
pub use mesh::{BoundingBox, Centroid, CentroidSet, PolyMesh};
pub use profile::{Profile, ProfileMode};
pub use solver::{SolverFile, SolverRecord};
pub use summary::{FrameEntry, SeriesSummary};
