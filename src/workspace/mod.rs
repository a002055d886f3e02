//! Shared workspace: the artifact repository every phase reads from and writes to.
//!
//! ```text
//! .mare/workspace/
//! ├── workspace.db     # artifact metadata + execution ledger (SQLite)
//! └── blobs/           # one JSON content file per artifact id
//! ```

pub mod blobs;
pub mod db;
pub mod models;
pub mod repository;

pub use blobs::BlobStore;
pub use db::{DbHandle, WorkspaceDb};
pub use models::{
    Artifact, ArtifactContent, ArtifactFilter, ArtifactMetadata, ArtifactStatus, ArtifactType,
    ExecutionRecord, ExecutionSummary, NewArtifact, RunStatus, SweepReport, WorkspaceStats,
};
pub use repository::ArtifactRepository;
