pub mod archive;
pub mod dispatch;
pub mod gate;
pub mod gateway;
pub mod ingest;
pub mod pipeline;
pub mod reconcile;
pub mod store;

pub use archive::{Archive, ArchiveError, FsArchive};
pub use dispatch::DispatchOutcome;
pub use gate::{AdmissionError, AdmissionGate};
pub use gateway::{Gateway, GatewayError, LocalGateway, MessageRef};
pub use ingest::{IngestError, IngestOutcome};
pub use pipeline::{Pipeline, PipelineError, PipelineHandles, PipelineSettings};
pub use store::{KvStore, MemoryStore, SledStore, StoreError};
