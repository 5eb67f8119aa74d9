pub mod admission;
pub mod fingerprint;
pub mod grouping;
pub mod index;
pub mod item;
pub mod queue;
pub mod readiness;

pub use admission::{AdmissionPolicy, AdmissionSet, ExactIdPolicy};
pub use fingerprint::{Fingerprint, FingerprintError, fingerprint};
pub use grouping::{GroupingCache, ScopeInfo};
pub use index::{DuplicateIndex, HashRecord, IndexError};
pub use item::{ItemId, ItemIdError};
pub use queue::WorkQueue;
pub use readiness::{Latch, Readiness};

/// A detected duplicate waiting to be announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSignal {
    pub scope_id: u64,
    pub existing: ItemId,
    pub duplicate: ItemId,
}
