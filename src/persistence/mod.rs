//! State checkpoint & persistence.
//!
//! Built in a trait-first style (owned subsystems delegated to through
//! narrow method calls) with in-memory implementations standing in for the
//! out-of-scope relational store — the concrete DB/driver is not this
//! crate's concern; only the checkpoint *contract* is.

mod master_resume;
mod positioning_profile;
mod session_store;

pub use master_resume::{
    merge_master_resume, save_master_resume, InMemoryMasterResumeStore, MasterResume, MasterResumeStore,
};
pub use positioning_profile::{InMemoryPositioningProfileStore, PositioningProfile, PositioningProfileStore};
pub use session_store::{InMemorySessionStore, SessionCheckpoint, SessionStore};
