//! Streaming uploads to node storages
//!
//! A transfer either completes or is discarded. Nothing about a failed
//! upload is kept, and a retry starts again from byte zero.

mod coordinator;

pub use coordinator::{ProgressFn, UploadCoordinator, UploadOutcome, UploadSessionView};
