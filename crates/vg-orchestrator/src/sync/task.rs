//! Per-target sync task state
//!
//! Every transition is a compare-and-swap on the status byte, so two racing
//! callers can never both move the same task. Sibling tasks share nothing.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use vg_core::model::UploadRequest;
use vg_core::{ClusterId, NodeName, SyncStatus, SyncTaskId, TemplateId};

/// What a sync worker does for one target
#[derive(Debug, Clone)]
pub enum SyncPlan {
    /// Copy a volume from the source node into the same storage on the target
    CopyVolume {
        source_volid: String,
        request: UploadRequest,
    },
    /// Restore a backup archive as a template on the target
    Restore {
        archive_volid: String,
        /// Upload that puts the archive on the target first, unless its
        /// storage is shared
        copy_archive: Option<UploadRequest>,
        vmid: u32,
        target_storage: String,
    },
}

/// One (template, target node) distribution edge
#[derive(Debug)]
pub struct SyncTask {
    pub id: SyncTaskId,
    pub template_id: TemplateId,
    pub template_name: String,
    pub cluster_id: ClusterId,
    pub source_node: NodeName,
    pub target_node: NodeName,
    pub storage_name: String,
    pub plan: SyncPlan,
    pub created_at: u64,
    status: AtomicU8,
    progress: AtomicU8,
    attempts: AtomicU32,
    started_at: AtomicU64,
    finished_at: AtomicU64,
    error: Mutex<Option<String>>,
}

/// Client-facing snapshot of a sync task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTaskView {
    pub task_id: SyncTaskId,
    pub template_id: TemplateId,
    pub template_name: String,
    pub cluster_id: ClusterId,
    pub source_node: NodeName,
    pub target_node: NodeName,
    pub storage_name: String,
    pub status: SyncStatus,
    pub progress: u8,
    pub attempts: u32,
    pub created_at: u64,
    /// Unix millis the current attempt started
    pub sync_start_time: Option<u64>,
    /// Unix millis the last attempt ended
    pub sync_end_time: Option<u64>,
    pub error_message: Option<String>,
}

fn nonzero(v: u64) -> Option<u64> {
    (v != 0).then_some(v)
}

impl SyncTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SyncTaskId,
        template_id: TemplateId,
        template_name: String,
        cluster_id: ClusterId,
        source_node: NodeName,
        target_node: NodeName,
        storage_name: String,
        plan: SyncPlan,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            template_id,
            template_name,
            cluster_id,
            source_node,
            target_node,
            storage_name,
            plan,
            created_at,
            status: AtomicU8::new(SyncStatus::Pending.as_u8()),
            progress: AtomicU8::new(0),
            attempts: AtomicU32::new(0),
            started_at: AtomicU64::new(0),
            finished_at: AtomicU64::new(0),
            error: Mutex::new(None),
        }
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        SyncStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(SyncStatus::Failed)
    }

    fn transition(&self, from: SyncStatus, to: SyncStatus) -> Result<(), SyncStatus> {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| SyncStatus::from_u8(current).unwrap_or(SyncStatus::Failed))
    }

    fn begin_attempt(&self, now: u64) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.started_at.store(now, Ordering::Relaxed);
        self.finished_at.store(0, Ordering::Relaxed);
    }

    /// `pending -> syncing`, for the first attempt
    pub fn try_start(&self, now: u64) -> bool {
        if self.transition(SyncStatus::Pending, SyncStatus::Syncing).is_err() {
            return false;
        }
        self.begin_attempt(now);
        true
    }

    /// `failed -> syncing`, clearing the previous error
    ///
    /// Returns the status that blocked the retry when the task is not failed.
    pub fn try_retry(&self, now: u64) -> Result<(), SyncStatus> {
        self.transition(SyncStatus::Failed, SyncStatus::Syncing)?;
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.progress.store(0, Ordering::Relaxed);
        self.begin_attempt(now);
        Ok(())
    }

    /// `syncing -> completed`
    pub fn complete(&self, now: u64) -> bool {
        if self.transition(SyncStatus::Syncing, SyncStatus::Completed).is_err() {
            return false;
        }
        self.progress.store(100, Ordering::Relaxed);
        self.finished_at.store(now, Ordering::Relaxed);
        true
    }

    /// `syncing -> failed`
    pub fn fail(&self, now: u64, message: String) -> bool {
        // Message first, so anyone who sees `failed` also sees why
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
        if self.transition(SyncStatus::Syncing, SyncStatus::Failed).is_err() {
            return false;
        }
        self.finished_at.store(now, Ordering::Relaxed);
        true
    }

    /// Raise progress; it never goes down within an attempt
    pub fn set_progress(&self, percent: u8) {
        self.progress.fetch_max(percent.min(100), Ordering::Relaxed);
    }

    /// Snapshot for clients
    pub fn view(&self) -> SyncTaskView {
        SyncTaskView {
            task_id: self.id,
            template_id: self.template_id,
            template_name: self.template_name.clone(),
            cluster_id: self.cluster_id,
            source_node: self.source_node.clone(),
            target_node: self.target_node.clone(),
            storage_name: self.storage_name.clone(),
            status: self.status(),
            progress: self.progress.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            created_at: self.created_at,
            sync_start_time: nonzero(self.started_at.load(Ordering::Relaxed)),
            sync_end_time: nonzero(self.finished_at.load(Ordering::Relaxed)),
            error_message: self
                .error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vg_core::ContentClass;

    fn task() -> SyncTask {
        SyncTask::new(
            SyncTaskId(1),
            TemplateId(1),
            "debian".into(),
            ClusterId(1),
            NodeName::new("a"),
            NodeName::new("b"),
            "local".into(),
            SyncPlan::CopyVolume {
                source_volid: "local:vztmpl/debian.tar.zst".into(),
                request: UploadRequest {
                    storage: "local".into(),
                    content: ContentClass::Vztmpl,
                    filename: "debian.tar.zst".into(),
                    size: None,
                    checksum_algorithm: None,
                },
            },
            1,
        )
    }

    #[test]
    fn test_lifecycle() {
        let t = task();
        assert_eq!(t.status(), SyncStatus::Pending);
        assert!(t.try_start(10));
        assert!(!t.try_start(11));
        t.set_progress(40);
        t.set_progress(20);
        assert_eq!(t.view().progress, 40);
        assert!(t.fail(20, "disk full".into()));

        let view = t.view();
        assert_eq!(view.status, SyncStatus::Failed);
        assert_eq!(view.error_message.as_deref(), Some("disk full"));
        assert_eq!(view.sync_end_time, Some(20));

        assert!(t.try_retry(30).is_ok());
        let view = t.view();
        assert_eq!(view.status, SyncStatus::Syncing);
        assert_eq!(view.error_message, None);
        assert_eq!(view.progress, 0);
        assert_eq!(view.attempts, 2);
        assert_eq!(view.sync_start_time, Some(30));
        assert_eq!(view.sync_end_time, None);

        assert!(t.complete(40));
        assert_eq!(t.view().progress, 100);
    }

    #[test]
    fn test_retry_rejected_unless_failed() {
        let t = task();
        assert_eq!(t.try_retry(1), Err(SyncStatus::Pending));
        t.try_start(1);
        assert_eq!(t.try_retry(2), Err(SyncStatus::Syncing));
        t.complete(3);
        assert_eq!(t.try_retry(4), Err(SyncStatus::Completed));
        assert_eq!(t.status(), SyncStatus::Completed);
    }

    #[test]
    fn test_concurrent_retries_transition_once() {
        let t = Arc::new(task());
        t.try_start(1);
        t.fail(2, "boom".into());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || t.try_retry(3).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(t.view().attempts, 2);
    }
}
