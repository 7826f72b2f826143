//! Resumable log tailing

use std::time::Duration;

use vg_core::model::{LogCursor, TaskLogLine, TaskStatus};
use vg_core::{TaskKey, VgError};

use super::TaskRegistry;

const TAIL_BATCH: u64 = 500;

/// Follows one task's log from a caller-owned position
pub struct LogTail<'a> {
    registry: &'a TaskRegistry,
    key: TaskKey,
    cursor: LogCursor,
}

impl<'a> LogTail<'a> {
    /// Start tailing at line `start`
    pub fn new(registry: &'a TaskRegistry, key: TaskKey, start: u64) -> Self {
        Self {
            registry,
            key,
            cursor: LogCursor::new(start),
        }
    }

    /// Index of the next line this tail will return
    pub fn position(&self) -> u64 {
        self.cursor.next()
    }

    /// Lines written since the last call
    pub async fn next_batch(&mut self) -> Result<Vec<TaskLogLine>, VgError> {
        let registry = self.registry;
        let key = &self.key;
        let start = self.cursor.next();
        let batch = registry
            .retry_transient(key, "Log read", || registry.fetch_log(key, start, TAIL_BATCH))
            .await?;
        Ok(self.cursor.advance(batch))
    }

    /// Read every line until the task stops, then return its final status
    ///
    /// Lines written between the last poll and the stop are still delivered.
    /// Transient node errors are retried with backoff, so a dropped poll only
    /// delays the result; the caller bounds the whole wait.
    pub async fn follow<F>(&mut self, interval: Duration, mut on_line: F) -> Result<TaskStatus, VgError>
    where
        F: FnMut(&TaskLogLine),
    {
        loop {
            self.drain(&mut on_line).await?;
            let registry = self.registry;
            let key = &self.key;
            let status = registry
                .retry_transient(key, "Task poll", || registry.poll(key))
                .await?;
            if !status.is_running() {
                self.drain(&mut on_line).await?;
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn drain<F>(&mut self, on_line: &mut F) -> Result<(), VgError>
    where
        F: FnMut(&TaskLogLine),
    {
        loop {
            let batch = self.next_batch().await?;
            if batch.is_empty() {
                return Ok(());
            }
            batch.iter().for_each(&mut *on_line);
        }
    }
}
