use crate::game::installer::core::downloader::{FetchError, FetchOutcome, Fetcher};
use crate::game::installer::types::{CancelToken, DownloadTask, ProgressReporter};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A task that could not be completed, kept whole so it can be retried.
#[derive(Debug)]
pub struct FailedTask {
    pub task: DownloadTask,
    pub error: FetchError,
}

impl FailedTask {
    pub fn url(&self) -> &str {
        &self.task.url
    }

    pub fn dest(&self) -> &PathBuf {
        &self.task.dest
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub cached: usize,
    pub downloaded: usize,
    pub downloaded_bytes: u64,
    pub failures: Vec<FailedTask>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.cached + self.downloaded
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deduplicate tasks by destination, keeping the first occurrence.
pub fn dedupe_by_dest(tasks: Vec<DownloadTask>) -> Vec<DownloadTask> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .filter(|t| seen.insert(t.dest.clone()))
        .collect()
}

/// Runs download tasks through a bounded pool. Every task runs to
/// completion; failures are collected rather than aborting siblings.
pub struct BatchDownloader {
    fetcher: Fetcher,
    concurrency: usize,
}

impl BatchDownloader {
    pub fn new(fetcher: Fetcher, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn download_all(
        &self,
        tasks: Vec<DownloadTask>,
        reporter: Arc<dyn ProgressReporter>,
        cancel: &CancelToken,
        base_progress: i32,
        progress_weight: f32,
    ) -> BatchReport {
        let unique = dedupe_by_dest(tasks);
        let total = unique.len();
        let mut report = BatchReport {
            total,
            ..BatchReport::default()
        };
        if total == 0 {
            return report;
        }

        let completed = Arc::new(AtomicUsize::new(0));
        reporter.set_step_count(0, Some(total as u32));

        let results = stream::iter(unique)
            .map(|task| {
                let fetcher = self.fetcher.clone();
                let reporter = reporter.clone();
                let completed = completed.clone();
                let cancel = cancel.clone();

                async move {
                    let result = fetcher.fetch(&task, &cancel).await;

                    let count = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let progress =
                        base_progress + ((count as f32 / total as f32) * progress_weight) as i32;
                    reporter.set_percent(progress);
                    reporter.set_step_count(count as u32, Some(total as u32));
                    reporter.set_message(&format!("Downloading resources... ({}/{})", count, total));

                    if count % 100 == 0 || count == total {
                        log::info!("Batch download progress: {}/{} ({}%)", count, total, progress);
                    }

                    (task, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for (task, result) in results {
            match result {
                Ok(FetchOutcome::Cached) => report.cached += 1,
                Ok(FetchOutcome::Downloaded { bytes, .. }) => {
                    report.downloaded += 1;
                    report.downloaded_bytes += bytes;
                }
                Err(error) => {
                    if !error.is_cancelled() {
                        log::warn!("Failed to download {}: {}", task.url, error);
                    }
                    report.failures.push(FailedTask { task, error });
                }
            }
        }

        report
    }
}
