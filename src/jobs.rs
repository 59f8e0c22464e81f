//! Async job tracker: accept + poll for long-running generation work, single-flight per
//! (job kind, record id).

use log::{error, info};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::errors::RequestError;
use crate::utils::lock;

/// Work wrapped by a job. Runs on its own thread.
pub type JobOp = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Thumbnail,
    Preview,
    MediaInfo,
    Metadata,
}

impl JobKind {
    /// Name used in response lines.
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Thumbnail => "THUMBNAIL GENERATE",
            JobKind::Preview => "PREVIEW GENERATE",
            JobKind::MediaInfo => "MEDIA INFO",
            JobKind::Metadata => "METADATA",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for JobKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "thumbnail" | "thumbnail_generate" => Ok(JobKind::Thumbnail),
            "preview" | "preview_generate" => Ok(JobKind::Preview),
            "mediainfo" | "media_info" => Ok(JobKind::MediaInfo),
            "metadata" => Ok(JobKind::Metadata),
            _ => Err(RequestError::UnknownJobKind(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    /// Media-info primary step failed; the fallback rescan is running.
    Degraded,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobState {
    pub status: JobStatus,
    pub error: Option<String>,
    pub done: bool,
}

impl JobState {
    fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            error: None,
            done: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accepted {
    Queued,
    BeingProcessed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    Success,
    InProgress,
    Error,
    NotFound,
}

impl Accepted {
    pub fn line(&self, kind: JobKind) -> String {
        match self {
            Accepted::Queued => format!("202 {} QUEUED OK\r\n", kind.label()),
            Accepted::BeingProcessed => format!("203 {} BEING PROCESSED\r\n", kind.label()),
        }
    }
}

impl Poll {
    pub fn line(&self, kind: JobKind) -> String {
        let name = kind.label();
        match self {
            Poll::Success => format!("202 {name} OK\r\n"),
            Poll::InProgress => format!("203 {name} IN PROGRESS\r\n"),
            Poll::Error => format!("500 {name} ERROR\r\n"),
            Poll::NotFound => format!("404 {name} NOT FOUND\r\n"),
        }
    }
}

type JobKey = (JobKind, String);

/// One entry per (kind, id). Terminal entries live until a non-preserving poll consumes them;
/// there is no time-based eviction.
#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobKey, JobState>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `op` for (`kind`, `id`) unless a job for that key is still running.
    ///
    /// For [`JobKind::MediaInfo`] a failing `op` degrades the job and runs `fallback`
    /// (a full rescan); its result decides the final status. Other kinds ignore `fallback`.
    pub fn accept(
        self: &Arc<Self>,
        kind: JobKind,
        id: &str,
        op: JobOp,
        fallback: Option<JobOp>,
    ) -> Accepted {
        let key = (kind, id.to_string());
        {
            let mut jobs = lock(&self.jobs);
            if jobs.get(&key).is_some_and(|j| !j.done) {
                return Accepted::BeingProcessed;
            }
            jobs.insert(key.clone(), JobState::processing());
        }

        let tracker = Arc::clone(self);
        let worker_key = key.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("job-{}", kind.label().to_lowercase().replace(' ', "-")))
            .spawn(move || tracker.run(worker_key, op, fallback));
        if let Err(e) = spawned {
            self.finish(&key, JobStatus::Error, Some(format!("spawn job thread: {e}")));
        }
        Accepted::Queued
    }

    fn run(&self, key: JobKey, op: JobOp, fallback: Option<JobOp>) {
        let (kind, id) = (key.0, key.1.as_str());
        let err = match op() {
            Ok(()) => {
                info!("id={} {} done", id, kind);
                self.finish(&key, JobStatus::Success, None);
                return;
            }
            Err(e) => e,
        };

        let fallback = match fallback {
            Some(f) if kind == JobKind::MediaInfo => f,
            _ => {
                error!("id={} {} failed: {:#}", id, kind, err);
                self.finish(&key, JobStatus::Error, Some(format!("{err:#}")));
                return;
            }
        };

        self.set(&key, |j| {
            j.status = JobStatus::Degraded;
            j.error = Some(format!("{err:#}"));
        });
        match fallback() {
            Ok(()) => self.finish(&key, JobStatus::Success, None),
            Err(e) => {
                error!("id={} {} fallback failed: {:#}", id, kind, e);
                self.finish(&key, JobStatus::Error, Some(format!("{e:#}")));
            }
        }
    }

    fn set(&self, key: &JobKey, f: impl FnOnce(&mut JobState)) {
        if let Some(job) = lock(&self.jobs).get_mut(key) {
            f(job);
        }
    }

    fn finish(&self, key: &JobKey, status: JobStatus, error: Option<String>) {
        self.set(key, |j| {
            j.status = status;
            j.error = error;
            j.done = true;
        });
    }

    /// Report the job's state. A terminal state is removed unless `preserve` is set.
    pub fn poll(&self, kind: JobKind, id: &str, preserve: bool) -> Poll {
        let key = (kind, id.to_string());
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.get(&key) else {
            return Poll::NotFound;
        };
        let result = match job.status {
            JobStatus::Processing | JobStatus::Degraded => return Poll::InProgress,
            JobStatus::Success => Poll::Success,
            JobStatus::Error => Poll::Error,
        };
        if !preserve {
            jobs.remove(&key);
        }
        result
    }

    /// Current state without consuming it.
    pub fn state(&self, kind: JobKind, id: &str) -> Option<JobState> {
        lock(&self.jobs).get(&(kind, id.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!("media-info".parse::<JobKind>().unwrap(), JobKind::MediaInfo);
        assert_eq!("Thumbnail".parse::<JobKind>().unwrap(), JobKind::Thumbnail);
        assert!(matches!(
            "transcode".parse::<JobKind>(),
            Err(RequestError::UnknownJobKind(_))
        ));
        assert_eq!(
            Accepted::Queued.line(JobKind::Metadata),
            "202 METADATA QUEUED OK\r\n"
        );
        assert_eq!(
            Poll::NotFound.line(JobKind::Preview),
            "404 PREVIEW GENERATE NOT FOUND\r\n"
        );
    }
}
