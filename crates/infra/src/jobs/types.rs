//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a scheduled job: a name unique within its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at`, then for an executor to claim it
    Pending,
    /// Claimed by an executor
    Running,
    /// Finished successfully (only kept when the executor retains completed jobs)
    Completed,
    /// Gave up; kept for inspection
    Failed { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// How often a failed job may be fired again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of executions allowed, the first one included.
    pub max_attempts: u32,
    /// Delay before each refire.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::one_shot()
    }
}

impl RetryPolicy {
    /// Fire exactly once.
    pub fn one_shot() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A scheduled unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    /// Routes the job to a registered handler
    pub job_type: String,
    /// Opaque data attached at registration
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Number of times the job has been claimed
    pub attempt: u32,
    /// Earliest time the job may fire
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<JobAttemptRecord>,
}

/// Record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Job {
    /// A one-shot job that may fire immediately.
    pub fn new(key: JobKey, job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            key,
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            retry_policy: RetryPolicy::one_shot(),
            attempt: 0,
            run_at: now,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = at;
        self
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            error: None,
        });
    }

    /// Record a failed attempt. When `refire` is set and the policy allows
    /// another attempt the job goes back to `Pending`, otherwise it is `Failed`.
    pub fn mark_failed(&mut self, error: String, refire: bool, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            error: Some(error.clone()),
        });

        if refire && self.retry_policy.allows_another(self.attempt) {
            self.run_at =
                now + chrono::Duration::from_std(self.retry_policy.delay).unwrap_or_default();
            self.status = JobStatus::Pending;
        } else {
            self.status = JobStatus::Failed {
                error,
                attempts: self.attempt,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> JobKey {
        JobKey::new("test-group", "job-1")
    }

    #[test]
    fn key_display() {
        assert_eq!(key().to_string(), "test-group.job-1");
    }

    #[test]
    fn refire_waits_for_the_fixed_delay() {
        let mut job = Job::new(key(), "test", serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(3, Duration::from_secs(30)));

        job.mark_running();
        let failed_at = Utc::now();
        job.mark_failed("flaky".into(), true, failed_at);

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.run_at >= failed_at + chrono::Duration::seconds(30));
        assert!(!job.is_ready(Utc::now()));
    }

    #[test]
    fn one_shot_never_allows_a_second_attempt() {
        let policy = RetryPolicy::one_shot();
        assert!(policy.allows_another(0));
        assert!(!policy.allows_another(1));
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(key(), "test", serde_json::json!({"k": "v"}));
        assert!(job.is_ready(Utc::now()));
        assert_eq!(job.attempt, 0);

        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempt, 1);
        assert!(!job.is_ready(Utc::now()));

        job.mark_completed(Utc::now());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].error.is_none());
    }

    #[test]
    fn refire_respects_policy() {
        let mut job = Job::new(key(), "test", serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO));

        job.mark_running();
        job.mark_failed("boom".into(), true, Utc::now());
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_running();
        job.mark_failed("boom again".into(), true, Utc::now());
        assert!(matches!(job.status, JobStatus::Failed { attempts: 2, .. }));
    }

    #[test]
    fn non_refire_failure_is_final() {
        let mut job = Job::new(key(), "test", serde_json::json!({}))
            .with_retry_policy(RetryPolicy::fixed(5, Duration::ZERO));

        job.mark_running();
        job.mark_failed("fatal".into(), false, Utc::now());
        assert!(matches!(job.status, JobStatus::Failed { attempts: 1, .. }));
    }

    #[test]
    fn future_job_is_not_ready() {
        let job = Job::new(key(), "test", serde_json::Value::Null)
            .run_at(Utc::now() + chrono::Duration::hours(1));
        assert!(!job.is_ready(Utc::now()));
    }
}
