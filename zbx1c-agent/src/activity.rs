//! Activity classification for sessions and background jobs
//!
//! Pure functions: the evaluation time is always passed in, so results do
//! not depend on when the check runs. Any uncertainty (missing or garbled
//! timestamps) classifies as inactive.

use crate::records::{JobRecord, SessionRecord};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub threshold_minutes: i64,
    /// Minimum `calls-last-5min`, only checked when rac reports the counter
    pub min_calls: Option<u64>,
    /// Minimum `bytes-last-5min`, only checked when rac reports the counter
    pub min_bytes: Option<u64>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            threshold_minutes: 5,
            min_calls: None,
            min_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPolicy {
    pub max_duration_minutes: i64,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self { max_duration_minutes: 60 }
    }
}

/// Both thresholds, as configured for one repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPolicies {
    pub session: SessionPolicy,
    pub job: JobPolicy,
}

/// A session is active when it is awake and was last active within the
/// threshold of `now`, in either direction.
/// A threshold too large to represent never excludes anything.
pub fn is_session_active(
    session: &SessionRecord,
    policy: &SessionPolicy,
    now: NaiveDateTime,
) -> bool {
    if session.is_hibernated() {
        return false;
    }

    let Some(last_active) = session.last_active_at() else {
        return false;
    };

    // Server and poller clocks drift; small skews into the future count too
    let gap = (now - last_active).abs();
    if let Some(threshold) = Duration::try_minutes(policy.threshold_minutes) {
        if gap > threshold {
            return false;
        }
    }

    if let (Some(min), Some(calls)) = (policy.min_calls, session.calls_last_5min()) {
        if calls < min {
            return false;
        }
    }
    if let (Some(min), Some(bytes)) = (policy.min_bytes, session.bytes_last_5min()) {
        if bytes < min {
            return false;
        }
    }

    true
}

/// A background job is active while it runs and has not exceeded the
/// maximum duration. An unrepresentable maximum means no limit.
pub fn is_background_job_active(job: &JobRecord, policy: &JobPolicy, now: NaiveDateTime) -> bool {
    if let Some(state) = job.state() {
        if !state.is_empty()
            && !state.eq_ignore_ascii_case("active")
            && !state.eq_ignore_ascii_case("running")
        {
            return false;
        }
    }

    let Some(started) = job.started_at() else {
        return false;
    };
    if started > now {
        return false;
    }

    let elapsed = job
        .duration_ms()
        .filter(|ms| *ms >= 0)
        .map(Duration::milliseconds)
        .unwrap_or(now - started);

    Duration::try_minutes(policy.max_duration_minutes).map_or(true, |max| elapsed < max)
}

pub fn filter_active_sessions<'a>(
    sessions: &'a [SessionRecord],
    policy: &SessionPolicy,
    now: NaiveDateTime,
) -> Vec<&'a SessionRecord> {
    sessions
        .iter()
        .filter(|s| is_session_active(s, policy, now))
        .collect()
}

pub fn filter_active_background_jobs<'a>(
    jobs: &'a [JobRecord],
    policy: &JobPolicy,
    now: NaiveDateTime,
) -> Vec<&'a JobRecord> {
    jobs.iter()
        .filter(|j| is_background_job_active(j, policy, now))
        .collect()
}
