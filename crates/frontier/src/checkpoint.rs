use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use jobharvest_core::{Checkpoint, CheckpointSession, Job, JobStatus};

const NEW_RATIO_THRESHOLD: f64 = 0.30;
const KNOWN_STREAK_STOP: u32 = 2;

struct State {
    checkpoint: Checkpoint,
    known_streak: u32,
    session: CheckpointSession,
}

fn fresh_session() -> CheckpointSession {
    CheckpointSession {
        started_at: Utc::now(),
        ended_at: None,
        new: 0,
        known: 0,
    }
}

/// Decides whether each page's scrape should continue, and classifies
/// candidate jobs against durable seen sets (C9). One instance guards one
/// checkpoint file for the run.
pub struct IncrementalProcessor {
    path: PathBuf,
    state: Mutex<State>,
}

impl IncrementalProcessor {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let checkpoint = Self::load(&path).unwrap_or_default();
        Self {
            path,
            state: Mutex::new(State {
                checkpoint,
                known_streak: 0,
                session: fresh_session(),
            }),
        }
    }

    fn load(path: &Path) -> Option<Checkpoint> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(cp) if cp.schema == 1 => Some(cp),
            Ok(cp) => {
                warn!(schema = cp.schema, "ignoring checkpoint with unknown schema version");
                None
            }
            Err(e) => {
                warn!(error = %e, "ignoring unreadable checkpoint, starting fresh");
                None
            }
        }
    }

    /// Classifies a candidate job against the durable `seen_urls` /
    /// `seen_fingerprints` sets (§4.9). Does not mutate state; pair with
    /// [`record`](Self::record) after the job is accepted downstream.
    pub fn classify(&self, job: &Job) -> JobStatus {
        let state = self.state.lock().expect("checkpoint lock poisoned");
        if !state.checkpoint.seen_urls.contains(&job.url) {
            JobStatus::New
        } else if state.checkpoint.seen_fingerprints.contains(&job.source_fingerprint) {
            JobStatus::Known
        } else {
            JobStatus::Changed
        }
    }

    /// Adds a classified job's URL and fingerprint to the seen sets and
    /// updates the current session's counters. Call once per emitted job.
    pub fn record(&self, job: &Job, status: JobStatus) {
        let mut state = self.state.lock().expect("checkpoint lock poisoned");
        state.checkpoint.seen_urls.insert(job.url.clone());
        state
            .checkpoint
            .seen_fingerprints
            .insert(job.source_fingerprint.clone());
        match status {
            JobStatus::New | JobStatus::Changed => state.session.new += 1,
            JobStatus::Known => state.session.known += 1,
        }
    }

    /// Page-level early-stop policy (§4.9): once `new_ratio` for a page
    /// falls below the threshold for `KNOWN_STREAK_STOP` consecutive pages,
    /// signal stop — unless `forced` overrides it.
    pub fn should_continue(&self, page_new: u64, page_total: u64, forced: bool) -> bool {
        if forced || page_total == 0 {
            return true;
        }
        let new_ratio = page_new as f64 / page_total as f64;
        let mut state = self.state.lock().expect("checkpoint lock poisoned");
        if new_ratio < NEW_RATIO_THRESHOLD {
            state.known_streak += 1;
        } else {
            state.known_streak = 0;
        }
        state.known_streak < KNOWN_STREAK_STOP
    }

    /// Atomically persists the checkpoint and closes out the current
    /// session, per the "write checkpoint atomically at the end of each
    /// page" contract (§4.9).
    pub fn flush(&self) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("checkpoint lock poisoned");
        state.session.ended_at = Some(Utc::now());
        let session = state.session.clone();
        state.checkpoint.sessions.push(session);

        let json = serde_json::to_vec_pretty(&state.checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), "checkpoint flushed");

        state.session = fresh_session();
        Ok(())
    }

    pub fn known_streak(&self) -> u32 {
        self.state.lock().expect("checkpoint lock poisoned").known_streak
    }

    /// Read-only snapshot of checkpoint state for the `status` command.
    pub fn summary(&self) -> CheckpointSummary {
        let state = self.state.lock().expect("checkpoint lock poisoned");
        CheckpointSummary {
            seen_urls: state.checkpoint.seen_urls.len(),
            seen_fingerprints: state.checkpoint.seen_fingerprints.len(),
            sessions: state.checkpoint.sessions.len(),
            last_session: state.checkpoint.sessions.last().cloned(),
        }
    }
}

/// Read-only view of [`Checkpoint`] state, for reporting (§6).
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub seen_urls: usize,
    pub seen_fingerprints: usize,
    pub sessions: usize,
    pub last_session: Option<CheckpointSession>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobharvest_core::{Level, WorkMode};

    fn sample_job(url: &str, fingerprint: &str) -> Job {
        Job {
            url: url.to_string(),
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            location: "Berlin".to_string(),
            work_mode: WorkMode::Remote,
            level: Level::Senior,
            salary_min: None,
            salary_max: None,
            description: "x".repeat(100),
            technologies: vec![],
            benefits: vec![],
            posted_at: None,
            collected_at: Utc::now(),
            source_fingerprint: fingerprint.to_string(),
            anomalies: vec![],
        }
    }

    #[test]
    fn classifies_new_known_and_changed() {
        let dir = tempfile::tempdir().unwrap();
        let proc = IncrementalProcessor::open(dir.path().join("checkpoint.json"));

        let job1 = sample_job("https://x.com/1", "fp1");
        assert_eq!(proc.classify(&job1), JobStatus::New);
        proc.record(&job1, JobStatus::New);

        assert_eq!(proc.classify(&job1), JobStatus::Known);

        let job1_changed = sample_job("https://x.com/1", "fp2");
        assert_eq!(proc.classify(&job1_changed), JobStatus::Changed);
    }

    #[test]
    fn stops_after_known_streak_reaches_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let proc = IncrementalProcessor::open(dir.path().join("checkpoint.json"));

        assert!(proc.should_continue(1, 10, false));
        assert!(!proc.should_continue(1, 10, false));
        assert!(!proc.should_continue(1, 10, false));
    }

    #[test]
    fn forced_mode_ignores_known_streak() {
        let dir = tempfile::tempdir().unwrap();
        let proc = IncrementalProcessor::open(dir.path().join("checkpoint.json"));
        for _ in 0..5 {
            assert!(proc.should_continue(0, 10, true));
        }
    }

    #[test]
    fn flush_persists_and_reloads_seen_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let proc = IncrementalProcessor::open(&path);
        let job1 = sample_job("https://x.com/1", "fp1");
        proc.record(&job1, JobStatus::New);
        proc.flush().unwrap();

        let reopened = IncrementalProcessor::open(&path);
        assert_eq!(reopened.classify(&job1), JobStatus::Known);
    }
}
