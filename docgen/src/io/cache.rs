//! Artifact cache: one fresh directory per agent run, swept after a day.
//!
//! Directories are named `{agent}_{YYYYmmdd_HHMMSS_mmm}_{pid}_{seq}` under an
//! injected root. The process id and a process-wide sequence number keep names
//! unique across concurrent requests and processes sharing the root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

/// Run directories older than this are removed by [`ArtifactCache::clean`].
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Attempts before giving up on finding an unused directory name.
const MAX_CREATE_ATTEMPTS: u32 = 16;

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Directory dedicated to one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifactDirectory {
    /// Absolute path to the directory.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub agent: String,
    pub pid: u32,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: usize,
    pub retained: usize,
    pub failures: usize,
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Use `root` as the cache root. Relative roots resolve against the
    /// current directory so returned paths are always absolute.
    pub fn new(root: &Path) -> Result<Self> {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .context("read current directory")?
                .join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, unique run directory for `agent`.
    #[instrument(skip(self))]
    pub fn create_run_directory(&self, agent: &str) -> Result<RunArtifactDirectory> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create cache root {}", self.root.display()))?;
        let pid = std::process::id();
        let slug = sanitize_agent(agent);

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let created_at = Utc::now();
            let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
            let name = build_run_name(&slug, &created_at, pid, seq);
            let path = self.root.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "created run directory");
                    return Ok(RunArtifactDirectory {
                        path,
                        created_at,
                        agent: agent.to_string(),
                        pid,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(name, "run directory name taken, retrying");
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create run directory {}", path.display()));
                }
            }
        }
        Err(anyhow!(
            "could not allocate a run directory under {}",
            self.root.display()
        ))
    }

    /// Remove run directories older than [`RETENTION`].
    pub fn clean(&self) -> CleanReport {
        self.clean_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`. Failures are logged and
    /// counted, never returned.
    #[instrument(skip(self, now))]
    pub fn clean_at(&self, now: SystemTime) -> CleanReport {
        let mut report = CleanReport::default();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return report,
            Err(err) => {
                warn!(root = %self.root.display(), err = %err, "failed to read cache root");
                report.failures += 1;
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(err = %err, "failed to read cache entry");
                    report.failures += 1;
                    continue;
                }
            };
            let path = entry.path();
            let modified = match entry.metadata().and_then(|meta| {
                if meta.is_dir() {
                    meta.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => modified,
                Ok(None) => continue,
                Err(err) => {
                    warn!(path = %path.display(), err = %err, "failed to stat cache entry");
                    report.failures += 1;
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= RETENTION {
                report.retained += 1;
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "removed stale run directory");
                    report.removed += 1;
                }
                // Another request removed it first.
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), err = %err, "failed to remove stale run directory");
                    report.failures += 1;
                }
            }
        }

        if report.removed > 0 || report.failures > 0 {
            info!(
                removed = report.removed,
                retained = report.retained,
                failures = report.failures,
                "cleaned artifact cache"
            );
        }
        report
    }
}

pub fn build_run_name(agent: &str, created_at: &DateTime<Utc>, pid: u32, seq: u64) -> String {
    format!(
        "{agent}_{}_{pid}_{seq}",
        created_at.format("%Y%m%d_%H%M%S_%3f")
    )
}

fn sanitize_agent(agent: &str) -> String {
    let slug: String = agent
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        "agent".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn run_name_has_agent_timestamp_pid_and_sequence() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("timestamp");
        assert_eq!(
            build_run_name("project-scanner", &at, 42, 7),
            "project-scanner_20240309_140507_000_42_7"
        );
    }

    #[test]
    fn relative_root_becomes_absolute() {
        let cache = ArtifactCache::new(Path::new("some/cache")).expect("cache");
        assert!(cache.root().is_absolute());
    }

    #[test]
    fn creates_unique_directories_concurrently() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ArtifactCache::new(temp.path()).expect("cache");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    (0..4)
                        .map(|_| cache.create_run_directory("scanner").expect("create").path)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for path in handle.join().expect("join") {
                assert!(path.is_dir());
                assert!(path.is_absolute());
                assert!(seen.insert(path));
            }
        }
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn clean_removes_only_expired_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ArtifactCache::new(temp.path()).expect("cache");
        let run = cache.create_run_directory("scanner").expect("create");
        fs::write(run.path.join("result.json"), "{}").expect("write");
        let created = SystemTime::now();

        let report = cache.clean_at(created + Duration::from_secs(60 * 60));
        assert_eq!(report.removed, 0);
        assert_eq!(report.retained, 1);
        assert!(run.path.exists());

        let report = cache.clean_at(created + Duration::from_secs(25 * 60 * 60));
        assert_eq!(report.removed, 1);
        assert_eq!(report.failures, 0);
        assert!(!run.path.exists());
    }

    #[test]
    fn clean_ignores_missing_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = ArtifactCache::new(&temp.path().join("absent")).expect("cache");
        assert_eq!(cache.clean(), CleanReport::default());
    }
}
