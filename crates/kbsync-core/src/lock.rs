//! Repository locking.
//!
//! Two layers serialize mutating operations on one repository:
//! - an in-process ticket lock, which serves waiting threads in arrival order;
//! - an advisory file lock (`flock(2)` on Unix) via the `fs2` crate, which
//!   serializes separate processes. The OS releases it if a process dies.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::constants::LOCK_FILENAME;
use crate::errors::KbError;

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
}

impl Tickets {
    fn advance(&mut self) {
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

/// Lock serializing every mutating operation on one repository.
#[derive(Debug)]
pub struct RepositoryLock {
    path: PathBuf,
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl RepositoryLock {
    /// Create a lock whose file lives at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tickets: Mutex::new(Tickets::default()),
            turn: Condvar::new(),
        }
    }

    /// Create the lock for a repository root.
    ///
    /// The lock file lives in `.git/` so it never shows up as a change.
    pub fn for_repository(root: &Path) -> Self {
        let git_dir = root.join(".git");
        if git_dir.is_dir() {
            return Self::new(git_dir.join(LOCK_FILENAME));
        }
        // linked worktrees have a `.git` file; fall back to the temp dir
        let name: String = root
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self::new(std::env::temp_dir().join(format!("kbsync-{}.lock", name)))
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tickets(&self) -> MutexGuard<'_, Tickets> {
        // a panicking holder cannot leave the counters half-updated
        self.tickets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquire both layers, waiting at most `timeout` in total.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::LockUnavailable`] when the timeout expires.
    pub fn acquire(&self, timeout: Duration) -> Result<RepositoryLockGuard<'_>, KbError> {
        let start = Instant::now();

        let ticket = {
            let mut tickets = self.tickets();
            let ticket = tickets.next;
            tickets.next += 1;

            let (mut tickets, _) = self
                .turn
                .wait_timeout_while(tickets, timeout, |t| t.serving != ticket)
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if tickets.serving != ticket {
                tickets.abandoned.insert(ticket);
                return Err(KbError::LockUnavailable {
                    waited_ms: elapsed_ms(start),
                    reason: "another operation on this repository is still running".to_string(),
                });
            }
            ticket
        };

        tracing::debug!("Acquired in-process lock ticket {}", ticket);

        match self.lock_file(start, timeout) {
            Ok(file) => Ok(RepositoryLockGuard {
                lock: self,
                _file: file,
            }),
            Err(e) => {
                self.release_ticket();
                Err(e)
            }
        }
    }

    fn lock_file(&self, start: Instant, timeout: Duration) -> Result<File, KbError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(_) if start.elapsed() >= timeout => {
                    return Err(KbError::LockUnavailable {
                        waited_ms: elapsed_ms(start),
                        reason: format!("{} is held by another process", self.path.display()),
                    });
                }
                Err(_) => std::thread::sleep(FILE_POLL_INTERVAL),
            }
        }
    }

    fn release_ticket(&self) {
        self.tickets().advance();
        self.turn.notify_all();
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Held while a session owns the repository.
///
/// Dropping it releases the file lock and hands the turn to the next waiter.
#[derive(Debug)]
pub struct RepositoryLockGuard<'a> {
    lock: &'a RepositoryLock,
    _file: File,
}

impl Drop for RepositoryLockGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._file);
        self.lock.release_ticket();
    }
}
