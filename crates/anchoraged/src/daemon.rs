//! Background-process collaborator: fork to background, pid marker,
//! log redirection, and stop-signal delivery.
//!
//! Everything here runs before the async runtime exists; the fork
//! must not happen with runtime threads already spawned.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Pid marker written by the daemonized child.
pub const PID_FILE: &str = "anchoraged.pid";
/// Log destination for the daemonized child's stdout/stderr.
pub const LOG_FILE: &str = "anchoraged.log";

/// Outcome of the fork. The parent returns to its caller and exits;
/// the child carries on as the daemon.
pub enum Forked {
    Parent { child: i32 },
    Child,
}

/// Runtime directory holding the pid marker and log file.
pub struct DaemonContext {
    run_dir: PathBuf,
}

impl DaemonContext {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    fn pid_path(&self) -> PathBuf {
        self.run_dir.join(PID_FILE)
    }

    fn log_path(&self) -> PathBuf {
        self.run_dir.join(LOG_FILE)
    }

    /// Fork into the background.
    ///
    /// The child detaches into its own session, redirects stdio to the
    /// log file, and writes the pid marker. The parent receives the
    /// child's pid and should exit promptly.
    pub fn daemonize(&self) -> anyhow::Result<Forked> {
        fs::create_dir_all(&self.run_dir)
            .with_context(|| format!("failed to create run dir {:?}", self.run_dir))?;

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            bail!("fork failed: {}", std::io::Error::last_os_error());
        }
        if pid > 0 {
            return Ok(Forked::Parent { child: pid });
        }

        if unsafe { libc::setsid() } < 0 {
            bail!("setsid failed: {}", std::io::Error::last_os_error());
        }
        unsafe {
            libc::umask(0o027);
        }

        self.redirect_stdio()?;
        self.write_pid()?;
        Ok(Forked::Child)
    }

    fn redirect_stdio(&self) -> anyhow::Result<()> {
        use std::os::fd::AsRawFd;

        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .with_context(|| format!("failed to open log file {:?}", self.log_path()))?;
        let devnull = fs::File::open("/dev/null").context("failed to open /dev/null")?;

        unsafe {
            libc::dup2(devnull.as_raw_fd(), libc::STDIN_FILENO);
            libc::dup2(log.as_raw_fd(), libc::STDOUT_FILENO);
            libc::dup2(log.as_raw_fd(), libc::STDERR_FILENO);
        }
        Ok(())
    }

    /// Write this process's pid to the marker file.
    pub fn write_pid(&self) -> anyhow::Result<()> {
        let path = self.pid_path();
        fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write pid file {path:?}"))
    }

    /// Read the running daemon's pid from the marker file.
    pub fn read_pid(&self) -> anyhow::Result<i32> {
        let path = self.pid_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read pid file {path:?} — is the daemon running?"))?;
        raw.trim()
            .parse()
            .with_context(|| format!("malformed pid file {path:?}"))
    }

    /// Remove the pid marker. A missing file is not an error.
    pub fn release(&self) {
        let _ = fs::remove_file(self.pid_path());
    }

    /// Deliver a stop signal to the running daemon: SIGQUIT for a
    /// graceful stop, SIGTERM for a forced one.
    pub fn signal(&self, forced: bool) -> anyhow::Result<()> {
        let pid = self.read_pid()?;
        let sig = if forced { libc::SIGTERM } else { libc::SIGQUIT };

        let rc = unsafe { libc::kill(pid, sig) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                self.release();
                bail!("no process with pid {pid} (stale pid file removed)");
            }
            bail!("failed to signal pid {pid}: {err}");
        }
        Ok(())
    }
}
