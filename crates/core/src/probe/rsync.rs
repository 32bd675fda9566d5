//! Recursive rsync listing of a whole category tree.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::listing::parse_rsync_listing;
use super::{ProbeError, RsyncListing};

/// Exit code rsync uses when the daemon refuses the connection or the module is missing.
const EXIT_SOCKET_IO: i32 = 10;

/// Runs `rsync -r` listings with a hard timeout.
#[derive(Debug, Clone)]
pub struct RsyncRunner {
    program: PathBuf,
    parameters: Vec<String>,
}

impl RsyncRunner {
    /// `parameters` are extra whitespace-separated rsync arguments (e.g. `--no-motd`).
    pub fn new(parameters: &str) -> Self {
        Self {
            program: PathBuf::from("rsync"),
            parameters: parameters.split_whitespace().map(String::from).collect(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--temp-dir=/tmp")
            .arg("-r")
            .arg("--exclude=.snapshot")
            .arg("--exclude=*.~tmp~")
            .args(&self.parameters)
            .arg(format!("{}/", url.trim_end_matches('/')))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// List `url` recursively. On timeout the process is killed and whatever
    /// it printed so far is returned with `complete = false`.
    pub async fn list(&self, url: &str, limit: Duration) -> Result<RsyncListing, ProbeError> {
        let mut child = self
            .command(url)
            .spawn()
            .map_err(|e| ProbeError::Unsupported(format!("cannot run {}: {}", self.program.display(), e)))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProbeError::Protocol("rsync stdout not captured".to_string()))?;

        let mut output = Vec::new();
        let reading = async {
            let mut chunk = [0u8; 8192];
            loop {
                let n = stdout.read(&mut chunk).await?;
                if n == 0 {
                    return Ok::<(), std::io::Error>(());
                }
                output.extend_from_slice(&chunk[..n]);
            }
        };

        let (complete, exit_code) = match tokio::time::timeout(limit, reading).await {
            Ok(Ok(())) => {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| ProbeError::Protocol(format!("rsync wait failed: {}", e)))?;
                (true, status.code())
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                return Err(ProbeError::Connection(format!("reading rsync output: {}", e)));
            }
            Err(_) => {
                warn!(url, timeout_secs = limit.as_secs(), "rsync timed out, killing it");
                if let Err(e) = child.kill().await {
                    debug!(url, error = %e, "Failed to kill rsync");
                }
                (false, None)
            }
        };

        if exit_code == Some(EXIT_SOCKET_IO) {
            return Err(ProbeError::Connection(format!(
                "rsync refused for {} (exit code {})",
                url, EXIT_SOCKET_IO
            )));
        }
        if let Some(code) = exit_code.filter(|c| *c != 0) {
            debug!(url, code, "rsync exited with an error, using its output anyway");
        }

        Ok(RsyncListing {
            entries: parse_rsync_listing(&String::from_utf8_lossy(&output)),
            complete,
            exit_code,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_rsync(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("rsync");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_complete_listing() {
        let dir = TempDir::new().unwrap();
        let program = fake_rsync(
            &dir,
            "echo 'drwxr-xr-x 4,096 2023/10/01 12:00:00 .'\n\
             echo '-rw-r--r-- 1,024 2023/10/01 12:00:00 repodata/repomd.xml'",
        );
        let runner = RsyncRunner::new("--no-motd").with_program(program);

        let listing = runner
            .list("rsync://mirror.example.org/fedora", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(listing.complete);
        assert_eq!(listing.exit_code, Some(0));
        assert_eq!(listing.entries["repodata/repomd.xml"].size, Some(1024));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let program = fake_rsync(
            &dir,
            "echo '-rw-r--r-- 500 2023/10/01 12:00:00 early/file.rpm'\n\
             sleep 30\n\
             echo '-rw-r--r-- 500 2023/10/01 12:00:00 late/file.rpm'",
        );
        let runner = RsyncRunner::new("").with_program(program);

        let listing = runner
            .list("rsync://mirror.example.org/fedora", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(!listing.complete);
        assert!(listing.entries.contains_key("early/file.rpm"));
        assert!(!listing.entries.contains_key("late/file.rpm"));
    }

    #[tokio::test]
    async fn test_exit_code_ten_fails() {
        let dir = TempDir::new().unwrap();
        let program = fake_rsync(&dir, "exit 10");
        let runner = RsyncRunner::new("").with_program(program);

        let err = runner
            .list("rsync://mirror.example.org/fedora", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }

    #[tokio::test]
    async fn test_passes_arguments() {
        let dir = TempDir::new().unwrap();
        let program = fake_rsync(
            &dir,
            "for a in \"$@\"; do echo \"-rw-r--r-- 1 2023/10/01 12:00:00 arg$a\"; done",
        );
        let runner = RsyncRunner::new("--no-motd --timeout=5").with_program(program);

        let listing = runner
            .list("rsync://mirror.example.org/fedora/", Duration::from_secs(10))
            .await
            .unwrap();
        let keys: Vec<&String> = listing.entries.keys().collect();
        assert!(keys.iter().any(|k| k.as_str() == "arg--no-motd"));
        assert!(keys.iter().any(|k| k.as_str() == "arg--timeout=5"));
        assert!(keys
            .iter()
            .any(|k| k.as_str() == "argrsync://mirror.example.org/fedora/"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unsupported() {
        let runner = RsyncRunner::new("").with_program("/nonexistent/rsync");
        let err = runner
            .list("rsync://mirror.example.org/fedora", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Unsupported(_)));
    }
}
