//! Running the `git` binary.
//!
//! Every invocation goes through `GitCommand` so that:
//! - credentials never leak into logs or errors (arguments are redacted)
//! - git never blocks on an interactive credential prompt
//! - a fired `CancellationToken` kills the child process

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ExtractorError, Result, check_cancelled, redact, redact_args};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct GitOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl GitOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GitCommand {
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    secrets: Vec<String>,
}

impl GitCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    pub fn envs(mut self, vars: &[(String, String)]) -> Self {
        self.env.extend(vars.iter().cloned());
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    pub fn secrets(mut self, secrets: &[String]) -> Self {
        self.secrets.extend(secrets.iter().cloned());
        self
    }

    /// Arguments as they may be shown to a user.
    pub fn display_args(&self) -> Vec<String> {
        redact_args(&self.args, &self.secrets)
    }

    pub fn run(&self, cancel: &CancellationToken) -> Result<GitOutput> {
        check_cancelled(cancel)?;

        let mut cmd = Command::new("git");
        cmd.args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        debug!("git {}", self.display_args().join(" "));
        let mut child = cmd.spawn()?;

        let writer = match (child.stdin.take(), &self.stdin) {
            (Some(mut pipe), Some(data)) => {
                let data = data.clone();
                // Errors surface through the exit status.
                Some(thread::spawn(move || {
                    let _ = pipe.write_all(&data);
                }))
            }
            _ => None,
        };
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut interval = Duration::from_millis(1);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                collect(stdout);
                collect(stderr);
                debug!("git {} killed on cancellation", self.display_args().join(" "));
                return Err(ExtractorError::Cancelled);
            }
            thread::sleep(interval);
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        };

        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let output = GitOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        };

        if !output.status.success() {
            return Err(ExtractorError::GitCommand {
                args: self.display_args(),
                code: output.status.code(),
                stderr: redact(output.stderr_str().trim(), &self.secrets),
            });
        }
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

/// Shorthand for read-only commands inside a repository.
pub fn git_in(dir: &Path, args: &[&str], cancel: &CancellationToken) -> Result<GitOutput> {
    GitCommand::new(args.iter().copied()).current_dir(dir).run(cancel)
}

/// Id of the empty tree in the object format of the repository at `dir`.
pub fn empty_tree_id(dir: &Path, cancel: &CancellationToken) -> Result<String> {
    let out = GitCommand::new(["hash-object", "-t", "tree", "--stdin"])
        .current_dir(dir)
        .stdin(Vec::new())
        .run(cancel)?;
    let id = out.stdout_str().trim().to_string();
    if id.is_empty() {
        return Err(ExtractorError::Parse("hash-object printed no id".to_string()));
    }
    Ok(id)
}

/// Whether a usable `git` binary is on the PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_failure_reports_redacted_args() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempdir().unwrap();
        let cmd = GitCommand::new(["rev-parse", "--verify", "topsecret"])
            .current_dir(dir.path())
            .secrets(&["topsecret".to_string()]);
        let err = cmd.run(&CancellationToken::new()).unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("topsecret"), "{}", message);
        assert!(message.contains("rev-parse"));
    }

    #[test]
    fn test_cancelled_token_never_spawns() {
        let token = CancellationToken::new();
        token.cancel();
        let err = GitCommand::new(["--version"]).run(&token).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_stdin_is_forwarded() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempdir().unwrap();
        git_in(dir.path(), &["init", "-q"], &CancellationToken::new()).unwrap();
        let out = GitCommand::new(["hash-object", "--stdin"])
            .current_dir(dir.path())
            .stdin(b"hello\n".to_vec())
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(out.stdout_str().trim(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_empty_tree_follows_object_format() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let cancel = CancellationToken::new();
        let sha1 = tempdir().unwrap();
        git_in(sha1.path(), &["init", "-q"], &cancel).unwrap();
        assert_eq!(
            empty_tree_id(sha1.path(), &cancel).unwrap(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );

        let sha256 = tempdir().unwrap();
        if git_in(sha256.path(), &["init", "-q", "--object-format=sha256"], &cancel).is_err() {
            eprintln!("git without sha256 support, skipping");
            return;
        }
        let id = empty_tree_id(sha256.path(), &cancel).unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(
            id,
            "6ef19b41225c5369f1c104d45d8d85efa9b057b53b14b4b9b939dd74decc5321"
        );
    }
}
