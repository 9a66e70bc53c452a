//! Git child-process invocation.
//!
//! All upstream and local Git work shells out to the system `git` binary
//! with the repository mirror as the working directory. Output streams the
//! caller does not claim are forwarded line by line to the process log,
//! tagged with a command id and the stream name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// A `git` invocation bound to a repository working directory.
pub struct GitCommand {
    repo: String,
    dir: PathBuf,
    args: Vec<String>,
    id: u64,
}

impl GitCommand {
    pub fn new(repo: &str, dir: &Path, args: &[&str]) -> Self {
        Self {
            repo: repo.to_string(),
            dir: dir.to_path_buf(),
            args: args.iter().map(|s| s.to_string()).collect(),
            id: NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(&self.args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Forward lines from an unclaimed output stream to the process log.
    fn log_lines<R>(&self, reader: R, stream: &'static str) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let repo = self.repo.clone();
        let id = self.id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(repo = %repo, command = id, stream, "{line}");
            }
        })
    }

    /// Run to completion with both output streams line-logged.
    pub async fn run(&self) -> Result<()> {
        debug!(repo = %self.repo, command = self.id, args = ?self.args, "starting git");

        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("failed to spawn git {:?}", self.args))?;

        let out = self.log_lines(child.stdout.take().context("child stdout missing")?, "out");
        let err = self.log_lines(child.stderr.take().context("child stderr missing")?, "err");

        let status = child.wait().await.context("failed to wait for git")?;
        let _ = tokio::join!(out, err);

        debug!(repo = %self.repo, command = self.id, %status, "git finished");
        if !status.success() {
            bail!("git {:?} exited with {status}", self.args);
        }
        Ok(())
    }

    /// Run with `input` on stdin and stdout captured to memory; stderr is
    /// line-logged.
    ///
    /// Stdin is written concurrently with the stdout read so a child that
    /// interleaves reading and writing cannot deadlock on a full pipe.
    pub async fn output(&self, input: &[u8]) -> Result<Vec<u8>> {
        debug!(repo = %self.repo, command = self.id, args = ?self.args, "starting git");

        let mut cmd = self.command();
        cmd.stdin(Stdio::piped());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn git {:?}", self.args))?;

        let mut stdin = child.stdin.take().context("child stdin missing")?;
        let mut stdout = child.stdout.take().context("child stdout missing")?;
        let err = self.log_lines(child.stderr.take().context("child stderr missing")?, "err");

        let input = input.to_vec();
        let writer = tokio::spawn(async move {
            // Dropping stdin afterwards closes the pipe and signals EOF.
            let _ = stdin.write_all(&input).await;
        });

        let mut captured = Vec::new();
        stdout
            .read_to_end(&mut captured)
            .await
            .context("failed to read git stdout")?;

        let status = child.wait().await.context("failed to wait for git")?;
        let _ = tokio::join!(writer, err);

        debug!(
            repo = %self.repo,
            command = self.id,
            %status,
            bytes = captured.len(),
            "git finished"
        );
        if !status.success() {
            bail!("git {:?} exited with {status}", self.args);
        }
        Ok(captured)
    }

    /// Spawn with stdout handed to the caller; stderr is line-logged.
    ///
    /// The caller drains the returned stdout and then awaits the child.
    pub fn stream(&self) -> Result<(ChildStdout, Child)> {
        debug!(repo = %self.repo, command = self.id, args = ?self.args, "starting git");

        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("failed to spawn git {:?}", self.args))?;

        let stdout = child.stdout.take().context("child stdout missing")?;
        self.log_lines(child.stderr.take().context("child stderr missing")?, "err");

        Ok((stdout, child))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
