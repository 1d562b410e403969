use anyhow::Context as _;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

/// Base `ffmpeg` invocation with quiet logging.
pub(crate) fn ffmpeg_command() -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error"]);
    cmd
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// A running `ffmpeg` child with piped stdin/stdout and a background stderr drain.
///
/// Dropping an unfinished process kills it.
pub(crate) struct FfmpegProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

impl FfmpegProcess {
    /// Spawn `cmd` and hand back its stdout for a reader thread.
    pub(crate) fn spawn(mut cmd: Command) -> anyhow::Result<(Self, ChildStdout)> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg (is it installed and on PATH?)")?;

        let stdin = child.stdin.take().context("failed to open ffmpeg stdin")?;
        let stdout = child.stdout.take().context("failed to open ffmpeg stdout")?;
        let mut stderr = child.stderr.take().context("failed to open ffmpeg stderr")?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        Ok((
            Self {
                child: Some(child),
                stdin: Some(stdin),
                stderr_drain: Some(stderr_drain),
            },
            stdout,
        ))
    }

    /// Write bytes to the child's stdin. Blocks while the pipe is full.
    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(bytes),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "ffmpeg stdin is already closed",
            )),
        }
    }

    /// Signal end of input.
    pub(crate) fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    /// Close stdin, wait for exit, and return stderr text on failure.
    pub(crate) fn wait(&mut self) -> Result<(), String> {
        self.close_stdin();
        let mut child = self
            .child
            .take()
            .ok_or_else(|| "ffmpeg process was already waited on".to_owned())?;
        let status = child
            .wait()
            .map_err(|e| format!("failed to wait for ffmpeg to finish: {e}"))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "ffmpeg stderr drain thread panicked".to_owned())?
                .map_err(|e| format!("ffmpeg stderr read failed: {e}"))?,
            None => Vec::new(),
        };
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(format!("ffmpeg exited with status {status}: {}", stderr.trim()));
        }
        Ok(())
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        self.close_stdin();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
