//! ffmpeg argument builder and subprocess runner.
//!
//! Arguments always travel as a list straight to `execve`; nothing is ever
//! composed into a shell string, so file names cannot inject flags or commands.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::EncodeError;

#[derive(Debug, Clone)]
struct Input {
    args: Vec<String>,
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output_args: Vec<String>,
    output: PathBuf,
    overwrite: bool,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
            overwrite: true,
        }
    }

    /// Add an input with its own options (placed before its `-i`).
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(std::iter::empty::<String>(), path)
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runs one ffmpeg process at a time per call, bounded by a timeout and a cancellation token.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: String,
    timeout: Duration,
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn locate(&self) -> Result<PathBuf, EncodeError> {
        which::which(&self.binary)
            .map_err(|e| EncodeError::EncoderNotFound(format!("{}: {}", self.binary, e)))
    }

    pub async fn run(&self, cmd: &FfmpegCommand, cancel: &CancellationToken) -> Result<(), EncodeError> {
        self.run_args(&cmd.build_args(), cancel).await
    }

    pub async fn run_args(&self, args: &[String], cancel: &CancellationToken) -> Result<(), EncodeError> {
        let program = self.locate()?;
        debug!(program = %program.display(), ?args, "Running encoder");

        let mut child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Drain stderr concurrently so a chatty encoder never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = tokio::select! {
            res = tokio::time::timeout(self.timeout, child.wait()) => Some(res),
            _ = cancel.cancelled() => None,
        };

        let status = match waited {
            Some(Ok(status)) => status?,
            Some(Err(_)) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Encoder timed out, killing process");
                let _ = child.kill().await;
                return Err(EncodeError::Timeout(self.timeout.as_secs()));
            }
            None => {
                warn!("Encoder cancelled, killing process");
                let _ = child.kill().await;
                return Err(EncodeError::Cancelled);
            }
        };

        if status.success() {
            return Ok(());
        }

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        Err(EncodeError::failed(status.code(), &stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_keep_their_own_options() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input_with(["-f", "concat"], "list.txt")
            .input("audio.mp3")
            .video_codec("libx264");

        let args = cmd.build_args();
        let concat = args.iter().position(|a| a == "concat").unwrap();
        let first_i = args.iter().position(|a| a == "-i").unwrap();
        let last_i = args.iter().rposition(|a| a == "-i").unwrap();

        assert!(concat < first_i);
        assert_eq!(args[first_i + 1], "list.txt");
        assert_eq!(args[last_i + 1], "audio.mp3");
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_hostile_file_names_stay_single_arguments() {
        let name = "a.jpg; rm -rf / #'$(reboot)'";
        let args = FfmpegCommand::new("out.mp4").input(name).build_args();
        assert!(args.iter().any(|a| a == name));
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let runner = FfmpegRunner::new("definitely-not-an-encoder-binary", Duration::from_secs(1));
        assert!(matches!(runner.locate(), Err(EncodeError::EncoderNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let runner = FfmpegRunner::new("sh", Duration::from_secs(5));
        let args = vec!["-c".to_string(), "echo 'No such file' >&2; exit 3".to_string()];

        let err = runner.run_args(&args, &CancellationToken::new()).await.unwrap_err();
        match err {
            EncodeError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "No such file");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_process_is_killed_on_timeout() {
        let runner = FfmpegRunner::new("sleep", Duration::from_millis(100));
        let args = vec!["10".to_string()];

        let started = std::time::Instant::now();
        let err = runner.run_args(&args, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, EncodeError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_stops_the_process() {
        let runner = FfmpegRunner::new("sleep", Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = runner.run_args(&["10".to_string()], &cancel).await.unwrap_err();
        assert!(matches!(err, EncodeError::Cancelled));
    }
}
