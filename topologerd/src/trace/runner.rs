use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use crate::config::TraceConfig;
use crate::error::TraceError;
use crate::target::TargetKind;

/// Program and arguments for one run, built for the host OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Pick the tool for `os` (as in `std::env::consts::OS`).
    /// `target` must already be sanitized.
    pub fn for_platform(
        os: &str,
        kind: TargetKind,
        target: &str,
        wait_secs: u64,
    ) -> Result<Self, TraceError> {
        match os {
            "linux" | "macos" => {
                let program = if kind == TargetKind::Ipv6 {
                    "traceroute6"
                } else {
                    "traceroute"
                };
                Ok(Self {
                    program,
                    args: vec!["-w".to_string(), wait_secs.to_string(), target.to_string()],
                })
            }
            "windows" => Ok(Self {
                program: "tracert",
                args: vec![
                    "-w".to_string(),
                    (wait_secs * 1000).to_string(),
                    target.to_string(),
                ],
            }),
            other => Err(TraceError::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Run the tool and return its standard output.
pub async fn run(command: &ToolCommand, config: &TraceConfig) -> Result<String, TraceError> {
    let mut child = Command::new(command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => TraceError::ToolMissing(command.program.to_string()),
            _ => TraceError::Io(e),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let limit = config.max_output_bytes;

    let collect = async {
        let (out, err) = tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit))?;
        let status = child.wait().await?;
        Ok::<_, TraceError>((status, out, err))
    };

    // On timeout the child is dropped and killed
    let (status, stdout, stderr) =
        match tokio::time::timeout(Duration::from_secs(config.timeout_secs), collect).await {
            Ok(result) => result?,
            Err(_) => return Err(TraceError::Timeout(config.timeout_secs)),
        };

    tracing::debug!(
        "{} exited with {} (stdout {} bytes, stderr {} bytes)",
        command.program,
        status,
        stdout.len(),
        stderr.len()
    );

    check_output(status.success(), status.to_string(), stdout, stderr)
}

/// Decide whether a finished run produced usable output.
fn check_output(
    success: bool,
    status: String,
    stdout: String,
    stderr: String,
) -> Result<String, TraceError> {
    if stdout.trim().is_empty() {
        if !stderr.trim().is_empty() {
            tracing::error!("Traceroute failed with stderr only: {}", truncate(&stderr, 200));
            return Err(TraceError::ToolFailed(stderr.trim().to_string()));
        }
        if !success {
            return Err(TraceError::ToolFailed(format!("exited with {}", status)));
        }
    } else if !success {
        tracing::warn!("Traceroute exited with {}, parsing partial output", status);
    }
    Ok(stdout)
}

async fn read_capped<R>(reader: Option<R>, limit: usize) -> Result<String, TraceError>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    let mut buf = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(TraceError::OutputTooLarge(limit));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Shorten text for log lines
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... ({} more bytes)", &text[..idx], text.len() - idx),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_commands() {
        let v4 = ToolCommand::for_platform("linux", TargetKind::Ipv4, "8.8.8.8", 3).unwrap();
        assert_eq!(v4.program, "traceroute");
        assert_eq!(v4.args, vec!["-w", "3", "8.8.8.8"]);

        let v6 = ToolCommand::for_platform("macos", TargetKind::Ipv6, "2001:4860:4860::8888", 3)
            .unwrap();
        assert_eq!(v6.program, "traceroute6");

        let domain = ToolCommand::for_platform("linux", TargetKind::Domain, "example.com", 3)
            .unwrap();
        assert_eq!(domain.display(), "traceroute -w 3 example.com");
    }

    #[test]
    fn test_windows_command_uses_milliseconds() {
        let cmd = ToolCommand::for_platform("windows", TargetKind::Ipv6, "::1", 3).unwrap();
        assert_eq!(cmd.program, "tracert");
        assert_eq!(cmd.args, vec!["-w", "3000", "::1"]);
    }

    #[test]
    fn test_unsupported_platform() {
        let err = ToolCommand::for_platform("freebsd", TargetKind::Ipv4, "8.8.8.8", 3).unwrap_err();
        assert!(matches!(err, TraceError::UnsupportedPlatform(os) if os == "freebsd"));
    }

    #[test]
    fn test_stderr_only_is_failure() {
        let err = check_output(false, "exit status: 1".into(), String::new(), "unknown host".into())
            .unwrap_err();
        assert!(matches!(err, TraceError::ToolFailed(msg) if msg == "unknown host"));
    }

    #[test]
    fn test_nonzero_exit_with_output_is_kept() {
        let out = check_output(false, "exit status: 1".into(), "header\n 1  * * *\n".into(), String::new())
            .unwrap();
        assert!(out.contains("* * *"));
    }

    #[test]
    fn test_silent_failure() {
        let err = check_output(false, "exit status: 2".into(), String::new(), String::new()).unwrap_err();
        assert!(matches!(err, TraceError::ToolFailed(_)));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc... (3 more bytes)");
    }

    #[tokio::test]
    async fn test_read_capped_limit() {
        let data: &[u8] = b"0123456789";
        let err = read_capped(Some(data), 4).await.unwrap_err();
        assert!(matches!(err, TraceError::OutputTooLarge(4)));

        let data: &[u8] = b"0123";
        assert_eq!(read_capped(Some(data), 4).await.unwrap(), "0123");
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let command = ToolCommand {
            program: "topologer-no-such-traceroute",
            args: vec![],
        };
        let err = run(&command, &TraceConfig::default()).await.unwrap_err();
        assert!(matches!(err, TraceError::ToolMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_past_deadline_times_out() {
        let command = ToolCommand {
            program: "sleep",
            args: vec!["5".to_string()],
        };
        let config = TraceConfig {
            timeout_secs: 1,
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let err = run(&command, &config).await.unwrap_err();
        assert!(matches!(err, TraceError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
