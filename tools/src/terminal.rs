//! Terminal collaborator and the default shell-backed runner.
//!
//! The host IDE normally owns a visible terminal; [`TerminalRunner`] is the
//! boundary. [`ShellTerminal`] runs the command through the detected shell,
//! in its own process group so a timeout kills the whole tree.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::ShellConfig;

/// One command to run in a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRequest {
    pub command: String,
    /// Terminal tab/session name the command runs under.
    pub identifier: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("failed to start `{shell}`: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },
    #[error("working directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),
    #[error("command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type TerminalFut<'a> = Pin<Box<dyn Future<Output = Result<String, TerminalError>> + Send + 'a>>;

/// Runs commands on behalf of the agent and returns their combined output.
pub trait TerminalRunner: Send + Sync {
    fn execute(&self, request: TerminalRequest) -> TerminalFut<'_>;
}

// ============================================================================
// Shell detection
// ============================================================================

/// Detected shell for command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    pub binary: PathBuf,
    /// Arguments placed before the command (e.g. `["-c"]` or `["/C"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Config override first, then platform detection.
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        let args = cfg.args.clone().unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: "configured".into(),
        };
    }
    detect_platform_shell()
}

fn default_args_for(binary: &str) -> Vec<String> {
    let name = Path::new(binary)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(binary)
        .to_lowercase();

    match name.as_str() {
        "cmd" => vec!["/C".to_string()],
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        _ => vec!["-c".to_string()],
    }
}

#[cfg(windows)]
fn detect_platform_shell() -> DetectedShell {
    for name in ["pwsh", "powershell"] {
        if let Ok(binary) = which::which(name) {
            return DetectedShell {
                binary,
                args: vec!["-NoProfile".to_string(), "-Command".to_string()],
                name: name.into(),
            };
        }
    }
    let comspec = std::env::var("ComSpec")
        .map_or_else(|_| PathBuf::from(r"C:\Windows\System32\cmd.exe"), PathBuf::from);
    DetectedShell {
        binary: comspec,
        args: vec!["/C".to_string()],
        name: "cmd".into(),
    }
}

#[cfg(not(windows))]
fn detect_platform_shell() -> DetectedShell {
    if let Ok(shell) = std::env::var("SHELL") {
        let path = Path::new(&shell);
        if path.exists() {
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("user-shell")
                .to_string();
            return DetectedShell {
                binary: PathBuf::from(&shell),
                args: vec!["-c".to_string()],
                name,
            };
        }
    }
    if let Ok(binary) = which::which("bash") {
        return DetectedShell {
            binary,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }
    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}

// ============================================================================
// Process management
// ============================================================================

/// Kills a child process (and its process group on Unix) on drop.
///
/// Call `disarm()` once the process has exited normally.
struct ChildGuard {
    child: Option<tokio::process::Child>,
}

impl ChildGuard {
    fn new(child: tokio::process::Child) -> Self {
        Self { child: Some(child) }
    }

    fn child_mut(&mut self) -> Option<&mut tokio::process::Child> {
        self.child.as_mut()
    }

    fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
                // SAFETY: killpg only sends a signal; pid came from our own spawn.
                if unsafe { libc::killpg(pid, libc::SIGKILL) } == -1 {
                    let _ = child.start_kill();
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
        let _ = child.try_wait();
    }
}

/// Put the child in its own session so `killpg` reaches its descendants.
#[cfg(unix)]
fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and runs between fork and exec.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::debug!("terminal stream closed early: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Default [`TerminalRunner`]: spawns the command through a shell.
#[derive(Debug, Clone)]
pub struct ShellTerminal {
    shell: DetectedShell,
}

impl ShellTerminal {
    #[must_use]
    pub fn new(shell: DetectedShell) -> Self {
        Self { shell }
    }

    #[must_use]
    pub fn shell(&self) -> &DetectedShell {
        &self.shell
    }

    async fn run(&self, request: TerminalRequest) -> Result<String, TerminalError> {
        let mut command = Command::new(&self.shell.binary);
        command
            .args(&self.shell.args)
            .arg(&request.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &request.working_dir {
            if !dir.is_dir() {
                return Err(TerminalError::MissingWorkingDir(dir.clone()));
            }
            command.current_dir(dir);
        }
        #[cfg(unix)]
        set_new_session(&mut command);

        tracing::info!(
            terminal = %request.identifier,
            shell = %self.shell,
            command = %request.command,
            "running terminal command"
        );

        let child = command.spawn().map_err(|source| TerminalError::Spawn {
            shell: self.shell.binary.display().to_string(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);
        let Some(child) = guard.child_mut() else {
            return Ok(String::new());
        };
        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        // Dropping the guard on timeout kills the process group.
        let status = tokio::time::timeout(request.timeout, child.wait())
            .await
            .map_err(|_| TerminalError::TimedOut(request.timeout))??;
        guard.disarm();

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        let mut output = stdout;
        if !stderr.trim().is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&stderr);
        }
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&format!("[exit code {code}]"));
        }
        Ok(output)
    }
}

impl TerminalRunner for ShellTerminal {
    fn execute(&self, request: TerminalRequest) -> TerminalFut<'_> {
        Box::pin(self.run(request))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{
        ShellConfig, ShellTerminal, TerminalError, TerminalRequest, TerminalRunner,
        default_args_for, detect_shell,
    };

    fn request(command: &str, timeout: Duration) -> TerminalRequest {
        TerminalRequest {
            command: command.to_string(),
            identifier: "Steward".to_string(),
            working_dir: None,
            timeout,
        }
    }

    #[test]
    fn default_args_by_shell_name() {
        assert_eq!(default_args_for("pwsh"), vec!["-NoProfile", "-Command"]);
        assert_eq!(default_args_for("powershell.exe"), vec!["-NoProfile", "-Command"]);
        assert_eq!(default_args_for("/bin/bash"), vec!["-c"]);
        assert_eq!(default_args_for("/usr/local/bin/fish"), vec!["-c"]);
    }

    #[cfg(windows)]
    #[test]
    fn default_args_for_cmd() {
        assert_eq!(default_args_for(r"C:\Windows\System32\cmd.exe"), vec!["/C"]);
    }

    #[test]
    fn config_override_wins() {
        let config = ShellConfig {
            binary: Some("fish".to_string()),
            args: None,
        };
        let shell = detect_shell(Some(&config));
        assert_eq!(shell.binary, PathBuf::from("fish"));
        assert_eq!(shell.args, vec!["-c"]);
        assert_eq!(shell.name, "configured");
    }

    #[test]
    fn platform_detection_returns_a_shell() {
        let shell = detect_shell(None);
        assert!(!shell.binary.as_os_str().is_empty());
        assert!(!shell.args.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_command_and_collects_output() {
        let terminal = ShellTerminal::new(detect_shell(None));
        let out = terminal
            .execute(request("echo hello; echo oops 1>&2", Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(out.contains("hello"));
        assert!(out.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported_in_output() {
        let terminal = ShellTerminal::new(detect_shell(None));
        let out = terminal
            .execute(request("exit 3", Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(out.contains("[exit code 3]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_command() {
        let terminal = ShellTerminal::new(detect_shell(None));
        let err = terminal
            .execute(request("sleep 5", Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, TerminalError::TimedOut(_)));
    }

    #[tokio::test]
    async fn missing_working_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let terminal = ShellTerminal::new(detect_shell(None));
        let mut req = request("echo hi", Duration::from_secs(5));
        req.working_dir = Some(dir.path().join("absent"));
        let err = terminal.execute(req).await.unwrap_err();
        assert!(matches!(err, TerminalError::MissingWorkingDir(_)));
    }
}
