// gemflows — System clipboard via platform helper programs

use super::ClipboardSink;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A helper program invocation, e.g. `xclip -selection clipboard`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HelperCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }
}

/// Clipboard access through `pbcopy`/`pbpaste`, `clip`/PowerShell, or the
/// first of `wl-copy`, `xclip`, `xsel` found on Linux.
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    copy: Option<HelperCommand>,
    paste: Option<HelperCommand>,
    timeout: Duration,
}

impl SystemClipboard {
    /// Probe the host for clipboard helpers.
    pub async fn detect() -> Self {
        let (copy, paste) = if cfg!(target_os = "macos") {
            (
                Some(HelperCommand::new("pbcopy", &[])),
                Some(HelperCommand::new("pbpaste", &[])),
            )
        } else if cfg!(target_os = "windows") {
            (
                Some(HelperCommand::new("cmd", &["/c", "clip"])),
                Some(HelperCommand::new(
                    "powershell",
                    &["-NoProfile", "-Command", "Get-Clipboard -Raw"],
                )),
            )
        } else {
            let copy = first_available(&[
                HelperCommand::new("wl-copy", &[]),
                HelperCommand::new("xclip", &["-selection", "clipboard"]),
                HelperCommand::new("xsel", &["--clipboard", "--input"]),
            ])
            .await;
            let paste = first_available(&[
                HelperCommand::new("wl-paste", &["-n"]),
                HelperCommand::new("xclip", &["-selection", "clipboard", "-o"]),
                HelperCommand::new("xsel", &["--clipboard", "--output"]),
            ])
            .await;
            (copy, paste)
        };

        tracing::debug!(
            copy = ?copy.as_ref().map(|c| &c.program),
            paste = ?paste.as_ref().map(|c| &c.program),
            "Clipboard helpers detected"
        );
        Self::with_helpers(copy, paste)
    }

    /// Use explicit helpers instead of probing the host.
    pub fn with_helpers(copy: Option<HelperCommand>, paste: Option<HelperCommand>) -> Self {
        Self {
            copy,
            paste,
            timeout: Duration::from_secs(10),
        }
    }

    /// Current clipboard contents.
    pub async fn read(&self) -> anyhow::Result<String> {
        let helper = self.paste.as_ref().ok_or_else(|| {
            anyhow::anyhow!("no clipboard helper found (install wl-paste, xclip, or xsel)")
        })?;

        let output = tokio::time::timeout(self.timeout, helper.command().output())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", helper.program, self.timeout))??;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                helper.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ClipboardSink for SystemClipboard {
    async fn write(&self, text: &str) -> anyhow::Result<()> {
        let helper = self.copy.as_ref().ok_or_else(|| {
            anyhow::anyhow!("no clipboard helper found (install wl-copy, xclip, or xsel)")
        })?;

        let run = async {
            let mut child = helper
                .command()
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", helper.program, self.timeout))??;

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                helper.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

async fn first_available(candidates: &[HelperCommand]) -> Option<HelperCommand> {
    for candidate in candidates {
        if on_path(&candidate.program).await {
            return Some(candidate.clone());
        }
    }
    None
}

async fn on_path(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
