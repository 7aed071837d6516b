// gemflows — Interactive terminal input for `input` steps

use super::clipboard::SystemClipboard;
use super::InputSource;
use async_trait::async_trait;
use std::io::{Read, Write};

const DEFAULT_LINE_PROMPT: &str = "Input:";
const DEFAULT_MULTILINE_PROMPT: &str = "Paste input (end with Ctrl-D):";
const DEFAULT_CLIPBOARD_PROMPT: &str =
    "Copy the text you want to use, then press Enter to read from clipboard:";

/// Reads from the controlling terminal (stdin). Blocking reads run on the
/// blocking thread pool.
pub struct TerminalInput {
    clipboard: SystemClipboard,
}

impl TerminalInput {
    pub fn new(clipboard: SystemClipboard) -> Self {
        Self { clipboard }
    }
}

#[async_trait]
impl InputSource for TerminalInput {
    async fn read_line(&self, prompt: &str) -> anyhow::Result<String> {
        let prompt = format!("{} ", or_default(prompt, DEFAULT_LINE_PROMPT));

        tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let mut rl = rustyline::DefaultEditor::new()?;
            match rl.readline(&prompt) {
                Ok(line) => Ok(trim_line_end(&line).to_string()),
                // Ctrl-D on an empty line: nothing was entered.
                Err(rustyline::error::ReadlineError::Eof) => Ok(String::new()),
                Err(rustyline::error::ReadlineError::Interrupted) => {
                    anyhow::bail!("input cancelled")
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn read_until_end(&self, prompt: &str) -> anyhow::Result<String> {
        println!("{}", or_default(prompt, DEFAULT_MULTILINE_PROMPT));

        tokio::task::spawn_blocking(|| -> anyhow::Result<String> {
            let mut buf = String::new();
            std::io::stdin().lock().read_to_string(&mut buf)?;
            Ok(trim_line_end(&buf).to_string())
        })
        .await?
    }

    async fn read_clipboard_after_confirm(&self, prompt: &str) -> anyhow::Result<String> {
        println!("{}", or_default(prompt, DEFAULT_CLIPBOARD_PROMPT));
        print!("Press Enter when ready (or Ctrl-C to cancel): ");
        std::io::stdout().flush().ok();

        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            // Any answer, including EOF, counts as confirmation.
            let _ = std::io::stdin().read_line(&mut line);
        })
        .await?;

        let data = self.clipboard.read().await?;
        clipboard_text(&data)
    }
}

fn or_default<'a>(prompt: &'a str, fallback: &'a str) -> &'a str {
    if prompt.is_empty() {
        fallback
    } else {
        prompt
    }
}

fn trim_line_end(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n'])
}

/// Clipboard contents with trailing line breaks removed; blank contents are
/// an error.
pub fn clipboard_text(raw: &str) -> anyhow::Result<String> {
    let data = trim_line_end(raw);
    if data.trim().is_empty() {
        anyhow::bail!("clipboard is empty");
    }
    Ok(data.to_string())
}
