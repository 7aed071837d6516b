// gemflows — Side-effect capabilities used by steps (input, clipboard, files)

pub mod clipboard;
pub mod file;
pub mod terminal;

use async_trait::async_trait;
use std::path::Path;

/// Source of interactive text for `input` steps.
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Read a single line, without its line terminator.
    async fn read_line(&self, prompt: &str) -> anyhow::Result<String>;

    /// Read everything until end of input.
    async fn read_until_end(&self, prompt: &str) -> anyhow::Result<String>;

    /// Ask the user to copy text, wait for confirmation, then read the
    /// clipboard. Fails when the clipboard is empty or blank.
    async fn read_clipboard_after_confirm(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Destination for `clipboard` steps.
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    async fn write(&self, text: &str) -> anyhow::Result<()>;
}

/// Destination for `save` steps.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn write(&self, path: &Path, bytes: &[u8]) -> anyhow::Result<()>;
}
