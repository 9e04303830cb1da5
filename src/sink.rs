//! Input injection sink
//!
//! Everything that touches the real desktop (pointer, keyboard, clipboard)
//! goes through [`InjectionSink`]. The session only interprets the result.
//! [`CommandSink`] drives `xdotool` and `xclip`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Failure reported by an injection sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InjectionError(pub String);

impl InjectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// How a key is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStroke {
    /// Press then release
    Tap,
    Down,
    Up,
}

/// Host capability to inject input and access the clipboard
#[async_trait]
pub trait InjectionSink: Send + Sync {
    /// Press and release `button` once at (x, y)
    async fn click(&self, x: i32, y: i32, button: u8) -> Result<(), InjectionError>;

    async fn move_pointer(&self, x: i32, y: i32) -> Result<(), InjectionError>;

    /// Press or release `button` at (x, y)
    async fn button(&self, x: i32, y: i32, button: u8, pressed: bool) -> Result<(), InjectionError>;

    /// Scroll by whole notches; negative `dy` scrolls up, negative `dx` left
    async fn scroll(&self, x: i32, y: i32, dx: i32, dy: i32) -> Result<(), InjectionError>;

    async fn key(&self, key: &str, stroke: KeyStroke) -> Result<(), InjectionError>;

    async fn type_text(&self, text: &str) -> Result<(), InjectionError>;

    async fn set_clipboard(&self, text: &str) -> Result<(), InjectionError>;

    async fn get_clipboard(&self) -> Result<String, InjectionError>;
}

/// Sink backed by the `xdotool` and `xclip` command-line tools
#[derive(Debug, Clone)]
pub struct CommandSink {
    display: Option<String>,
    timeout: Duration,
}

impl Default for CommandSink {
    fn default() -> Self {
        Self {
            display: None,
            timeout: Duration::from_secs(5),
        }
    }
}

impl CommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// Target a specific X display instead of the inherited `DISPLAY`
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Per-command time limit
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(display) = &self.display {
            cmd.env("DISPLAY", display);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        cmd
    }

    /// Run a command to completion, returning its stdout
    async fn run(&self, program: &str, args: &[String], input: Option<&str>) -> Result<String, InjectionError> {
        debug!("Running {} {:?}", program, args);
        let mut cmd = self.command(program);
        cmd.args(args);
        if input.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let work = async {
            let mut child = cmd
                .spawn()
                .map_err(|e| InjectionError(format!("failed to start {program}: {e}")))?;
            if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
                stdin
                    .write_all(text.as_bytes())
                    .await
                    .map_err(|e| InjectionError(format!("failed to write to {program}: {e}")))?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| InjectionError(format!("{program} failed: {e}")))
        };

        let output = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| InjectionError(format!("{program} timed out after {:?}", self.timeout)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(InjectionError(if stderr.is_empty() {
                format!("{program} exited with {}", output.status)
            } else {
                format!("{program}: {stderr}")
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn xdotool(&self, args: Vec<String>) -> Result<(), InjectionError> {
        self.run("xdotool", &args, None).await.map(|_| ())
    }
}

/// xdotool argument lists, kept separate from process spawning
mod args {
    pub fn click(x: i32, y: i32, button: u8) -> Vec<String> {
        vec![
            "mousemove".into(),
            x.to_string(),
            y.to_string(),
            "click".into(),
            button.to_string(),
        ]
    }

    pub fn button(x: i32, y: i32, button: u8, pressed: bool) -> Vec<String> {
        let verb = if pressed { "mousedown" } else { "mouseup" };
        vec!["mousemove".into(), x.to_string(), y.to_string(), verb.into(), button.to_string()]
    }

    /// Buttons 4/5 scroll vertically, 6/7 horizontally
    pub fn scroll(x: i32, y: i32, dx: i32, dy: i32) -> Vec<String> {
        let mut args = vec!["mousemove".into(), x.to_string(), y.to_string()];
        for (delta, negative, positive) in [(dy, 4, 5), (dx, 6, 7)] {
            if delta != 0 {
                let button: u8 = if delta < 0 { negative } else { positive };
                args.extend([
                    "click".into(),
                    "--repeat".into(),
                    delta.unsigned_abs().to_string(),
                    button.to_string(),
                ]);
            }
        }
        args
    }

    pub fn key(key: &str, stroke: super::KeyStroke) -> Vec<String> {
        let verb = match stroke {
            super::KeyStroke::Tap => "key",
            super::KeyStroke::Down => "keydown",
            super::KeyStroke::Up => "keyup",
        };
        vec![verb.into(), key.into()]
    }

    pub fn type_text(text: &str) -> Vec<String> {
        vec!["type".into(), "--clearmodifiers".into(), "--".into(), text.into()]
    }
}

#[async_trait]
impl InjectionSink for CommandSink {
    async fn click(&self, x: i32, y: i32, button: u8) -> Result<(), InjectionError> {
        self.xdotool(args::click(x, y, button)).await
    }

    async fn move_pointer(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.xdotool(vec!["mousemove".into(), x.to_string(), y.to_string()]).await
    }

    async fn button(&self, x: i32, y: i32, button: u8, pressed: bool) -> Result<(), InjectionError> {
        self.xdotool(args::button(x, y, button, pressed)).await
    }

    async fn scroll(&self, x: i32, y: i32, dx: i32, dy: i32) -> Result<(), InjectionError> {
        self.xdotool(args::scroll(x, y, dx, dy)).await
    }

    async fn key(&self, key: &str, stroke: KeyStroke) -> Result<(), InjectionError> {
        self.xdotool(args::key(key, stroke)).await
    }

    async fn type_text(&self, text: &str) -> Result<(), InjectionError> {
        self.xdotool(args::type_text(text)).await
    }

    async fn set_clipboard(&self, text: &str) -> Result<(), InjectionError> {
        let args = ["-selection".to_string(), "clipboard".to_string()];
        self.run("xclip", &args, Some(text)).await.map(|_| ())
    }

    async fn get_clipboard(&self) -> Result<String, InjectionError> {
        let args = ["-selection".to_string(), "clipboard".to_string(), "-o".to_string()];
        self.run("xclip", &args, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_args() {
        assert_eq!(args::click(10, 20, 1), ["mousemove", "10", "20", "click", "1"]);
        assert_eq!(args::button(1, 2, 3, false), ["mousemove", "1", "2", "mouseup", "3"]);
    }

    #[test]
    fn test_scroll_args() {
        assert_eq!(
            args::scroll(5, 6, 0, -3),
            ["mousemove", "5", "6", "click", "--repeat", "3", "4"]
        );
        assert_eq!(
            args::scroll(5, 6, 2, 1),
            ["mousemove", "5", "6", "click", "--repeat", "1", "5", "click", "--repeat", "2", "7"]
        );
        assert_eq!(args::scroll(0, 0, 0, 0), ["mousemove", "0", "0"]);
    }

    #[test]
    fn test_key_args() {
        assert_eq!(args::key("Return", KeyStroke::Tap), ["key", "Return"]);
        assert_eq!(args::key("shift", KeyStroke::Down), ["keydown", "shift"]);
        assert_eq!(args::key("shift", KeyStroke::Up), ["keyup", "shift"]);
        assert_eq!(args::type_text("-rf"), ["type", "--clearmodifiers", "--", "-rf"]);
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_injection_error() {
        let sink = CommandSink::new();
        let err = sink
            .run("area-pilot-no-such-tool", &[], None)
            .await
            .unwrap_err();
        assert!(err.0.contains("area-pilot-no-such-tool"));
    }
}
