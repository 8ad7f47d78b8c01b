use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Speaks text aloud. The returned future resolves once playback has finished.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextInput {
    /// Appended as the last command-line argument
    Argument,
    /// Written to the synthesizer's stdin
    Stdin,
}

/// External text-to-speech program.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub program: String,
    pub args: Vec<String>,
    pub text_input: TextInput,
}

impl Default for SpeechConfig {
    #[cfg(target_os = "windows")]
    fn default() -> Self {
        Self {
            program: "powershell".to_string(),
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                "Add-Type -AssemblyName System.Speech; \
                 (New-Object System.Speech.Synthesis.SpeechSynthesizer).Speak([Console]::In.ReadToEnd())"
                    .to_string(),
            ],
            text_input: TextInput::Stdin,
        }
    }

    #[cfg(target_os = "macos")]
    fn default() -> Self {
        Self {
            program: "say".to_string(),
            args: Vec::new(),
            text_input: TextInput::Argument,
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            args: vec!["--stdin".to_string()],
            text_input: TextInput::Stdin,
        }
    }
}

/// Drives the platform synthesizer as a child process. Dropping the `speak`
/// future kills the child, which is how an in-flight utterance is cancelled.
pub struct SystemSpeech {
    config: SpeechConfig,
}

impl SystemSpeech {
    pub fn new(config: SpeechConfig) -> Self {
        Self { config }
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if self.config.text_input == TextInput::Argument {
            cmd.arg(text);
        }
        cmd.stdin(match self.config.text_input {
            TextInput::Stdin => Stdio::piped(),
            TextInput::Argument => Stdio::null(),
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SpeechOutput for SystemSpeech {
    async fn speak(&self, text: &str) -> Result<(), AppError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let mut child = self.command(text).spawn().map_err(|e| {
            AppError::speech(format!(
                "Failed to start speech program '{}': {}",
                self.config.program, e
            ))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(text.as_bytes()).await {
                Ok(()) => {}
                // The exit status below explains why the child went away.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(AppError::speech(format!(
                        "Failed to send text to synthesizer: {}",
                        e
                    )))
                }
            }
            // Closing stdin tells the synthesizer the utterance is complete.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AppError::speech(format!("Speech playback failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::speech(format!(
                "Speech program '{}' exited with {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!(
            "Spoke {} chars in {:.1} s",
            text.chars().count(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn speech(program: &str, args: &[&str], text_input: TextInput) -> SystemSpeech {
        SystemSpeech::new(SpeechConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            text_input,
        })
    }

    #[tokio::test]
    async fn test_stdin_synthesizer_completes() {
        let tts = speech("sh", &["-c", "cat > /dev/null"], TextInput::Stdin);
        tts.speak("A goldfish is a freshwater fish.").await.unwrap();
    }

    #[tokio::test]
    async fn test_argument_synthesizer_receives_text() {
        let tts = speech("sh", &["-c", "test \"$0\" = hello"], TextInput::Argument);
        tts.speak("hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_synthesizer_is_speech_error() {
        let tts = speech("sh", &["-c", "echo no audio device >&2; exit 3"], TextInput::Stdin);
        let err = tts.speak("hello").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Speech);
        assert!(err.message.contains("no audio device"));
    }

    #[tokio::test]
    async fn test_missing_program_is_speech_error() {
        let tts = speech("object-lens-no-such-tts", &[], TextInput::Argument);
        let err = tts.speak("hello").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Speech);
    }

    #[tokio::test]
    async fn test_blank_text_is_silent_no_op() {
        let tts = speech("object-lens-no-such-tts", &[], TextInput::Argument);
        tts.speak("  \n").await.unwrap();
    }
}
