//! Interactive URL prompt for `mediaq send`

use mediaq::job::{JobDescriptor, has_http_scheme};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use thiserror::Error;

const PROMPT: &str = "Enter the URL of the audio/video: ";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("prompt failed: {0}")]
    Readline(#[from] ReadlineError),
}

/// Ask until a http(s) URL is entered. Ctrl-C / Ctrl-D cancel.
pub fn ask_url() -> Result<String, PromptError> {
    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => match check_answer(&line) {
                Ok(url) => return Ok(url),
                Err(message) => println!("{}", message),
            },
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                return Err(PromptError::Cancelled);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn check_answer(line: &str) -> Result<String, String> {
    let answer = line.trim();
    if answer.is_empty() {
        return Err("A URL is required".to_string());
    }
    if !has_http_scheme(answer) {
        return Err("URL must start with http:// or https://".to_string());
    }
    JobDescriptor::new(answer)
        .map(|job| job.url)
        .map_err(|e| format!("Invalid URL: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_answer() {
        assert_eq!(
            check_answer("  https://example.com/v \n").as_deref(),
            Ok("https://example.com/v")
        );
        assert_eq!(check_answer("").unwrap_err(), "A URL is required");
        assert_eq!(
            check_answer("example.com").unwrap_err(),
            "URL must start with http:// or https://"
        );
    }

    #[test]
    fn test_scheme_without_host_asks_again() {
        for answer in ["http://", "https://", "http://:8080/v"] {
            let message = check_answer(answer).unwrap_err();
            assert!(message.starts_with("Invalid URL"), "{}: {}", answer, message);
        }
    }
}
