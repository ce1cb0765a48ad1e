use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

use dialoguer::{Input, theme::ColorfulTheme};
use tracing::debug;

use crate::error::{Error, Result};

/// Source of one-time codes when the operator types them in
pub trait TokenPrompt {
    fn read_token(&self, serial_number: &str) -> Result<String>;
}

/// How the second factor is supplied for one invocation
pub enum MfaMode<'a> {
    /// Ask on the terminal when the first hop needs a code
    Interactive(&'a dyn TokenPrompt),
    /// Code passed on the command line
    Inline(String),
}

impl MfaMode<'_> {
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// Terminal prompt bounded by a timeout. The prompt is drawn on stderr.
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    timeout: Duration,
}

impl TerminalPrompt {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TokenPrompt for TerminalPrompt {
    fn read_token(&self, serial_number: &str) -> Result<String> {
        let (tx, rx) = mpsc::channel();
        let prompt = format!("MFA code for {serial_number}");

        // dialoguer blocks on the terminal; the reader thread is abandoned on timeout
        thread::spawn(move || {
            let answer = Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .validate_with(|input: &String| {
                    if is_valid_code(input) {
                        Ok(())
                    } else {
                        Err("MFA codes are 6 digits")
                    }
                })
                .interact_text();
            let _ = tx.send(answer);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(code)) => {
                debug!("Read MFA code from terminal");
                Ok(code.trim().to_string())
            }
            Ok(Err(dialoguer::Error::IO(e))) => Err(Error::io("Failed to read MFA code from", "stdin", e)),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout {
                what: "MFA prompt".to_string(),
                after: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::io(
                "Failed to read MFA code from",
                "stdin",
                std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            )),
        }
    }
}

/// TOTP codes issued by AWS virtual and hardware devices are six digits
pub fn is_valid_code(code: &str) -> bool {
    let code = code.trim();
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}
