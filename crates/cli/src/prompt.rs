//! Terminal email prompt for cross-device sign-in.

use std::io::{BufRead, Write};

use packup_client::providers::EmailPrompt;

/// Asks for the email on stdin. An empty line declines.
pub struct StdinPrompt;

impl EmailPrompt for StdinPrompt {
    #[allow(clippy::print_stderr)]
    fn prompt_for_email(&self, message: &str) -> Option<String> {
        eprint!("{message}: ");
        std::io::stderr().flush().ok()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok()?;
        let answer = line.trim();
        (!answer.is_empty()).then(|| answer.to_string())
    }
}
