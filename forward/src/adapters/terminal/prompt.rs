// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::{BufRead, Write};

use anyhow::Context;

/// One keyboard-interactive question from the login host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub echo: bool,
}

/// Asks every question on the controlling terminal. Prompts go to stderr so
/// stdout only carries session progress.
pub async fn answer_questions(
    name: &str,
    instructions: &str,
    questions: Vec<Question>,
) -> anyhow::Result<Vec<String>> {
    let header = header_lines(name, instructions);
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
        for line in &header {
            eprintln!("{line}");
        }
        questions
            .iter()
            .map(|question| prompt_value(&question.text, question.echo))
            .collect()
    })
    .await
    .context("prompt task failed")?
}

fn header_lines(name: &str, instructions: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if !name.trim().is_empty() {
        lines.push(format!("Authentication: {}", name.trim()));
    }
    if !instructions.trim().is_empty() {
        lines.push(instructions.trim().to_string());
    }
    lines
}

fn prompt_value(prompt: &str, echo: bool) -> anyhow::Result<String> {
    if !echo {
        return rpassword::prompt_password(prompt).context("failed to read hidden input");
    }
    let mut stderr = std::io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;
    let mut value = String::new();
    std::io::stdin().lock().read_line(&mut value)?;
    Ok(trim_line_ending(value))
}

fn trim_line_ending(mut value: String) -> String {
    while value.ends_with('\n') || value.ends_with('\r') {
        value.pop();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_skips_blank_parts() {
        assert!(header_lines("", "  ").is_empty());
        assert_eq!(
            header_lines("Duo", "Enter a passcode"),
            vec!["Authentication: Duo".to_string(), "Enter a passcode".to_string()]
        );
    }

    #[test]
    fn line_endings_are_stripped() {
        assert_eq!(trim_line_ending("123456\r\n".into()), "123456");
        assert_eq!(trim_line_ending("push".into()), "push");
    }
}
