// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use anyhow::{Context, Result};
use russh::client::{AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;

use crate::adapters::ssh::AuthenticationFailure;
use crate::adapters::terminal::prompt::{Question, answer_questions};

use super::{ClientHandler, SessionManager};

/// What to do after the server answered a public key attempt.
#[derive(Debug, PartialEq, Eq)]
enum NextStep {
    Done,
    SecondFactor,
    Rejected,
}

fn after_publickey(result: AuthResult) -> NextStep {
    match result {
        AuthResult::Success => NextStep::Done,
        AuthResult::Failure {
            remaining_methods,
            partial_success: true,
        } if remaining_methods.contains(&russh::MethodKind::KeyboardInteractive) => {
            NextStep::SecondFactor
        }
        AuthResult::Failure { .. } => NextStep::Rejected,
    }
}

impl SessionManager {
    /// Connects and authenticates unless a live handle already exists.
    /// Second factors are answered on the terminal.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;
        if handle_field.as_ref().is_some_and(|h| !h.is_closed()) {
            return Ok(());
        }

        tracing::debug!(
            user = %self.params.username,
            addr = %self.params.addr,
            "connecting to login host"
        );
        let mut handle = russh::client::connect(self.config.clone(), self.params.addr, self.handler())
            .await
            .context("SSH connect failed")?;

        if let Some(path) = &self.params.identity_path {
            let key = russh::keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load secret key at {path}"))?;
            let pk = PrivateKeyWithHashAlg::new(
                Arc::new(key),
                handle.best_supported_rsa_hash().await?.flatten(),
            );
            let result = handle
                .authenticate_publickey(self.params.username.clone(), pk)
                .await?;
            match after_publickey(result) {
                NextStep::Done => {}
                NextStep::SecondFactor => self.keyboard_interactive(&mut handle).await?,
                NextStep::Rejected => return Err(AuthenticationFailure.into()),
            }
        } else {
            self.keyboard_interactive(&mut handle).await?;
        }
        tracing::debug!(user = %self.params.username, "authenticated");

        *handle_field = Some(handle);
        if let Some(interval) = self.config.keepalive_interval {
            let handle_clone = self.handle.clone();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let guard = handle_clone.lock().await;
                    let Some(handle) = guard.as_ref() else {
                        break;
                    };
                    if handle.is_closed() {
                        tracing::debug!("keepalive stopped: connection closed");
                        break;
                    }
                    if let Err(err) = handle.send_keepalive(true).await {
                        tracing::debug!(error = %err, "keepalive failed");
                    }
                }
            });
            if let Some(previous) = self.keepalive_task_handle.lock().await.replace(task) {
                previous.abort();
            }
        }
        Ok(())
    }

    async fn keyboard_interactive(
        &self,
        handle: &mut russh::client::Handle<ClientHandler>,
    ) -> Result<()> {
        let mut response = handle
            .authenticate_keyboard_interactive_start(
                self.params.username.clone(),
                self.params.ki_submethods.clone(),
            )
            .await
            .context("keyboard-interactive start failed")?;

        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    tracing::debug!(
                        partial_success,
                        remaining = ?remaining_methods,
                        "keyboard-interactive authentication failed"
                    );
                    return Err(AuthenticationFailure.into());
                }
                KeyboardInteractiveAuthResponse::InfoRequest {
                    name,
                    instructions,
                    prompts,
                } => {
                    let questions = prompts
                        .into_iter()
                        .map(|p| Question {
                            text: p.prompt,
                            echo: p.echo,
                        })
                        .collect();
                    let answers = answer_questions(&name, &instructions, questions).await?;
                    response = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .context("keyboard-interactive respond failed")?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::{MethodKind, MethodSet};

    fn failure(methods: &[MethodKind], partial_success: bool) -> AuthResult {
        AuthResult::Failure {
            remaining_methods: MethodSet::from(methods),
            partial_success,
        }
    }

    #[test]
    fn accepted_key_finishes_authentication() {
        assert_eq!(after_publickey(AuthResult::Success), NextStep::Done);
    }

    #[test]
    fn duo_style_second_factor_follows_the_key() {
        let result = failure(&[MethodKind::KeyboardInteractive], true);
        assert_eq!(after_publickey(result), NextStep::SecondFactor);
    }

    #[test]
    fn keyboard_interactive_without_partial_success_is_a_rejection() {
        let result = failure(&[MethodKind::KeyboardInteractive], false);
        assert_eq!(after_publickey(result), NextStep::Rejected);
        let result = failure(&[MethodKind::Password], true);
        assert_eq!(after_publickey(result), NextStep::Rejected);
    }
}
