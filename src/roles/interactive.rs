//! Stakeholder role that asks a human to answer clarification questions.

use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use dialoguer::{Input, theme::ColorfulTheme};
use tokio::sync::{Mutex, oneshot};
use tracing::info;

use super::{Operation, Role, RoleInput, RoleName, RoleOutput, keys};
use crate::errors::RoleError;

/// Reads one answer for a question. Returning an empty string hands the
/// question back to the wrapped role.
pub type AnswerPrompt = Arc<dyn Fn(&str) -> std::io::Result<String> + Send + Sync>;

/// Wraps the configured stakeholder role. `answer_question` goes to the
/// terminal; every other operation is delegated.
pub struct HumanStakeholder {
    inner: Arc<dyn Role>,
    prompt: AnswerPrompt,
    // Answers may be requested concurrently; the terminal takes one at a time.
    terminal: Mutex<()>,
}

impl HumanStakeholder {
    pub fn new(inner: Arc<dyn Role>) -> Self {
        Self::with_prompt(inner, Arc::new(ask_terminal))
    }

    pub fn with_prompt(inner: Arc<dyn Role>, prompt: AnswerPrompt) -> Self {
        Self {
            inner,
            prompt,
            terminal: Mutex::new(()),
        }
    }
}

fn ask_terminal(question: &str) -> std::io::Result<String> {
    println!();
    println!("{} {}", style("?").cyan().bold(), style(question).bold());
    Input::<String>::with_theme(&ColorfulTheme::default())
        .with_prompt("Your answer (empty to let the stakeholder role answer)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| std::io::Error::other(e.to_string()))
}

/// Run the prompt on its own detached thread. A timed-out run drops the
/// receiver and moves on; the runtime never waits for the terminal read.
async fn read_answer(prompt: AnswerPrompt, question: String) -> Result<String, String> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("mare-answer-prompt".to_string())
        .spawn(move || {
            let _ = tx.send(prompt(&question));
        })
        .map_err(|e| format!("failed to start prompt thread: {}", e))?;
    rx.await
        .map_err(|_| "prompt thread exited without an answer".to_string())?
        .map_err(|e| format!("failed to read answer: {}", e))
}

#[async_trait]
impl Role for HumanStakeholder {
    fn name(&self) -> RoleName {
        RoleName::Stakeholder
    }

    async fn perform(
        &self,
        operation: Operation,
        input: &RoleInput,
    ) -> Result<RoleOutput, RoleError> {
        if operation != Operation::AnswerQuestion {
            return self.inner.perform(operation, input).await;
        }

        let question = input.get(keys::QUESTION).cloned().unwrap_or_default();
        let answer = {
            let _turn = self.terminal.lock().await;
            read_answer(Arc::clone(&self.prompt), question.clone())
                .await
                .map_err(|message| RoleError::Failed {
                    role: RoleName::Stakeholder.to_string(),
                    operation: operation.to_string(),
                    message,
                })?
        };

        let answer = answer.trim();
        if answer.is_empty() {
            info!(question = %question, "no answer typed, delegating to stakeholder role");
            return self.inner.perform(operation, input).await;
        }

        Ok(RoleOutput::from([(
            keys::ANSWER.to_string(),
            serde_json::Value::String(answer.to_string()),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{ScriptedRole, role_input};

    fn human(answer: &'static str) -> (HumanStakeholder, Arc<ScriptedRole>) {
        let inner = Arc::new(
            ScriptedRole::new(RoleName::Stakeholder)
                .reply(Operation::AnswerQuestion, "role answer")
                .reply(Operation::ExpressRequirements, "stories"),
        );
        let prompt: AnswerPrompt = Arc::new(move |_q| Ok(answer.to_string()));
        (
            HumanStakeholder::with_prompt(inner.clone() as Arc<dyn Role>, prompt),
            inner,
        )
    }

    #[tokio::test]
    async fn test_typed_answer_is_used() {
        let (role, inner) = human("  Only librarians can delete books.  ");
        let out = role
            .perform(
                Operation::AnswerQuestion,
                &role_input([(keys::QUESTION, "Who may delete books?")]),
            )
            .await
            .unwrap();
        assert_eq!(out[keys::ANSWER], "Only librarians can delete books.");
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_answer_delegates() {
        let (role, inner) = human("");
        let out = role
            .perform(Operation::AnswerQuestion, &RoleInput::new())
            .await
            .unwrap();
        assert_eq!(out[keys::ANSWER], "role answer");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_operations_are_delegated() {
        let (role, inner) = human("ignored");
        let out = role
            .perform(Operation::ExpressRequirements, &RoleInput::new())
            .await
            .unwrap();
        assert_eq!(out[keys::USER_STORIES], "stories");
        assert_eq!(inner.calls(), 1);
    }

    #[test]
    fn test_timed_out_prompt_does_not_block_runtime_shutdown() {
        let inner = Arc::new(ScriptedRole::new(RoleName::Stakeholder)) as Arc<dyn Role>;
        let prompt: AnswerPrompt = Arc::new(|_q| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            Ok("too late".to_string())
        });
        let role = HumanStakeholder::with_prompt(inner, prompt);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        let outcome = runtime.block_on(async {
            tokio::time::timeout(
                std::time::Duration::from_millis(100),
                role.perform(Operation::AnswerQuestion, &RoleInput::new()),
            )
            .await
        });
        assert!(outcome.is_err(), "the answer should time out");
        drop(runtime);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(1),
            "runtime shutdown waited {:?} for the terminal read",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_prompt_error_is_role_error() {
        let inner = Arc::new(ScriptedRole::new(RoleName::Stakeholder)) as Arc<dyn Role>;
        let prompt: AnswerPrompt = Arc::new(|_q| {
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "stdin closed"))
        });
        let role = HumanStakeholder::with_prompt(inner, prompt);
        let err = role
            .perform(Operation::AnswerQuestion, &RoleInput::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stdin closed"));
    }
}
