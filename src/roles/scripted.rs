//! Deterministic role that answers from a script.
//!
//! Used by `mare run --offline` to exercise the whole pipeline without an
//! external model, and by tests to drive specific control-flow paths.
//! Operations without a script get a generated placeholder reply.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Operation, Role, RoleInput, RoleName, RoleOutput, keys};
use crate::errors::RoleError;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

pub struct ScriptedRole {
    name: RoleName,
    scripts: HashMap<Operation, Vec<Reply>>,
    cursors: Mutex<HashMap<Operation, usize>>,
    invocations: Mutex<Vec<(Operation, RoleInput)>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedRole {
    pub fn new(name: RoleName) -> Self {
        Self {
            name,
            scripts: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Queue a reply for `operation`. Replies are consumed in order and the
    /// last one repeats once the queue is exhausted.
    pub fn reply(mut self, operation: Operation, text: impl Into<String>) -> Self {
        self.scripts
            .entry(operation)
            .or_default()
            .push(Reply::Text(text.into()));
        self
    }

    /// Queue a failure for `operation`.
    pub fn fail(mut self, operation: Operation, message: impl Into<String>) -> Self {
        self.scripts
            .entry(operation)
            .or_default()
            .push(Reply::Fail(message.into()));
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total number of operations performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Operations performed so far with their inputs, in call order.
    pub fn invocations(&self) -> Vec<(Operation, RoleInput)> {
        self.invocations
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self, operation: Operation) -> Option<Reply> {
        let replies = self.scripts.get(&operation)?;
        let mut cursors = self.cursors.lock().ok()?;
        let cursor = cursors.entry(operation).or_insert(0);
        let reply = replies.get(*cursor).or_else(|| replies.last()).cloned();
        *cursor += 1;
        reply
    }
}

#[async_trait]
impl Role for ScriptedRole {
    fn name(&self) -> RoleName {
        self.name
    }

    async fn perform(
        &self,
        operation: Operation,
        input: &RoleInput,
    ) -> Result<RoleOutput, RoleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.invocations.lock() {
            log.push((operation, input.clone()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = match self.next_reply(operation) {
            Some(Reply::Text(text)) => text,
            Some(Reply::Fail(message)) => {
                return Err(RoleError::Failed {
                    role: self.name.to_string(),
                    operation: operation.to_string(),
                    message,
                });
            }
            None => placeholder(operation, input),
        };

        Ok(RoleOutput::from([(
            operation.output_key().to_string(),
            serde_json::Value::String(text),
        )]))
    }
}

fn field<'a>(input: &'a RoleInput, key: &str, fallback: &'a str) -> &'a str {
    input
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(fallback)
}

/// Generated reply for an unscripted operation. The text carries the markers
/// the pipeline looks for, so an offline run completes on its first pass.
fn placeholder(operation: Operation, input: &RoleInput) -> String {
    let idea = field(input, keys::SYSTEM_IDEA, "the system");
    let domain = field(input, keys::DOMAIN, "general software system");
    let project = field(input, keys::PROJECT_NAME, "project");
    match operation {
        Operation::ExpressRequirements => format!(
            "User stories for {domain}:\n\
             - As a user, I want to work with {idea} so that my daily tasks are faster.\n\
             - As an administrator, I want to manage accounts so that access stays controlled.\n\
             - As a user, I want to see my history so that I can review past activity."
        ),
        Operation::ProposeQuestions => "Question 1: Who are the primary users of the system?\n\
             Rationale: Identifies the actors the requirements must serve.\n\n\
             Question 2: Which data must be retained, and for how long?\n\
             Rationale: Drives storage and compliance requirements.\n\n\
             Question 3: What response time do users expect?\n\
             Rationale: Sets the main performance requirement.\n\n\
             Question 4: Which external systems must be integrated?\n\
             Rationale: Scopes interface requirements."
            .to_string(),
        Operation::AnswerQuestion => format!(
            "For {domain}: {}",
            match field(input, keys::QUESTION, "") {
                "" => "no further detail at this stage.".to_string(),
                q => format!("regarding \"{q}\", the simplest option that serves all users."),
            }
        ),
        Operation::DraftRequirements => format!(
            "Functional Requirements\n\
             FR-001: The system shall let users manage {idea}. Priority: High\n\
             FR-002: The system shall authenticate users before access. Priority: High\n\
             FR-003: The system shall keep an activity history per user. Priority: Medium\n\n\
             Non-Functional Requirements\n\
             NFR-001: Pages shall respond within 2 seconds for 95% of requests.\n\
             NFR-002: Data shall be backed up daily."
        ),
        Operation::ExtractEntities => "Entities:\n\
             - User (id, name, email, role)\n\
             - Account (id, owner, created_at)\n\
             - ActivityRecord (id, user_id, action, timestamp)"
            .to_string(),
        Operation::ExtractRelationships => "Relationships:\n\
             - User 1..* ActivityRecord (performs)\n\
             - Account 1..1 User (owned by)"
            .to_string(),
        Operation::CheckQuality => "OVERALL ASSESSMENT\n\
             Overall Quality Score: 9.0/10\n\
             Ready for Implementation: Yes"
            .to_string(),
        Operation::WriteSpecification => format!(
            "# Software Requirements Specification: {project}\n\n\
             ## 1. Introduction\n\nThis document specifies {idea} in the {domain} domain.\n\n\
             ## 2. Requirements\n\n{}\n",
            field(input, keys::REQUIREMENTS_DRAFT, "See requirements draft.")
        ),
        Operation::WriteQualityReport => format!(
            "# Requirements Quality Report: {project}\n\n{}\n",
            field(input, keys::CHECK_RESULTS, "No check results available.")
        ),
    }
}
