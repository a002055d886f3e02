//! Prompt templates for command-backed roles.
//!
//! Each operation has one template with `{key}` placeholders filled from the
//! role input. Unknown placeholders render as an empty string.

use super::{Operation, RoleInput, RoleName, keys};

fn persona(role: RoleName) -> &'static str {
    match role {
        RoleName::Stakeholder => {
            "You are a stakeholder describing what you need from a software system. \
             Speak from the user's perspective and stay concrete."
        }
        RoleName::Collector => {
            "You are a requirements analyst. You find gaps in requirements, ask precise \
             clarification questions and turn answers into testable requirements."
        }
        RoleName::Modeler => {
            "You are a system modeler. You identify domain entities, their attributes and \
             the relationships between them."
        }
        RoleName::Checker => {
            "You are a requirements quality reviewer. You judge completeness, consistency, \
             clarity, correctness, testability and traceability."
        }
        RoleName::Documenter => {
            "You are a technical writer producing a Software Requirements Specification \
             in markdown."
        }
    }
}

fn template(operation: Operation) -> &'static str {
    match operation {
        Operation::ExpressRequirements => {
            "Describe the system below as a set of user stories.

System idea:
{system_idea}

Domain: {domain}

Write 5 to 10 user stories in the form \"As a <role>, I want <goal> so that <benefit>.\"
Cover the main user types, and include non-functional expectations where they matter."
        }
        Operation::AnswerQuestion => {
            "Answer a clarification question about the system you described.

Question: {question}

Context: {context}

Your user stories:
{user_stories}

Answer in a few sentences, from the stakeholder's point of view."
        }
        Operation::ProposeQuestions => {
            "Review the user stories and current requirements and find what is missing or ambiguous.

User stories:
{user_stories}

Current requirements:
{requirements_draft}

Domain: {domain}

Propose 3 to 5 questions, most important first. Format each one exactly as:
Question 1: <question>
Rationale: <why it matters>"
        }
        Operation::DraftRequirements => {
            "Write a requirements draft from the user stories and the clarification answers.

User stories:
{user_stories}

Question-answer pairs:
{qa_pairs}

Domain: {domain}

Include numbered functional requirements (FR-001, ...) with acceptance criteria and priority,
numbered non-functional requirements (NFR-001, ...) with measurable criteria,
constraints and assumptions, and data requirements."
        }
        Operation::ExtractEntities => {
            "Identify the system entities in the requirements below.

Requirements:
{requirements_draft}

Domain: {domain}

For each entity give its name, a one-line description, and its key attributes with types."
        }
        Operation::ExtractRelationships => {
            "Identify the relationships between the entities below.

Entities:
{entities}

Requirements:
{requirements_draft}

Domain: {domain}

For each relationship give both entities, the cardinality, and a short description."
        }
        Operation::CheckQuality => {
            "Perform a quality check of the requirements artifacts below.

Requirements:
{requirements_draft}

Entities:
{entities}

Relationships:
{relationships}

Original user stories:
{user_stories}

Domain: {domain}

Assess completeness, consistency, clarity, correctness, testability and traceability.
List each issue with a severity of Critical, Major or Minor and a recommendation.
End with a line of the exact form:
Overall Quality Score: <number from 0 to 10>/10"
        }
        Operation::WriteSpecification => {
            "Write the final Software Requirements Specification for project {project_name}.

System idea:
{system_idea}

Domain: {domain}

User stories:
{user_stories}

Requirements:
{requirements_draft}

Entities:
{entities}

Relationships:
{relationships}

Quality review:
{check_results}

Use sections: Introduction, Overall Description, Functional Requirements,
Non-Functional Requirements, Data Model, Assumptions and Constraints."
        }
        Operation::WriteQualityReport => {
            "The requirements for project {project_name} did not reach the quality bar.
Write a problem report for stakeholders and developers.

Domain: {domain}

Quality review:
{check_results}

Summarize the main problems by severity, their impact, and the concrete steps
needed before the requirements can be approved."
        }
    }
}

const PLACEHOLDERS: [&str; 13] = [
    keys::SYSTEM_IDEA,
    keys::DOMAIN,
    keys::PROJECT_NAME,
    keys::USER_STORIES,
    keys::QUESTION,
    keys::CONTEXT,
    keys::QA_PAIRS,
    keys::REQUIREMENTS_DRAFT,
    keys::ENTITIES,
    keys::RELATIONSHIPS,
    keys::CHECK_RESULTS,
    keys::QUESTIONS,
    keys::ANSWER,
];

/// Build the full prompt for an operation.
pub fn render(operation: Operation, input: &RoleInput) -> String {
    let mut body = template(operation).to_string();
    for key in PLACEHOLDERS {
        let value = input.get(key).map(String::as_str).unwrap_or("");
        body = body.replace(&format!("{{{}}}", key), value);
    }
    format!("{}\n\n{}\n", persona(operation.role()), body)
}
