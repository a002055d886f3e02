//! Splits collector output into individual clarification questions.

/// Upper bound on questions kept from one collector reply.
pub const MAX_QUESTIONS: usize = 5;

/// Questions the stakeholder is asked to answer per iteration.
pub const MAX_ANSWERED: usize = 3;

/// Extract questions from text formatted as `Question N: ...` blocks.
///
/// A line starting with `Question` opens a question; the text after its
/// first `:` is the question. Following non-empty lines continue it, except
/// `Rationale` lines which are dropped.
pub fn extract_questions(text: &str) -> Vec<String> {
    let mut questions: Vec<String> = Vec::new();
    let mut current: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim().trim_start_matches(['*', '#', '-']).trim();
        if line.is_empty() {
            continue;
        }
        let lowered = line.to_lowercase();
        if lowered.starts_with("question") {
            if let Some(q) = current.take().filter(|q| !q.is_empty()) {
                questions.push(q);
            }
            let body = line.split_once(':').map(|(_, rest)| rest).unwrap_or("");
            current = Some(body.trim().trim_matches('*').trim().to_string());
        } else if lowered.starts_with("rationale") {
            continue;
        } else if let Some(q) = current.as_mut() {
            if !q.is_empty() {
                q.push(' ');
            }
            q.push_str(line);
        }
    }
    if let Some(q) = current.filter(|q| !q.is_empty()) {
        questions.push(q);
    }

    questions.truncate(MAX_QUESTIONS);
    questions
}
