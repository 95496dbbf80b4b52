use chrono::{DateTime, Utc};
use serde_json::Value;

use super::node::Node;
use super::types::{Answer, AnswerKind, Attempt};
use super::DocumentError;

/// Normalize a Typeform response list (API page or export wrapper) into attempts.
pub fn transform_responses(doc: &Value) -> Result<Vec<Attempt>, DocumentError> {
    let root = Node::new(doc);
    if !root.is_object() {
        return Err(DocumentError::NotAnObject("responses"));
    }

    let container = ["items", "responses"]
        .into_iter()
        .map(|key| root.get(key))
        .find(Node::is_array)
        .ok_or(DocumentError::MissingContainer("items"))?;

    Ok(container.elements().map(parse_attempt).collect())
}

fn parse_attempt(response: Node) -> Attempt {
    let mut user_email = None;
    let mut user_name = None;
    let mut answers = Vec::new();

    for answer in response.items("answers") {
        let field_ref = answer.get("field").string("ref");
        let kind = AnswerKind::from_source(answer.str_or("type", ""));

        match kind {
            AnswerKind::Email if user_email.is_none() => {
                user_email = answer.string("email");
            }
            AnswerKind::Text if user_name.is_none() && is_name_field(field_ref.as_deref()) => {
                user_name = answer.string("text");
            }
            _ => {}
        }

        answers.push(extract_answer(answer, kind, field_ref));
    }

    let score = response
        .items("variables")
        .filter(|var| var.str("key") == Some("score"))
        .last()
        .and_then(|var| var.f64("number"))
        .unwrap_or(0.0);

    Attempt {
        response_id: response.string("response_id").or_else(|| response.string("token")),
        user_email,
        user_name,
        score,
        submitted_at: parse_timestamp(response.str("submitted_at")),
        landed_at: parse_timestamp(response.str("landed_at")),
        answers,
    }
}

fn is_name_field(field_ref: Option<&str>) -> bool {
    field_ref.is_some_and(|r| r.to_lowercase().contains("name"))
}

fn extract_answer(answer: Node, kind: AnswerKind, question_ref: Option<String>) -> Answer {
    let mut out = Answer {
        question_ref,
        text_value: None,
        number_value: None,
        boolean_value: None,
    };

    match kind {
        AnswerKind::Text => out.text_value = answer.string("text"),
        AnswerKind::Email => out.text_value = answer.string("email"),
        AnswerKind::Number => out.number_value = answer.f64("number"),
        AnswerKind::Boolean => {
            out.boolean_value = answer.get("boolean").value().and_then(Value::as_bool)
        }
        AnswerKind::Choice => {
            let choice = answer.get("choice");
            let label = choice
                .str("label")
                .or_else(|| choice.str("ref"))
                .unwrap_or("");
            out.text_value = Some(label.to_string());
        }
        AnswerKind::Choices => {
            let labels: Vec<&str> = answer
                .get("choices")
                .items("labels")
                .filter_map(|l| l.as_str())
                .collect();
            if !labels.is_empty() {
                out.text_value = Some(labels.join(", "));
            }
        }
        AnswerKind::Other => {}
    }

    out
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
