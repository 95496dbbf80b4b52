use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::debug;

use super::node::Node;
use super::types::*;
use super::DocumentError;

const SYNTHETIC_SCREEN_ID: &str = "DefaultTyScreen";
const DEFAULT_SCREEN_REF: &str = "default_tys";

/// Normalize one Typeform form definition into assessment records.
pub fn transform_form(doc: &Value) -> Result<TransformedForm, DocumentError> {
    let form = Node::new(doc);
    if !form.is_object() {
        return Err(DocumentError::NotAnObject("form"));
    }

    let mut assessment = parse_assessment(form);
    let quiz_points = if form.str("type") == Some("quiz") { 1 } else { 0 };

    let mut questions = Vec::new();
    let mut choices_by_question = BTreeMap::new();

    for (idx, field) in form.items("fields").enumerate() {
        let question = parse_question(field, idx, quiz_points);
        let choices = parse_choices(field);
        if !choices.is_empty() {
            choices_by_question.insert(question.choice_key().to_string(), choices);
        }
        assessment.total_points += question.points;
        questions.push(question);
    }

    apply_logic(form, &mut choices_by_question);

    let result_screens = parse_result_screens(form);

    Ok(TransformedForm {
        assessment,
        questions,
        choices_by_question,
        result_screens,
    })
}

fn parse_assessment(form: Node) -> Assessment {
    let settings = form.get("settings");
    let welcome = form.first("welcome_screens");
    let welcome_props = welcome.get("properties");

    Assessment {
        typeform_id: form.string("id"),
        title: form.str_or("title", "Untitled").to_string(),
        slug: String::new(),
        language: settings.str_or("language", "en").to_string(),
        is_public: settings.bool_or("is_public", true),
        is_active: true,
        show_progress_bar: settings.bool_or("show_progress_bar", true),
        show_question_numbers: settings.bool_or("show_question_number", true),
        welcome_title: welcome.string("title"),
        welcome_description: welcome_props.string("description"),
        welcome_image_url: welcome.get("attachment").string("href"),
        welcome_button_text: welcome_props.str_or("button_text", "Start").to_string(),
        total_points: 0,
    }
}

fn parse_question(field: Node, idx: usize, points: i64) -> Question {
    let source_type = field.str_or("type", "short_text");
    let props = field.get("properties");

    let settings = match source_type {
        "multiple_choice" | "picture_choice" => QuestionSettings::Choice {
            allow_multiple: props.bool_or("allow_multiple_selection", false),
            allow_other: props.bool_or("allow_other_choice", false),
            randomize: props.bool_or("randomize", false),
        },
        "opinion_scale" => QuestionSettings::OpinionScale {
            steps: props.i64_or("steps", 10),
            start_at_one: props.bool_or("start_at_one", true),
        },
        "dropdown" => QuestionSettings::Dropdown {
            alphabetical_order: props.bool_or("alphabetical_order", false),
        },
        _ => QuestionSettings::Plain {},
    };

    let image_url = field
        .get("attachment")
        .string("href")
        .or_else(|| field.get("layout").get("attachment").string("href"));

    Question {
        reference: field.string("ref"),
        kind: QuestionType::from_source(source_type),
        title: field.str_or("title", "").to_string(),
        description: field.string("description"),
        image_url,
        is_required: field.get("validations").bool_or("required", false),
        points,
        order_index: idx,
        settings,
    }
}

fn parse_choices(field: Node) -> Vec<Choice> {
    let mut seen = HashSet::new();
    let mut choices = Vec::new();

    for choice in field.get("properties").items("choices") {
        let reference = choice.string("ref");
        if let Some(r) = &reference {
            if !seen.insert(r.clone()) {
                debug!("Dropping duplicate choice ref {} on field {:?}", r, field.str("ref"));
                continue;
            }
        }
        choices.push(Choice {
            reference,
            label: choice.str_or("label", "").to_string(),
            image_url: choice.get("attachment").string("href"),
            is_correct: false,
            points: 0,
            order_index: choices.len(),
        });
    }

    choices
}

/// Award points to choices targeted by `add` actions on `is` conditions.
fn apply_logic(form: Node, choices_by_question: &mut BTreeMap<String, Vec<Choice>>) {
    for block in form.items("logic") {
        let field_ref = block.str_or("ref", "");

        for action in block.items("actions") {
            if action.str("action") != Some("add") {
                continue;
            }
            let award = action.get("details").get("value").f64("value").unwrap_or(0.0);

            let condition = action.get("condition");
            if condition.str("op") != Some("is") {
                debug!(
                    "Ignoring {:?} condition on field {}",
                    condition.str("op"),
                    field_ref
                );
                continue;
            }

            let choice_ref = condition
                .items("vars")
                .filter(|var| var.str("type") == Some("choice"))
                .filter_map(|var| var.str("value"))
                .last();
            let Some(choice_ref) = choice_ref else {
                continue;
            };

            let Some(choices) = choices_by_question.get_mut(field_ref) else {
                continue;
            };
            for choice in choices
                .iter_mut()
                .filter(|c| c.reference.as_deref() == Some(choice_ref))
            {
                // Stored points are whole; correctness follows the raw award.
                choice.points = award as i64;
                choice.is_correct = award > 0.0;
            }
        }
    }
}

fn parse_result_screens(form: Node) -> Vec<ResultScreen> {
    form.items("thankyou_screens")
        .enumerate()
        .filter(|(_, screen)| screen.str("id") != Some(SYNTHETIC_SCREEN_ID))
        .map(|(idx, screen)| {
            let props = screen.get("properties");
            let reference = screen.string("ref");
            ResultScreen {
                is_default: reference.as_deref() == Some(DEFAULT_SCREEN_REF),
                reference,
                title: screen.str_or("title", "").to_string(),
                description: props.string("description"),
                image_url: screen.get("attachment").string("href"),
                button_text: props.string("button_text"),
                button_url: props.string("redirect_url"),
                min_score: None,
                max_score: None,
                order_index: idx,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        let raw = std::fs::read_to_string("tests/fixtures/quiz_form.json").unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn questions_keep_source_order() {
        let form = transform_form(&fixture()).unwrap();
        let indexes: Vec<usize> = form.questions.iter().map(|q| q.order_index).collect();
        assert_eq!(indexes, (0..form.questions.len()).collect::<Vec<_>>());
        assert_eq!(form.questions[0].reference.as_deref(), Some("implant_site"));
        assert_eq!(form.questions.len(), 5);
    }

    #[test]
    fn quiz_assessment_fields() {
        let form = transform_form(&fixture()).unwrap();
        let a = &form.assessment;
        assert_eq!(a.typeform_id.as_deref(), Some("Xq3Lr9"));
        assert_eq!(a.language, "es");
        assert!(!a.is_public);
        assert_eq!(a.welcome_title.as_deref(), Some("Test your knowledge"));
        assert_eq!(a.welcome_button_text, "Begin");
        assert_eq!(a.total_points, 5);
        assert!(form.questions.iter().all(|q| q.points == 1));
    }

    #[test]
    fn logic_awards_points_to_choice() {
        let form = transform_form(&fixture()).unwrap();
        let choices = &form.choices_by_question["implant_site"];
        let correct: Vec<_> = choices.iter().filter(|c| c.is_correct).collect();
        assert_eq!(correct.len(), 1);
        assert_eq!(correct[0].reference.as_deref(), Some("site_b"));
        assert_eq!(correct[0].points, 5);
        for sibling in choices.iter().filter(|c| c.reference.as_deref() != Some("site_b")) {
            assert_eq!(sibling.points, 0);
            assert!(!sibling.is_correct);
        }
    }

    #[test]
    fn later_logic_block_wins() {
        let form = transform_form(&fixture()).unwrap();
        let choices = &form.choices_by_question["bone_graft"];
        let graft = choices
            .iter()
            .find(|c| c.reference.as_deref() == Some("graft_yes"))
            .unwrap();
        assert_eq!(graft.points, 0);
        assert!(!graft.is_correct);
    }

    #[test]
    fn duplicate_choice_refs_dropped() {
        let form = transform_form(&fixture()).unwrap();
        for choices in form.choices_by_question.values() {
            let mut refs: Vec<_> = choices.iter().filter_map(|c| c.reference.clone()).collect();
            let total = refs.len();
            refs.sort();
            refs.dedup();
            assert_eq!(refs.len(), total);
        }
        let orders: Vec<usize> = form.choices_by_question["implant_site"]
            .iter()
            .map(|c| c.order_index)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn synthetic_screen_skipped() {
        let form = transform_form(&fixture()).unwrap();
        assert_eq!(form.result_screens.len(), 2);
        let passed = &form.result_screens[0];
        assert!(!passed.is_default);
        assert_eq!(passed.order_index, 0);
        assert_eq!(passed.button_url.as_deref(), Some("https://example.com/course"));
        let fallback = &form.result_screens[1];
        assert!(fallback.is_default);
        assert_eq!(fallback.order_index, 2);
        assert!(fallback.min_score.is_none() && fallback.max_score.is_none());
    }

    #[test]
    fn field_settings_by_type() {
        let form = transform_form(&fixture()).unwrap();
        assert!(matches!(
            form.questions[0].settings,
            QuestionSettings::Choice { allow_multiple: false, randomize: true, .. }
        ));
        let scale = form
            .questions
            .iter()
            .find(|q| q.kind == QuestionType::OpinionScale)
            .unwrap();
        assert_eq!(
            scale.settings,
            QuestionSettings::OpinionScale { steps: 10, start_at_one: true }
        );
        let legal = form.questions.iter().find(|q| q.kind == QuestionType::Legal).unwrap();
        assert_eq!(legal.settings, QuestionSettings::Plain {});
        assert_eq!(legal.image_url.as_deref(), Some("https://images.example.com/consent.png"));
    }

    #[test]
    fn empty_form_defaults() {
        let form = transform_form(&json!({})).unwrap();
        assert_eq!(form.assessment.title, "Untitled");
        assert_eq!(form.assessment.language, "en");
        assert!(form.assessment.is_public);
        assert_eq!(form.assessment.total_points, 0);
        assert!(form.questions.is_empty());
        assert!(form.result_screens.is_empty());
    }

    #[test]
    fn unknown_type_and_bad_logic_tolerated() {
        let doc = json!({
            "type": "form",
            "fields": [{ "ref": "q1", "type": "matrix", "title": "Grid" }],
            "logic": [
                { "ref": "ghost", "actions": [{
                    "action": "add",
                    "details": { "value": { "value": 3 } },
                    "condition": { "op": "is", "vars": [{ "type": "choice", "value": "c9" }] }
                }]},
                { "ref": "q1", "actions": [{ "action": "jump" }] }
            ]
        });
        let form = transform_form(&doc).unwrap();
        assert_eq!(form.questions[0].kind, QuestionType::ShortText);
        assert_eq!(form.questions[0].points, 0);
        assert!(form.choices_by_question.is_empty());
    }

    #[test]
    fn non_equality_operators_ignored() {
        let doc = json!({
            "fields": [{ "ref": "f1", "type": "multiple_choice", "properties": {
                "choices": [{ "ref": "c1", "label": "One" }]
            }}],
            "logic": [{ "ref": "f1", "actions": [{
                "action": "add",
                "details": { "value": { "value": 2 } },
                "condition": { "op": "is_not", "vars": [{ "type": "choice", "value": "c1" }] }
            }]}]
        });
        let form = transform_form(&doc).unwrap();
        assert_eq!(form.choices_by_question["f1"][0].points, 0);
    }

    #[test]
    fn fractional_award_marks_correct() {
        let doc = json!({
            "fields": [{ "ref": "f1", "type": "multiple_choice", "properties": {
                "choices": [{ "ref": "c1", "label": "One" }, { "ref": "c2", "label": "Two" }]
            }}],
            "logic": [{ "ref": "f1", "actions": [
                {
                    "action": "add",
                    "details": { "value": { "value": 2.5 } },
                    "condition": { "op": "is", "vars": [{ "type": "choice", "value": "c1" }] }
                },
                {
                    "action": "add",
                    "details": { "value": { "value": 0.5 } },
                    "condition": { "op": "is", "vars": [{ "type": "choice", "value": "c2" }] }
                }
            ]}]
        });
        let form = transform_form(&doc).unwrap();
        let choices = &form.choices_by_question["f1"];
        assert_eq!(choices[0].points, 2);
        assert!(choices[0].is_correct);
        assert_eq!(choices[1].points, 0);
        assert!(choices[1].is_correct);
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            transform_form(&json!([1, 2])),
            Err(DocumentError::NotAnObject("form"))
        ));
    }

    #[test]
    fn deterministic_output() {
        let doc = fixture();
        let a = serde_json::to_string(&transform_form(&doc).unwrap()).unwrap();
        let b = serde_json::to_string(&transform_form(&doc).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
