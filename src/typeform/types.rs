use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Question kinds the assessment schema accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    PictureChoice,
    ShortText,
    LongText,
    Email,
    Dropdown,
    OpinionScale,
    Rating,
    Legal,
    Number,
    Date,
    FileUpload,
}

impl QuestionType {
    /// Map a Typeform field type. Unknown types become short text.
    pub fn from_source(field_type: &str) -> Self {
        match field_type {
            "multiple_choice" => Self::MultipleChoice,
            "picture_choice" => Self::PictureChoice,
            "short_text" => Self::ShortText,
            "long_text" => Self::LongText,
            "email" => Self::Email,
            "dropdown" => Self::Dropdown,
            "opinion_scale" => Self::OpinionScale,
            "rating" => Self::Rating,
            "legal" | "yes_no" => Self::Legal,
            "number" => Self::Number,
            "date" => Self::Date,
            "file_upload" => Self::FileUpload,
            "statement" => Self::ShortText,
            _ => Self::ShortText,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple_choice",
            Self::PictureChoice => "picture_choice",
            Self::ShortText => "short_text",
            Self::LongText => "long_text",
            Self::Email => "email",
            Self::Dropdown => "dropdown",
            Self::OpinionScale => "opinion_scale",
            Self::Rating => "rating",
            Self::Legal => "legal",
            Self::Number => "number",
            Self::Date => "date",
            Self::FileUpload => "file_upload",
        }
    }
}

/// Typeform answer payload kinds, keyed by the answer's `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    Text,
    Email,
    Number,
    Boolean,
    Choice,
    Choices,
    Other,
}

impl AnswerKind {
    pub fn from_source(answer_type: &str) -> Self {
        match answer_type {
            "text" => Self::Text,
            "email" => Self::Email,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "choice" => Self::Choice,
            "choices" => Self::Choices,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub typeform_id: Option<String>,
    pub title: String,
    pub slug: String,
    pub language: String,
    pub is_public: bool,
    pub is_active: bool,
    pub show_progress_bar: bool,
    pub show_question_numbers: bool,
    pub welcome_title: Option<String>,
    pub welcome_description: Option<String>,
    pub welcome_image_url: Option<String>,
    pub welcome_button_text: String,
    pub total_points: i64,
}

/// Per-type question options, serialized as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QuestionSettings {
    Choice {
        allow_multiple: bool,
        allow_other: bool,
        randomize: bool,
    },
    OpinionScale {
        steps: i64,
        start_at_one: bool,
    },
    Dropdown {
        alphabetical_order: bool,
    },
    Plain {},
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub is_required: bool,
    pub points: i64,
    pub order_index: usize,
    pub settings: QuestionSettings,
}

impl Question {
    /// Key under which this question's choices are filed.
    pub fn choice_key(&self) -> &str {
        self.reference.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub reference: Option<String>,
    pub label: String,
    pub image_url: Option<String>,
    pub is_correct: bool,
    pub points: i64,
    pub order_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultScreen {
    pub reference: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub button_text: Option<String>,
    pub button_url: Option<String>,
    // Typeform routes screens through jump logic, not score ranges; both stay unset.
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    pub is_default: bool,
    pub order_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedForm {
    pub assessment: Assessment,
    pub questions: Vec<Question>,
    pub choices_by_question: BTreeMap<String, Vec<Choice>>,
    pub result_screens: Vec<ResultScreen>,
}

impl TransformedForm {
    pub fn choices_for(&self, question: &Question) -> &[Choice] {
        self.choices_by_question
            .get(question.choice_key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn choice_count(&self) -> usize {
        self.choices_by_question.values().map(Vec::len).sum()
    }

    pub fn has_question(&self, reference: &str) -> bool {
        self.questions
            .iter()
            .any(|q| q.reference.as_deref() == Some(reference))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub question_ref: Option<String>,
    pub text_value: Option<String>,
    pub number_value: Option<f64>,
    pub boolean_value: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub response_id: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub score: f64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub landed_at: Option<DateTime<Utc>>,
    pub answers: Vec<Answer>,
}
