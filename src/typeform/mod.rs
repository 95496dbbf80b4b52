pub mod form;
pub mod node;
pub mod responses;
pub mod slug;
pub mod types;

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

pub use form::transform_form;
pub use responses::transform_responses;
pub use slug::SlugRegistry;
pub use types::*;

/// Structural problems that make a whole document unusable.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{0} document is not a JSON object")]
    NotAnObject(&'static str),
    #[error("response document has no `{0}` array")]
    MissingContainer(&'static str),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Read and parse a JSON document from disk.
pub fn load_document(path: &Path) -> Result<Value, DocumentError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| DocumentError::Json {
        path: display,
        source,
    })
}
