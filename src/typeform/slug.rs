use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Alphabetic}\p{Nd}]+").unwrap());

const MAX_SLUG_LEN: usize = 50;

/// Hands out slugs that are unique across one migration batch.
#[derive(Debug, Default)]
pub struct SlugRegistry {
    taken: HashSet<String>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a slug as taken, e.g. one already stored by an earlier run.
    pub fn reserve(&mut self, slug: impl Into<String>) {
        self.taken.insert(slug.into());
    }

    /// Reserve a slug for `title`, appending `-1`, `-2`, ... on collision.
    pub fn create(&mut self, title: &str) -> String {
        let base = slugify(title);
        let mut slug = base.clone();
        let mut counter = 1;
        while self.taken.contains(&slug) {
            slug = format!("{}-{}", base, counter);
            counter += 1;
        }
        self.taken.insert(slug.clone());
        slug
    }
}

pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let dashed = NON_WORD_RE.replace_all(&lowered, "-");
    let truncated: String = dashed.trim_matches('-').chars().take(MAX_SLUG_LEN).collect();
    let slug = truncated.trim_end_matches('-');
    if slug.is_empty() {
        "assessment".to_string()
    } else {
        slug.to_string()
    }
}
