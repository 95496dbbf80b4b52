use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quick_xml::events::Event;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum WordpressError {
    #[error("XML declaration not found in export file")]
    NoDeclaration,
    #[error("Invalid WordPress export: missing channel")]
    MissingChannel,
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed export XML: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// One `<item>` of a WXR export, reduced to the parts the extractors use.
#[derive(Debug, Default)]
pub struct ExportItem {
    fields: HashMap<String, String>,
    categories: Vec<(String, String)>,
    meta: Vec<(String, String)>,
    comments: Vec<HashMap<String, String>>,
}

impl ExportItem {
    /// Text of the first direct child named `tag`, or "".
    pub fn field(&self, tag: &str) -> &str {
        self.fields.get(tag).map(String::as_str).unwrap_or("")
    }

    /// Last value stored under `key`; later postmeta rows override earlier ones.
    fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.iter().rfind(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// WordPress ids are numeric in practice; keep anything else verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LegacyId {
    Number(u64),
    Text(String),
}

impl From<&str> for LegacyId {
    fn from(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse() {
                return LegacyId::Number(n);
            }
        }
        LegacyId::Text(raw.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct Post {
    pub id: LegacyId,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub author: String,
    pub date: String,
    pub status: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub featured_image: String,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct Comment {
    pub legacy_comment_id: LegacyId,
    pub wordpress_post_id: LegacyId,
    pub post_slug: String,
    pub parent_legacy_id: LegacyId,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub content: String,
    pub status: String,
    pub created_at: String,
    pub approved_at: String,
    pub ip_address: String,
    pub user_agent: String,
}

pub fn load_export(path: &Path) -> Result<Vec<ExportItem>, WordpressError> {
    let bytes = std::fs::read(path).map_err(|source| WordpressError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_export(&String::from_utf8_lossy(&bytes))
}

/// Collect the `<item>` children of `<rss><channel>`.
///
/// Anything before the `<?xml` declaration is discarded, since exports
/// often carry PHP warnings ahead of the document.
pub fn parse_export(raw: &str) -> Result<Vec<ExportItem>, WordpressError> {
    let start = raw.find("<?xml").ok_or(WordpressError::NoDeclaration)?;
    let mut reader = quick_xml::Reader::from_str(&raw[start..]);

    let mut items = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut saw_channel = false;

    let mut item: Option<ExportItem> = None;
    let mut child: Option<HashMap<String, String>> = None;
    let mut domain = String::new();

    // Depth of `<item>` below the document root: rss(1) / channel(2) / item(3).
    const ITEM_DEPTH: usize = 3;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(name);
                text.clear();
                let depth = stack.len();
                let name = stack[depth - 1].as_str();

                if depth == 2 && name == "channel" {
                    saw_channel = true;
                } else if depth == ITEM_DEPTH && name == "item" && stack[1] == "channel" {
                    item = Some(ExportItem::default());
                } else if depth == ITEM_DEPTH + 1 && item.is_some() {
                    match name {
                        "category" => {
                            domain = e
                                .attributes()
                                .flatten()
                                .find(|a| a.key.as_ref() == b"domain")
                                .map(|a| a.unescape_value().map(|v| v.into_owned()))
                                .transpose()?
                                .unwrap_or_default();
                        }
                        "wp:postmeta" | "wp:comment" => child = Some(HashMap::new()),
                        _ => {}
                    }
                }
            }
            Event::Empty(e) => {
                let depth = stack.len() + 1;
                if depth == 2 && e.name().as_ref() == b"channel" {
                    saw_channel = true;
                } else if depth == ITEM_DEPTH + 2 && item.is_some() {
                    if let Some(fields) = child.as_mut() {
                        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        fields.entry(name).or_default();
                    }
                }
            }
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(_) => {
                let depth = stack.len();
                let name = stack.pop().unwrap_or_default();
                let value = std::mem::take(&mut text);

                if depth == ITEM_DEPTH && name == "item" {
                    items.extend(item.take());
                } else if let Some(current) = item.as_mut() {
                    if depth == ITEM_DEPTH + 2 {
                        if let Some(fields) = child.as_mut() {
                            fields.entry(name).or_insert(value);
                        }
                    } else if depth == ITEM_DEPTH + 1 {
                        match name.as_str() {
                            "category" => {
                                current.categories.push((std::mem::take(&mut domain), value));
                            }
                            "wp:postmeta" => {
                                if let Some(mut fields) = child.take() {
                                    if let (Some(k), Some(v)) =
                                        (fields.remove("wp:meta_key"), fields.remove("wp:meta_value"))
                                    {
                                        if !k.is_empty() {
                                            current.meta.push((k, v));
                                        }
                                    }
                                }
                            }
                            "wp:comment" => {
                                if let Some(fields) = child.take() {
                                    current.comments.push(fields);
                                }
                            }
                            other => {
                                current.fields.entry(other.to_string()).or_insert(value);
                            }
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_channel {
        return Err(WordpressError::MissingChannel);
    }
    debug!("Parsed {} export items", items.len());
    Ok(items)
}

fn detect_language(categories: &[String], tags: &[String], slug: &str, title: &str) -> &'static str {
    let combined = categories
        .iter()
        .chain(tags)
        .map(String::as_str)
        .chain([slug, title])
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let has = |tokens: &[&str]| tokens.iter().any(|t| combined.contains(t));

    if has(&["espanol", "español", "spanish"]) {
        "es"
    } else if has(&["portugues", "português", "portuguese"]) {
        "pt"
    } else if has(&["chinese", "中文", "chino"]) {
        "zh"
    } else {
        "en"
    }
}

fn posts_of(items: &[ExportItem]) -> impl Iterator<Item = &ExportItem> {
    items.iter().filter(|i| i.field("wp:post_type") == "post")
}

pub fn extract_posts(items: &[ExportItem]) -> Vec<Post> {
    let attachments: HashMap<&str, &str> = items
        .iter()
        .filter(|i| i.field("wp:post_type") == "attachment")
        .map(|i| (i.field("wp:post_id"), i.field("wp:attachment_url")))
        .filter(|(id, url)| !id.is_empty() && !url.is_empty())
        .collect();

    posts_of(items)
        .map(|item| {
            let mut categories = Vec::new();
            let mut tags = Vec::new();
            for (domain, name) in &item.categories {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                match domain.as_str() {
                    "category" => categories.push(name.to_string()),
                    "post_tag" => tags.push(name.to_string()),
                    _ => {}
                }
            }

            let slug = item.field("wp:post_name");
            let title = item.field("title");
            let featured_image = item
                .meta_value("_thumbnail_id")
                .and_then(|id| attachments.get(id))
                .copied()
                .unwrap_or("");
            let date = Some(item.field("wp:post_date"))
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| item.field("pubDate"));
            let status = Some(item.field("wp:status"))
                .filter(|s| !s.is_empty())
                .unwrap_or("publish");

            Post {
                id: item.field("wp:post_id").into(),
                title: title.to_string(),
                slug: slug.to_string(),
                content: item.field("content:encoded").to_string(),
                excerpt: item.field("excerpt:encoded").to_string(),
                author: item.field("dc:creator").to_string(),
                date: date.to_string(),
                status: status.to_string(),
                language: detect_language(&categories, &tags, slug, title).to_string(),
                categories,
                tags,
                featured_image: featured_image.to_string(),
            }
        })
        .collect()
}

pub fn normalize_status(raw: &str) -> &'static str {
    match raw.trim().to_lowercase().as_str() {
        "1" | "approved" | "approve" | "publish" => "approved",
        "0" | "hold" | "pending" => "pending",
        "spam" => "spam",
        "trash" | "deleted" | "delete" => "deleted",
        _ => "pending",
    }
}

pub fn extract_comments(items: &[ExportItem]) -> Vec<Comment> {
    let mut comments = Vec::new();
    for item in posts_of(items) {
        let post_id = item.field("wp:post_id");
        let slug = item.field("wp:post_name");

        for fields in &item.comments {
            let get = |tag: &str| fields.get(tag).map(String::as_str).unwrap_or("");

            let kind = get("wp:comment_type").trim().to_lowercase();
            if !kind.is_empty() && kind != "comment" {
                continue;
            }
            let content = get("wp:comment_content").trim();
            if content.is_empty() {
                continue;
            }

            let status = normalize_status(get("wp:comment_approved"));
            let created_at = Some(get("wp:comment_date_gmt"))
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| get("wp:comment_date"));
            let approved_at = if status == "approved" { created_at } else { "" };

            comments.push(Comment {
                legacy_comment_id: get("wp:comment_id").into(),
                wordpress_post_id: post_id.into(),
                post_slug: slug.to_string(),
                parent_legacy_id: get("wp:comment_parent").into(),
                author_name: get("wp:comment_author").to_string(),
                author_email: get("wp:comment_author_email").to_string(),
                author_url: get("wp:comment_author_url").to_string(),
                content: content.to_string(),
                status: status.to_string(),
                created_at: created_at.to_string(),
                approved_at: approved_at.to_string(),
                ip_address: get("wp:comment_author_IP").to_string(),
                user_agent: get("wp:comment_agent").to_string(),
            });
        }
    }
    comments
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {:?}", path))
}

fn load_checked(input: &Path) -> Result<Vec<ExportItem>> {
    if !input.exists() {
        anyhow::bail!("Input XML not found: {:?}", input);
    }
    load_export(input).with_context(|| format!("Failed to parse {:?}", input))
}

pub fn generate_posts(input: &Path, output: &Path) -> Result<usize> {
    let posts = extract_posts(&load_checked(input)?);
    write_json(output, &posts)?;
    info!("Generated {} posts -> {:?}", posts.len(), output);
    Ok(posts.len())
}

pub fn generate_comments(input: &Path, output: &Path) -> Result<usize> {
    let comments = extract_comments(&load_checked(input)?);
    write_json(output, &comments)?;
    info!("Extracted {} comments -> {:?}", comments.len(), output);
    Ok(comments.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const FIXTURE: &str = "tests/fixtures/wordpress_export.xml";

    fn fixture_items() -> Vec<ExportItem> {
        load_export(Path::new(FIXTURE)).unwrap()
    }

    #[test]
    fn leading_noise_is_skipped() {
        let items = fixture_items();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].field("title"), "Implant Site Planning");
    }

    #[test]
    fn posts_only_post_type() {
        let posts = extract_posts(&fixture_items());
        assert_eq!(posts.len(), 2);

        let first = &posts[0];
        assert_eq!(first.id, LegacyId::Number(101));
        assert_eq!(first.slug, "implant-site-planning");
        assert_eq!(first.date, "2019-03-04 10:00:00");
        assert_eq!(first.categories, vec!["Implants"]);
        assert_eq!(first.tags, vec!["Surgery"]);
        assert_eq!(first.author, "dr-perio");
        assert_eq!(first.language, "en");
        assert!(first.content.contains("<strong>matter</strong>"));
        assert_eq!(
            first.featured_image,
            "https://periospot.com/wp-content/uploads/2019/03/implant-xray.jpg"
        );
    }

    #[test]
    fn post_defaults_and_language() {
        let posts = extract_posts(&fixture_items());
        let second = &posts[1];
        assert_eq!(second.id, LegacyId::Text("draft-7".to_string()));
        assert_eq!(second.status, "publish");
        assert_eq!(second.date, "Tue, 05 Mar 2019 10:00:00 +0000");
        assert_eq!(second.featured_image, "");
        assert_eq!(second.language, "pt");
    }

    #[test]
    fn language_keywords() {
        let none: Vec<String> = Vec::new();
        assert_eq!(detect_language(&["Español".to_string()], &none, "", ""), "es");
        assert_eq!(detect_language(&none, &["chinese".to_string()], "", ""), "zh");
        assert_eq!(detect_language(&none, &none, "guia-chino", ""), "zh");
        assert_eq!(detect_language(&none, &none, "", "Spanish and Portuguese"), "es");
        assert_eq!(detect_language(&none, &none, "", ""), "en");
    }

    #[test]
    fn comments_filtered_and_normalised() {
        let comments = extract_comments(&fixture_items());
        let ids: Vec<_> = comments.iter().map(|c| c.legacy_comment_id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                LegacyId::Number(11),
                LegacyId::Number(12),
                LegacyId::Number(15),
                LegacyId::Number(21)
            ]
        );

        let first = &comments[0];
        assert_eq!(first.content, "Great overview, thanks!");
        assert_eq!(first.status, "approved");
        assert_eq!(first.created_at, "2019-03-05 08:00:00");
        assert_eq!(first.approved_at, "2019-03-05 08:00:00");
        assert_eq!(first.parent_legacy_id, LegacyId::Number(0));
        assert_eq!(first.ip_address, "203.0.113.7");
        assert_eq!(first.post_slug, "implant-site-planning");

        let reply = &comments[1];
        assert_eq!(reply.status, "pending");
        assert_eq!(reply.created_at, "2019-03-06 11:30:00");
        assert_eq!(reply.approved_at, "");
        assert_eq!(reply.parent_legacy_id, LegacyId::Number(11));

        assert_eq!(comments[2].status, "spam");
        assert_eq!(comments[2].parent_legacy_id, LegacyId::Text(String::new()));
        assert_eq!(comments[3].status, "deleted");
        assert_eq!(comments[3].wordpress_post_id, LegacyId::Text("draft-7".to_string()));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(normalize_status(" Approve "), "approved");
        assert_eq!(normalize_status("publish"), "approved");
        assert_eq!(normalize_status("hold"), "pending");
        assert_eq!(normalize_status("delete"), "deleted");
        assert_eq!(normalize_status("whatever"), "pending");
    }

    #[test]
    fn missing_declaration_or_channel() {
        assert!(matches!(
            parse_export("<rss><channel/></rss>"),
            Err(WordpressError::NoDeclaration)
        ));
        assert!(matches!(
            parse_export("<?xml version=\"1.0\"?><rss><item/></rss>"),
            Err(WordpressError::MissingChannel)
        ));
        assert!(parse_export("<?xml version=\"1.0\"?><rss><channel/></rss>")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn postmeta_last_wins_and_empty_values_kept() {
        let xml = r#"<?xml version="1.0"?><rss><channel>
            <item>
                <wp:post_type>post</wp:post_type>
                <wp:postmeta><wp:meta_key>_thumbnail_id</wp:meta_key><wp:meta_value>1</wp:meta_value></wp:postmeta>
                <wp:postmeta><wp:meta_key>_thumbnail_id</wp:meta_key><wp:meta_value>900</wp:meta_value></wp:postmeta>
                <wp:postmeta><wp:meta_key>_edit_lock</wp:meta_key><wp:meta_value/></wp:postmeta>
            </item>
            <item>
                <wp:post_type>attachment</wp:post_type>
                <wp:post_id>900</wp:post_id>
                <wp:attachment_url>https://periospot.com/uploads/cover.jpg</wp:attachment_url>
            </item>
        </channel></rss>"#;
        let items = parse_export(xml).unwrap();
        assert_eq!(items[0].meta_value("_thumbnail_id"), Some("900"));
        assert_eq!(items[0].meta_value("_edit_lock"), Some(""));

        let posts = extract_posts(&items);
        assert_eq!(posts[0].featured_image, "https://periospot.com/uploads/cover.jpg");
    }

    #[test]
    fn ids_serialise_by_shape() {
        let value = serde_json::to_value([LegacyId::from("42"), LegacyId::from("abc")]).unwrap();
        assert_eq!(value, json!([42, "abc"]));
    }

    #[test]
    fn generate_writes_pretty_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("content").join("posts.json");
        let count = generate_posts(Path::new(FIXTURE), &output).unwrap();
        assert_eq!(count, 2);

        let body = std::fs::read_to_string(&output).unwrap();
        assert!(body.contains("Periodontia em português"));
        assert!(body.contains("\n  {"));
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed[0]["id"], 101);

        let missing = generate_comments(&dir.path().join("nope.xml"), &output);
        assert!(missing.is_err());
    }
}
