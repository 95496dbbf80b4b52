use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use crate::typeform::node::Node;

const TYPEFORM_API_URL: &str = "https://api.typeform.com";
const FORMS_PAGE_SIZE: usize = 10;
const RESPONSES_PAGE_SIZE: usize = 1000;
const REQUEST_INTERVAL_MS: u64 = 500;

/// Sequential, rate-limited client for the Typeform Create/Responses APIs.
pub struct TypeformClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    forms_page_size: usize,
    responses_page_size: usize,
    request_interval: Duration,
    retry: RetryPolicy,
}

impl TypeformClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(TYPEFORM_API_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            forms_page_size: FORMS_PAGE_SIZE,
            responses_page_size: RESPONSES_PAGE_SIZE,
            request_interval: Duration::from_millis(REQUEST_INTERVAL_MS),
            retry: RetryPolicy::default(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let http = &self.http;
        let token = self.token.as_str();
        let target = url.as_str();

        let value = self
            .retry
            .run_async(path, move || async move {
                http.get(target)
                    .bearer_auth(token)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<Value>()
                    .await
            })
            .await
            .with_context(|| format!("GET {} failed", url))?;

        tokio::time::sleep(self.request_interval).await;
        Ok(value)
    }

    pub async fn account(&self) -> Result<Value> {
        self.get_json("/me").await
    }

    /// All forms in the account, walking `page` until a short page comes back.
    pub async fn list_forms(&self) -> Result<Vec<Value>> {
        let mut forms = Vec::new();
        let mut page = 1;
        loop {
            let data = self
                .get_json(&format!("/forms?page={}&page_size={}", page, self.forms_page_size))
                .await?;
            let items = take_items(data);
            let fetched = items.len();
            forms.extend(items);
            println!("  Fetched page {}: {} forms", page, fetched);

            if fetched < self.forms_page_size {
                break;
            }
            page += 1;
        }
        Ok(forms)
    }

    pub async fn form(&self, form_id: &str) -> Result<Value> {
        self.get_json(&format!("/forms/{}", form_id)).await
    }

    /// All responses of a form, paging backwards with the `before` cursor.
    pub async fn responses(&self, form_id: &str) -> Result<Vec<Value>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!(
                "/forms/{}/responses?page_size={}",
                form_id, self.responses_page_size
            );
            if let Some(before) = &cursor {
                path.push_str(&format!("&before={}", before));
            }
            let items = take_items(self.get_json(&path).await?);
            cursor = next_cursor(&items, self.responses_page_size);
            all.extend(items);
            if cursor.is_none() {
                break;
            }
        }
        Ok(all)
    }
}

fn take_items(mut page: Value) -> Vec<Value> {
    match page.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Token of the last item when the page is full, else `None`.
fn next_cursor(items: &[Value], page_size: usize) -> Option<String> {
    if items.len() < page_size {
        return None;
    }
    items.last().and_then(|i| Node::new(i).string("token"))
}

#[derive(Debug, Serialize)]
pub struct ExportInventory {
    pub export_date: String,
    pub total_forms: usize,
    pub total_responses: usize,
    pub forms: Vec<InventoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct InventoryEntry {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InventoryEntry {
    fn from_form(form: &Value, outcome: Result<usize, String>) -> Self {
        let node = Node::new(form);
        let id = node.str_or("id", "").to_string();
        let title = node.str_or("title", "Untitled").to_string();
        match outcome {
            Ok(count) => Self {
                id,
                title,
                kind: Some(node.str_or("type", "unknown").to_string()),
                created_at: node.string("created_at"),
                last_updated_at: node.string("last_updated_at"),
                response_count: Some(count),
                is_public: Some(node.get("settings").bool_or("is_public", false)),
                display_url: Some(node.get("_links").str_or("display", "").to_string()),
                error: None,
            },
            Err(error) => Self {
                id,
                title,
                kind: None,
                created_at: None,
                last_updated_at: None,
                response_count: None,
                is_public: None,
                display_url: None,
                error: Some(error),
            },
        }
    }
}

struct ExportDirs {
    root: PathBuf,
    forms: PathBuf,
    responses: PathBuf,
    exports: PathBuf,
    inventory: PathBuf,
}

impl ExportDirs {
    fn create(root: &Path) -> Result<Self> {
        let dirs = Self {
            root: root.to_path_buf(),
            forms: root.join("forms"),
            responses: root.join("responses"),
            exports: root.join("exports"),
            inventory: root.join("inventory"),
        };
        for dir in [&dirs.forms, &dirs.responses, &dirs.exports, &dirs.inventory] {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        Ok(dirs)
    }
}

fn save_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {:?}", path))
}

/// Download every form and its responses into `out_dir`, plus an inventory.
pub async fn export_all(client: &TypeformClient, out_dir: &Path) -> Result<ExportInventory> {
    let dirs = ExportDirs::create(out_dir)?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    println!("{}", "=".repeat(60));
    println!("TYPEFORM COMPLETE DATA EXPORT");
    println!("Export started: {}", Utc::now().to_rfc3339());
    println!("{}", "=".repeat(60));

    println!("\n[1/5] Fetching account information...");
    let account = match client.account().await {
        Ok(account) => {
            save_json(&dirs.inventory.join("account_info.json"), &account)?;
            println!("  Account: {}", Node::new(&account).str_or("alias", "Unknown"));
            Some(account)
        }
        Err(e) => {
            warn!("Could not fetch account info: {:#}", e);
            None
        }
    };

    println!("\n[2/5] Fetching all forms...");
    let forms = client.list_forms().await?;
    println!("  Total forms found: {}", forms.len());
    save_json(&dirs.inventory.join("all_forms_list.json"), &forms)?;

    println!("\n[3/5] Downloading form structures...");
    for (i, form) in forms.iter().enumerate() {
        let node = Node::new(form);
        let form_id = node.str_or("id", "");
        println!("  [{}/{}] {} ({})", i + 1, forms.len(), node.str_or("title", "Untitled"), form_id);
        let details = match client.form(form_id).await {
            Ok(details) => details,
            Err(e) => {
                warn!("Error fetching form details for {}: {:#}", form_id, e);
                form.clone()
            }
        };
        save_json(&dirs.forms.join(format!("{}.json", form_id)), &details)?;
    }

    println!("\n[4/5] Downloading all responses...");
    let mut entries = Vec::with_capacity(forms.len());
    let mut total_responses = 0;
    for (i, form) in forms.iter().enumerate() {
        let node = Node::new(form);
        let form_id = node.str_or("id", "");
        let form_title = node.str_or("title", "Untitled");

        let outcome = match client.responses(form_id).await {
            Ok(responses) => {
                let count = responses.len();
                total_responses += count;
                println!("  [{}/{}] {} ({}) - {} responses", i + 1, forms.len(), form_title, form_id, count);
                save_json(
                    &dirs.responses.join(format!("{}.json", form_id)),
                    &json!({
                        "form_id": form_id,
                        "form_title": form_title,
                        "response_count": count,
                        "export_date": Utc::now().to_rfc3339(),
                        "responses": responses,
                    }),
                )?;
                Ok(count)
            }
            Err(e) => {
                println!("  [{}/{}] {} ({}) - Error: {:#}", i + 1, forms.len(), form_title, form_id, e);
                Err(format!("{:#}", e))
            }
        };
        entries.push(InventoryEntry::from_form(form, outcome));
    }

    let inventory = ExportInventory {
        export_date: Utc::now().to_rfc3339(),
        total_forms: forms.len(),
        total_responses,
        forms: entries,
    };

    println!("\n[5/5] Creating inventory summary...");
    save_json(&dirs.inventory.join("complete_inventory.json"), &inventory)?;
    std::fs::write(dirs.inventory.join("SUMMARY.md"), render_summary(&inventory))?;
    save_json(
        &dirs.exports.join(format!("typeform_export_{}.json", timestamp)),
        &json!({
            "export_date": inventory.export_date,
            "account": account,
            "inventory": &inventory,
            "forms_count": inventory.total_forms,
            "responses_count": inventory.total_responses,
        }),
    )?;

    info!(
        "Exported {} forms and {} responses to {:?}",
        inventory.total_forms, inventory.total_responses, dirs.root
    );
    Ok(inventory)
}

fn date_part(value: Option<&str>) -> String {
    value
        .map(|v| v.chars().take(10).collect())
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn render_summary(inventory: &ExportInventory) -> String {
    let mut lines = vec![
        "# Typeform Data Export Summary".to_string(),
        format!("\nExport Date: {}", inventory.export_date),
        "\n## Statistics".to_string(),
        format!("- Total Forms: {}", inventory.total_forms),
        format!("- Total Responses: {}", inventory.total_responses),
        "\n## Forms Inventory\n".to_string(),
        "| # | Form ID | Title | Type | Responses | Created | Last Updated |".to_string(),
        "|---|---------|-------|------|-----------|---------|--------------|".to_string(),
    ];

    for (i, f) in inventory.forms.iter().enumerate() {
        let title: String = f.title.chars().take(40).collect();
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} |",
            i + 1,
            f.id,
            title,
            f.kind.as_deref().unwrap_or("N/A"),
            f.response_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            date_part(f.created_at.as_deref()),
            date_part(f.last_updated_at.as_deref()),
        ));
    }

    lines.extend([
        "\n## File Structure".to_string(),
        "```".to_string(),
        "typeform/".to_string(),
        "├── forms/           # Complete form structures (questions, logic, themes)".to_string(),
        "├── responses/       # All responses for each form".to_string(),
        "├── exports/         # Combined exports".to_string(),
        "└── inventory/       # Summaries and inventories".to_string(),
        "```".to_string(),
    ]);

    lines.join("\n")
}
