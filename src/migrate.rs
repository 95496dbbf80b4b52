use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::{self, StoreError};
use crate::retry::RetryPolicy;
use crate::typeform::{
    load_document, transform_form, transform_responses, Attempt, DocumentError, SlugRegistry,
    TransformedForm,
};

#[derive(Debug, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub total_forms: usize,
    #[serde(default)]
    pub total_responses: usize,
    #[serde(default)]
    pub forms: Vec<InventoryForm>,
}

#[derive(Debug, Deserialize)]
pub struct InventoryForm {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub response_count: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationStats {
    pub assessments: usize,
    pub questions: usize,
    pub choices: usize,
    pub result_screens: usize,
    pub attempts: usize,
    pub responses: usize,
    pub existing_attempts: usize,
    pub forms_skipped: usize,
    pub forms_failed: usize,
    pub record_failures: usize,
}

impl MigrationStats {
    pub fn print(&self, dry_run: bool) {
        println!("\n{}", "=".repeat(60));
        println!("MIGRATION SUMMARY");
        println!("{}", "=".repeat(60));
        if dry_run {
            println!("\nDry run - no data written");
        } else {
            println!("\nMigration complete!");
        }
        println!("\nStats:");
        println!("  Assessments:    {}", self.assessments);
        println!("  Questions:      {}", self.questions);
        println!("  Choices:        {}", self.choices);
        println!("  Result screens: {}", self.result_screens);
        println!("  Attempts:       {}", self.attempts);
        println!("  Responses:      {}", self.responses);
        if self.existing_attempts > 0 {
            println!("  Already stored: {} attempts", self.existing_attempts);
        }
        println!("  Forms skipped:  {}", self.forms_skipped);
        println!("  Forms failed:   {}", self.forms_failed);
        println!("  Record errors:  {}", self.record_failures);
        if dry_run {
            println!("\nTo write the data, re-run with --execute");
        }
    }
}

/// Stored identity of an assessment: its row id and question ref → id map.
struct StoredForm {
    assessment_id: i64,
    question_ids: HashMap<String, i64>,
}

pub struct Migrator<'a> {
    typeform_dir: PathBuf,
    conn: Option<&'a Connection>,
    retry: RetryPolicy,
    slugs: SlugRegistry,
    stats: MigrationStats,
}

impl<'a> Migrator<'a> {
    /// `conn == None` is a dry run: everything is parsed and counted, nothing written.
    pub fn new(typeform_dir: &Path, conn: Option<&'a Connection>, retry: RetryPolicy) -> Self {
        Self {
            typeform_dir: typeform_dir.to_path_buf(),
            conn,
            retry,
            slugs: SlugRegistry::new(),
            stats: MigrationStats::default(),
        }
    }

    pub fn run(mut self) -> Result<MigrationStats> {
        let inventory_path = self.typeform_dir.join("inventory").join("complete_inventory.json");
        let raw = std::fs::read_to_string(&inventory_path)
            .with_context(|| format!("Failed to read {:?}", inventory_path))?;
        let inventory: Inventory = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid inventory {:?}", inventory_path))?;

        if let Some(conn) = self.conn {
            for slug in db::existing_slugs(conn)? {
                self.slugs.reserve(slug);
            }
        }

        println!("{}", "=".repeat(60));
        println!("TYPEFORM MIGRATION");
        println!("{}", "=".repeat(60));
        println!("\nDry run: {}", self.conn.is_none());
        println!("\nForms to migrate: {}", inventory.total_forms);
        println!("Total responses: {}", inventory.total_responses);

        for entry in &inventory.forms {
            println!("\n[Processing] {} ({})", entry.title, entry.id);
            println!("  Responses: {}", entry.response_count);
            if let Err(e) = self.migrate_form(entry) {
                warn!("Form {} failed: {}", entry.id, e);
                self.stats.forms_failed += 1;
            }
        }

        Ok(self.stats)
    }

    /// [`run`](Self::run) from inside the tokio runtime; store backoff sleeps
    /// the thread, so the worker is handed off first.
    pub fn run_blocking(self) -> Result<MigrationStats> {
        tokio::task::block_in_place(|| self.run())
    }

    fn migrate_form(&mut self, entry: &InventoryForm) -> Result<(), DocumentError> {
        let forms_dir = self.typeform_dir.join("forms");
        let Some(form_path) = locate(&forms_dir, &entry.id, "_structure") else {
            println!("  SKIP: Form file not found");
            self.stats.forms_skipped += 1;
            return Ok(());
        };

        let mut form = transform_form(&load_document(&form_path)?)?;
        if let Some(doc_id) = form.assessment.typeform_id.as_deref() {
            if doc_id != entry.id {
                warn!("Form document id {} differs from inventory id {}", doc_id, entry.id);
            }
        }
        form.assessment.typeform_id = Some(entry.id.clone());
        form.assessment.slug = self.slugs.create(&form.assessment.title);
        println!("  Questions: {}", form.questions.len());
        println!("  Result screens: {}", form.result_screens.len());

        let stored = match self.conn {
            Some(conn) => self.store_form(conn, &entry.id, &form),
            None => {
                self.stats.assessments += 1;
                self.stats.questions += form.questions.len();
                self.stats.choices += form.choice_count();
                self.stats.result_screens += form.result_screens.len();
                None
            }
        };

        let responses_dir = self.typeform_dir.join("responses");
        let Some(responses_path) = locate(&responses_dir, &entry.id, "_responses") else {
            return Ok(());
        };
        let attempts = transform_responses(&load_document(&responses_path)?)?;
        println!("  Parsed attempts: {}", attempts.len());

        match (self.conn, stored) {
            (Some(conn), Some(stored)) => {
                self.store_attempts(conn, &stored, form.assessment.total_points, &attempts)
            }
            (Some(_), None) => {
                warn!("Skipping responses for {}: assessment was not stored", entry.id);
            }
            (None, _) => {
                self.stats.attempts += attempts.len();
                self.stats.responses += attempts
                    .iter()
                    .flat_map(|a| &a.answers)
                    .filter(|ans| ans.question_ref.as_deref().is_some_and(|r| form.has_question(r)))
                    .count();
            }
        }

        Ok(())
    }

    fn store_form(
        &mut self,
        conn: &Connection,
        typeform_id: &str,
        form: &TransformedForm,
    ) -> Option<StoredForm> {
        let retry = self.retry;

        let existing = retry.run(
            "assessment lookup",
            || db::find_assessment(conn, typeform_id),
            StoreError::is_conflict,
        );
        match existing {
            Ok(Some(assessment_id)) => {
                println!("  SKIP: Already exists in database");
                return match retry.run(
                    "question lookup",
                    || db::question_ids(conn, assessment_id),
                    StoreError::is_conflict,
                ) {
                    Ok(question_ids) => Some(StoredForm { assessment_id, question_ids }),
                    Err(e) => {
                        self.record_failure("loading questions", &e);
                        None
                    }
                };
            }
            Ok(None) => {}
            Err(e) => {
                self.record_failure("checking assessment", &e);
                return None;
            }
        }

        match self.write_form(conn, form) {
            Ok((stored, choices)) => {
                self.stats.assessments += 1;
                self.stats.questions += form.questions.len();
                self.stats.choices += choices;
                self.stats.result_screens += form.result_screens.len();
                info!(
                    "Stored assessment {} ({} questions)",
                    form.assessment.slug,
                    form.questions.len()
                );
                Some(stored)
            }
            Err(e) => {
                self.record_failure("storing form, rolled back", &e);
                None
            }
        }
    }

    /// Assessment, questions, choices and result screens as one transaction.
    /// Any row that still fails after retries rolls the whole form back.
    fn write_form(
        &self,
        conn: &Connection,
        form: &TransformedForm,
    ) -> Result<(StoredForm, usize), StoreError> {
        let retry = self.retry;
        let tx = conn.unchecked_transaction()?;

        let assessment_id = retry.run(
            "insert assessment",
            || db::insert_assessment(&tx, &form.assessment),
            StoreError::is_conflict,
        )?;

        let mut question_ids = HashMap::new();
        let mut choices = 0;
        for question in &form.questions {
            let question_id = retry.run(
                "insert question",
                || db::insert_question(&tx, assessment_id, question),
                StoreError::is_conflict,
            )?;
            if let Some(r) = &question.reference {
                question_ids.insert(r.clone(), question_id);
            }

            for choice in form.choices_for(question) {
                retry.run(
                    "insert choice",
                    || db::insert_choice(&tx, question_id, choice),
                    StoreError::is_conflict,
                )?;
                choices += 1;
            }
        }

        for screen in &form.result_screens {
            retry.run(
                "insert result screen",
                || db::insert_result_screen(&tx, assessment_id, screen),
                StoreError::is_conflict,
            )?;
        }

        tx.commit()?;
        Ok((StoredForm { assessment_id, question_ids }, choices))
    }

    fn store_attempts(
        &mut self,
        conn: &Connection,
        stored: &StoredForm,
        max_score: i64,
        attempts: &[Attempt],
    ) {
        let retry = self.retry;
        let pb = ProgressBar::new(attempts.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("    [{elapsed_precise}] {bar:40} {pos}/{len} attempts")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        for attempt in attempts {
            pb.inc(1);

            // Without an id the attempt can't be matched on a re-run.
            let Some(response_id) = attempt.response_id.as_deref() else {
                warn!("Skipping attempt without response id or token");
                self.stats.record_failures += 1;
                continue;
            };
            match retry.run(
                "attempt lookup",
                || db::attempt_exists(conn, response_id),
                StoreError::is_conflict,
            ) {
                Ok(true) => {
                    self.stats.existing_attempts += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    self.record_failure("checking attempt", &e);
                    continue;
                }
            }

            let attempt_id = match retry.run(
                "insert attempt",
                || db::insert_attempt(conn, stored.assessment_id, max_score, attempt),
                StoreError::is_conflict,
            ) {
                Ok(id) => id,
                Err(e) if e.is_conflict() => {
                    self.stats.existing_attempts += 1;
                    continue;
                }
                Err(e) => {
                    self.record_failure("inserting attempt", &e);
                    continue;
                }
            };

            for answer in &attempt.answers {
                let Some(question_id) = answer
                    .question_ref
                    .as_deref()
                    .and_then(|r| stored.question_ids.get(r))
                else {
                    continue;
                };
                match retry.run(
                    "insert response",
                    || db::insert_answer(conn, attempt_id, *question_id, answer),
                    StoreError::is_conflict,
                ) {
                    Ok(_) => self.stats.responses += 1,
                    Err(e) => self.record_failure("inserting response", &e),
                }
            }

            self.stats.attempts += 1;
        }

        pb.finish_and_clear();
    }

    fn record_failure(&mut self, what: &str, err: &StoreError) {
        warn!("ERROR {}: {}", what, err);
        self.stats.record_failures += 1;
    }
}

/// `<dir>/<id>.json`, falling back to the older `<id><suffix>.json` export name.
fn locate(dir: &Path, id: &str, legacy_suffix: &str) -> Option<PathBuf> {
    [format!("{}.json", id), format!("{}{}.json", id, legacy_suffix)]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}
