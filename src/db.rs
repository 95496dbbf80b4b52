use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, ToSql};
use thiserror::Error;

use crate::typeform::{Answer, Assessment, Attempt, Choice, Question, ResultScreen};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row already exists in {0}")]
    Conflict(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS assessments (
            id                    INTEGER PRIMARY KEY,
            typeform_id           TEXT UNIQUE,
            title                 TEXT NOT NULL,
            slug                  TEXT UNIQUE NOT NULL,
            language              TEXT NOT NULL DEFAULT 'en',
            is_public             BOOLEAN NOT NULL DEFAULT 1,
            is_active             BOOLEAN NOT NULL DEFAULT 1,
            show_progress_bar     BOOLEAN NOT NULL DEFAULT 1,
            show_question_numbers BOOLEAN NOT NULL DEFAULT 1,
            welcome_title         TEXT,
            welcome_description   TEXT,
            welcome_image_url     TEXT,
            welcome_button_text   TEXT,
            total_points          INTEGER NOT NULL DEFAULT 0,
            created_at            TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS questions (
            id            INTEGER PRIMARY KEY,
            assessment_id INTEGER NOT NULL REFERENCES assessments(id),
            typeform_ref  TEXT,
            type          TEXT NOT NULL,
            title         TEXT NOT NULL,
            description   TEXT,
            image_url     TEXT,
            is_required   BOOLEAN NOT NULL DEFAULT 0,
            points        INTEGER NOT NULL DEFAULT 0,
            order_index   INTEGER NOT NULL,
            settings      TEXT NOT NULL DEFAULT '{}',
            UNIQUE(assessment_id, order_index)
        );
        CREATE INDEX IF NOT EXISTS idx_questions_assessment ON questions(assessment_id);

        CREATE TABLE IF NOT EXISTS choices (
            id           INTEGER PRIMARY KEY,
            question_id  INTEGER NOT NULL REFERENCES questions(id),
            typeform_ref TEXT,
            label        TEXT NOT NULL,
            image_url    TEXT,
            is_correct   BOOLEAN NOT NULL DEFAULT 0,
            points       INTEGER NOT NULL DEFAULT 0,
            order_index  INTEGER NOT NULL,
            UNIQUE(question_id, typeform_ref)
        );
        CREATE INDEX IF NOT EXISTS idx_choices_question ON choices(question_id);

        CREATE TABLE IF NOT EXISTS result_screens (
            id            INTEGER PRIMARY KEY,
            assessment_id INTEGER NOT NULL REFERENCES assessments(id),
            typeform_ref  TEXT,
            title         TEXT NOT NULL,
            description   TEXT,
            image_url     TEXT,
            button_text   TEXT,
            button_url    TEXT,
            min_score     INTEGER,
            max_score     INTEGER,
            is_default    BOOLEAN NOT NULL DEFAULT 0,
            order_index   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS assessment_attempts (
            id                    INTEGER PRIMARY KEY,
            assessment_id         INTEGER NOT NULL REFERENCES assessments(id),
            typeform_response_id  TEXT UNIQUE,
            user_email            TEXT,
            user_name             TEXT,
            score                 REAL NOT NULL DEFAULT 0,
            max_score             INTEGER NOT NULL DEFAULT 0,
            typeform_submitted_at TEXT,
            typeform_landed_at    TEXT,
            created_at            TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_attempts_assessment ON assessment_attempts(assessment_id);

        CREATE TABLE IF NOT EXISTS responses (
            id            INTEGER PRIMARY KEY,
            attempt_id    INTEGER NOT NULL REFERENCES assessment_attempts(id),
            question_id   INTEGER NOT NULL REFERENCES questions(id),
            text_value    TEXT,
            number_value  REAL,
            boolean_value BOOLEAN
        );
        CREATE INDEX IF NOT EXISTS idx_responses_attempt ON responses(attempt_id);
        ",
    )?;
    Ok(())
}

// ── Generic row access ──

/// Insert one row and return its generated id.
pub fn insert(conn: &Connection, table: &str, data: &[(&str, &dyn ToSql)]) -> Result<i64, StoreError> {
    let cols: Vec<&str> = data.iter().map(|(k, _)| *k).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        cols.join(", "),
        placeholders.join(", ")
    );
    let params: Vec<&dyn ToSql> = data.iter().map(|(_, v)| *v).collect();
    match conn.execute(&sql, params.as_slice()) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation
            && is_unique_violation(e.extended_code) =>
        {
            Err(StoreError::Conflict(table.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn is_unique_violation(extended_code: i32) -> bool {
    extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
}

/// Id of the first row whose `column` equals `value`.
pub fn find_id(
    conn: &Connection,
    table: &str,
    column: &str,
    value: &dyn ToSql,
) -> Result<Option<i64>, StoreError> {
    let sql = format!("SELECT id FROM {} WHERE {} = ?1 ORDER BY id LIMIT 1", table, column);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map([value], |row| row.get::<_, i64>(0))?;
    Ok(rows.next().transpose()?)
}

pub fn count(conn: &Connection, table: &str) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
}

// ── Assessments ──

pub fn find_assessment(conn: &Connection, typeform_id: &str) -> Result<Option<i64>, StoreError> {
    find_id(conn, "assessments", "typeform_id", &typeform_id)
}

pub fn insert_assessment(conn: &Connection, a: &Assessment) -> Result<i64, StoreError> {
    insert(
        conn,
        "assessments",
        &[
            ("typeform_id", &a.typeform_id as &dyn ToSql),
            ("title", &a.title),
            ("slug", &a.slug),
            ("language", &a.language),
            ("is_public", &a.is_public),
            ("is_active", &a.is_active),
            ("show_progress_bar", &a.show_progress_bar),
            ("show_question_numbers", &a.show_question_numbers),
            ("welcome_title", &a.welcome_title),
            ("welcome_description", &a.welcome_description),
            ("welcome_image_url", &a.welcome_image_url),
            ("welcome_button_text", &a.welcome_button_text),
            ("total_points", &a.total_points),
        ],
    )
}

pub fn insert_question(conn: &Connection, assessment_id: i64, q: &Question) -> Result<i64, StoreError> {
    let settings = serde_json::to_string(&q.settings).unwrap_or_else(|_| "{}".to_string());
    let order_index = q.order_index as i64;
    let kind = q.kind.as_str();
    insert(
        conn,
        "questions",
        &[
            ("assessment_id", &assessment_id as &dyn ToSql),
            ("typeform_ref", &q.reference),
            ("type", &kind),
            ("title", &q.title),
            ("description", &q.description),
            ("image_url", &q.image_url),
            ("is_required", &q.is_required),
            ("points", &q.points),
            ("order_index", &order_index),
            ("settings", &settings),
        ],
    )
}

pub fn insert_choice(conn: &Connection, question_id: i64, c: &Choice) -> Result<i64, StoreError> {
    let order_index = c.order_index as i64;
    insert(
        conn,
        "choices",
        &[
            ("question_id", &question_id as &dyn ToSql),
            ("typeform_ref", &c.reference),
            ("label", &c.label),
            ("image_url", &c.image_url),
            ("is_correct", &c.is_correct),
            ("points", &c.points),
            ("order_index", &order_index),
        ],
    )
}

pub fn insert_result_screen(
    conn: &Connection,
    assessment_id: i64,
    s: &ResultScreen,
) -> Result<i64, StoreError> {
    let order_index = s.order_index as i64;
    insert(
        conn,
        "result_screens",
        &[
            ("assessment_id", &assessment_id as &dyn ToSql),
            ("typeform_ref", &s.reference),
            ("title", &s.title),
            ("description", &s.description),
            ("image_url", &s.image_url),
            ("button_text", &s.button_text),
            ("button_url", &s.button_url),
            ("min_score", &s.min_score),
            ("max_score", &s.max_score),
            ("is_default", &s.is_default),
            ("order_index", &order_index),
        ],
    )
}

/// Map of question `typeform_ref` → id for one assessment.
pub fn question_ids(conn: &Connection, assessment_id: i64) -> Result<HashMap<String, i64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT typeform_ref, id FROM questions
         WHERE assessment_id = ?1 AND typeform_ref IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([assessment_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn existing_slugs(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT slug FROM assessments")?;
    let slugs = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(slugs)
}

// ── Attempts ──

pub fn attempt_exists(conn: &Connection, response_id: &str) -> Result<bool, StoreError> {
    Ok(find_id(conn, "assessment_attempts", "typeform_response_id", &response_id)?.is_some())
}

pub fn insert_attempt(
    conn: &Connection,
    assessment_id: i64,
    max_score: i64,
    a: &Attempt,
) -> Result<i64, StoreError> {
    let submitted = a.submitted_at.map(|t| t.to_rfc3339());
    let landed = a.landed_at.map(|t| t.to_rfc3339());
    insert(
        conn,
        "assessment_attempts",
        &[
            ("assessment_id", &assessment_id as &dyn ToSql),
            ("typeform_response_id", &a.response_id),
            ("user_email", &a.user_email),
            ("user_name", &a.user_name),
            ("score", &a.score),
            ("max_score", &max_score),
            ("typeform_submitted_at", &submitted),
            ("typeform_landed_at", &landed),
        ],
    )
}

pub fn insert_answer(
    conn: &Connection,
    attempt_id: i64,
    question_id: i64,
    a: &Answer,
) -> Result<i64, StoreError> {
    insert(
        conn,
        "responses",
        &[
            ("attempt_id", &attempt_id as &dyn ToSql),
            ("question_id", &question_id),
            ("text_value", &a.text_value),
            ("number_value", &a.number_value),
            ("boolean_value", &a.boolean_value),
        ],
    )
}

// ── Stats ──

pub const TABLES: [&str; 6] = [
    "assessments",
    "questions",
    "choices",
    "result_screens",
    "assessment_attempts",
    "responses",
];

pub fn get_stats(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    let mut stats = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        stats.push((table, count(conn, table)?));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeform::{transform_form, transform_responses};

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn sample_form() -> crate::typeform::TransformedForm {
        let raw = std::fs::read_to_string("tests/fixtures/quiz_form.json").unwrap();
        let mut form = transform_form(&serde_json::from_str(&raw).unwrap()).unwrap();
        form.assessment.slug = "implant-dentistry-quiz".to_string();
        form
    }

    #[test]
    fn insert_returns_ids() {
        let conn = memory_db();
        let form = sample_form();
        let a_id = insert_assessment(&conn, &form.assessment).unwrap();
        let q_id = insert_question(&conn, a_id, &form.questions[0]).unwrap();
        for c in form.choices_for(&form.questions[0]) {
            insert_choice(&conn, q_id, c).unwrap();
        }
        assert_eq!(find_assessment(&conn, "Xq3Lr9").unwrap(), Some(a_id));
        assert_eq!(count(&conn, "choices").unwrap(), 3);
        let map = question_ids(&conn, a_id).unwrap();
        assert_eq!(map.get("implant_site"), Some(&q_id));

        let settings: String = conn
            .query_row("SELECT settings FROM questions WHERE id = ?1", [q_id], |r| r.get(0))
            .unwrap();
        assert!(settings.contains("\"randomize\":true"));
    }

    #[test]
    fn duplicate_natural_key_is_conflict() {
        let conn = memory_db();
        let form = sample_form();
        insert_assessment(&conn, &form.assessment).unwrap();
        let err = insert_assessment(&conn, &form.assessment).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn attempts_keyed_by_response_id() {
        let conn = memory_db();
        let form = sample_form();
        let a_id = insert_assessment(&conn, &form.assessment).unwrap();

        let raw = std::fs::read_to_string("tests/fixtures/quiz_responses.json").unwrap();
        let attempts = transform_responses(&serde_json::from_str(&raw).unwrap()).unwrap();
        let first = &attempts[0];

        assert!(!attempt_exists(&conn, "r_001").unwrap());
        insert_attempt(&conn, a_id, 5, first).unwrap();
        assert!(attempt_exists(&conn, "r_001").unwrap());
        assert!(insert_attempt(&conn, a_id, 5, first).unwrap_err().is_conflict());
    }

    #[test]
    fn foreign_key_failure_is_not_conflict() {
        let conn = memory_db();
        let form = sample_form();
        let err = insert_question(&conn, 999, &form.questions[0]).unwrap_err();
        assert!(!err.is_conflict());
    }

    #[test]
    fn stats_cover_all_tables() {
        let conn = memory_db();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.len(), TABLES.len());
        assert!(stats.iter().all(|(_, n)| *n == 0));
    }
}
