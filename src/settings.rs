use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

/// Runtime settings, read from `.env` and the process environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub typeform_api_key: Option<String>,
    pub typeform_dir: PathBuf,
    pub migrate_db_path: PathBuf,
    pub wordpress_dir: PathBuf,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_builder(Config::builder().add_source(Environment::default()))
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .set_default("typeform_dir", "typeform")?
            .set_default("migrate_db_path", "data/assessments.sqlite")?
            .set_default("wordpress_dir", "legacy-wordpress")?
            .build()
            .and_then(Config::try_deserialize)
            .context("Invalid configuration")
    }

    pub fn api_key(&self) -> Result<&str> {
        self.typeform_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .context("TYPEFORM_API_KEY is required (set it in .env or the environment)")
    }

    pub fn wordpress_export(&self) -> PathBuf {
        self.wordpress_dir.join("export.xml")
    }

    pub fn wordpress_content(&self, file: &str) -> PathBuf {
        self.wordpress_dir.join("content").join(file)
    }
}
