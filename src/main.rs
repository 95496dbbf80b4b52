mod db;
mod export;
mod migrate;
mod retry;
mod settings;
mod typeform;
mod wordpress;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use settings::Settings;

#[derive(Parser)]
#[command(name = "legacy_migrate", about = "Move legacy Typeform and WordPress content into the new platform")]
struct Cli {
    /// SQLite database to migrate into (overrides MIGRATE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Typeform export directory (overrides TYPEFORM_DIR)
    #[arg(long, global = true)]
    typeform_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every Typeform form and its responses
    Export,
    /// Load exported forms and responses into the database
    Migrate {
        /// Write to the database (default is a dry run)
        #[arg(long)]
        execute: bool,
    },
    /// Print the normalised form (and attempts) for one export file
    Transform {
        /// Form definition JSON
        form: PathBuf,
        /// Response export JSON for the same form
        #[arg(short, long)]
        responses: Option<PathBuf>,
    },
    /// Generate posts.json from a WordPress export
    Posts {
        input: Option<PathBuf>,
        output: Option<PathBuf>,
    },
    /// Generate comments.json from a WordPress export
    Comments {
        input: Option<PathBuf>,
        output: Option<PathBuf>,
    },
    /// Show row counts for the migration tables
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.migrate_db_path = db;
    }
    if let Some(dir) = cli.typeform_dir {
        settings.typeform_dir = dir;
    }

    let result = match cli.command {
        Commands::Export => {
            let client = export::TypeformClient::new(settings.api_key()?);
            let inventory = export::export_all(&client, &settings.typeform_dir).await?;
            println!("\n{}", "=".repeat(60));
            println!("EXPORT COMPLETE!");
            println!("{}", "=".repeat(60));
            println!("\nTotal forms exported: {}", inventory.total_forms);
            println!("Total responses exported: {}", inventory.total_responses);
            println!("\nFiles saved to: {}", settings.typeform_dir.display());
            Ok(())
        }
        Commands::Migrate { execute } => {
            let retry = retry::RetryPolicy::default();
            let stats = if execute {
                let conn = db::connect(&settings.migrate_db_path)?;
                db::init_schema(&conn)?;
                migrate::Migrator::new(&settings.typeform_dir, Some(&conn), retry).run_blocking()?
            } else {
                migrate::Migrator::new(&settings.typeform_dir, None, retry).run()?
            };
            stats.print(!execute);
            Ok(())
        }
        Commands::Transform { form, responses } => {
            let doc = typeform::load_document(&form)?;
            let transformed = typeform::transform_form(&doc)
                .with_context(|| format!("Failed to transform {:?}", form))?;
            println!("{}", serde_json::to_string_pretty(&transformed)?);

            if let Some(path) = responses {
                let attempts = typeform::transform_responses(&typeform::load_document(&path)?)
                    .with_context(|| format!("Failed to transform {:?}", path))?;
                println!("{}", serde_json::to_string_pretty(&attempts)?);
            }
            Ok(())
        }
        Commands::Posts { input, output } => {
            let input = input.unwrap_or_else(|| settings.wordpress_export());
            let output = output.unwrap_or_else(|| settings.wordpress_content("posts.json"));
            let count = wordpress::generate_posts(&input, &output)?;
            println!("Generated {} posts -> {}", count, output.display());
            Ok(())
        }
        Commands::Comments { input, output } => {
            let input = input.unwrap_or_else(|| settings.wordpress_export());
            let output = output.unwrap_or_else(|| settings.wordpress_content("comments.json"));
            let count = wordpress::generate_comments(&input, &output)?;
            println!("Extracted {} comments -> {}", count, output.display());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.migrate_db_path)?;
            db::init_schema(&conn)?;
            for (table, rows) in db::get_stats(&conn)? {
                println!("{:<20} {}", format!("{}:", table), rows);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
