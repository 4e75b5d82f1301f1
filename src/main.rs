use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use prompt_vault::app::{handle_fatal_error, init_logging};
use prompt_vault::{App, AppConfig};

/// Local-first prompt library storage
#[derive(Parser)]
#[command(name = "prompt-vault")]
#[command(about = "Inspect, migrate and maintain a local prompt library", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show storage mode, migration status and library size (default command)
    Status,
    /// Retry the legacy data migration if it has not completed
    Migrate,
    /// Write all prompts, categories and settings as a JSON bundle
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a JSON bundle produced by `export`
    Import {
        file: PathBuf,
    },
    /// Delete all prompts, categories, settings and migration state
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// List prompts
    List {
        /// Show the trash instead of active prompts
        #[arg(long)]
        trash: bool,
    },
    /// Move a prompt to the trash
    Delete {
        id: String,
        /// Remove irreversibly instead
        #[arg(long)]
        permanent: bool,
    },
    /// Take a prompt back out of the trash
    Restore {
        id: String,
    },
    /// Run a statement against the SQL mirror
    Sql {
        query: String,
    },
    /// Manage the saved export directory handle
    Handle {
        #[command(subcommand)]
        command: HandleCommands,
    },
}

#[derive(Subcommand)]
enum HandleCommands {
    /// Print the saved handle
    Show,
    /// Save a handle
    Set { name: String, token: String },
    /// Forget the saved handle
    Clear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Status);
    if let Err(e) = run(command, cli.config.as_deref()).await {
        handle_fatal_error(e, cli.verbose);
    }
}

async fn run(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).context("Failed to load configuration")?;
    debug!("Using data directory {}", config.storage.base_dir.display());
    let app = App::bootstrap(config).await?;

    match command {
        Commands::Status => run_status(&app).await,
        Commands::Migrate => run_migrate(&app).await,
        Commands::Export { output } => run_export(&app, output.as_deref()).await,
        Commands::Import { file } => run_import(&app, &file).await,
        Commands::Reset { yes } => {
            if !yes {
                bail!("Refusing to reset without --yes");
            }
            app.reset().await?;
            println!("All data cleared.");
            Ok(())
        }
        Commands::List { trash } => run_list(&app, trash).await,
        Commands::Delete { id, permanent } => {
            if permanent {
                app.repository().permanent_delete(&id).await?;
                println!("Deleted {id} permanently.");
            } else {
                app.repository().soft_delete(&id).await?;
                println!("Moved {id} to the trash.");
            }
            Ok(())
        }
        Commands::Restore { id } => {
            app.repository().restore(&id).await?;
            println!("Restored {id}.");
            Ok(())
        }
        Commands::Sql { query } => run_sql(&app, &query).await,
        Commands::Handle { command } => run_handle(&app, command).await,
    }
}

async fn run_status(app: &App) -> anyhow::Result<()> {
    let status = app.migration().get_migration_status();
    let repo = app.repository();
    println!("Storage mode:   {}", app.storage_mode());
    println!(
        "Migration:      {} ({} items)",
        if status.is_completed { "completed" } else { "pending" },
        status.migrated_items
    );
    for error in &status.errors {
        println!("  error: {error}");
    }
    println!("Prompts:        {}", repo.list_active().await?.len());
    println!("Trash:          {}", repo.list_trash().await?.len());
    println!("Categories:     {}", repo.categories().await?.join(", "));
    println!("Theme:          {}", repo.theme().await?);
    match app.analytics().adapter() {
        Some(adapter) => println!("SQL mirror:     {} rows", adapter.mirror_row_count()?),
        None => println!("SQL mirror:     unavailable"),
    }
    Ok(())
}

async fn run_migrate(app: &App) -> anyhow::Result<()> {
    let result = app.migration().migrate_all_data_to_idb().await;
    for error in &result.errors {
        eprintln!("  {error}");
    }
    if !result.success {
        bail!("Migration incomplete with {} errors", result.errors.len());
    }
    let status = app.migration().get_migration_status();
    println!(
        "Migration completed: {} items in total ({} this run, {:?})",
        status.migrated_items, result.migrated_items, result.duration
    );
    Ok(())
}

async fn run_export(app: &App, output: Option<&Path>) -> anyhow::Result<()> {
    let bundle = app.export().await?;
    let json = bundle.to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} prompts to {}", bundle.prompts.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn run_import(app: &App, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let bundle: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let result = app.import(&bundle).await;
    println!("Imported {} items.", result.imported_items);
    for error in &result.errors {
        eprintln!("  {error}");
    }
    if !result.success {
        bail!("Import finished with {} errors", result.errors.len());
    }
    Ok(())
}

async fn run_list(app: &App, trash: bool) -> anyhow::Result<()> {
    let prompts = if trash {
        app.repository().list_trash().await?
    } else {
        app.repository().list_active().await?
    };
    if prompts.is_empty() {
        println!("No prompts found.");
        return Ok(());
    }
    for prompt in prompts {
        let star = if prompt.is_favorite { "*" } else { " " };
        println!("{star} {}\t{}\t{}", prompt.id, prompt.category, prompt.title);
    }
    Ok(())
}

async fn run_sql(app: &App, query: &str) -> anyhow::Result<()> {
    let adapter = app.analytics().require()?;
    let result = adapter.execute_sql(query).await?;
    if result.columns.is_empty() {
        println!("{} rows affected.", result.rows_affected);
        return Ok(());
    }
    println!("{}", result.columns.join("\t"));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(render_cell).collect();
        println!("{}", cells.join("\t"));
    }
    Ok(())
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn run_handle(app: &App, command: HandleCommands) -> anyhow::Result<()> {
    match command {
        HandleCommands::Show => match app.load_directory_handle().await? {
            Some(handle) => println!("{}\t{}", handle.name, handle.token),
            None => println!("No directory handle saved."),
        },
        HandleCommands::Set { name, token } => {
            app.save_directory_handle(&name, &token).await?;
            println!("Saved directory handle {name}.");
        }
        HandleCommands::Clear => {
            app.clear_directory_handle().await?;
            println!("Directory handle cleared.");
        }
    }
    Ok(())
}
