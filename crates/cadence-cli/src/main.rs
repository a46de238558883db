use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cadence_checklists::ChecklistStore;
use cadence_core::config::CadenceConfig;
use cadence_runs::RunRegistry;
use cadence_scheduler::{reconcile, Engine};
use cadence_templates::{TemplateInput, TemplateStore};

#[derive(Parser)]
#[command(name = "cadence", version, about = "Recurring checklist run tracker")]
struct Cli {
    /// Config file path (defaults to ~/.cadence/cadence.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage checklist categories and their items.
    Checklist {
        #[command(subcommand)]
        cmd: ChecklistCmd,
    },
    /// Manage recurrence templates.
    Template {
        #[command(subcommand)]
        cmd: TemplateCmd,
    },
    /// Inspect and act on materialized runs.
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },
    /// Run one evaluation + reconcile pass and exit.
    Tick,
    /// Keep evaluating on the configured interval until interrupted.
    Watch,
}

#[derive(Subcommand)]
enum ChecklistCmd {
    /// Create a base checklist category.
    Add { name: String },
    /// List base categories (use --all to include run clones).
    List {
        #[arg(long)]
        all: bool,
    },
    /// Show one checklist with per-item checked state.
    Show { key: String },
    /// Rename a category (the key stays stable).
    Rename { key: String, name: String },
    /// Delete a category and its completion state.
    Rm { key: String },
    /// Append an item.
    AddItem { key: String, text: String },
    /// Rewrite the item at a zero-based index.
    EditItem {
        key: String,
        index: usize,
        text: String,
    },
    /// Remove the item at a zero-based index.
    RmItem { key: String, index: usize },
    /// Check an item off.
    Check { key: String, item: String },
    /// Uncheck an item.
    Uncheck { key: String, item: String },
    /// Uncheck every item of the checklist.
    Reset { key: String },
    /// Print the checklist as CSV.
    Export { key: String },
}

#[derive(Subcommand)]
enum TemplateCmd {
    /// Create a template.
    Add {
        #[arg(long)]
        name: String,
        /// Key of the base checklist to clone from.
        #[arg(long)]
        source: String,
        /// daily | weekly | biweekly | monthly
        #[arg(long)]
        frequency: String,
        /// Days before the due date a run may appear.
        #[arg(long, default_value_t = 0)]
        lead: i64,
        /// First due date, YYYY-MM-DD.
        #[arg(long)]
        due: String,
    },
    /// List templates.
    List,
    /// Rewrite a template (same fields as add; the id is immutable).
    Edit {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        frequency: String,
        #[arg(long, default_value_t = 0)]
        lead: i64,
        #[arg(long)]
        due: String,
    },
    /// Delete a template. Existing runs stay.
    Rm { id: String },
    /// Materialize the current occurrence now, ignoring the lead window.
    Generate { id: String },
}

#[derive(Subcommand)]
enum RunCmd {
    /// List runs, soonest due first.
    List,
    /// Mark a run completed and check all its items.
    Complete { id: String },
    /// Move a completed run back to pending.
    Reopen { id: String },
    /// Remove a run, its checklist and its completion state.
    Archive {
        id: String,
        /// Archiving is destructive; pass --yes to confirm.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CadenceConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        CadenceConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // Run all schema migrations (idempotent).
    cadence_checklists::db::init_db(&conn)?;
    cadence_templates::db::init_db(&conn)?;
    cadence_runs::db::init_db(&conn)?;

    let db = Arc::new(Mutex::new(conn));
    let checklists = Arc::new(ChecklistStore::new(Arc::clone(&db)));
    let templates = Arc::new(TemplateStore::new(Arc::clone(&db)));
    let runs = Arc::new(RunRegistry::new(db));

    // One-time keyspace migration and crash-window sweep before any
    // command touches state.
    checklists.migrate_legacy_keys()?;
    let engine = Engine::new(
        Arc::clone(&checklists),
        Arc::clone(&templates),
        Arc::clone(&runs),
    );
    engine.cleanup_orphans()?;

    match cli.command {
        Command::Checklist { cmd } => checklist_cmd(cmd, &checklists, &runs)?,
        Command::Template { cmd } => template_cmd(cmd, &engine, &templates, &checklists)?,
        Command::Run { cmd } => run_cmd(cmd, &runs, &checklists)?,
        Command::Tick => {
            let today = chrono::Utc::now().date_naive();
            let report = engine.evaluate(today)?;
            for run in &report.created {
                println!("materialized {} (due {})", run.id, run.due_date);
            }
            for failure in &report.failures {
                println!(
                    "skipped template {} ({}): {}",
                    failure.template_name, failure.template_id, failure.reason
                );
            }
            let transitions = reconcile(&checklists, &runs)?;
            println!(
                "{} run(s) materialized, {} status change(s)",
                report.created.len(),
                transitions
            );
        }
        Command::Watch => {
            let tick = Duration::from_secs(config.scheduler.tick_secs);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = tokio::spawn(engine.run(shutdown_rx, tick));
            println!("watching (tick every {}s, ctrl-c to stop)", tick.as_secs());
            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
        }
    }

    Ok(())
}

fn checklist_cmd(
    cmd: ChecklistCmd,
    checklists: &ChecklistStore,
    runs: &RunRegistry,
) -> anyhow::Result<()> {
    match cmd {
        ChecklistCmd::Add { name } => {
            let inst = checklists.create(&name)?;
            println!("created {} ({})", inst.name, inst.key);
        }
        ChecklistCmd::List { all } => {
            let instances = if all {
                checklists.list()?
            } else {
                checklists.list_base()?
            };
            for inst in instances {
                let kind = if inst.is_run_instance() { "run" } else { "base" };
                println!(
                    "{:<30} {:<6} {:>3} item(s)  {}",
                    inst.key,
                    kind,
                    inst.items.len(),
                    inst.name
                );
            }
        }
        ChecklistCmd::Show { key } => {
            let inst = checklists
                .get(&key)?
                .ok_or_else(|| anyhow::anyhow!("checklist not found: {key}"))?;
            println!("{} ({}%)", inst.name, checklists.progress(&key)?);
            for item in &inst.items {
                let mark = if checklists.is_checked(&key, item)? {
                    "x"
                } else {
                    " "
                };
                println!("  [{mark}] {item}");
            }
        }
        ChecklistCmd::Rename { key, name } => {
            checklists.rename(&key, &name)?;
            println!("renamed {key}");
        }
        ChecklistCmd::Rm { key } => {
            checklists.delete(&key)?;
            reconcile(checklists, runs)?;
            println!("deleted {key}");
        }
        ChecklistCmd::AddItem { key, text } => {
            checklists.add_item(&key, &text)?;
            reconcile(checklists, runs)?;
        }
        ChecklistCmd::EditItem { key, index, text } => {
            checklists.rename_item(&key, index, &text)?;
            reconcile(checklists, runs)?;
        }
        ChecklistCmd::RmItem { key, index } => {
            checklists.remove_item(&key, index)?;
            reconcile(checklists, runs)?;
        }
        ChecklistCmd::Check { key, item } => {
            checklists.set_checked(&key, &item, true)?;
            reconcile(checklists, runs)?;
        }
        ChecklistCmd::Uncheck { key, item } => {
            checklists.set_checked(&key, &item, false)?;
            reconcile(checklists, runs)?;
        }
        ChecklistCmd::Reset { key } => {
            checklists.reset(&key)?;
            reconcile(checklists, runs)?;
        }
        ChecklistCmd::Export { key } => {
            print!("{}", checklists.export_csv(&key)?);
        }
    }
    Ok(())
}

fn template_cmd(
    cmd: TemplateCmd,
    engine: &Engine,
    templates: &TemplateStore,
    checklists: &ChecklistStore,
) -> anyhow::Result<()> {
    match cmd {
        TemplateCmd::Add {
            name,
            source,
            frequency,
            lead,
            due,
        } => {
            let t = templates.create(
                &TemplateInput {
                    name,
                    source_key: source,
                    frequency,
                    lead_days: lead,
                    next_due: due,
                },
                checklists,
            )?;
            println!("created template {} ({})", t.name, t.id);
        }
        TemplateCmd::List => {
            for t in templates.list()? {
                println!(
                    "{}  {:<9} next {}  lead {}d  source {}  {}",
                    t.id, t.frequency, t.next_due, t.lead_days, t.source_key, t.name
                );
            }
        }
        TemplateCmd::Edit {
            id,
            name,
            source,
            frequency,
            lead,
            due,
        } => {
            let t = templates.update(
                &id,
                &TemplateInput {
                    name,
                    source_key: source,
                    frequency,
                    lead_days: lead,
                    next_due: due,
                },
                checklists,
            )?;
            println!("updated template {}", t.id);
        }
        TemplateCmd::Rm { id } => {
            templates.delete(&id)?;
            println!("deleted template {id} (existing runs kept)");
        }
        TemplateCmd::Generate { id } => match engine.generate_now(&id)? {
            Some(run) => println!("materialized {} (due {})", run.id, run.due_date),
            None => println!("occurrence already materialized, nothing to do"),
        },
    }
    Ok(())
}

fn run_cmd(cmd: RunCmd, runs: &RunRegistry, checklists: &ChecklistStore) -> anyhow::Result<()> {
    match cmd {
        RunCmd::List => {
            let today = chrono::Utc::now().date_naive();
            for run in runs.list()? {
                let removed = checklists.get(&run.instance_key)?.is_none();
                let mut flags = String::new();
                if run.is_overdue(today) {
                    flags.push_str(" overdue");
                }
                if run.manual {
                    flags.push_str(" manual");
                }
                if removed {
                    flags.push_str(" removed");
                }
                println!(
                    "{}  due {}  {:<9}{}  {}",
                    run.id, run.due_date, run.status.to_string(), flags, run.template_name
                );
            }
        }
        RunCmd::Complete { id } => {
            let run = runs.complete(&id, checklists)?;
            println!("completed {}", run.id);
        }
        RunCmd::Reopen { id } => {
            let run = runs.reopen(&id)?;
            println!("reopened {}", run.id);
        }
        RunCmd::Archive { id, yes } => {
            if !yes {
                anyhow::bail!(
                    "archiving removes the run, its checklist and its completion state; \
                     pass --yes to confirm"
                );
            }
            runs.archive(&id, checklists)?;
            println!("archived {id}");
        }
    }
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
