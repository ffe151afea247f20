//! sketch: command-line sketchbook.
//!
//! Drawings live in a directory-backed key-value store. Content is edited as
//! JSON files outside the tool; `import` and `watch` push it through the same
//! autosave pipeline an interactive editor would use.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sketch_cli::{ContentFile, ContentWatcher, DirKv, SketchConfig};
use sketch_core::{
    AutosaveScheduler, Collaborators, DisabledThumbnails, Document, DocumentId, DocumentPatch,
    EventBus, LiveTags, Repository, SaveEvent, SaveOutcome, Subscription, SystemClock,
};

type Repo = Repository<DirKv>;

#[derive(Parser, Debug)]
#[command(name = "sketch")]
#[command(about = "Sketchbook with debounced autosave")]
struct Args {
    /// Directory holding config.json and the drawing store
    #[arg(long, env = "SKETCH_DATA_DIR", default_value = ".sketchbook")]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List drawings, most recently updated first
    List,
    /// Create an empty drawing
    Create {
        name: String,
        /// Tag to attach (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Print a drawing as JSON
    Show { id: DocumentId },
    /// Rename a drawing
    Rename { id: DocumentId, name: String },
    /// Add tags to a drawing, or remove them with --remove
    Tag {
        id: DocumentId,
        #[arg(required = true)]
        tags: Vec<String>,
        #[arg(long)]
        remove: bool,
    },
    /// Delete a drawing
    Delete { id: DocumentId },
    /// Re-link orphan records and drop dangling index entries
    Repair,
    /// Write a drawing's content to a JSON file
    Export { id: DocumentId, file: PathBuf },
    /// Save the content of a JSON file into a drawing
    Import { id: DocumentId, file: PathBuf },
    /// Autosave a JSON file into a drawing whenever it changes (Ctrl+C to stop)
    Watch { id: DocumentId, file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose). Logs go
    // to stderr so command output stays on stdout.
    let default_filter = if args.verbose {
        "debug,sketch_core=debug"
    } else {
        "info,sketch_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    debug!("Data directory: {:?}", args.data_dir);
    let config = SketchConfig::load(&args.data_dir)?;
    let store = DirKv::new(args.data_dir.join("store"));
    let repo = Arc::new(
        Repository::with_config(store, config.store.clone(), Arc::new(SystemClock))
            .context("Invalid store configuration")?,
    );

    match args.command {
        Command::List => list(&repo).await,
        Command::Create { name, tags } => {
            let doc = repo
                .create(&name, tags.iter().map(String::as_str).collect())
                .await?;
            println!("{}", doc.id);
            Ok(())
        }
        Command::Show { id } => {
            let doc = load(&repo, &id).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        Command::Rename { id, name } => {
            repo.update(&id, DocumentPatch::name(name)).await?;
            Ok(())
        }
        Command::Tag { id, tags, remove } => {
            let mut current = load(&repo, &id).await?.tags;
            for tag in &tags {
                if remove {
                    current.remove(tag);
                } else {
                    current.insert(tag);
                }
            }
            repo.update(&id, DocumentPatch::tags(current)).await?;
            Ok(())
        }
        Command::Delete { id } => {
            if !repo.delete(&id).await? {
                warn!("{} was not in the index", id);
            }
            Ok(())
        }
        Command::Repair => {
            let report = repo.repair().await?;
            if !report.has_changes() {
                println!("Index and records are consistent");
            }
            for id in &report.relinked {
                println!("relinked {}", id);
            }
            for id in &report.dropped_dangling {
                println!("dropped {}", id);
            }
            for id in &report.purged {
                println!("purged {}", id);
            }
            if report.removed_duplicates > 0 {
                println!("removed {} duplicate entries", report.removed_duplicates);
            }
            for id in &report.unreadable {
                println!("unreadable {} (left in place)", id);
            }
            Ok(())
        }
        Command::Export { id, file } => {
            let doc = load(&repo, &id).await?;
            ContentFile::new(file, doc.content).export()?;
            Ok(())
        }
        Command::Import { id, file } => import(repo, &config, &id, file).await,
        Command::Watch { id, file } => watch(repo, &config, &id, file).await,
    }
}

async fn load(repo: &Repo, id: &DocumentId) -> Result<Document> {
    repo.load(id)
        .await?
        .with_context(|| format!("No drawing with id {}", id))
}

async fn list(repo: &Repo) -> Result<()> {
    for summary in repo.list_summaries().await? {
        let tags: Vec<&str> = summary.tags.iter().collect();
        println!(
            "{}  {}  {:<24}  [{}]  {} element(s)",
            summary.id,
            summary.updated_at.format("%Y-%m-%d %H:%M:%S"),
            summary.name,
            tags.join(", "),
            summary.element_count
        );
    }
    Ok(())
}

/// Open an autosave session for `id`, with `file` standing in for the editor.
fn open_session(
    repo: Arc<Repo>,
    config: &SketchConfig,
    doc: &Document,
    file: Arc<ContentFile>,
    events: Arc<EventBus>,
) -> AutosaveScheduler<DirKv> {
    let deps = Collaborators {
        editor: file,
        metadata: Arc::new(LiveTags::new(doc.tags.clone())),
        thumbnails: Arc::new(DisabledThumbnails),
        events,
    };
    let scheduler = AutosaveScheduler::attach(doc, repo, deps, config.autosave.clone());
    // Content was read before attaching, so there is no initial load to ignore
    scheduler.mark_initialized();
    scheduler
}

async fn import(
    repo: Arc<Repo>,
    config: &SketchConfig,
    id: &DocumentId,
    file: PathBuf,
) -> Result<()> {
    let doc = load(&repo, id).await?;
    let file = Arc::new(ContentFile::new(file, doc.content.clone()));
    file.reload()?;

    let events = Arc::new(EventBus::new());
    let scheduler = open_session(repo, config, &doc, Arc::clone(&file), events);
    scheduler.on_change();
    match scheduler.close().await? {
        SaveOutcome::Saved { updated_at } => println!("saved at {}", updated_at),
        SaveOutcome::Unchanged => println!("no changes"),
        other => bail!("Import of {:?} did not complete: {:?}", file.path(), other),
    }
    Ok(())
}

async fn watch(
    repo: Arc<Repo>,
    config: &SketchConfig,
    id: &DocumentId,
    path: PathBuf,
) -> Result<()> {
    let doc = load(&repo, id).await?;
    let file = Arc::new(ContentFile::new(path.clone(), doc.content.clone()));
    if path.exists() {
        file.reload()?;
    } else {
        file.export()?;
        info!("Exported current content to {:?}", path);
    }

    let events = Arc::new(EventBus::new());
    let _subscription = log_save_events(&events, &doc.id, &path);
    let scheduler = open_session(repo, config, &doc, Arc::clone(&file), events);
    // File may already differ from the stored content
    scheduler.on_change();

    let mut watcher = ContentWatcher::new(&path)?;
    info!(
        "Watching {:?} (autosave after {}ms of quiet). Press Ctrl+C to stop.",
        watcher.path(),
        config.autosave.debounce_ms
    );

    loop {
        tokio::select! {
            changed = watcher.changed() => {
                if changed.is_none() {
                    warn!("File watcher stopped");
                    break;
                }
                match file.reload() {
                    Ok(true) => scheduler.on_change(),
                    Ok(false) => debug!("Content of {:?} unchanged", path),
                    Err(e) => warn!("Ignoring unreadable content: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if scheduler.is_dirty() {
        info!("Saving pending changes before exit");
    }
    scheduler.close().await?;
    Ok(())
}

fn log_save_events(events: &Arc<EventBus>, id: &DocumentId, path: &Path) -> Subscription {
    let path = path.to_path_buf();
    events.subscribe_to(id.clone(), move |event| match event {
        SaveEvent::Saved { updated_at, .. } => {
            info!("Saved {} from {:?} at {}", event.document(), path, updated_at)
        }
        SaveEvent::Failed {
            error, retryable, ..
        } => warn!(
            "Save of {} failed (retryable: {}): {}",
            event.document(),
            retryable,
            error
        ),
        SaveEvent::ThumbnailSkipped { reason, .. } => {
            debug!("No thumbnail for {}: {}", event.document(), reason)
        }
    })
}
