// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Meme Manager: import, tag, search and share meme images.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use mememanager::config::AppConfig;
use mememanager::library::{ImageDetails, MemeLibrary};
use mememanager::watcher::{FileWatcher, Inbox};
use mememanager::{MemeError, Result};

/// Meme Manager CLI
#[derive(Parser, Debug)]
#[command(name = "mememanager")]
#[command(version)]
#[command(about = "Import, tag, search and share meme images", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a config file and storage folders
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Import image files
    Import {
        /// Files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tags to attach to every imported image
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// Import image bytes read from stdin
    Paste {
        /// Name to record for the image
        #[arg(short, long)]
        name: Option<String>,

        /// Tags to attach
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// Watch an inbox directory and import files dropped into it
    Watch {
        /// Inbox directory (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Tags to attach to every imported image
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Leave imported files in the inbox
        #[arg(long)]
        keep: bool,

        /// Do not import files already in the inbox on startup
        #[arg(long)]
        skip_existing: bool,
    },

    /// List images, newest first
    List {
        /// Maximum number to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Search images by name and tags
    Search {
        /// Search query
        #[arg(default_value = "")]
        query: String,

        /// Only images carrying exactly this tag
        #[arg(long)]
        exact_tag: bool,

        /// Maximum results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one image with its tags and stored path
    Show {
        id: i64,
    },

    /// Change the display name of an image
    Rename {
        id: i64,
        name: String,
    },

    /// Attach tags to an image
    Tag {
        id: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Detach tags from an image
    Untag {
        id: i64,
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Delete an image, its file and thumbnail
    Delete {
        id: i64,
    },

    /// Print the path of an image's thumbnail, generating it if needed
    Thumbnail {
        id: i64,
    },

    /// List all tags
    Tags {
        /// Show how many images carry each tag
        #[arg(long)]
        counts: bool,
    },

    /// Rename a tag everywhere
    RenameTag {
        old: String,
        new: String,
    },

    /// Show library statistics
    Stats,

    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Delete tags no image uses
    PruneTags,

    /// Delete thumbnails whose image is gone
    CleanupThumbnails,

    /// Export images and tags to JSON
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.format == "json";

    match cli.command {
        Commands::Init { dir, force } => run_init(dir, force),
        Commands::Config { action } => run_config_command(action, &cli.config),
        command => {
            let config = AppConfig::load(&cli.config)?;
            let library = MemeLibrary::open(&config)?;
            run_library_command(&library, &config, command, json)
        }
    }
}

fn run_library_command(
    library: &MemeLibrary,
    config: &AppConfig,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Import { files, tags } => {
            let report = library.import_many(&files, &tags);
            if json {
                print_json(&report.summary())?;
            } else {
                for image in &report.imported {
                    println!("#{} {} -> {}", image.id, image.original_name, image.path);
                }
                for (path, e) in &report.failed {
                    eprintln!("Failed: {} ({})", path.display(), e);
                }
                println!("Imported {}, failed {}", report.imported.len(), report.failed.len());
            }
            if report.imported.is_empty() && !report.failed.is_empty() {
                if let Some((_, e)) = report.failed.into_iter().next() {
                    return Err(e);
                }
            }
        }
        Commands::Paste { name, tags } => {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            if bytes.is_empty() {
                return Err(MemeError::InvalidImage("no data on stdin".to_string()));
            }
            let image = library.import_bytes(&bytes, name.as_deref(), &tags)?;
            if json {
                print_json(&image)?;
            } else {
                println!("#{} {} -> {}", image.id, image.original_name, image.path);
            }
        }
        Commands::Watch { dir, tags, keep, skip_existing } => {
            let inbox_dir = dir.unwrap_or_else(|| config.watch.inbox.clone());
            let remove = config.watch.remove_after_import && !keep;
            let inbox = Inbox::new(library, tags, remove, Duration::from_millis(config.watch.settle_ms));

            let mut watcher = FileWatcher::new()?;
            watcher.watch(&inbox_dir)?;

            if !skip_existing {
                let imported = inbox.import_existing(&inbox_dir)?;
                info!("Imported {} file(s) already in the inbox", imported.len());
            }
            inbox.run(&watcher)?;
        }
        Commands::List { limit } => {
            let mut images = library.list()?;
            truncate(&mut images, limit);
            print_images(&images, json)?;
        }
        Commands::Search { query, exact_tag, limit } => {
            let mut images = if exact_tag {
                library.by_tag(&query)?
            } else {
                library.search(&query)?
            };
            truncate(&mut images, limit);
            print_images(&images, json)?;
        }
        Commands::Show { id } => {
            let details = library.details(id)?;
            let path = library.stored_path(id);
            if json {
                print_json(&details)?;
            } else {
                print_details(&details);
                match path {
                    Ok(p) => println!("  Path: {}", p.display()),
                    Err(e) => println!("  Path: {} ({})", details.image.path, e),
                }
                if let Ok(info) = library.storage().image_info(Path::new(&details.image.path)) {
                    println!("  Size: {}x{} {} ({} bytes)", info.width, info.height, info.format, info.file_size);
                }
            }
        }
        Commands::Rename { id, name } => {
            let image = library.rename(id, &name)?;
            println!("#{} renamed to {}", image.id, image.original_name);
        }
        Commands::Tag { id, tags } => {
            let now = library.tag(id, &tags)?;
            let names: Vec<_> = now.iter().map(|t| t.name.as_str()).collect();
            println!("#{} tags: {}", id, names.join(", "));
        }
        Commands::Untag { id, tags } => {
            let removed = library.untag(id, &tags)?;
            println!("Removed {} tag(s) from #{}", removed, id);
        }
        Commands::Delete { id } => {
            if library.delete(id)? {
                println!("Deleted #{}", id);
            } else {
                return Err(MemeError::NotFound(format!("image #{}", id)));
            }
        }
        Commands::Thumbnail { id } => {
            let thumb = library.thumbnail(id)?;
            println!("{}", thumb.display());
        }
        Commands::Tags { counts } => {
            let tags = library.all_tags()?;
            if json {
                print_json(&tags)?;
            } else if tags.is_empty() {
                println!("No tags");
            } else {
                for entry in tags {
                    if counts {
                        println!("  {} ({})", entry.tag.name, entry.image_count);
                    } else {
                        println!("  {}", entry.tag.name);
                    }
                }
            }
        }
        Commands::RenameTag { old, new } => {
            library.rename_tag(&old, &new)?;
            println!("Renamed tag {} to {}", old, new);
        }
        Commands::Stats => {
            let stats = library.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Library Statistics:");
                println!("  Images: {}", stats.db.image_count);
                println!("  Tags: {}", stats.db.tag_count);
                println!("  Associations: {}", stats.db.association_count);
                println!("  Stored files: {}", stats.storage.file_count);
                println!("  Storage used: {:.2} MB", stats.storage.total_size_mb());
            }
        }
        Commands::Db { action } => run_db_command(library, action)?,
        Commands::Init { .. } | Commands::Config { .. } => {
            warn!("Command does not need the library");
        }
    }

    Ok(())
}

/// Run database commands
fn run_db_command(library: &MemeLibrary, action: DbCommands) -> Result<()> {
    match action {
        DbCommands::PruneTags => {
            let removed = library.prune_tags()?;
            println!("Removed {} unused tag(s)", removed);
        }
        DbCommands::CleanupThumbnails => {
            let removed = library.cleanup_thumbnails()?;
            println!("Removed {} orphaned thumbnail(s)", removed);
        }
        DbCommands::Export { output } => {
            let count = library.export_json(&output)?;
            println!("Exported {} images to {:?}", count, output);
        }
        DbCommands::Vacuum => {
            library.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let config = AppConfig::load(config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            let config = AppConfig::load(config_path)?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Storage: {}", config.storage.root.display());
            println!("  Thumbnails: {}", config.storage.thumbnails.display());
            println!("  Database: {}", config.database.path.display());
            println!("  Formats: {}", config.import.formats.join(", "));
        }
    }

    Ok(())
}

/// Initialize a new meme library
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(MemeError::Config(
            "config.json already exists. Use --force to overwrite".to_string()
        ));
    }

    std::fs::create_dir_all(&target)?;
    let config = AppConfig::default().rooted_at(&target);
    std::fs::create_dir_all(&config.storage.root)?;
    std::fs::create_dir_all(&config.storage.thumbnails)?;
    std::fs::create_dir_all(&config.watch.inbox)?;
    config.save(&config_path)?;

    println!("Meme library initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - {}", config.storage.root.display());
    println!("  - {}", config.storage.thumbnails.display());
    println!("  - {}", config.watch.inbox.display());

    Ok(())
}

fn truncate<T>(items: &mut Vec<T>, limit: Option<usize>) {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_images(images: &[ImageDetails], json: bool) -> Result<()> {
    if json {
        return print_json(images);
    }
    if images.is_empty() {
        println!("No images");
        return Ok(());
    }
    for details in images {
        print_details(details);
    }
    Ok(())
}

fn print_details(details: &ImageDetails) {
    let image = &details.image;
    let tags = if details.tags.is_empty() {
        "-".to_string()
    } else {
        details.tags.join(", ")
    };
    println!(
        "#{:<5} {}  {}  [{}]",
        image.id,
        image.created_at.format("%Y-%m-%d %H:%M"),
        image.original_name,
        tags
    );
}
