use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use stampd::config::{AppConfig, OLLAMA_URL_ENV, Paths};
use stampd::core::duplicate::{DuplicateDetector, DuplicatePolicy, Fingerprint};
use stampd::core::title::parse_title;
use stampd::database::Database;
use stampd::database::models::{StampRecord, StampUpdate};
use stampd::logging;
use stampd::services::enrichment::enrich_from_title;
use stampd::services::export::{ExportFormat, Exporter};
use stampd::services::marketplace::{self, EbayClient, MarketplaceClient};
use stampd::services::metadata::{MetadataExtractor, OllamaClient};
use stampd::services::scanner::{ScanOptions, ScanProgress, ScanStage, ScanSummary, ScannerService};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "stampd", version, about = "Catalog postage-stamp images")]
struct Cli {
    /// Data directory (default: $STAMPD_DATA_DIR, then the platform data dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Catalog every new image in a folder
    Scan {
        /// Folder to scan (default: the images directory)
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Descend into subfolders
        #[arg(short, long)]
        recursive: bool,
    },

    /// Copy image files into the catalog
    Import {
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },

    /// List every stamp
    List,

    /// Show one stamp as JSON
    Show { id: i64 },

    /// Search text fields, optionally restricted to tags
    Search {
        query: Option<String>,
        /// Only stamps carrying this tag (repeatable; any tag matches)
        #[arg(short, long = "tag", value_name = "NAME")]
        tags: Vec<String>,
    },

    /// Change descriptive fields of a stamp
    Edit {
        id: i64,
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Fill blank year/country/denomination from a listing title
    Enrich {
        id: i64,
        #[arg(long)]
        title: String,
    },

    /// Marketplace search links for a stamp; --fetch also reads eBay sold
    /// listings to fill blank fields and price
    Lookup {
        id: i64,
        #[arg(long)]
        fetch: bool,
    },

    /// Show what would be extracted from a listing title
    ParseTitle { title: String },

    /// Attach a tag to a stamp
    Tag { id: i64, name: String },

    /// Detach a tag from a stamp
    Untag { id: i64, name: String },

    /// List tags with usage counts
    Tags,

    /// Remove a stamp from the catalog
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List groups of cataloged stamps that look alike
    Duplicates,

    /// Write the catalog to csv, xlsx or pdf in the backups directory
    Export { format: ExportFormat },

    /// Inspect or change the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCmd {
    /// Print the active configuration
    Show,

    /// Select the vision model
    SetModel { model: String },

    /// Select the duplicate policy
    SetPolicy {
        policy: DuplicatePolicy,
        /// Maximum perceptual-hash distance still counted as a duplicate
        #[arg(long)]
        threshold: Option<u32>,
    },
}

#[derive(Args, Debug)]
struct FieldArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    denomination: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    catalog_number: Option<String>,
    #[arg(long)]
    mint_or_used: Option<String>,
    #[arg(long)]
    collection: Option<String>,
    #[arg(long)]
    lot_number: Option<String>,
    #[arg(long)]
    price: Option<String>,
}

impl From<FieldArgs> for StampUpdate {
    fn from(args: FieldArgs) -> Self {
        StampUpdate {
            name: args.name,
            country: args.country,
            denomination: args.denomination,
            year: args.year,
            description: args.description,
            notes: args.notes,
            catalog_number: args.catalog_number,
            mint_or_used: args.mint_or_used,
            collection: args.collection,
            lot_number: args.lot_number,
            price: args.price,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = Paths::from_env(cli.data_dir);
    paths
        .ensure_directories()
        .with_context(|| format!("Failed to create {}", paths.data_dir.display()))?;
    if let Err(e) = logging::init(&paths.logs_dir) {
        eprintln!("⚠️  Logging disabled: {}", e);
    }

    let result = run(cli.command, &paths);
    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}

fn run(command: Commands, paths: &Paths) -> Result<()> {
    let mut config = AppConfig::load_or_init(&paths.config_path)
        .with_context(|| format!("Failed to load {}", paths.config_path.display()))?;

    let db = Database::open(&paths.db_path)
        .with_context(|| format!("Failed to open catalog {}", paths.db_path.display()))?;

    match command {
        Commands::Scan { dir, recursive } => {
            let scan_dir = dir.as_deref().unwrap_or(&paths.images_dir);
            println!("▶ Scanning {}", scan_dir.display());
            let summary = with_scanner(&db, &config, paths, |scanner| {
                Ok(scanner.scan_folder(Some(scan_dir), ScanOptions { recursive })?)
            })?;
            println!("✅ {}", summary);
        }

        Commands::Import { files } => {
            println!("▶ Importing {} file(s)", files.len());
            let summary =
                with_scanner(&db, &config, paths, |scanner| Ok(scanner.import_files(&files)?))?;
            println!("✅ {}", summary);
        }

        Commands::List => {
            let records = db.stamps().list_all()?;
            if records.is_empty() {
                println!("No stamps cataloged.");
            }
            for record in &records {
                print_row(record);
            }
        }

        Commands::Show { id } => {
            let record = db.stamps().get(id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Search { query, tags } => {
            if !config.gallery.enable_search {
                anyhow::bail!("Search is disabled in {}", paths.config_path.display());
            }
            let records = db.stamps().search(query.as_deref().unwrap_or(""), &tags)?;
            println!("Found {} stamp(s):", records.len());
            for record in &records {
                print_row(record);
            }
        }

        Commands::Edit { id, fields } => {
            let update = StampUpdate::from(fields);
            if update.is_empty() {
                println!("Nothing to change; pass at least one --<field> VALUE.");
                return Ok(());
            }
            let record = db.stamps().update(id, &update)?;
            println!("✅ Updated stamp {}", record.id);
            print_row(&record);
        }

        Commands::Enrich { id, title } => {
            let enrichment = enrich_from_title(&db, id, &title)?;
            if enrichment.filled.is_empty() {
                println!("Nothing filled; stamp {} already has these fields or the title had none.", id);
            } else {
                println!("✅ Filled {}", enrichment.filled.join(", "));
            }
            print_row(&enrichment.record);
        }

        Commands::Lookup { id, fetch } => {
            let options = &config.export_options;
            if fetch && !options.ebay {
                anyhow::bail!(
                    "eBay lookups are disabled; enable export_options.ebay in {}",
                    paths.config_path.display()
                );
            }
            let client = if fetch {
                Some(EbayClient::new(config.ai_timeout())?)
            } else {
                None
            };
            let client = client.as_ref().map(|c| c as &dyn MarketplaceClient);

            let result = marketplace::lookup(&db, id, options, client)?;
            if result.links.is_empty() {
                println!("No marketplaces enabled in {}", paths.config_path.display());
            }
            for link in &result.links {
                println!("🔗 {:<12} {}", link.marketplace, link.url);
            }
            if let Some(listings) = &result.listings {
                match listings.top_title() {
                    Some(title) => println!("🏆 Top sold listing: {}", title),
                    None => println!("No sold listings for \"{}\"", result.query),
                }
                if let Some(average) = listings.average_price() {
                    println!("💰 Average of {} sold price(s): {:.2}", listings.prices.len(), average);
                }
            }
            if !result.filled.is_empty() {
                println!("✅ Filled {}", result.filled.join(", "));
                print_row(&result.record);
            }
        }

        Commands::ParseTitle { title } => {
            let parsed = parse_title(&title);
            println!("year:         {}", parsed.year);
            println!("country:      {}", parsed.country);
            println!("denomination: {}", parsed.denomination);
        }

        Commands::Tag { id, name } => {
            db.tags().add_tag(id, &name)?;
            println!("🏷️  Stamp {} tags: {}", id, db.tags().tags_for(id)?.join(", "));
        }

        Commands::Untag { id, name } => {
            if db.tags().remove_tag(id, &name)? {
                println!("Removed tag '{}' from stamp {}", name.trim(), id);
            } else {
                println!("Stamp {} had no tag '{}'", id, name.trim());
            }
        }

        Commands::Tags => {
            let tags = db.tags().list_tags()?;
            if tags.is_empty() {
                println!("No tags yet.");
            }
            for tag in tags {
                println!("{:<30} {}", tag.name, tag.stamp_count);
            }
        }

        Commands::Delete { id, yes } => {
            let record = db.stamps().get(id)?;
            let confirmed = yes
                || Confirm::new()
                    .with_prompt(format!("Delete stamp {} ({})?", id, record.image_path))
                    .default(false)
                    .interact()?;
            if !confirmed {
                println!("Cancelled.");
                return Ok(());
            }
            db.stamps().delete(id)?;
            println!("🗑️  Deleted stamp {}", id);
        }

        Commands::Duplicates => {
            let detector = DuplicateDetector::new(config.duplicate_policy, config.duplicate_threshold);
            let items: Vec<(i64, Fingerprint)> = db
                .stamps()
                .fingerprints()?
                .into_iter()
                .filter_map(|(id, text)| match text.parse::<Fingerprint>() {
                    Ok(fingerprint) => Some((id, fingerprint)),
                    Err(e) => {
                        log::warn!("Ignoring fingerprint of stamp {}: {}", id, e);
                        None
                    }
                })
                .collect();

            let groups = benchmark("comparing fingerprints", || detector.group_duplicates(&items));
            if groups.is_empty() {
                println!("No duplicates found.");
            } else {
                println!("Found {} duplicate group(s):", groups.len());
                for (i, group) in groups.iter().enumerate() {
                    println!(" Group {}:", i + 1);
                    for id in group {
                        let record = db.stamps().get(*id)?;
                        println!("   ▶ #{} {}", record.id, record.image_path);
                    }
                }
            }
        }

        Commands::Export { format } => {
            if !config.export_options.allows(format) {
                anyhow::bail!(
                    "{} export is disabled; enable export_options.{} in {}",
                    format,
                    format.extension(),
                    paths.config_path.display()
                );
            }
            let report = Exporter::new(&paths.backups_dir).export_all(&db, format)?;
            println!("✅ Exported {} stamp(s) to {}", report.records, report.path.display());
            if report.images_failed > 0 {
                println!("⚠️  {} image(s) could not be embedded", report.images_failed);
            }
        }

        Commands::Config { command } => run_config(command, &mut config, paths)?,
    }

    Ok(())
}

fn run_config(command: ConfigCmd, config: &mut AppConfig, paths: &Paths) -> Result<()> {
    match command {
        ConfigCmd::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            println!("\ndata dir: {}", paths.data_dir.display());
            println!("catalog:  {}", paths.db_path.display());
            return Ok(());
        }
        ConfigCmd::SetModel { model } => {
            config.ai_model = model.trim().to_string();
        }
        ConfigCmd::SetPolicy { policy, threshold } => {
            config.duplicate_policy = policy;
            if let Some(threshold) = threshold {
                config.duplicate_threshold = threshold;
            }
        }
    }
    config.save(&paths.config_path)?;
    println!("✅ Saved {}", paths.config_path.display());
    Ok(())
}

/// Build the ingestion pipeline from the configuration and hand it to `f`
/// with a progress bar attached.
fn with_scanner<F>(db: &Database, config: &AppConfig, paths: &Paths, f: F) -> Result<ScanSummary>
where
    F: FnOnce(&ScannerService<'_>) -> Result<ScanSummary>,
{
    let url = config.ai_url(std::env::var(OLLAMA_URL_ENV).ok().as_deref());
    let client = OllamaClient::new(&url, &config.ai_model, config.ai_timeout())?;
    let extractor = MetadataExtractor::new(Box::new(client));
    let detector = DuplicateDetector::new(config.duplicate_policy, config.duplicate_threshold);

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} {msg:<16} [{bar:30}] {pos}/{len}",
    )?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let progress_bar = bar.clone();
    let scanner = ScannerService::new(db, &detector, &extractor, &paths.images_dir)
        .with_thumbnails(&paths.thumbnails_dir)
        .with_progress(Box::new(move |progress: ScanProgress| {
            progress_bar.set_message(stage_label(progress.stage));
            progress_bar.set_length(progress.total as u64);
            progress_bar.set_position(progress.done as u64);
        }));

    let result = benchmark("ingestion", || f(&scanner));
    bar.finish_and_clear();
    result
}

fn stage_label(stage: ScanStage) -> &'static str {
    match stage {
        ScanStage::Fingerprinting => "Fingerprinting",
        ScanStage::Extracting => "Describing",
        ScanStage::Saving => "Saving",
    }
}

fn print_row(record: &StampRecord) {
    let fields = &record.fields;
    let mut line = format!(
        "#{:<5} {:<24} {:<16} {:<10} {:<6}",
        record.id, fields.name, fields.country, fields.denomination, fields.year
    );
    if !record.tags.is_empty() {
        line.push_str(&format!(" [{}]", record.tags.join(", ")));
    }
    println!("{}", line.trim_end());
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("{} took {:.2?}", label, start.elapsed());
    result
}
