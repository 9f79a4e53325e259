use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use keyvalue_core::OwnerId;
use keyvalue_core::config::{KeyValueConfig, load_config};
use keyvalue_core::export::{CsvOptions, EXPORT_FILENAME};
use keyvalue_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use keyvalue_core::service::{DeleteEvent, KeyValueService, SaveEvent, is_redirect_text};
use keyvalue_core::store::SqliteStore;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "keyvalue",
    version,
    about = "Extract {{#keyvalue: Category | Key | Value }} data from wiki pages and query it"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            db: cli.db.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Reconcile a saved page's key values into the database")]
    Save(SaveArgs),
    #[command(about = "Remove every key value stored for a deleted page")]
    Delete(OwnerArgs),
    #[command(about = "Print the directives found in a page as JSON")]
    Extract(InputArgs),
    #[command(about = "Print a page with directives replaced by their values")]
    Render(InputArgs),
    #[command(about = "List the key values stored for one page")]
    Show(OwnerArgs),
    #[command(about = "List categories and their value counts")]
    Categories(CategoriesArgs),
    #[command(about = "List the key values of one category as wikitext")]
    Category(CategoryArgs),
    #[command(about = "Export key values as CSV")]
    Export(ExportArgs),
    Db(DbArgs),
}

#[derive(Debug, Args)]
struct SaveArgs {
    #[arg(long, value_name = "ID")]
    owner: i64,
    #[arg(long, help = "Treat the page as a redirect even without a #REDIRECT header")]
    redirect: bool,
    #[arg(value_name = "FILE", help = "Page text file, or - for stdin")]
    input: String,
}

#[derive(Debug, Args)]
struct OwnerArgs {
    #[arg(long, value_name = "ID")]
    owner: i64,
}

#[derive(Debug, Args)]
struct InputArgs {
    #[arg(value_name = "FILE", help = "Page text file, or - for stdin")]
    input: String,
}

#[derive(Debug, Args)]
struct CategoriesArgs {
    #[arg(long, help = "Print the category index as wikitext")]
    wikitext: bool,
}

#[derive(Debug, Args)]
struct CategoryArgs {
    name: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(short = 'c', long, value_name = "NAME", help = "Export a single category")]
    category: Option<String>,
    #[arg(long, value_name = "CHAR")]
    delimiter: Option<String>,
    #[arg(long, value_name = "CHAR")]
    quote: Option<String>,
    #[arg(short = 'o', long, value_name = "PATH", help = "Write to a file instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Stats,
    Init {
        #[arg(long, help = "Overwrite an existing config file")]
        force: bool,
    },
}

#[derive(Debug, Serialize)]
struct ExtractReport<'a> {
    marker: &'a str,
    is_redirect: bool,
    triples: Vec<keyvalue_core::Triple>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Save(args)) => run_save(&runtime, args),
        Some(Commands::Delete(OwnerArgs { owner })) => run_delete(&runtime, owner),
        Some(Commands::Extract(InputArgs { input })) => run_extract(&runtime, &input),
        Some(Commands::Render(InputArgs { input })) => run_render(&runtime, &input),
        Some(Commands::Show(OwnerArgs { owner })) => run_show(&runtime, owner),
        Some(Commands::Categories(args)) => run_categories(&runtime, args),
        Some(Commands::Category(CategoryArgs { name })) => run_category(&runtime, &name),
        Some(Commands::Export(args)) => run_export(&runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Stats => run_db_stats(&runtime),
            DbSubcommand::Init { force } => run_db_init(&runtime, force),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run_save(runtime: &RuntimeOptions, args: SaveArgs) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let text = read_input(&args.input)?;
    let mut event = SaveEvent::from_text(OwnerId(args.owner), &text);
    event.is_alias |= args.redirect;

    let report = service
        .on_save(&event)
        .with_context(|| format!("failed to save key values for page {}", args.owner))?;

    println!("save");
    println!("owner: {}", report.owner_id);
    println!("extracted: {}", report.extracted);
    println!("stored: {}", report.stored);
    println!("suppressed: {}", format_flag(report.suppressed));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_delete(runtime: &RuntimeOptions, owner: i64) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    service
        .on_delete(DeleteEvent {
            owner_id: OwnerId(owner),
        })
        .with_context(|| format!("failed to delete key values for page {owner}"))?;

    println!("delete");
    println!("owner: {owner}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_extract(runtime: &RuntimeOptions, input: &str) -> Result<()> {
    let (_, config) = load_runtime_config(runtime)?;
    let extractor = config.extractor();
    let text = read_input(input)?;
    let report = ExtractReport {
        marker: extractor.marker(),
        is_redirect: is_redirect_text(&text),
        triples: extractor.extract(&text),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, input: &str) -> Result<()> {
    let (_, config) = load_runtime_config(runtime)?;
    let text = read_input(input)?;
    print!("{}", config.extractor().render(&text));
    io::stdout().flush()?;
    Ok(())
}

fn run_show(runtime: &RuntimeOptions, owner: i64) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    let triples = service
        .owner_triples(OwnerId(owner))
        .with_context(|| format!("failed to load key values for page {owner}"))?;

    println!("owner: {owner}");
    println!("count: {}", triples.len());
    if triples.is_empty() {
        println!("triples: <none>");
    }
    for triple in triples {
        println!("triple: {triple}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_categories(runtime: &RuntimeOptions, args: CategoriesArgs) -> Result<()> {
    let (paths, mut service) = open_service(runtime)?;
    if args.wikitext {
        let page = service
            .category_index_page()
            .context("failed to render category index")?;
        println!("= {} =", page.title);
        print!("{}", page.to_wikitext());
    } else {
        let categories = service.categories().context("failed to list categories")?;
        println!("categories.count: {}", categories.len());
        if categories.is_empty() {
            println!("categories: <none>");
        }
        for entry in categories {
            println!("category: {} ({})", entry.category, entry.count);
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_category(runtime: &RuntimeOptions, name: &str) -> Result<()> {
    // Empty is a legal category name.
    let name = name.trim();
    let (paths, mut service) = open_service(runtime)?;
    let page = service
        .category_page(name)
        .with_context(|| format!("failed to render category {name}"))?;
    println!("= {} =", page.title);
    print!("{}", page.to_wikitext());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_export(runtime: &RuntimeOptions, args: ExportArgs) -> Result<()> {
    let (paths, config) = load_runtime_config(runtime)?;
    let options = if args.delimiter.is_some() || args.quote.is_some() {
        let defaults = config.csv_options()?;
        let delimiter = args.delimiter.unwrap_or_else(|| defaults.delimiter.to_string());
        let quote = args.quote.unwrap_or_else(|| defaults.quote.to_string());
        CsvOptions::parse(Some(&delimiter), Some(&quote))?
    } else {
        config.csv_options()?
    };
    let mut service = build_service(&paths, &config)?;

    let mut buffer = Vec::new();
    let rows = match args.category.as_deref().map(str::trim) {
        Some(category) => service
            .export_category_csv(&mut buffer, category, &options)
            .with_context(|| format!("failed to export category {category:?}"))?,
        None => service
            .export_all_csv(&mut buffer, &options)
            .context("failed to export key values")?,
    };

    match args.output {
        Some(path) => {
            let path = if path.is_dir() {
                path.join(EXPORT_FILENAME)
            } else {
                path
            };
            write_output(&path, &buffer)?;
            eprintln!("exported {rows} rows to {}", normalize_for_display(&path));
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&buffer)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        let mut store = SqliteStore::open(&paths.db_path)
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        let stats = store.stats().context("failed to read key value stats")?;
        println!("rows: {}", stats.rows);
        println!("owners: {}", stats.owners);
        println!("categories: {}", stats.categories);
    } else {
        println!("storage: <not created> (run `keyvalue db init` or save a page)");
    }
    println!("config_exists: {}", format_flag(status.config_exists));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_init(runtime: &RuntimeOptions, force: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, force)?;
    let mut store = SqliteStore::open(&paths.db_path)
        .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
    let created_table = store
        .ensure_schema()
        .context("failed to create keyvalue table")?;

    println!("Initialized keyvalue runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("created_table: {created_table}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn open_service(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, KeyValueService<SqliteStore>)> {
    let (paths, config) = load_runtime_config(runtime)?;
    let service = build_service(&paths, &config)?;
    Ok((paths, service))
}

fn build_service(
    paths: &ResolvedPaths,
    config: &KeyValueConfig,
) -> Result<KeyValueService<SqliteStore>> {
    let store = SqliteStore::open(&paths.db_path)
        .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
    Ok(KeyValueService::new(store, config.extractor()).with_special_page(config.special_page()))
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, KeyValueConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        db_path: runtime.db.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    tracing::debug!(
        project_root = %normalize_for_display(&paths.project_root),
        db_path = %normalize_for_display(&paths.db_path),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read page text from stdin")?;
        return Ok(text);
    }
    fs::read_to_string(input).with_context(|| format!("failed to read {input}"))
}

fn write_output(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
