use crate::{
    catalog::{CancelToken, CatalogClient},
    config::AppConfig,
    dates,
    graph::ModGraph,
    model::{Author, Mod, ModId, ModRef, ModWarning},
    paths::{ConfiguredPaths, PathResolver},
    registry::{ModRegistry, RegistryOptions},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Debug,
    Trace,
}

impl Verbosity {
    fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "modloom=error",
            Verbosity::Normal => "modloom=info",
            Verbosity::Debug => "modloom=debug",
            Verbosity::Trace => "modloom=trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GlobalOptions {
    format: OutputFormat,
    verbosity: Verbosity,
    mods_dir: Option<PathBuf>,
    offline: bool,
    attempts: Option<u32>,
    deadline: Option<u64>,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            verbosity: Verbosity::Normal,
            mods_dir: None,
            offline: false,
            attempts: None,
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Resolve(ResolveOptions),
    Paths,
    Help,
    Version,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ResolveOptions {
    refs: Vec<String>,
    all: bool,
    long: bool,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, global) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("modloom v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            initialize_tracing(global.verbosity);
            let config = AppConfig::load_or_create()?;
            match command {
                CliCommand::Resolve(options) => resolve(&config, &global, &options),
                _ => show_paths(&config, &global),
            }
        }
    }
}

fn initialize_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(args: &[String]) -> Result<(CliCommand, GlobalOptions)> {
    if matches!(args.first().map(|s| s.as_str()), None | Some("--help" | "-h" | "help")) {
        return Ok((CliCommand::Help, GlobalOptions::default()));
    }
    if matches!(args.first().map(|s| s.as_str()), Some("--version" | "-V" | "version")) {
        return Ok((CliCommand::Version, GlobalOptions::default()));
    }

    let (global, tokens) = parse_global_options(args)?;
    let Some(head) = tokens.first() else {
        return Ok((CliCommand::Help, global));
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "resolve" => CliCommand::Resolve(parse_resolve(rest)?),
        "paths" => CliCommand::Paths,
        other => bail!("unknown command: {other} (see --help)"),
    };
    Ok((command, global))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut global = GlobalOptions::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone().or_else(|| iter.next().cloned()) {
                Some(value) => Ok(value),
                None => bail!("{name} requires a value"),
            }
        };
        match flag {
            "--format" => {
                let raw = value("--format")?;
                global.format = match OutputFormat::parse(&raw) {
                    Some(format) => format,
                    None => bail!("unknown format: {raw} (expected json or text)"),
                };
            }
            "--mods-dir" => global.mods_dir = Some(PathBuf::from(value("--mods-dir")?)),
            "--attempts" => {
                let raw = value("--attempts")?;
                let attempts: u32 = raw
                    .parse()
                    .with_context(|| format!("invalid --attempts value: {raw}"))?;
                global.attempts = Some(attempts.max(1));
            }
            "--deadline" => {
                let raw = value("--deadline")?;
                global.deadline = Some(
                    raw.parse()
                        .with_context(|| format!("invalid --deadline value: {raw}"))?,
                );
            }
            "--offline" => global.offline = true,
            "-q" | "--quiet" => global.verbosity = Verbosity::Quiet,
            "-v" | "--verbose" => global.verbosity = Verbosity::Debug,
            "-vv" => global.verbosity = Verbosity::Trace,
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((global, tokens))
}

fn parse_resolve(args: &[String]) -> Result<ResolveOptions> {
    let mut options = ResolveOptions::default();
    for arg in args {
        match arg.as_str() {
            "--all" => options.all = true,
            "--long" | "-l" => options.long = true,
            flag if flag.starts_with('-') && flag.len() > 1 => {
                bail!("unknown resolve option: {flag}")
            }
            _ => options.refs.push(arg.to_string()),
        }
    }
    if !options.all && options.refs.is_empty() {
        bail!("resolve needs at least one path or catalog id, or --all");
    }
    Ok(options)
}

fn path_resolver(config: &AppConfig, global: &GlobalOptions) -> ConfiguredPaths {
    let paths = ConfiguredPaths::from_config(&config.paths);
    match &global.mods_dir {
        Some(dir) => paths.with_mods_root(dir.clone()),
        None => paths,
    }
}

fn resolve(config: &AppConfig, global: &GlobalOptions, options: &ResolveOptions) -> Result<()> {
    let mut catalog = config.catalog.clone();
    if let Some(attempts) = global.attempts {
        catalog.max_attempts = attempts;
    }
    let mods_root = path_resolver(config, global).mods_root();
    let registry_options = RegistryOptions {
        mods_root: mods_root.clone(),
        fetch_remote: catalog.fetch_remote && !global.offline,
        max_concurrency: config.resolve.max_concurrency,
    };
    let cancel = match global.deadline {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let mut registry =
        ModRegistry::new(CatalogClient::from_config(&catalog), registry_options).with_cancel(cancel);

    let (requested, built) = if options.all {
        let Some(root) = mods_root else {
            bail!("--all needs a mods root (set paths.mods_root or pass --mods-dir)");
        };
        if !root.is_dir() {
            bail!("mods root is not a directory: {}", root.display());
        }
        let built = registry.build_installed();
        (built.len(), built)
    } else {
        let refs = options
            .refs
            .iter()
            .map(|raw| raw.parse::<ModRef>())
            .collect::<Result<Vec<_>, _>>()?;
        let built = registry.build_all(&refs);
        (refs.len(), built)
    };
    let failed = requested.saturating_sub(built.len());
    if built.is_empty() && requested > 0 {
        bail!("none of the {requested} requested mod(s) could be resolved");
    }

    let order = registry.assign_positions();
    info!(
        mods = order.order.len(),
        cycles = order.cycles.len(),
        "resolved load order"
    );
    let graph = &registry.into_graph();

    match global.format {
        OutputFormat::Json => {
            let report = ResolveReport {
                mods: order
                    .order
                    .iter()
                    .filter_map(|id| graph.get(*id))
                    .map(|node| ModView::new(graph, node, built.contains(&node.id())))
                    .collect(),
                cycles: order
                    .cycles
                    .iter()
                    .map(|members| labels(graph, members))
                    .collect(),
                failed,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            if order.order.is_empty() {
                println!("No mods resolved.");
            }
            for id in &order.order {
                let Some(node) = graph.get(*id) else {
                    continue;
                };
                if options.long {
                    println!("{node}");
                    continue;
                }
                print_summary(graph, node);
            }
            for members in &order.cycles {
                println!("Cycle: {}", labels(graph, members).join(" <-> "));
            }
            if failed > 0 {
                println!("{failed} requested mod(s) could not be resolved (see log).");
            }
        }
    }

    Ok(())
}

fn print_summary(graph: &ModGraph, node: &Mod) {
    let position = node.position().map(|p| p + 1).unwrap_or(0);
    let version = node
        .version()
        .map(|version| format!(" v{version}"))
        .unwrap_or_default();
    let remote = if node.catalog_ok() { "" } else { " [offline]" };
    println!(
        "{position:>3}. {} ({}){version}{remote}",
        node.display_name(),
        node.label()
    );
    if !node.dependencies().is_empty() {
        println!("     requires: {}", labels(graph, node.dependencies()).join(", "));
    }
    for warning in node.warnings() {
        println!("     ! {warning}");
    }
}

fn labels(graph: &ModGraph, ids: &[ModId]) -> Vec<String> {
    ids.iter().map(|id| graph.label(*id)).collect()
}

#[derive(Serialize)]
struct ResolveReport<'a> {
    mods: Vec<ModView<'a>>,
    cycles: Vec<Vec<String>>,
    failed: usize,
}

#[derive(Serialize)]
struct ModView<'a> {
    position: Option<usize>,
    requested: bool,
    catalog_id: Option<&'a str>,
    name: Option<&'a str>,
    version: Option<&'a str>,
    visibility: Option<&'a str>,
    dir: String,
    file_size: Option<&'a str>,
    uploaded_at: Option<String>,
    last_updated_at: Option<String>,
    preview_image_url: Option<&'a str>,
    authors: &'a [Author],
    metadata_ok: bool,
    catalog_ok: bool,
    dependencies: Vec<String>,
    dependents: Vec<String>,
    unresolved_dependencies: &'a [String],
    warnings: &'a [ModWarning],
}

impl<'a> ModView<'a> {
    fn new(graph: &ModGraph, node: &'a Mod, requested: bool) -> Self {
        Self {
            position: node.position(),
            requested,
            catalog_id: node.catalog_id(),
            name: node.name(),
            version: node.version(),
            visibility: node.visibility(),
            dir: node.dir().display().to_string(),
            file_size: node.file_size(),
            uploaded_at: node.uploaded_at().map(dates::format_catalog_date),
            last_updated_at: node.last_updated_at().map(dates::format_catalog_date),
            preview_image_url: node.preview_image_url(),
            authors: node.authors(),
            metadata_ok: node.metadata_ok(),
            catalog_ok: node.catalog_ok(),
            dependencies: labels(graph, node.dependencies()),
            dependents: labels(graph, node.dependents()),
            unresolved_dependencies: node.unresolved_dependencies(),
            warnings: node.warnings(),
        }
    }
}

#[derive(Serialize)]
struct PathsOutput {
    install_root: Option<String>,
    library_roots: Vec<String>,
    mods_root: Option<String>,
    save_root: Option<String>,
    edition: Option<&'static str>,
}

fn show_paths(config: &AppConfig, global: &GlobalOptions) -> Result<()> {
    let paths = path_resolver(config, global);
    let roots = paths.mods_and_save_roots();
    let output = PathsOutput {
        install_root: paths.install_root().map(|p| p.display().to_string()),
        library_roots: paths
            .library_roots()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        mods_root: roots.as_ref().map(|(mods, _)| mods.display().to_string()),
        save_root: roots.as_ref().map(|(_, save)| save.display().to_string()),
        edition: paths.edition().map(|edition| edition.display_name()),
    };

    match global.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "(not set)".into());
            println!("Install root: {}", show(&output.install_root));
            if output.library_roots.is_empty() {
                println!("Library roots: (none)");
            } else {
                println!("Library roots: {}", output.library_roots.join(", "));
            }
            println!("Mods root: {}", show(&output.mods_root));
            println!("Save root: {}", show(&output.save_root));
            println!("Edition: {}", output.edition.unwrap_or("unknown"));
        }
    }

    Ok(())
}

fn print_help() {
    println!("modloom v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  modloom resolve <path|id>...      Resolve mods and print their load order");
    println!("  modloom resolve --all             Resolve every mod under the mods root");
    println!("  modloom paths                     Show configured paths");
    println!();
    println!("Global options:");
    println!("  --format <json|text>              Output format");
    println!("  --mods-dir <dir>                  Mods root for catalog ids and --all");
    println!("  --offline                         Skip catalog lookups");
    println!("  --attempts <n>                    Catalog fetch attempts per mod");
    println!("  --deadline <secs>                 Stop catalog lookups after this long");
    println!("  -q, --quiet                       Errors only");
    println!("  -v, -vv                           Debug / trace logging (RUST_LOG overrides)");
    println!("  -h, --help                        Show help");
    println!("  -V, --version                     Show version");
    println!();
    println!("Resolve options:");
    println!("  -l, --long                        Print every field of each mod");
}
