use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use wb_artifact::{ArtifactKind, ArtifactStore, ArtifactStoreExt, ContentHash, FsArtifactStore};
use wb_capability::{query_model_descriptor, CapabilityRegistry};
use wb_runtime::Runtime;
use wb_session::WorkbenchConfig;
use wb_workspace::{FsInvocationLog, WorkspaceEngine};

fn cli() -> Command {
    let hash_arg = || {
        Arg::new("hash")
            .required(true)
            .value_parser(ContentHash::from_str)
            .help("Artifact hash (hex)")
    };

    Command::new("workbench")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reproducible artifact workspace")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("workspace")
                .long("workspace")
                .global(true)
                .help("Workspace id (overrides config)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Keep artifacts and log under this directory"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("put")
                .about("Store a file as an artifact")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File to store, or - for stdin"),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .default_value("data")
                        .value_parser(ArtifactKind::from_str)
                        .help("code | data | log | model-output"),
                )
                .arg(
                    Arg::new("parent")
                        .long("parent")
                        .action(ArgAction::Append)
                        .value_parser(ContentHash::from_str)
                        .help("Parent artifact; records a user change"),
                ),
        )
        .subcommand(
            Command::new("get")
                .about("Write artifact content to stdout or a file")
                .arg(hash_arg())
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("ancestors")
                .about("List every artifact an artifact derives from")
                .arg(hash_arg()),
        )
        .subcommand(
            Command::new("provenance")
                .about("Show the invocation records behind an artifact")
                .arg(hash_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("gc")
                .about("Remove artifacts unreachable from the workspace heads")
                .arg(
                    Arg::new("keep")
                        .long("keep")
                        .action(ArgAction::Append)
                        .value_parser(ContentHash::from_str)
                        .help("Keep only what these heads reach"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Re-hash stored artifacts and report corruption")
                .arg(
                    Arg::new("hash")
                        .action(ArgAction::Append)
                        .value_parser(ContentHash::from_str)
                        .help("Artifacts to check (default: all)"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<WorkbenchConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => WorkbenchConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkbenchConfig::default(),
    };
    if let Some(workspace) = matches.get_one::<String>("workspace") {
        config = config.with_workspace(workspace.clone());
    }
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config = config.rooted_at(dir);
    }
    Ok(config)
}

async fn open_engine(config: &WorkbenchConfig) -> anyhow::Result<WorkspaceEngine> {
    let store = FsArtifactStore::with_config(config.store.clone())
        .await
        .context("opening artifact store")?;
    let log = FsInvocationLog::open(&config.engine.log_root)
        .await
        .context("opening invocation log")?;

    let registry = Arc::new(CapabilityRegistry::new());
    registry
        .register(query_model_descriptor())
        .context("registering built-in capabilities")?;
    let runtime = Runtime::new(registry, config.runtime.clone());

    let engine = WorkspaceEngine::open(
        config.workspace.clone(),
        Arc::new(store),
        Arc::new(log),
        runtime,
        config.engine.clone(),
    )
    .await
    .context("opening workspace")?;
    Ok(engine)
}

fn hash_of(args: &ArgMatches) -> anyhow::Result<ContentHash> {
    args.get_one::<ContentHash>("hash")
        .copied()
        .context("missing artifact hash")
}

fn hashes_of(args: &ArgMatches, id: &str) -> Vec<ContentHash> {
    args.get_many::<ContentHash>(id)
        .map(|values| values.copied().collect())
        .unwrap_or_default()
}

async fn put(engine: &WorkspaceEngine, args: &ArgMatches) -> anyhow::Result<()> {
    let path = args.get_one::<PathBuf>("path").context("missing path")?;
    let kind = args
        .get_one::<ArtifactKind>("kind")
        .copied()
        .unwrap_or(ArtifactKind::Data);
    let parents = hashes_of(args, "parent");

    let content = if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?
    };

    let handle = if parents.is_empty() {
        engine.add_root(kind, content).await?
    } else {
        engine.record_user_change(kind, content, &parents).await?
    };
    println!("{}", handle.hash);
    Ok(())
}

async fn get(engine: &WorkspaceEngine, args: &ArgMatches) -> anyhow::Result<()> {
    let content = engine.get_artifact(&hash_of(args)?).await?;
    match args.get_one::<PathBuf>("output") {
        Some(path) => tokio::fs::write(path, &content)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&content)
            .context("writing stdout")?,
    }
    Ok(())
}

async fn ancestors(engine: &WorkspaceEngine, args: &ArgMatches) -> anyhow::Result<()> {
    let hash = hash_of(args)?;
    let mut walk = engine.store().as_ref().ancestors(hash);
    while let Some(handle) = walk.next().await? {
        println!("{}  {:<12} {}", handle.hash, handle.kind.as_str(), handle.producer);
    }
    Ok(())
}

async fn provenance(engine: &WorkspaceEngine, args: &ArgMatches) -> anyhow::Result<()> {
    let records = engine.list_provenance(&hash_of(args)?).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in records {
        let producer = record
            .producer
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let capability = record
            .capability
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        let outputs: Vec<String> = record.outputs.iter().map(ContentHash::short).collect();
        println!(
            "#{:<6} {:<24} {:<16} {:?} -> [{}]",
            record.seq,
            capability,
            producer,
            record.status,
            outputs.join(", ")
        );
    }
    Ok(())
}

async fn gc(engine: &WorkspaceEngine, args: &ArgMatches) -> anyhow::Result<()> {
    let keep = hashes_of(args, "keep");
    let report = if keep.is_empty() {
        engine.collect_garbage().await?
    } else {
        engine.collect_garbage_from(&keep).await?
    };
    println!(
        "retained {} artifacts, removed {}, pruned {} blobs",
        report.retained,
        report.removed.len(),
        report.blobs_removed
    );
    Ok(())
}

async fn verify(engine: &WorkspaceEngine, args: &ArgMatches) -> anyhow::Result<()> {
    let mut targets = hashes_of(args, "hash");
    if targets.is_empty() {
        targets = engine.store().list().await?.into_iter().map(|h| h.hash).collect();
        targets.sort();
    }

    let mut corrupt = 0usize;
    for hash in &targets {
        if let Err(e) = engine.store().verify(hash).await {
            corrupt += 1;
            println!("FAIL {hash}: {e}");
        }
    }
    println!("verified {} artifacts, {corrupt} failed", targets.len());
    if corrupt > 0 {
        bail!("{corrupt} artifacts failed verification");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(&matches)?;
    let engine = open_engine(&config).await?;

    match matches.subcommand() {
        Some(("put", args)) => put(&engine, args).await,
        Some(("get", args)) => get(&engine, args).await,
        Some(("ancestors", args)) => ancestors(&engine, args).await,
        Some(("provenance", args)) => provenance(&engine, args).await,
        Some(("gc", args)) => gc(&engine, args).await,
        Some(("verify", args)) => verify(&engine, args).await,
        _ => bail!("unknown command"),
    }
}
