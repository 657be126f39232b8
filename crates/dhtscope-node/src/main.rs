//! dhtscope - DHT crawler and metrics service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dhtscope_core::engine::mock::MockEngine;
use dhtscope_core::{BucketNode, Contact, DhtEngine, EngineEvent, Error, RawNode};
use dhtscope_dht::{derive_node_id, random_node_id, MainlineEngine};
use dhtscope_node::aggregator::Aggregator;
use dhtscope_node::api;
use dhtscope_node::config::{expand_path, Config};
use dhtscope_node::context::AppContext;
use dhtscope_node::geo::{GeoResolver, NoGeo, PrefixTable};
use dhtscope_node::live::run_live_events;
use dhtscope_node::store::NodeStore;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Contacts held by the simulated engine in `--mock` mode
const SIMULATED_POPULATION: usize = 500;

#[derive(Parser)]
#[command(name = "dhtscope")]
#[command(about = "Observe a DHT network and expose aggregated metrics", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.dhtscope/config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Use a simulated engine instead of the live DHT (no network access)
    #[arg(long)]
    mock: bool,

    /// Database path (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// API port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start crawling and serve the API (default)
    Run,

    /// Write a default configuration file
    Init,

    /// Print historical node statistics from the database
    Stats,

    /// Print the node identity this host would join with
    Identity,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => {
            let config = load_config(&cli)?;
            run(config, cli.mock).await?;
        }
        Commands::Init => {
            init_config(&cli.config)?;
        }
        Commands::Stats => {
            let config = load_config(&cli)?;
            show_stats(&config)?;
        }
        Commands::Identity => {
            println!("{}", derive_node_id());
        }
    }

    Ok(())
}

/// Load the config file if present and apply command line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let path = expand_path(&cli.config);
    let mut config = if path.exists() {
        Config::load(&path).with_context(|| format!("Invalid config file {}", path.display()))?
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Config::default()
    };

    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<NodeStore> {
    let path = config.store_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    NodeStore::open(&path)
        .with_context(|| format!("Failed to initialize database at {}", path.display()))
}

fn geo_resolver(config: &Config) -> Result<Box<dyn GeoResolver>> {
    match &config.geo.table_path {
        Some(path) => {
            let path = expand_path(path);
            let table = PrefixTable::load(&path)
                .with_context(|| format!("Failed to load geolocation table {}", path.display()))?;
            tracing::info!("Loaded {} geolocation networks", table.len());
            Ok(Box::new(table))
        }
        None => Ok(Box::new(NoGeo)),
    }
}

async fn run(config: Config, use_mock: bool) -> Result<()> {
    if use_mock {
        let engine = Arc::new(simulated_engine(SIMULATED_POPULATION)?);
        tracing::info!("Using simulated DHT engine ({} nodes)", SIMULATED_POPULATION);
        let store = open_store(&config)?;
        return run_crawler(engine, store, config).await;
    }

    let engine = MainlineEngine::start(&config.engine_config())
        .with_context(|| format!("Failed to start DHT node on UDP port {}", config.dht.port))?;
    let store = open_store(&config)?;
    run_crawler(Arc::new(engine), store, config).await
}

/// Join the network, start every task and run until Ctrl+C
async fn run_crawler<E: DhtEngine>(engine: Arc<E>, store: NodeStore, config: Config) -> Result<()> {
    let node_id = derive_node_id();
    tracing::info!("Starting DHT node {}", node_id);

    tokio::time::timeout(config.join_timeout(), engine.join(node_id))
        .await
        .unwrap_or(Err(Error::Timeout))
        .context("Failed to join the DHT")?;
    tracing::info!("DHT is ready");

    let geo = geo_resolver(&config)?;
    let api_addr = format!("{}:{}", config.api.bind, config.api.port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API to {}", api_addr))?;

    let events = engine.take_events();
    if events.is_none() {
        tracing::info!("Engine has no live event stream, relying on discovery only");
    }
    let ctx = Arc::new(AppContext::new(engine.clone(), store, geo, config));

    let live = events.map(|events| tokio::spawn(run_live_events(ctx.clone(), events)));
    let aggregator = Aggregator::spawn(ctx.clone());

    let (stop_api, api_stopped) = tokio::sync::oneshot::channel::<()>();
    let api = tokio::spawn(api::serve(ctx.clone(), listener, async move {
        let _ = api_stopped.await;
    }));

    println!("dhtscope is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    // Timers first, then the API and event stream, then the engine
    aggregator.shutdown().await;
    let _ = stop_api.send(());
    match api.await {
        Ok(Err(e)) => tracing::error!("API server error: {}", e),
        Err(e) => tracing::error!("API task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(live) = live {
        live.abort();
    }
    engine.shutdown().await;
    drop(ctx);

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Mock engine populated with random nodes
fn simulated_engine(population: usize) -> Result<MockEngine> {
    let contacts = (0..population)
        .map(|_| -> Result<Contact> {
            let id = random_node_id()?;
            let b = id.as_bytes();
            let ip = Ipv4Addr::new(b[0].max(1), b[1], b[2], b[3].max(1));
            let port = 1_024 + u16::from_be_bytes([b[4], b[5]]) % 60_000;
            Ok(Contact::new(id, SocketAddrV4::new(ip, port)))
        })
        .collect::<Result<Vec<_>>>()?;

    // A routing table only ever holds part of the network
    let buckets: Vec<_> = contacts.iter().take(160).map(|contact| contact.addr).collect();
    let routing_table = buckets.chunks(8).rev().fold(None, |deeper, bucket| {
        Some(BucketNode {
            contacts: bucket.to_vec(),
            left: None,
            right: deeper.map(Arc::new),
        })
    });

    let engine = MockEngine::with_contacts(contacts.clone());
    engine.set_routing_table(routing_table);

    for contact in contacts.iter().take(10) {
        engine.emit(EngineEvent::Node(RawNode {
            id: contact.id.as_bytes().to_vec(),
            host: contact.ip().to_string(),
            port: contact.port() as i64,
        }));
    }
    for (rank, contact) in contacts.iter().skip(10).take(15).enumerate() {
        for _ in 0..(15 - rank) {
            engine.emit(EngineEvent::InfoHash(contact.id));
        }
    }

    Ok(engine)
}

fn show_stats(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.aggregate_stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn init_config(path: &str) -> Result<()> {
    let config_path = expand_path(path);

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        return Ok(());
    }

    if let Some(dir) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
        tracing::info!("Created config directory: {}", dir.display());
    }

    let mut config = Config::default();
    if let Some(dir) = config_path.parent() {
        config.data_dir = dir.display().to_string();
    }
    let toml = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, toml)?;

    println!("Initialized dhtscope config at: {}", config_path.display());

    Ok(())
}
