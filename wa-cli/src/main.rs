// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! wa CLI
//!
//! Drives the analytics pipeline outside a browser: replays recorded
//! sessions against a collector, and inspects persisted A/B assignments.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use wa_core::transport::Payload;
use wa_core::{
    ABBucketer, AgentConfig, DeliveryStats, FileStorage, HttpTransport, HttpTransportConfig,
    IdentityStore, Input, ManualClock, MemoryStorage, Pipeline, RecordedInput, SharedEnvironment,
    Storage, StorageCookieJar, StorageScopes, Transport,
};
use wa_telemetry::{init_telemetry, MeteredTransport, Metrics};

const DEFAULT_PAGE: &str = "http://localhost/";
const STORE_FILE: &str = "local.json";

#[derive(Parser)]
#[command(name = "wa")]
#[command(about = "wa - web analytics pipeline driver", long_about = None)]
struct Cli {
    /// Agent configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session (JSON lines) through the pipeline
    Replay {
        /// Recording file
        file: PathBuf,

        /// URL of the page the session starts on
        #[arg(long, default_value = DEFAULT_PAGE)]
        page: String,

        /// Print envelopes instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Directory for persistent storage (visitor id, cookies, assignments)
        #[arg(long)]
        store: Option<PathBuf>,

        /// OTLP endpoint for traces and metrics
        #[arg(long)]
        otlp: Option<String>,

        /// Time left for in-flight deliveries after teardown (ms)
        #[arg(long, default_value = "1000")]
        grace_ms: u64,
    },

    /// A/B assignment commands
    Ab {
        /// Directory of the persistent store
        #[arg(long, default_value = "./wa-data")]
        store: PathBuf,

        #[command(subcommand)]
        command: AbCommands,
    },

    /// Print the effective configuration
    Config {
        #[arg(long, default_value = DEFAULT_PAGE)]
        page: String,
    },
}

#[derive(Subcommand)]
enum AbCommands {
    /// Get (or draw) the variant for an experiment
    Get {
        name: String,

        /// At least two variants
        #[arg(required = true, num_args = 2..)]
        variants: Vec<String>,

        /// Comma-separated weights, one per variant
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,
    },

    /// Force a variant
    Set { name: String, variant: String },

    /// List all assignments
    List,

    /// Clear one or every assignment
    Clear { name: Option<String> },
}

/// Writes every envelope as one JSON line on stdout.
struct StdoutTransport;

impl Transport for StdoutTransport {
    fn beacon(&self, _endpoint: &str, payload: &Payload) -> bool {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", payload.body).is_ok()
    }

    fn post(&self, _endpoint: &str, payload: Payload) {
        println!("{}", payload.body);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let otlp = match &cli.command {
        Commands::Replay { otlp, .. } => otlp.clone(),
        _ => None,
    };
    let metrics = match otlp {
        Some(endpoint) => init_telemetry("wa-cli", Some(&endpoint))?,
        None => {
            let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
            Metrics::detached()
        }
    };

    match cli.command {
        Commands::Replay {
            file,
            page,
            dry_run,
            store,
            otlp: _,
            grace_ms,
        } => {
            let config = load_config(cli.config.as_deref(), &page)?;
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read recording {:?}", file))?;
            let inputs = parse_recording(&source)?;
            let storage = open_scopes(store.as_deref())?;

            let transport: Arc<dyn Transport> = if dry_run {
                Arc::new(MeteredTransport::new(StdoutTransport, metrics))
            } else {
                let http = HttpTransport::new(HttpTransportConfig::default())
                    .context("Failed to build HTTP transport")?;
                Arc::new(MeteredTransport::new(http, metrics))
            };

            let stats = replay_session(config, &page, storage, &inputs, transport);
            if !dry_run {
                tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            }

            eprintln!(
                "✓ Replayed {} inputs: {} envelopes dispatched (beacon {}, post {}, skipped {})",
                inputs.len(),
                stats.dispatched(),
                stats.beacon,
                stats.post,
                stats.skipped
            );
        }

        Commands::Ab { store, command } => {
            let config = load_config(cli.config.as_deref(), DEFAULT_PAGE)?;
            handle_ab_command(command, &store, &config)?;
        }

        Commands::Config { page } => {
            let config = load_config(cli.config.as_deref(), &page)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Configuration file (if any), then `WA_*` variables; endpoint and site id
/// missing after that are derived from `page`.
fn load_config(path: Option<&Path>, page: &str) -> Result<AgentConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            if path.extension().is_some_and(|ext| ext == "json") {
                AgentConfig::from_json(&raw)?
            } else {
                AgentConfig::from_toml(&raw)?
            }
        }
        None => AgentConfig::default(),
    };
    config.apply_env();

    if !config.is_deliverable() {
        let derived = AgentConfig::for_page(page)?;
        if config.endpoint.as_deref().map_or(true, str::is_empty) {
            config.endpoint = derived.endpoint;
        }
        if config.site_id.as_deref().map_or(true, str::is_empty) {
            config.site_id = derived.site_id;
        }
        if config.cross_site_domain.is_none() {
            config.cross_site_domain = derived.cross_site_domain;
        }
    }
    Ok(config)
}

/// Parse JSON lines, skipping blank lines and `#` comments.
fn parse_recording(source: &str) -> Result<Vec<RecordedInput>> {
    let mut inputs = Vec::new();
    for (i, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let input: RecordedInput = serde_json::from_str(line)
            .with_context(|| format!("Invalid recording entry on line {}", i + 1))?;
        if let Some(last) = inputs.last().map(|l: &RecordedInput| l.at) {
            if input.at < last {
                bail!("Recording goes back in time on line {}", i + 1);
            }
        }
        inputs.push(input);
    }
    Ok(inputs)
}

fn open_scopes(store: Option<&Path>) -> Result<StorageScopes> {
    match store {
        Some(dir) => {
            let persistent: Arc<dyn Storage> = Arc::new(
                FileStorage::open(dir.join(STORE_FILE))
                    .with_context(|| format!("Failed to open store in {:?}", dir))?,
            );
            Ok(StorageScopes::new(
                persistent.clone(),
                Arc::new(MemoryStorage::new()),
                Arc::new(StorageCookieJar::new(persistent)),
            ))
        }
        None => Ok(StorageScopes::in_memory()),
    }
}

/// Feed `inputs` through a fresh pipeline on a virtual clock, then tear it
/// down.
fn replay_session(
    config: AgentConfig,
    page: &str,
    storage: StorageScopes,
    inputs: &[RecordedInput],
    transport: Arc<dyn Transport>,
) -> DeliveryStats {
    let start = inputs.first().map_or(0, |input| input.at);
    let clock = ManualClock::new(start);
    let mut pipeline = Pipeline::builder(config)
        .with_storage(storage)
        .with_environment(Arc::new(SharedEnvironment::for_url(page)))
        .with_clock(Arc::new(clock.clone()))
        .build(transport);
    pipeline.init();

    for recorded in inputs {
        clock.set(recorded.at);
        match &recorded.input {
            Input::Signal(signal) => pipeline.handle(signal.clone()),
            Input::Call(command) => pipeline.apply(command.clone()),
        }
    }
    pipeline.teardown();

    let stats = pipeline.delivery_stats();
    info!(inputs = inputs.len(), ?stats, "replay finished");
    stats
}

fn handle_ab_command(command: AbCommands, store: &Path, config: &AgentConfig) -> Result<()> {
    let persistent: Arc<dyn Storage> = Arc::new(
        FileStorage::open(store.join(STORE_FILE))
            .with_context(|| format!("Failed to open store in {:?}", store))?,
    );
    let mut bucketer = ABBucketer::new(persistent.clone(), false, config.bucketing);
    bucketer.load();

    match command {
        AbCommands::Get {
            name,
            variants,
            weights,
        } => {
            let identity = IdentityStore::new(
                persistent.clone(),
                Arc::new(StorageCookieJar::new(persistent)),
                false,
                config.cross_site,
                config.cross_site_domain.clone(),
            );
            let visitor_id = identity.resolve_visitor_id();
            let variant = bucketer.get_variant(
                &name,
                &variants,
                weights.as_deref(),
                &mut rand::thread_rng(),
                visitor_id.as_deref(),
            );
            match variant {
                Some(variant) => println!("{}", variant),
                None => bail!("Experiment needs a name and at least two variants"),
            }
        }
        AbCommands::Set { name, variant } => {
            if !bucketer.set_variant(&name, &variant) {
                bail!("Experiment name and variant must be non-empty");
            }
            println!("✓ {} = {}", name, variant);
        }
        AbCommands::List => {
            let all = bucketer.all();
            if all.is_empty() {
                println!("No assignments.");
            }
            for (name, variant) in all {
                println!("{}\t{}", name, variant);
            }
        }
        AbCommands::Clear { name } => {
            bucketer.clear(name.as_deref());
            println!("✓ Cleared {}", name.as_deref().unwrap_or("all assignments"));
        }
    }
    Ok(())
}
