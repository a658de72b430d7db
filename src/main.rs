//! The `materialize` binary.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use log::{error, info, warn};
use tokio::runtime;
use tokio::sync::{mpsc, watch};
use materialize::change::{ChangeEvent, DecoderRegistry, ModKind, WireEvent};
use materialize::commons::storage::{Key, KeyValueStore};
use materialize::config::Config;
use materialize::constants::{MATERIALIZE_DEFAULT_CONFIG_FILE, MATERIALIZE_NS};
use materialize::metric::{FlushListener, JsonLinesSink};
use materialize::pipeline::{Pipeline, PipelineContext};
use materialize::selling::{
    DailyBank, DailyShop, DailyShopeepay, DailyTeam, SellingSinks,
};


//------------ Options -------------------------------------------------------

/// Turns a stream of row changes into daily business metrics.
#[derive(clap::Parser)]
#[command(version)]
struct Options {
    /// Path to the config file
    #[arg(
        short, long,
        env = "MATERIALIZE_CONFIG",
        default_value = MATERIALIZE_DEFAULT_CONFIG_FILE,
    )]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run a file of JSON change events through the pipeline
    Replay(Replay),

    /// Print a stored value
    Get(Get),
}


//------------ Replay --------------------------------------------------------

#[derive(clap::Args)]
struct Replay {
    /// The file to read events from, '-' for stdin
    #[arg(value_name = "path")]
    events: String,
}

impl Replay {
    fn run(self, config: Config) -> Result<(), String> {
        let context = PipelineContext::create(Arc::new(config)).map_err(|err| {
            format!("Cannot open store: {err}")
        })?;

        let stdout = Arc::new(JsonLinesSink::new(io::stdout()));
        let sinks = SellingSinks {
            shop: vec![stdout.clone() as Arc<dyn FlushListener<DailyShop>>],
            team: vec![stdout.clone() as Arc<dyn FlushListener<DailyTeam>>],
            bank: vec![stdout.clone() as Arc<dyn FlushListener<DailyBank>>],
            shopeepay: vec![
                stdout as Arc<dyn FlushListener<DailyShopeepay>>
            ],
        };
        let pipeline = Arc::new(
            Pipeline::new(&context, sinks).map_err(|err| err.to_string())?
        );

        let reader: Box<dyn BufRead + Send> = if self.events == "-" {
            Box::new(BufReader::new(io::stdin()))
        }
        else {
            let file = File::open(&self.events).map_err(|err| {
                format!("Cannot open '{}': {err}", self.events)
            })?;
            Box::new(BufReader::new(file))
        };

        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| format!("Cannot start runtime: {err}"))?;

        let capacity = context.config().channel_capacity;
        let registry = context.registry().clone();

        let stats = runtime.block_on(async move {
            let (backfill_tx, backfill_rx) = mpsc::channel(capacity);
            let (live_tx, live_rx) = mpsc::channel(capacity);
            let (stop_tx, stop_rx) = watch::channel(false);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, stopping");
                    let _ = stop_tx.send(true);
                }
            });

            let feeder = tokio::task::spawn_blocking(move || {
                feed(reader, &registry, backfill_tx, live_tx)
            });

            let stats = pipeline.run(vec![backfill_rx, live_rx], stop_rx).await;
            match feeder.await {
                Ok(Err(err)) => error!("reading events failed: {err}"),
                Err(err) => error!("reading events aborted: {err}"),
                Ok(Ok(())) => { }
            }
            stats
        });

        info!("replay done: {stats}");
        if stats.failed > 0 {
            return Err(format!("{} events failed", stats.failed))
        }
        Ok(())
    }
}

/// Reads events and hands them to the source channels.
///
/// Backfill events go to one channel, all others to the other.
fn feed(
    reader: Box<dyn BufRead + Send>,
    registry: &DecoderRegistry,
    backfill: mpsc::Sender<ChangeEvent>,
    live: mpsc::Sender<ChangeEvent>,
) -> Result<(), io::Error> {
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue
        }
        let event = match WireEvent::parse(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!("skipping line {}: {err}", idx + 1);
                continue
            }
        };
        let event = match event.into_event(registry) {
            Ok(event) => event,
            Err(err) => {
                warn!("skipping line {}: {err}", idx + 1);
                continue
            }
        };
        let target = match event.kind {
            ModKind::Backfill => &backfill,
            _ => &live,
        };
        if target.blocking_send(event).is_err() {
            // The pipeline has stopped.
            break
        }
    }
    Ok(())
}


//------------ Get -----------------------------------------------------------

#[derive(clap::Args)]
struct Get {
    /// The key, e.g. metric/daily_team/2025-08-01/2
    #[arg(value_name = "key")]
    key: String,
}

impl Get {
    fn run(self, config: Config) -> Result<(), String> {
        let key = Key::from_str(&self.key).map_err(|err| {
            format!("Invalid key '{}': {err}", self.key)
        })?;
        let store = KeyValueStore::create(&config.storage_uri, MATERIALIZE_NS)
            .map_err(|err| format!("Cannot open store: {err}"))?;
        let value: Option<serde_json::Value> = store.get(&key).map_err(|err| {
            err.to_string()
        })?;
        match value {
            Some(value) => {
                let json = serde_json::to_string_pretty(&value).map_err(|err| {
                    err.to_string()
                })?;
                println!("{json}");
                Ok(())
            }
            None => Err(format!("No value stored under '{key}'"))
        }
    }
}


//------------ main ----------------------------------------------------------

fn main() {
    let options = <Options as clap::Parser>::parse();

    let config = match Config::create(&options.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = config.init_logging() {
        eprintln!("{}", e);
        process::exit(1);
    }

    let res = match options.command {
        Command::Replay(cmd) => cmd.run(config),
        Command::Get(cmd) => cmd.run(config),
    };
    if let Err(e) = res {
        eprintln!("{}", e);
        process::exit(1);
    }
}
