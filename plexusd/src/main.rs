//! plexusd: keeps one network and its character vocabulary resident, trains
//! it in supervised rounds on request and answers sampling queries.
//!
//! Clients speak newline-delimited JSON over TCP. The network image and the
//! vocabulary live in the platform data directory and are saved on demand
//! and on Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use plexus::observer::NetworkAdapter;
use plexus::supervisor::TrainingReport;
use plexus::{Network, Perception, Supervisor};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info, warn};

mod charnet;
mod error;
mod paths;

use charnet::CharPerception;
use error::DaemonError;
use paths::AppPaths;

const LISTEN_ADDR: &str = "127.0.0.1:9877";
const INITIAL_CELLS: usize = 200;
const INITIAL_CELL_SYNAPSES: usize = 5;
const PRETRAIN_CELLS: usize = 20;
const PRETRAIN_SYNAPSES: usize = 50;
const DEFAULT_TRAIN_THREADS: usize = 2;

// ═══════════════════════════════════════════════════════════════════════════
// Protocol Messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Request {
    GetStats,
    Train {
        text: String,
        #[serde(default)]
        threads: Option<usize>,
    },
    Sample {
        seed: String,
    },
    Save,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Response {
    Stats(StatsSnapshot),
    Trained(TrainedSummary),
    Sampled { text: String },
    Success { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatsSnapshot {
    cells: usize,
    synapses: usize,
    avg_synapses_per_cell: f64,
    immortal_cells: usize,
    excitatory_synapses: usize,
    inhibitory_synapses: usize,
    generation: u64,
    disabled: bool,
    healthy: bool,
    vocab_size: usize,
    rounds_trained: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedSummary {
    rounds: u64,
    samples: usize,
    pairs: usize,
    hits: usize,
    misses: usize,
    stopped: bool,
}

impl From<TrainingReport> for TrainedSummary {
    fn from(report: TrainingReport) -> Self {
        Self {
            rounds: report.rounds,
            samples: report.samples,
            pairs: report.outcome.pairs,
            hits: report.outcome.hits,
            misses: report.outcome.misses,
            stopped: report.stopped,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Daemon State
// ═══════════════════════════════════════════════════════════════════════════

struct DaemonState {
    network: Network,
    vocab: CharPerception,
    paths: AppPaths,
    stop: Arc<AtomicBool>,
    rounds_trained: u64,
}

impl DaemonState {
    fn new(paths: AppPaths, stop: Arc<AtomicBool>) -> Self {
        Self {
            network: fresh_network(),
            vocab: CharPerception::new(),
            paths,
            stop,
            rounds_trained: 0,
        }
    }

    fn stats(&self) -> StatsSnapshot {
        let snap = NetworkAdapter::new(&self.network).snapshot();
        StatsSnapshot {
            cells: snap.totals.cells,
            synapses: snap.totals.synapses,
            avg_synapses_per_cell: snap.totals.avg_synapses_per_cell,
            immortal_cells: snap.immortal_cells,
            excitatory_synapses: snap.excitatory_synapses,
            inhibitory_synapses: snap.inhibitory_synapses,
            generation: snap.generation,
            disabled: snap.disabled,
            healthy: snap.is_healthy(),
            vocab_size: self.vocab.len(),
            rounds_trained: self.rounds_trained,
        }
    }

    /// Train on `text` through a supervisor. The network and vocabulary are
    /// replaced together once the run succeeds; a failed run leaves both as
    /// they were.
    fn train(&mut self, text: &str, threads: usize) -> Result<TrainingReport, DaemonError> {
        let (network, vocab, report) = self.stage_training(text, threads)?;
        self.network = network;
        self.vocab = vocab;
        self.rounds_trained += report.rounds;
        info!(
            rounds = report.rounds,
            hits = report.outcome.hits,
            misses = report.outcome.misses,
            totals = %self.network.totals(),
            "training finished"
        );
        Ok(report)
    }

    /// Run training on copies of the network and vocabulary.
    fn stage_training(
        &self,
        text: &str,
        threads: usize,
    ) -> Result<(Network, CharPerception, TrainingReport), DaemonError> {
        let mut network = self.network.clone();
        let mut vocab = self.vocab.clone();
        vocab.set_raw_data(text);
        let mut settings = vocab.prepare_data(&mut network)?;
        settings.threads = threads.max(1);
        network.pretrain(&settings, PRETRAIN_CELLS, PRETRAIN_SYNAPSES)?;

        let mut sup = Supervisor::new(network);
        sup.set_max_parallelism(settings.threads);
        let report = sup.train_until(&settings, &self.stop)?;

        let mut network = sup.into_baseline();
        network.disabled = true;
        Ok((network, vocab, report))
    }

    fn sample(&mut self, seed: &str) -> Result<String, DaemonError> {
        self.vocab.seed_and_sample(seed, &mut self.network)
    }

    fn save(&self) -> Result<(), DaemonError> {
        let path = self.paths.network_file();
        info!("Saving network to {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.network.save_to_file(&path)?;
        self.vocab.save_vocab(&self.paths.vocab_file())?;
        info!("Network saved to {:?}", path);
        Ok(())
    }

    fn load(&mut self) -> Result<(), DaemonError> {
        let network = Network::load_from_file(self.paths.network_file())?;
        let mut vocab = CharPerception::new();
        if let Err(e) = vocab.load_vocab(&self.paths.vocab_file()) {
            warn!("Could not load vocabulary: {}", e);
        }
        self.network = network;
        self.vocab = vocab;
        info!("Network loaded from {:?}", self.paths.network_file());
        Ok(())
    }
}

fn fresh_network() -> Network {
    let mut network = Network::new();
    network.grow(INITIAL_CELLS, INITIAL_CELL_SYNAPSES, 0);
    network
}

// ═══════════════════════════════════════════════════════════════════════════
// Client Handler
// ═══════════════════════════════════════════════════════════════════════════

async fn handle_client(
    stream: TcpStream,
    state: Arc<RwLock<DaemonState>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::Error {
                    message: format!("Invalid request: {}", e),
                };
                writer
                    .write_all(serde_json::to_string(&resp)?.as_bytes())
                    .await?;
                writer.write_all(b"\n").await?;
                continue;
            }
        };

        let response = match request {
            Request::GetStats => {
                let s = state.read().await;
                Response::Stats(s.stats())
            }
            Request::Train { text, threads } => {
                let threads = threads.unwrap_or(DEFAULT_TRAIN_THREADS);
                let mut s = Arc::clone(&state).write_owned().await;
                match tokio::task::spawn_blocking(move || s.train(&text, threads)).await {
                    Ok(Ok(report)) => Response::Trained(report.into()),
                    Ok(Err(e)) => {
                        error!("Training failed: {}", e);
                        Response::Error {
                            message: format!("Training failed: {}", e),
                        }
                    }
                    Err(e) => Response::Error {
                        message: DaemonError::from(e).to_string(),
                    },
                }
            }
            Request::Sample { seed } => {
                let mut s = state.write().await;
                match s.sample(&seed) {
                    Ok(text) => Response::Sampled { text },
                    Err(e) => Response::Error {
                        message: e.to_string(),
                    },
                }
            }
            Request::Save => {
                let s = state.read().await;
                match s.save() {
                    Ok(()) => Response::Success {
                        message: "Network saved".to_string(),
                    },
                    Err(e) => Response::Error {
                        message: e.to_string(),
                    },
                }
            }
            Request::Shutdown => {
                let s = state.read().await;
                s.stop.store(true, Ordering::Release);
                match s.save() {
                    Ok(()) => {
                        info!("Shutdown requested; network saved");
                        tokio::spawn(async {
                            // Give the response a moment to flush before exiting.
                            time::sleep(Duration::from_millis(50)).await;
                            std::process::exit(0);
                        });
                        Response::Success {
                            message: "Shutting down".to_string(),
                        }
                    }
                    Err(e) => Response::Error {
                        message: format!("Save failed, aborting shutdown: {}", e),
                    },
                }
            }
        };

        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());

    let stop = Arc::new(AtomicBool::new(false));
    let state = Arc::new(RwLock::new(DaemonState::new(paths, Arc::clone(&stop))));

    // Save on Ctrl-C. A running training round finishes first; the stop flag
    // keeps the next one from starting.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Release);
                let s = state.read().await;
                if let Err(e) = s.save() {
                    error!("Ctrl-C save failed: {}", e);
                } else {
                    info!("Ctrl-C: network saved");
                }
                std::process::exit(0);
            }
        });
    }

    {
        let mut s = state.write().await;
        if let Err(e) = s.load() {
            warn!("Could not load network: {}", e);
            info!("Starting with fresh network: {}", s.network.totals());
        }
    }

    let listener = TcpListener::bind(LISTEN_ADDR).await?;
    info!("Plexus daemon listening on {}", LISTEN_ADDR);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}
