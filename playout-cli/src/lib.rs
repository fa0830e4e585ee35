//! Playout command-line application.
//!
//! Wires configuration, logging and signal handling around the playlist
//! supervisor.

pub mod config;
pub mod logging;
pub mod signal;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Receiver;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use playout_encoder::{probe_binary, EncoderProfile, FfmpegLauncher};
use playout_engine::{EngineResult, Supervisor, SupervisorConfig};
use playout_ipc::{event_channel, PlayoutStats, StopReason, SupervisorEvent, SupervisorState};
use playout_transport::{HttpProbe, IngestEndpoint};

use crate::config::AppConfig;
use crate::signal::ShutdownSignals;

/// Run the playout loop until a shutdown signal arrives.
///
/// Returns an error for fatal startup problems or if the supervisor
/// worker panicked.
pub fn run(config: AppConfig) -> Result<()> {
    let version = probe_binary(&config.ffmpeg)
        .with_context(|| format!("encoder {} is not usable", config.ffmpeg.display()))?;
    info!(binary = %config.ffmpeg.display(), %version, "Encoder found");

    let endpoint = IngestEndpoint::new(&config.ingest_template, config.stream_key())
        .context("invalid ingest endpoint")?;
    info!(host = endpoint.host(), destination = %endpoint, "Streaming to ingest endpoint");

    // Built outside the runtime: the blocking client owns its own.
    let probe = Arc::new(
        HttpProbe::new(&config.probe_url, config.timings.probe_timeout)
            .context("invalid connectivity probe")?,
    );

    let profile = EncoderProfile {
        reconnect: config.reconnect.clone(),
        ..EncoderProfile::default()
    };
    let launcher = FfmpegLauncher::new(config.ffmpeg.clone(), profile, endpoint.expose_url())
        .redacting(config.stream_key());

    let supervisor_config = SupervisorConfig {
        playlist: config.playlist.clone(),
        timings: config.timings,
        verify_sources: config.verify_sources,
    };
    let mut supervisor = Supervisor::new(
        supervisor_config,
        probe.clone(),
        probe,
        Arc::new(launcher),
    );

    let (event_tx, event_rx) = event_channel();
    supervisor.set_event_sender(event_tx);
    let events = spawn_event_logger(event_rx)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    let mut signals = {
        let _guard = runtime.enter();
        ShutdownSignals::install().context("installing signal handlers")?
    };

    supervisor.spawn()?;
    let handle = supervisor.handle();

    let (done_tx, mut done_rx) = oneshot::channel::<(EngineResult<()>, PlayoutStats)>();
    let joiner = thread::Builder::new()
        .name("playout-join".to_string())
        .spawn(move || {
            let result = supervisor.join();
            let _ = done_tx.send((result, supervisor.stats()));
        })
        .context("spawning join thread")?;

    let finished = runtime.block_on(async {
        tokio::select! {
            signal = signals.recv() => {
                info!(%signal, "Received shutdown signal, stopping");
                handle.shutdown(StopReason::Signal(signal));
            }
            finished = &mut done_rx => return finished,
        }

        loop {
            tokio::select! {
                signal = signals.recv() => {
                    info!(%signal, "Already shutting down");
                }
                finished = &mut done_rx => return finished,
            }
        }
    });

    let _ = joiner.join();
    drop(handle);
    drop(signals);
    drop(runtime);
    if events.join().is_err() {
        warn!("Event logger panicked");
    }

    let (result, stats) = finished.map_err(|_| anyhow!("supervisor exited without reporting"))?;
    info!(
        attempts = stats.attempts,
        successes = stats.successes,
        failures = stats.failures,
        skipped = stats.skipped,
        passes = stats.passes,
        uptime_secs = stats.uptime_seconds,
        "Playout stopped"
    );
    result.context("playout supervisor failed")
}

/// Drain supervisor events until every sender is gone.
fn spawn_event_logger(event_rx: Receiver<SupervisorEvent>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("playout-events".to_string())
        .spawn(move || {
            for event in event_rx {
                match event {
                    SupervisorEvent::StateChanged { current, .. } => match *current {
                        SupervisorState::ShuttingDown { reason } => {
                            info!(reason = %reason.message(), "Supervisor shutting down");
                        }
                        state => debug!(state = state.name(), "Supervisor state"),
                    },
                    SupervisorEvent::PassCompleted { pass, stats } => {
                        debug!(
                            pass,
                            successes = stats.successes,
                            failures = stats.failures,
                            skipped = stats.skipped,
                            failed_passes_in_a_row = stats.failed_passes_in_a_row,
                            "Pass statistics"
                        );
                    }
                    other => debug!(event = ?other, "Supervisor event"),
                }
            }
        })
        .context("spawning event logger")
}
