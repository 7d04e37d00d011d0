//! voiceloop — half-duplex wake-word voice assistant.
//!
//! Microphone audio flows through a wake-word gate into a streaming
//! recognizer; finalized utterances go to a chat backend and the reply is
//! synthesized and played back before capture resumes. This entry point
//! loads configuration, constructs the engines (configuration problems
//! abort here, before the control loop) and runs the orchestrator.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use voiceloop::audio;
use voiceloop::audio::playback::OutputDevice;
use voiceloop::config::{self, Config};
use voiceloop::engine::asr::ZipformerAsr;
use voiceloop::engine::kws::ZipformerKws;
use voiceloop::engine::tts::VitsTts;
use voiceloop::llm::ChatClient;
use voiceloop::orchestrate::{Orchestrator, TurnOptions};
use voiceloop::speak::SpeechPlayer;
use voiceloop::transcribe::StreamingTranscriber;
use voiceloop::wake::WakeGate;

/// Capacity of the capture → orchestrator frame channel (~3 s of audio
/// at the default frame duration). Overflow is dropped on the capture
/// side while the orchestrator is busy in a turn.
const FRAME_CHANNEL_CAPACITY: usize = 32;

#[tokio::main]
async fn main() {
    // Initialize tracing (respects RUST_LOG env, defaults to info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = config::load(config_path.as_deref());

    if let Err(e) = run(cfg).await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let devices = audio::capture::list_devices();
    if devices.is_empty() {
        anyhow::bail!("No microphone devices found");
    }
    debug!(?devices, "Input devices");
    debug!(outputs = ?audio::playback::list_output_devices(), "Output devices");

    // Engine construction: anything missing here is a configuration
    // error and aborts before the control loop starts.
    let kws = ZipformerKws::new(&cfg.wake).context("initializing keyword spotter")?;
    let asr = ZipformerAsr::new(&cfg.asr).context("initializing recognizer")?;
    let synth = VitsTts::new(&cfg.tts).context("initializing synthesizer")?;
    let generator = ChatClient::new(&cfg.llm).context("initializing text generation")?;
    let output = OutputDevice::open().context("opening audio output")?;

    let gate = WakeGate::new(Box::new(kws));
    let transcriber = StreamingTranscriber::new(Box::new(asr));
    let player = SpeechPlayer::new(
        Box::new(synth),
        Box::new(output),
        cfg.tts.speaker_id,
        cfg.tts.speed,
    );

    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
    let stop_flag = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = watch::channel(false);

    // Input-device failures can be transient (device busy right after
    // another process released it); retry once before giving up. The
    // sender must not outlive this block: the framing thread holds the
    // only long-lived clone, so a dead capture closes the channel and
    // unwinds the orchestrator.
    let capture = {
        let frames_tx = frames_tx;
        match audio::capture::start_capture(
            cfg.audio.input_device.as_deref(),
            cfg.audio.frame_ms,
            frames_tx.clone(),
            stop_flag.clone(),
        ) {
            Ok(capture) => capture,
            Err(e) => {
                warn!(error = %e, "Audio capture failed to start, retrying once");
                tokio::time::sleep(Duration::from_secs(1)).await;
                audio::capture::start_capture(
                    cfg.audio.input_device.as_deref(),
                    cfg.audio.frame_ms,
                    frames_tx,
                    stop_flag.clone(),
                )
                .context("starting audio capture")?
            }
        }
    };

    // Ctrl-C maps to the global stop signal; the capture thread and the
    // orchestrator both observe it within one frame period.
    tokio::spawn({
        let stop_flag = stop_flag.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Caught Ctrl+C, stopping"),
                Err(e) => error!("Ctrl+C handler failed: {}, stopping", e),
            }
            stop_flag.store(true, Ordering::SeqCst);
            let _ = stop_tx.send(true);
        }
    });

    let mut orchestrator = Orchestrator::new(
        gate,
        transcriber,
        Box::new(generator),
        player,
        frames_rx,
        stop_rx,
        TurnOptions::from_config(&cfg),
    );

    info!("Started! Please speak");
    orchestrator.run().await?;

    capture.shutdown();
    info!("Shut down");
    Ok(())
}
