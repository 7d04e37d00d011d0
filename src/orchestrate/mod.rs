//! Turn-taking orchestration.
//!
//! The single control loop enforcing exclusivity between listening,
//! thinking and speaking. Frames arrive from the capture thread through
//! a bounded channel and are routed by state: to the wake gate while
//! waiting, to the transcriber while listening, and nowhere at all while
//! a reply is being generated or spoken — the system is strictly
//! half-duplex and must not decode its own playback.
//!
//! The generation call and synthesis+playback are the only long
//! suspensions; capture keeps draining the device meanwhile and the
//! overflow is discarded, so a turn always resumes on fresh audio.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::audio::AudioFrame;
use crate::config::{Config, ResumeMode};
use crate::llm::{ChatMessage, ResponseGenerator};
use crate::speak::SpeechPlayer;
use crate::transcribe::{Segment, StreamingTranscriber};
use crate::wake::WakeGate;

/// Orchestrator states, cyclic except for the terminal stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    WaitingForWake,
    Listening,
    Thinking,
    Speaking,
    Stopped,
}

/// Ephemeral record of one orchestration cycle. Dropped when the cycle
/// ends; nothing but the fixed system preamble survives across turns.
struct ConversationTurn {
    segment: Segment,
    reply: String,
}

/// Turn-loop knobs lifted out of the full config.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Fixed system preamble sent with every generation request.
    pub preamble: String,
    /// Upper bound on one generation call.
    pub generate_timeout: Duration,
    /// Consecutive empty endpoints before giving up listening;
    /// 0 disables the give-up.
    pub max_empty_endpoints: u32,
    /// What to do once a turn's playback completes.
    pub resume: ResumeMode,
}

impl TurnOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            preamble: cfg.llm.system_prompt.clone(),
            generate_timeout: Duration::from_secs(cfg.llm.timeout_secs),
            max_empty_endpoints: cfg.orchestrator.max_empty_endpoints,
            resume: cfg.orchestrator.resume,
        }
    }
}

pub struct Orchestrator {
    gate: WakeGate,
    transcriber: StreamingTranscriber,
    generator: Box<dyn ResponseGenerator>,
    player: SpeechPlayer,
    frames: mpsc::Receiver<AudioFrame>,
    stop: watch::Receiver<bool>,
    opts: TurnOptions,
    state: TurnState,
    empty_endpoints: u32,
}

impl Orchestrator {
    pub fn new(
        gate: WakeGate,
        transcriber: StreamingTranscriber,
        generator: Box<dyn ResponseGenerator>,
        player: SpeechPlayer,
        frames: mpsc::Receiver<AudioFrame>,
        stop: watch::Receiver<bool>,
        opts: TurnOptions,
    ) -> Self {
        Self {
            gate,
            transcriber,
            generator,
            player,
            frames,
            stop,
            opts,
            state: TurnState::WaitingForWake,
            empty_endpoints: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Run the turn loop until the stop signal fires or the frame source
    /// closes. The stop branch is biased so an external stop is observed
    /// within one frame period even under a full frame channel.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.gate.arm();
        self.state = TurnState::WaitingForWake;
        info!("Waiting for wake word");

        loop {
            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        info!("Stop requested, unwinding");
                        break;
                    }
                }
                frame = self.frames.recv() => {
                    match frame {
                        Some(frame) => self.on_frame(frame).await,
                        None => {
                            info!("Frame source closed, stopping");
                            break;
                        }
                    }
                }
            }
        }

        self.state = TurnState::Stopped;
        Ok(())
    }

    /// Route one frame according to the current state.
    async fn on_frame(&mut self, frame: AudioFrame) {
        match self.state {
            TurnState::WaitingForWake => {
                if let Err(e) = self.gate.feed(&frame) {
                    warn!(error = %e, "Wake engine error, re-arming");
                    self.recover();
                    return;
                }
                if self.gate.is_awake() {
                    info!(keyword = ?self.gate.keyword(), "Wake signal received");
                    self.begin_listening();
                }
            }

            TurnState::Listening => {
                if let Err(e) = self.transcriber.feed(&frame) {
                    warn!(error = %e, "Recognizer error, discarding session");
                    self.recover();
                    return;
                }

                if let Some(partial) = self.transcriber.partial_if_changed() {
                    info!(partial = %partial, "Recognizing");
                }

                if self.transcriber.is_endpoint() {
                    match self.transcriber.finalize_if_endpoint() {
                        Some(segment) => {
                            self.empty_endpoints = 0;
                            self.run_turn(segment).await;
                        }
                        None => {
                            self.empty_endpoints += 1;
                            if self.opts.max_empty_endpoints > 0
                                && self.empty_endpoints >= self.opts.max_empty_endpoints
                            {
                                info!(
                                    empty_endpoints = self.empty_endpoints,
                                    "Gave up listening, waiting for wake word"
                                );
                                self.recover();
                            }
                        }
                    }
                }
            }

            // Half-duplex: frames arriving while a reply is in flight or
            // playing are dropped, never fed to a recognition session.
            TurnState::Thinking | TurnState::Speaking => {}

            TurnState::Stopped => {}
        }
    }

    /// One conversational turn: generate a reply for the segment, speak
    /// it, then hand control back to the configured resume state.
    async fn run_turn(&mut self, segment: Segment) {
        self.state = TurnState::Thinking;
        info!(seq = segment.seq, text = %segment.text, "Segment finalized");

        let messages = [
            ChatMessage::system(&self.opts.preamble),
            ChatMessage::user(&segment.text),
        ];

        let reply = match timeout(
            self.opts.generate_timeout,
            self.generator.generate(&messages),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(seq = segment.seq, error = %e, "Generation failed, skipping reply");
                self.recover();
                return;
            }
            Err(_) => {
                warn!(seq = segment.seq, "Generation timed out, skipping reply");
                self.recover();
                return;
            }
        };

        let turn = ConversationTurn { segment, reply };
        info!(seq = turn.segment.seq, reply = %turn.reply, "Reply generated");

        self.state = TurnState::Speaking;
        if let Err(e) = self.player.speak(&turn.reply) {
            warn!(seq = turn.segment.seq, error = %e, "Speaking failed");
            self.recover();
            return;
        }
        debug!(seq = turn.segment.seq, "Playback completed");

        self.finish_turn();
    }

    fn begin_listening(&mut self) {
        self.transcriber.start();
        self.empty_endpoints = 0;
        self.state = TurnState::Listening;
    }

    /// Successful end of a turn: discard audio that queued up during the
    /// suspension, then either re-arm the gate or go straight back to
    /// listening.
    fn finish_turn(&mut self) {
        self.discard_stale_frames();
        match self.opts.resume {
            ResumeMode::Wake => {
                self.gate.arm();
                self.state = TurnState::WaitingForWake;
                info!("Turn complete, waiting for wake word");
            }
            ResumeMode::Listen => {
                self.begin_listening();
                info!("Turn complete, listening");
            }
        }
    }

    /// Recoverable-error path: always lands in WaitingForWake with the
    /// gate re-armed, never in a partially initialized state.
    fn recover(&mut self) {
        self.discard_stale_frames();
        self.gate.arm();
        self.empty_endpoints = 0;
        self.state = TurnState::WaitingForWake;
    }

    /// Drop frames that queued while the loop was suspended in a
    /// generation or playback call. The next state starts on live audio
    /// with clean endpoint timing.
    fn discard_stale_frames(&mut self) {
        let mut dropped = 0u32;
        while self.frames.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded frames queued during the turn");
        }
    }
}
