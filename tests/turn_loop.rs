//! End-to-end turn loop over scripted engines: wake word, one utterance,
//! generated reply, playback, re-arm.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use voiceloop::audio::{AudioFrame, AudioSink};
use voiceloop::config::ResumeMode;
use voiceloop::engine::{AsrEngine, SynthesisEngine, SynthesizedAudio, WakeWordEngine};
use voiceloop::llm::{ChatMessage, ResponseGenerator};
use voiceloop::orchestrate::{Orchestrator, TurnOptions, TurnState};
use voiceloop::speak::SpeechPlayer;
use voiceloop::transcribe::StreamingTranscriber;
use voiceloop::wake::WakeGate;

struct ScriptedWake {
    wake_on_feed: usize,
    fed: usize,
    ready: bool,
    matched: Option<String>,
}

impl WakeWordEngine for ScriptedWake {
    fn accept_waveform(&mut self, _sample_rate: u32, _samples: &[f32]) {
        self.fed += 1;
        self.ready = true;
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn decode_step(&mut self) -> anyhow::Result<()> {
        self.ready = false;
        if self.matched.is_none() && self.fed >= self.wake_on_feed {
            self.matched = Some("hello assistant".to_string());
        }
        Ok(())
    }

    fn keyword(&self) -> Option<&str> {
        self.matched.as_deref()
    }

    fn reset(&mut self) {
        self.fed = 0;
        self.ready = false;
        self.matched = None;
    }
}

struct ScriptedAsr {
    script: VecDeque<(&'static str, bool)>,
    pending: usize,
    text: String,
    endpoint: bool,
}

impl AsrEngine for ScriptedAsr {
    fn accept_waveform(&mut self, _sample_rate: u32, _samples: &[f32]) {
        self.pending += 1;
    }

    fn is_ready(&self) -> bool {
        self.pending > 0
    }

    fn decode_step(&mut self) -> anyhow::Result<()> {
        self.pending -= 1;
        if let Some((text, endpoint)) = self.script.pop_front() {
            self.text = text.to_string();
            self.endpoint = endpoint;
        }
        Ok(())
    }

    fn is_endpoint(&self) -> bool {
        self.endpoint
    }

    fn result(&self) -> String {
        self.text.clone()
    }

    fn reset(&mut self) {
        self.text.clear();
        self.endpoint = false;
    }
}

struct RecordingGenerator {
    reply: &'static str,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ResponseGenerator for RecordingGenerator {
    fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let reply = self.reply.to_string();
        Box::pin(async move { Ok(reply) })
    }
}

struct StubSynth;

impl SynthesisEngine for StubSynth {
    fn generate(
        &mut self,
        _text: &str,
        _speaker: i64,
        _speed: f32,
    ) -> anyhow::Result<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            samples: vec![0.0; 320],
            sample_rate: 16_000,
        })
    }
}

struct CountingSink {
    plays: Arc<AtomicUsize>,
}

impl AudioSink for CountingSink {
    fn play(&self, _samples: &[f32], _sample_rate: u32) -> anyhow::Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn frame() -> AudioFrame {
    AudioFrame::new(vec![0.0; 1600], 16_000)
}

#[allow(clippy::type_complexity)]
fn build(
    wake_on_feed: usize,
    script: Vec<(&'static str, bool)>,
    resume: ResumeMode,
) -> (
    Orchestrator,
    mpsc::Sender<AudioFrame>,
    watch::Sender<bool>,
    Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    Arc<AtomicUsize>,
) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let plays = Arc::new(AtomicUsize::new(0));

    let gate = WakeGate::new(Box::new(ScriptedWake {
        wake_on_feed,
        fed: 0,
        ready: false,
        matched: None,
    }));
    let transcriber = StreamingTranscriber::new(Box::new(ScriptedAsr {
        script: script.into(),
        pending: 0,
        text: String::new(),
        endpoint: false,
    }));
    let player = SpeechPlayer::new(
        Box::new(StubSynth),
        Box::new(CountingSink {
            plays: plays.clone(),
        }),
        0,
        1.0,
    );

    let (frames_tx, frames_rx) = mpsc::channel(32);
    let (stop_tx, stop_rx) = watch::channel(false);

    let orchestrator = Orchestrator::new(
        gate,
        transcriber,
        Box::new(RecordingGenerator {
            reply: "It is sunny today.",
            requests: requests.clone(),
        }),
        player,
        frames_rx,
        stop_rx,
        TurnOptions {
            preamble: "You are a helpful assistant.".to_string(),
            generate_timeout: Duration::from_secs(5),
            max_empty_endpoints: 0,
            resume,
        },
    );

    (orchestrator, frames_tx, stop_tx, requests, plays)
}

#[tokio::test]
async fn one_wake_one_utterance_one_spoken_reply() {
    let (mut orch, frames_tx, _stop_tx, requests, plays) = build(
        1,
        vec![("what is the weather", true)],
        ResumeMode::Wake,
    );

    // Wake frame, then the utterance that finalizes at its endpoint.
    frames_tx.send(frame()).await.unwrap();
    frames_tx.send(frame()).await.unwrap();
    // A trailing frame while re-armed: must not start another turn.
    frames_tx.send(frame()).await.unwrap();
    drop(frames_tx);

    orch.run().await.unwrap();
    assert_eq!(orch.state(), TurnState::Stopped);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0][0].role, "system");
    assert_eq!(requests[0][0].content, "You are a helpful assistant.");
    assert_eq!(requests[0][1].role, "user");
    assert_eq!(requests[0][1].content, "what is the weather");

    assert_eq!(plays.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_wake_word_means_no_turn() {
    let (mut orch, frames_tx, _stop_tx, requests, plays) = build(
        usize::MAX,
        vec![("should never be decoded", true)],
        ResumeMode::Wake,
    );

    for _ in 0..10 {
        frames_tx.send(frame()).await.unwrap();
    }
    drop(frames_tx);

    orch.run().await.unwrap();
    assert!(requests.lock().unwrap().is_empty());
    assert_eq!(plays.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn listen_resume_chains_turns_without_rewaking() {
    let (orch, frames_tx, _stop_tx, requests, plays) = build(
        1,
        vec![("first question", true), ("second question", true)],
        ResumeMode::Listen,
    );
    let mut orch = orch;

    let handle = tokio::spawn(async move {
        orch.run().await.unwrap();
        orch
    });

    frames_tx.send(frame()).await.unwrap(); // wake
    frames_tx.send(frame()).await.unwrap(); // first utterance

    // Frames queued during a turn are discarded, so wait for the first
    // playback before offering the second utterance.
    for _ in 0..500 {
        if plays.load(Ordering::SeqCst) >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(plays.load(Ordering::SeqCst), 1);

    frames_tx.send(frame()).await.unwrap(); // second utterance, no re-wake
    for _ in 0..500 {
        if plays.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    drop(frames_tx);
    let orch = handle.await.unwrap();
    assert_eq!(orch.state(), TurnState::Stopped);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0][1].content, "first question");
    assert_eq!(requests[1][1].content, "second question");
    assert_eq!(plays.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stop_signal_ends_the_loop_promptly() {
    let (mut orch, _frames_tx, stop_tx, _requests, _plays) =
        build(1, Vec::new(), ResumeMode::Wake);

    stop_tx.send(true).unwrap();
    orch.run().await.unwrap();
    assert_eq!(orch.state(), TurnState::Stopped);
}
