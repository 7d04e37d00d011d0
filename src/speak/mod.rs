//! Speech synthesis and exclusive playback.
//!
//! Serializes "text → synthesized audio → device playback" so at most
//! one playback is ever active: a `speak` call made while another is
//! outstanding is rejected, never queued. The orchestrator never makes
//! overlapping calls by construction; the busy flag catches anyone else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use tracing::{debug, info};

use crate::audio::AudioSink;
use crate::engine::SynthesisEngine;

pub struct SpeechPlayer {
    engine: Mutex<Box<dyn SynthesisEngine>>,
    sink: Box<dyn AudioSink>,
    speaker: i64,
    speed: f32,
    busy: AtomicBool,
}

impl SpeechPlayer {
    pub fn new(
        engine: Box<dyn SynthesisEngine>,
        sink: Box<dyn AudioSink>,
        speaker: i64,
        speed: f32,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            sink,
            speaker,
            speed,
            busy: AtomicBool::new(false),
        }
    }

    /// Synthesize and play `text`, blocking the calling turn until the
    /// output device has drained. Empty text or empty synthesis output
    /// skips playback without error.
    pub fn speak(&self, text: &str) -> anyhow::Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            anyhow::bail!("speak called while a playback is outstanding");
        }
        let result = self.speak_inner(text);
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    fn speak_inner(&self, text: &str) -> anyhow::Result<()> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            debug!("Nothing to speak after normalization");
            return Ok(());
        }

        let audio = {
            let mut engine = self
                .engine
                .lock()
                .map_err(|_| anyhow::anyhow!("synthesis engine lock poisoned"))?;
            engine
                .generate(&normalized, self.speaker, self.speed)
                .context("speech synthesis")?
        };

        if audio.samples.is_empty() {
            debug!("Synthesis produced no audio, skipping playback");
            return Ok(());
        }

        info!(
            samples = audio.samples.len(),
            duration_secs = audio.samples.len() as f64 / audio.sample_rate as f64,
            "Playing response"
        );
        self.sink
            .play(&audio.samples, audio.sample_rate)
            .context("audio playback")
    }

    pub fn is_speaking(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Replace punctuation variants the synthesis vocabulary does not cover.
/// Full-width CJK punctuation maps to its ASCII counterpart; brackets
/// become pause commas rather than being dropped silently.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{ff0c}' => out.push(','),        // ，
            '\u{3002}' => out.push('.'),        // 。
            '\u{ff01}' => out.push('!'),        // ！
            '\u{ff1f}' => out.push('?'),        // ？
            '\u{ff1a}' => out.push(':'),        // ：
            '\u{ff1b}' => out.push(';'),        // ；
            '\u{201c}' | '\u{201d}' => out.push('"'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{2026}' => out.push_str("..."),
            '\u{2014}' | '\u{2013}' => out.push(','),
            '(' | ')' | '[' | ']' | '{' | '}' | '\u{ff08}' | '\u{ff09}' | '\u{3010}'
            | '\u{3011}' => out.push(','),
            _ => out.push(ch),
        }
    }
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::{SynthesisEngine, SynthesizedAudio};

    struct StubSynth {
        samples: Vec<f32>,
        calls: Arc<AtomicUsize>,
    }

    impl SynthesisEngine for StubSynth {
        fn generate(
            &mut self,
            _text: &str,
            _speaker: i64,
            _speed: f32,
        ) -> anyhow::Result<SynthesizedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SynthesizedAudio {
                samples: self.samples.clone(),
                sample_rate: 22_050,
            })
        }
    }

    struct CountingSink {
        plays: Arc<AtomicUsize>,
        block_ms: u64,
    }

    impl AudioSink for CountingSink {
        fn play(&self, _samples: &[f32], _sample_rate: u32) -> anyhow::Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if self.block_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.block_ms));
            }
            Ok(())
        }
    }

    fn player(samples: Vec<f32>, block_ms: u64) -> (SpeechPlayer, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let synth_calls = Arc::new(AtomicUsize::new(0));
        let plays = Arc::new(AtomicUsize::new(0));
        let player = SpeechPlayer::new(
            Box::new(StubSynth {
                samples,
                calls: synth_calls.clone(),
            }),
            Box::new(CountingSink {
                plays: plays.clone(),
                block_ms,
            }),
            0,
            1.0,
        );
        (player, synth_calls, plays)
    }

    #[test]
    fn empty_synthesis_output_skips_playback_without_error() {
        let (player, synth_calls, plays) = player(Vec::new(), 0);
        player.speak("Hi").unwrap();
        assert_eq!(synth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(plays.load(Ordering::SeqCst), 0);
        assert!(!player.is_speaking());
    }

    #[test]
    fn empty_text_skips_synthesis_entirely() {
        let (player, synth_calls, plays) = player(vec![0.0; 10], 0);
        player.speak("  ,, ").unwrap();
        assert_eq!(synth_calls.load(Ordering::SeqCst), 0);
        assert_eq!(plays.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn overlapping_speak_is_rejected() {
        let (player, _synth_calls, plays) = player(vec![0.0; 10], 500);
        let player = Arc::new(player);

        let bg = {
            let player = player.clone();
            std::thread::spawn(move || player.speak("first"))
        };

        // Give the background call time to reach playback.
        std::thread::sleep(Duration::from_millis(100));
        let second = player.speak("second");
        assert!(second.is_err());

        bg.join().unwrap().unwrap();
        assert_eq!(plays.load(Ordering::SeqCst), 1);

        // Once the first playback completes, speaking works again.
        player.speak("third").unwrap();
        assert_eq!(plays.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn normalizes_fullwidth_punctuation_and_brackets() {
        assert_eq!(normalize_text("你好，世界。"), "你好,世界.");
        assert_eq!(normalize_text("a (quiet) word"), "a ,quiet, word");
        assert_eq!(normalize_text("“quote” … dash—end"), "\"quote\" ... dash,end");
        assert_eq!(normalize_text(" ,, "), "");
    }
}
