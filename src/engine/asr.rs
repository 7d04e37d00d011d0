//! Streaming transducer speech recognizer via ONNX Runtime, with
//! rule-based endpoint detection.
//!
//! Endpoint rules follow the usual streaming-recognizer trio:
//!   1. enough trailing silence after something was decoded,
//!   2. more trailing silence when nothing was decoded at all,
//!   3. an utterance-length cap.
//! All three thresholds come from configuration.

use super::AsrEngine;

// ── onnx enabled ────────────────────────────────────────────────
#[cfg(feature = "onnx")]
mod inner {
    use anyhow::Context;

    use super::AsrEngine;
    use crate::config::AsrConfig;
    use crate::engine::transducer::{TransducerNet, TransducerStream};

    pub struct ZipformerAsr {
        net: TransducerNet,
        stream: TransducerStream,
        trailing_silence_after_speech: f32,
        trailing_silence_no_speech: f32,
        min_utterance_length: f32,
    }

    impl ZipformerAsr {
        pub fn new(cfg: &AsrConfig) -> anyhow::Result<Self> {
            let net = TransducerNet::load(
                "recognizer",
                &cfg.tokens,
                &cfg.encoder,
                &cfg.decoder,
                &cfg.joiner,
                cfg.sample_rate,
                cfg.num_threads,
            )?;
            tracing::debug!(feature_dim = cfg.feature_dim, "Recognizer feature config");
            let stream = net.new_stream();
            Ok(Self {
                net,
                stream,
                trailing_silence_after_speech: cfg.trailing_silence_after_speech,
                trailing_silence_no_speech: cfg.trailing_silence_no_speech,
                min_utterance_length: cfg.min_utterance_length,
            })
        }

        fn trailing_silence_secs(&self) -> f32 {
            self.stream.trailing_blanks as f32 * self.stream.frame_shift_secs
        }

        fn utterance_secs(&self) -> f32 {
            self.stream.frames_decoded as f32 * self.stream.frame_shift_secs
        }
    }

    impl AsrEngine for ZipformerAsr {
        fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) {
            self.net
                .accept_waveform(&mut self.stream, sample_rate, samples);
        }

        fn is_ready(&self) -> bool {
            self.net.is_ready(&self.stream)
        }

        fn decode_step(&mut self) -> anyhow::Result<()> {
            self.net
                .decode_step(&mut self.stream, 0.0)
                .context("recognizer decode")
        }

        fn is_endpoint(&self) -> bool {
            let trailing = self.trailing_silence_secs();
            if self.net.has_emitted(&self.stream) {
                if trailing >= self.trailing_silence_after_speech {
                    return true;
                }
            } else if trailing >= self.trailing_silence_no_speech {
                return true;
            }
            self.utterance_secs() >= self.min_utterance_length
        }

        fn result(&self) -> String {
            self.net.text(&self.stream)
        }

        fn reset(&mut self) {
            self.net.reset_stream(&mut self.stream);
        }
    }
}

// ── onnx disabled (stub) ────────────────────────────────────────
#[cfg(not(feature = "onnx"))]
mod inner {
    use super::AsrEngine;
    use crate::config::AsrConfig;

    pub struct ZipformerAsr {
        _private: (),
    }

    impl ZipformerAsr {
        pub fn new(_cfg: &AsrConfig) -> anyhow::Result<Self> {
            anyhow::bail!("Speech recognition is not available (compile with --features onnx)")
        }
    }

    impl AsrEngine for ZipformerAsr {
        fn accept_waveform(&mut self, _sample_rate: u32, _samples: &[f32]) {}

        fn is_ready(&self) -> bool {
            false
        }

        fn decode_step(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_endpoint(&self) -> bool {
            false
        }

        fn result(&self) -> String {
            String::new()
        }

        fn reset(&mut self) {}
    }
}

pub use inner::ZipformerAsr;
