//! Transducer keyword spotter via ONNX Runtime.
//!
//! The real implementation is gated behind `#[cfg(feature = "onnx")]`.
//! When the feature is disabled, construction fails so the problem is
//! reported at startup rather than mid-conversation.

use super::WakeWordEngine;

// ── onnx enabled ────────────────────────────────────────────────
#[cfg(feature = "onnx")]
mod inner {
    use std::path::Path;

    use anyhow::Context;
    use tracing::{info, warn};

    use super::WakeWordEngine;
    use crate::config::WakeConfig;
    use crate::engine::transducer::{TransducerNet, TransducerStream};

    pub struct ZipformerKws {
        net: TransducerNet,
        stream: TransducerStream,
        keywords: Vec<String>,
        threshold: f32,
        boost: f32,
        num_trailing_blanks: u64,
        matched: Option<String>,
    }

    impl ZipformerKws {
        pub fn new(cfg: &WakeConfig) -> anyhow::Result<Self> {
            if cfg.provider != "cpu" {
                warn!(
                    provider = %cfg.provider,
                    "Unsupported compute provider for keyword spotting, using cpu"
                );
            }

            let net = TransducerNet::load(
                "keyword-spotter",
                &cfg.tokens,
                &cfg.encoder,
                &cfg.decoder,
                &cfg.joiner,
                16_000,
                cfg.num_threads,
            )?;
            let keywords = load_keywords(&cfg.keywords_file)?;
            if keywords.is_empty() {
                anyhow::bail!(
                    "keywords file {} contains no keywords",
                    cfg.keywords_file.display()
                );
            }
            info!(keywords = ?keywords, "Keyword spotter ready");

            let stream = net.new_stream();
            Ok(Self {
                net,
                stream,
                keywords,
                threshold: cfg.keywords_threshold,
                boost: cfg.keywords_score,
                num_trailing_blanks: cfg.num_trailing_blanks,
                matched: None,
            })
        }

        /// Compare the decoded tail against the keyword list once the
        /// stream has settled on a hypothesis.
        fn check_match(&mut self) {
            if self.matched.is_some() {
                return;
            }
            if self.stream.trailing_blanks < self.num_trailing_blanks {
                return;
            }
            if self.net.mean_emit_prob(&self.stream) < self.threshold {
                return;
            }
            let text = self.net.text(&self.stream).to_lowercase();
            if text.is_empty() {
                return;
            }
            for kw in &self.keywords {
                if text.ends_with(kw.as_str()) {
                    self.matched = Some(kw.clone());
                    return;
                }
            }
        }
    }

    impl WakeWordEngine for ZipformerKws {
        fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) {
            self.net
                .accept_waveform(&mut self.stream, sample_rate, samples);
        }

        fn is_ready(&self) -> bool {
            self.net.is_ready(&self.stream)
        }

        fn decode_step(&mut self) -> anyhow::Result<()> {
            self.net
                .decode_step(&mut self.stream, self.boost)
                .context("keyword spotter decode")?;
            self.check_match();
            Ok(())
        }

        fn keyword(&self) -> Option<&str> {
            self.matched.as_deref()
        }

        fn reset(&mut self) {
            self.net.reset_stream(&mut self.stream);
            self.matched = None;
        }
    }

    /// Parse a keywords file: one keyword per line. Lines in the
    /// `t o k e n s @phrase` form use the display phrase after `@`;
    /// `#` comments and blank lines are skipped.
    fn load_keywords(path: &Path) -> anyhow::Result<Vec<String>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut keywords = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let phrase = match line.rfind('@') {
                Some(pos) => line[pos + 1..].trim(),
                None => line,
            };
            if !phrase.is_empty() {
                keywords.push(phrase.to_lowercase());
            }
        }
        Ok(keywords)
    }
}

// ── onnx disabled (stub) ────────────────────────────────────────
#[cfg(not(feature = "onnx"))]
mod inner {
    use super::WakeWordEngine;
    use crate::config::WakeConfig;

    pub struct ZipformerKws {
        _private: (),
    }

    impl ZipformerKws {
        pub fn new(_cfg: &WakeConfig) -> anyhow::Result<Self> {
            anyhow::bail!("Keyword spotting is not available (compile with --features onnx)")
        }
    }

    impl WakeWordEngine for ZipformerKws {
        fn accept_waveform(&mut self, _sample_rate: u32, _samples: &[f32]) {}

        fn is_ready(&self) -> bool {
            false
        }

        fn decode_step(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn keyword(&self) -> Option<&str> {
            None
        }

        fn reset(&mut self) {}
    }
}

pub use inner::ZipformerKws;
