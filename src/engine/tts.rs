//! VITS-style ONNX speech synthesizer.
//!
//! Text is mapped to model token ids through a lexicon (word level) with
//! a symbol-table fallback (character level), then synthesized in one
//! inference call. The model's output rate is whatever the export was
//! trained at; it is carried alongside the samples so playback never has
//! to guess.

use super::{SynthesisEngine, SynthesizedAudio};

// ── onnx enabled ────────────────────────────────────────────────
#[cfg(feature = "onnx")]
mod inner {
    use std::collections::HashMap;
    use std::path::Path;

    use anyhow::Context;
    use ort::session::Session;
    use tracing::{debug, info};

    use super::{SynthesisEngine, SynthesizedAudio};
    use crate::config::TtsConfig;

    /// Sampling noise defaults matching the usual VITS export.
    const NOISE_SCALE: f32 = 0.667;
    const NOISE_SCALE_W: f32 = 0.8;

    pub struct VitsTts {
        session: Session,
        symbols: HashMap<String, i64>,
        lexicon: HashMap<String, Vec<i64>>,
        sample_rate: u32,
    }

    impl VitsTts {
        pub fn new(cfg: &TtsConfig) -> anyhow::Result<Self> {
            if !cfg.model.exists() {
                anyhow::bail!("synthesis model not found: {}", cfg.model.display());
            }
            if !cfg.tokens.exists() {
                anyhow::bail!("synthesis tokens not found: {}", cfg.tokens.display());
            }

            let session = Session::builder()?
                .with_intra_threads(cfg.num_threads)?
                .commit_from_file(&cfg.model)
                .with_context(|| format!("loading {}", cfg.model.display()))?;

            let symbols = load_symbols(&cfg.tokens)?;
            let lexicon = match &cfg.lexicon {
                Some(path) => load_lexicon(path, &symbols)?,
                None => HashMap::new(),
            };

            info!(
                model = %cfg.model.display(),
                symbols = symbols.len(),
                lexicon = lexicon.len(),
                sample_rate = cfg.sample_rate,
                "Synthesis model loaded"
            );

            Ok(Self {
                session,
                symbols,
                lexicon,
                sample_rate: cfg.sample_rate,
            })
        }

        /// Map text to token ids: lexicon per word, symbol table per
        /// character as fallback. Characters outside the vocabulary are
        /// dropped (the speech player normalizes the worst offenders
        /// before we get here).
        fn tokenize(&self, text: &str) -> Vec<i64> {
            let mut ids = Vec::new();
            let space = self.symbols.get(" ").copied();
            for word in text.split_whitespace() {
                if !ids.is_empty() {
                    if let Some(sp) = space {
                        ids.push(sp);
                    }
                }
                let lower = word.to_lowercase();
                if let Some(entry) = self.lexicon.get(&lower) {
                    ids.extend_from_slice(entry);
                    continue;
                }
                for ch in lower.chars() {
                    if let Some(&id) = self.symbols.get(ch.to_string().as_str()) {
                        ids.push(id);
                    }
                }
            }
            ids
        }
    }

    impl SynthesisEngine for VitsTts {
        fn generate(
            &mut self,
            text: &str,
            speaker: i64,
            speed: f32,
        ) -> anyhow::Result<SynthesizedAudio> {
            let ids = self.tokenize(text);
            if ids.is_empty() {
                anyhow::bail!("no synthesizable tokens in input text");
            }

            debug!(chars = text.len(), tokens = ids.len(), "Synthesizing");

            let len = ids.len();
            let x = ort::value::Value::from_array(([1, len], ids)).context("x value")?;
            let x_length =
                ort::value::Value::from_array(([1], vec![len as i64])).context("x_length value")?;
            let noise_scale = ort::value::Value::from_array(([1], vec![NOISE_SCALE]))
                .context("noise_scale value")?;
            let length_scale =
                ort::value::Value::from_array(([1], vec![1.0f32 / speed.max(0.1)]))
                    .context("length_scale value")?;
            let noise_scale_w = ort::value::Value::from_array(([1], vec![NOISE_SCALE_W]))
                .context("noise_scale_w value")?;
            let sid =
                ort::value::Value::from_array(([1], vec![speaker])).context("sid value")?;

            let outputs = self
                .session
                .run(ort::inputs! {
                    "x" => x,
                    "x_length" => x_length,
                    "noise_scale" => noise_scale,
                    "length_scale" => length_scale,
                    "noise_scale_w" => noise_scale_w,
                    "sid" => sid
                })
                .context("synthesis inference")?;

            let samples = {
                let (_shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .context("extract audio")?;
                data.to_vec()
            };

            Ok(SynthesizedAudio {
                samples,
                sample_rate: self.sample_rate,
            })
        }
    }

    /// Parse a symbol table: one `<symbol> <id>` pair per line.
    fn load_symbols(path: &Path) -> anyhow::Result<HashMap<String, i64>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut symbols = HashMap::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.rsplitn(2, char::is_whitespace);
            let id_str = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("malformed symbols line {}", lineno + 1))?;
            let symbol = parts.next().unwrap_or(" ").to_string();
            let id: i64 = id_str
                .parse()
                .with_context(|| format!("bad symbol id on line {}", lineno + 1))?;
            symbols.insert(symbol, id);
        }
        if symbols.is_empty() {
            anyhow::bail!("symbol table {} is empty", path.display());
        }
        Ok(symbols)
    }

    /// Parse a lexicon: `word phone phone ...` per line, phones resolved
    /// through the symbol table. Unresolvable lines are skipped.
    fn load_lexicon(
        path: &Path,
        symbols: &HashMap<String, i64>,
    ) -> anyhow::Result<HashMap<String, Vec<i64>>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut lexicon = HashMap::new();
        for line in contents.lines() {
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let mut ids = Vec::new();
            let mut complete = true;
            for phone in parts {
                match symbols.get(phone) {
                    Some(&id) => ids.push(id),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete && !ids.is_empty() {
                lexicon.entry(word.to_lowercase()).or_insert(ids);
            }
        }
        Ok(lexicon)
    }
}

// ── onnx disabled (stub) ────────────────────────────────────────
#[cfg(not(feature = "onnx"))]
mod inner {
    use super::{SynthesisEngine, SynthesizedAudio};
    use crate::config::TtsConfig;

    pub struct VitsTts {
        _private: (),
    }

    impl VitsTts {
        pub fn new(_cfg: &TtsConfig) -> anyhow::Result<Self> {
            anyhow::bail!("Speech synthesis is not available (compile with --features onnx)")
        }
    }

    impl SynthesisEngine for VitsTts {
        fn generate(
            &mut self,
            _text: &str,
            _speaker: i64,
            _speed: f32,
        ) -> anyhow::Result<SynthesizedAudio> {
            anyhow::bail!("Speech synthesis is not available (compile with --features onnx)")
        }
    }
}

pub use inner::VitsTts;
