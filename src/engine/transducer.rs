//! Shared streaming-transducer plumbing for the ONNX keyword spotter and
//! recognizer.
//!
//! Both engines are encoder/decoder/joiner transducers decoded greedily:
//! the encoder turns an audio window into a sequence of acoustic frames,
//! the decoder summarizes the token history, and the joiner scores the
//! next token for each acoustic frame. Non-blank emissions update the
//! decoder state; blanks advance time only.
//!
//! Tensor shapes are resolved best-effort from the models at runtime:
//! encoder input is raw audio `[1, N]`, encoder output `[1, T, D]`,
//! decoder input the token context `[1, C]`, joiner inputs one acoustic
//! frame and the decoder output, joiner output the token logits.

use std::path::Path;

use anyhow::Context;
use ort::session::Session;
use tracing::info;

use crate::audio::resample_linear;

/// Audio per decode step, in seconds.
const CHUNK_SECS: f32 = 0.32;

/// Decoder token-history length.
const CONTEXT_SIZE: usize = 2;

/// The three transducer networks plus the token table.
pub(crate) struct TransducerNet {
    encoder: Session,
    decoder: Session,
    joiner: Session,
    tokens: Vec<String>,
    blank_id: i64,
    sample_rate: u32,
    chunk_samples: usize,
}

/// Mutable decoding state for one stream. Reset between utterances; the
/// sessions in [`TransducerNet`] are reused, never reloaded.
pub(crate) struct TransducerStream {
    samples: Vec<f32>,
    hyp: Vec<i64>,
    context: Vec<i64>,
    dec_out: Option<Vec<f32>>,
    /// Acoustic frames consumed this utterance.
    pub(crate) frames_decoded: u64,
    /// Acoustic frames since the last non-blank emission.
    pub(crate) trailing_blanks: u64,
    /// Seconds of audio represented by one acoustic frame.
    pub(crate) frame_shift_secs: f32,
    prob_sum: f32,
    emitted: u64,
}

impl TransducerNet {
    /// Load the encoder/decoder/joiner sessions and the token table.
    /// Missing model files are configuration errors.
    pub(crate) fn load(
        name: &str,
        tokens_path: &Path,
        encoder_path: &Path,
        decoder_path: &Path,
        joiner_path: &Path,
        sample_rate: u32,
        num_threads: usize,
    ) -> anyhow::Result<Self> {
        for (label, path) in [
            ("tokens", tokens_path),
            ("encoder", encoder_path),
            ("decoder", decoder_path),
            ("joiner", joiner_path),
        ] {
            if !path.exists() {
                anyhow::bail!("{name} {label} file not found: {}", path.display());
            }
        }

        let load = |path: &Path| -> anyhow::Result<Session> {
            Session::builder()?
                .with_intra_threads(num_threads)?
                .commit_from_file(path)
                .with_context(|| format!("loading {}", path.display()))
        };

        let encoder = load(encoder_path)?;
        let decoder = load(decoder_path)?;
        let joiner = load(joiner_path)?;
        let (tokens, blank_id) = load_tokens(tokens_path)?;

        info!(
            engine = name,
            tokens = tokens.len(),
            sample_rate,
            "Transducer model loaded"
        );

        let chunk_samples = (CHUNK_SECS * sample_rate as f32).round() as usize;
        Ok(Self {
            encoder,
            decoder,
            joiner,
            tokens,
            blank_id,
            sample_rate,
            chunk_samples,
        })
    }

    pub(crate) fn new_stream(&self) -> TransducerStream {
        TransducerStream {
            samples: Vec::new(),
            hyp: Vec::new(),
            context: vec![self.blank_id; CONTEXT_SIZE],
            dec_out: None,
            frames_decoded: 0,
            trailing_blanks: 0,
            frame_shift_secs: 0.04,
            prob_sum: 0.0,
            emitted: 0,
        }
    }

    pub(crate) fn accept_waveform(
        &self,
        stream: &mut TransducerStream,
        sample_rate: u32,
        samples: &[f32],
    ) {
        if sample_rate == self.sample_rate {
            stream.samples.extend_from_slice(samples);
        } else {
            stream
                .samples
                .extend(resample_linear(samples, sample_rate, self.sample_rate));
        }
    }

    pub(crate) fn is_ready(&self, stream: &TransducerStream) -> bool {
        stream.samples.len() >= self.chunk_samples
    }

    /// Decode one buffered audio window. `nonblank_boost` is added to
    /// every non-blank logit before the argmax (keyword boosting; the
    /// recognizer passes 0).
    pub(crate) fn decode_step(
        &mut self,
        stream: &mut TransducerStream,
        nonblank_boost: f32,
    ) -> anyhow::Result<()> {
        if stream.samples.len() < self.chunk_samples {
            return Ok(());
        }
        let chunk: Vec<f32> = stream.samples.drain(..self.chunk_samples).collect();

        let (enc, t, d) = {
            let x = ort::value::Value::from_array(([1, self.chunk_samples], chunk))
                .context("encoder input value")?;
            let outputs = self
                .encoder
                .run(ort::inputs!["x" => x])
                .context("encoder inference")?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .context("extract encoder output")?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            anyhow::ensure!(
                dims.len() == 3 && dims[1] > 0 && dims[2] > 0,
                "unexpected encoder output shape {:?}",
                dims
            );
            (data.to_vec(), dims[1], dims[2])
        };

        stream.frame_shift_secs =
            self.chunk_samples as f32 / self.sample_rate as f32 / t as f32;

        let mut dec_out = match stream.dec_out.take() {
            Some(v) => v,
            None => self.run_decoder(&stream.context)?,
        };

        for frame in enc.chunks_exact(d) {
            let logits = self.run_joiner(frame, &dec_out)?;

            let mut best_id = self.blank_id as usize;
            let mut best = f32::NEG_INFINITY;
            for (i, &logit) in logits.iter().enumerate() {
                let scored = if i as i64 == self.blank_id {
                    logit
                } else {
                    logit + nonblank_boost
                };
                if scored > best {
                    best = scored;
                    best_id = i;
                }
            }

            if best_id as i64 != self.blank_id {
                stream.hyp.push(best_id as i64);
                stream.context.remove(0);
                stream.context.push(best_id as i64);
                dec_out = self.run_decoder(&stream.context)?;
                stream.trailing_blanks = 0;
                stream.prob_sum += softmax_prob(&logits, best_id);
                stream.emitted += 1;
            } else {
                stream.trailing_blanks += 1;
            }
            stream.frames_decoded += 1;
        }

        stream.dec_out = Some(dec_out);
        Ok(())
    }

    fn run_decoder(&mut self, context: &[i64]) -> anyhow::Result<Vec<f32>> {
        let y = ort::value::Value::from_array(([1, context.len()], context.to_vec()))
            .context("decoder input value")?;
        let outputs = self
            .decoder
            .run(ort::inputs!["y" => y])
            .context("decoder inference")?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("extract decoder output")?;
        Ok(data.to_vec())
    }

    fn run_joiner(&mut self, enc_frame: &[f32], dec_out: &[f32]) -> anyhow::Result<Vec<f32>> {
        let enc = ort::value::Value::from_array(([1, enc_frame.len()], enc_frame.to_vec()))
            .context("joiner encoder value")?;
        let dec = ort::value::Value::from_array(([1, dec_out.len()], dec_out.to_vec()))
            .context("joiner decoder value")?;
        let outputs = self
            .joiner
            .run(ort::inputs!["encoder_out" => enc, "decoder_out" => dec])
            .context("joiner inference")?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("extract joiner logits")?;
        Ok(data.to_vec())
    }

    /// Decoded text so far, with sentencepiece word boundaries restored.
    pub(crate) fn text(&self, stream: &TransducerStream) -> String {
        let mut out = String::new();
        for &id in &stream.hyp {
            if let Some(tok) = self.tokens.get(id as usize) {
                out.push_str(&tok.replace('\u{2581}', " "));
            }
        }
        out.trim().to_string()
    }

    /// True once the stream has emitted at least one token this utterance.
    pub(crate) fn has_emitted(&self, stream: &TransducerStream) -> bool {
        stream.emitted > 0
    }

    /// Mean softmax probability of the emitted tokens, 0 when none.
    pub(crate) fn mean_emit_prob(&self, stream: &TransducerStream) -> f32 {
        if stream.emitted == 0 {
            0.0
        } else {
            stream.prob_sum / stream.emitted as f32
        }
    }

    pub(crate) fn reset_stream(&self, stream: &mut TransducerStream) {
        stream.samples.clear();
        stream.hyp.clear();
        stream.context = vec![self.blank_id; CONTEXT_SIZE];
        stream.dec_out = None;
        stream.frames_decoded = 0;
        stream.trailing_blanks = 0;
        stream.prob_sum = 0.0;
        stream.emitted = 0;
    }
}

/// Softmax probability of `index` within `logits`.
fn softmax_prob(logits: &[f32], index: usize) -> f32 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let denom: f32 = logits.iter().map(|&l| (l - max).exp()).sum();
    if denom == 0.0 {
        return 0.0;
    }
    (logits[index] - max).exp() / denom
}

/// Parse a `tokens.txt` table: one `<token> <id>` pair per line.
/// Returns the id-indexed table and the blank id.
fn load_tokens(path: &Path) -> anyhow::Result<(Vec<String>, i64)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut entries: Vec<(String, usize)> = Vec::new();
    let mut max_id = 0usize;
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.rsplitn(2, char::is_whitespace);
        let id_str = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("malformed tokens line {}", lineno + 1))?;
        let token = parts.next().unwrap_or(" ").to_string();
        let id: usize = id_str
            .parse()
            .with_context(|| format!("bad token id on line {}", lineno + 1))?;
        max_id = max_id.max(id);
        entries.push((token, id));
    }

    if entries.is_empty() {
        anyhow::bail!("token table {} is empty", path.display());
    }

    let mut tokens = vec![String::new(); max_id + 1];
    for (token, id) in entries {
        tokens[id] = token;
    }

    let blank_id = tokens
        .iter()
        .position(|t| t == "<blk>" || t == "<blank>" || t == "<eps>")
        .unwrap_or(0) as i64;

    Ok((tokens, blank_id))
}
