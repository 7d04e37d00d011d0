//! Startup configuration.
//!
//! One immutable config struct loaded once at startup and passed by
//! reference into each engine constructor — no shared mutable globals.
//! Read from a JSON file given on the command line, via
//! `VOICELOOP_CONFIG`, or at the default location under the user config
//! dir. An unreadable file falls back to defaults with a warning;
//! missing model files surface later as fatal errors when the engines
//! are constructed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub wake: WakeConfig,
    pub asr: AsrConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` uses the system default.
    pub input_device: Option<String>,
    /// Capture frame duration in milliseconds.
    pub frame_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            frame_ms: crate::audio::DEFAULT_FRAME_MS,
        }
    }
}

/// Keyword spotter model set and detection knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub tokens: PathBuf,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub joiner: PathBuf,
    pub keywords_file: PathBuf,
    /// Boost added to non-blank logits while spotting.
    pub keywords_score: f32,
    /// Minimum mean token probability for a match.
    pub keywords_threshold: f32,
    /// Acoustic frames of silence required after a candidate match.
    pub num_trailing_blanks: u64,
    pub num_threads: usize,
    pub provider: String,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            tokens: PathBuf::from("models/kws/tokens.txt"),
            encoder: PathBuf::from("models/kws/encoder.onnx"),
            decoder: PathBuf::from("models/kws/decoder.onnx"),
            joiner: PathBuf::from("models/kws/joiner.onnx"),
            keywords_file: PathBuf::from("models/kws/keywords.txt"),
            keywords_score: 1.0,
            keywords_threshold: 0.25,
            num_trailing_blanks: 1,
            num_threads: 1,
            provider: "cpu".to_string(),
        }
    }
}

/// Streaming recognizer model set and endpoint rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    pub tokens: PathBuf,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub joiner: PathBuf,
    pub sample_rate: u32,
    pub feature_dim: u32,
    /// Endpoint rule: trailing silence once something was decoded.
    pub trailing_silence_after_speech: f32,
    /// Endpoint rule: trailing silence when nothing was decoded at all.
    pub trailing_silence_no_speech: f32,
    /// Endpoint rule: utterance-length cap in seconds.
    pub min_utterance_length: f32,
    pub num_threads: usize,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            tokens: PathBuf::from("models/asr/tokens.txt"),
            encoder: PathBuf::from("models/asr/encoder.onnx"),
            decoder: PathBuf::from("models/asr/decoder.onnx"),
            joiner: PathBuf::from("models/asr/joiner.onnx"),
            sample_rate: 16_000,
            feature_dim: 80,
            trailing_silence_after_speech: 1.2,
            trailing_silence_no_speech: 2.4,
            min_utterance_length: 300.0,
            num_threads: 1,
        }
    }
}

/// Text-generation backend endpoint. Credentials are deployment
/// configuration; there are no workable defaults for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: "qwen-plus".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Synthesizer model set and voice parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub model: PathBuf,
    pub tokens: PathBuf,
    pub lexicon: Option<PathBuf>,
    /// Output rate of the model export.
    pub sample_rate: u32,
    pub speaker_id: i64,
    pub speed: f32,
    pub num_threads: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/tts/model.onnx"),
            tokens: PathBuf::from("models/tts/tokens.txt"),
            lexicon: None,
            sample_rate: 22_050,
            speaker_id: 0,
            speed: 1.0,
            num_threads: 1,
        }
    }
}

/// What the orchestrator does once a turn's playback completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Re-arm the wake gate and wait for the next wake word.
    Wake,
    /// Resume transcription directly, skipping the wake word.
    Listen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Give up listening after this many consecutive empty endpoints;
    /// 0 disables the give-up.
    pub max_empty_endpoints: u32,
    pub resume: ResumeMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_empty_endpoints: 0,
            resume: ResumeMode::Wake,
        }
    }
}

/// Default config file location under the user config dir.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voiceloop")
        .join("config.json")
}

/// Load configuration: explicit path, then `VOICELOOP_CONFIG`, then the
/// default location. Falls back to defaults when nothing is readable.
pub fn load(path: Option<&Path>) -> Config {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var_os("VOICELOOP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path),
    };
    read_json_file(&path).unwrap_or_default()
}

/// Read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
