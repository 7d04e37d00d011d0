//! Inference engine boundaries.
//!
//! The keyword spotter, streaming recognizer and synthesizer are consumed
//! as opaque engines behind one trait each, so the pipeline logic can be
//! exercised against scripted fakes. The production implementations run
//! ONNX models via `ort` and live behind the `onnx` feature; with the
//! feature disabled, construction fails with a configuration error.

pub mod asr;
pub mod kws;
pub mod tts;

#[cfg(feature = "onnx")]
mod transducer;

/// Keyword spotting stream: feed audio, drive decode, poll for a match.
///
/// One value of this trait is one engine plus its single decoding stream;
/// `reset` rewinds the stream for the next detection without reloading
/// the model.
pub trait WakeWordEngine: Send {
    /// Append captured audio to the stream.
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]);

    /// True while the engine has buffered enough audio for another
    /// decode step. Callers must drain this after every accept.
    fn is_ready(&self) -> bool;

    fn decode_step(&mut self) -> anyhow::Result<()>;

    /// The matched keyword, if the stream has produced one since the
    /// last reset.
    fn keyword(&self) -> Option<&str>;

    fn reset(&mut self);
}

/// Streaming speech recognition with built-in endpoint detection.
pub trait AsrEngine: Send {
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]);

    fn is_ready(&self) -> bool;

    fn decode_step(&mut self) -> anyhow::Result<()>;

    /// True when the trailing-silence / utterance-length rules say the
    /// current utterance is complete.
    fn is_endpoint(&self) -> bool;

    /// Best-guess transcript of the in-progress utterance. Transient
    /// until an endpoint is finalized.
    fn result(&self) -> String;

    fn reset(&mut self);
}

/// A synthesized utterance: mono f32 PCM plus the model's output rate.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Offline speech synthesis.
pub trait SynthesisEngine: Send {
    fn generate(&mut self, text: &str, speaker: i64, speed: f32)
        -> anyhow::Result<SynthesizedAudio>;
}
