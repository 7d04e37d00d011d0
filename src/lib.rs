//! voiceloop — half-duplex wake-word voice assistant core.
//!
//! Microphone audio flows through a wake-word gate into a streaming
//! recognizer; finalized utterances go to a chat backend and the reply
//! is synthesized and played back before capture resumes. The binary in
//! `main.rs` wires the production engines into the orchestrator.

pub mod audio;
pub mod config;
pub mod engine;
pub mod llm;
pub mod orchestrate;
pub mod speak;
pub mod transcribe;
pub mod wake;
