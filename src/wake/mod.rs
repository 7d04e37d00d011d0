//! Wake-word gate.
//!
//! Consumes audio frames only while dormant, runs them through the
//! keyword spotter, and latches awake on a match. Once awake the gate
//! signals exactly once per arming cycle; further frames are ignored
//! until `arm` is called again.

use tracing::{debug, info, warn};

use crate::audio::AudioFrame;
use crate::engine::WakeWordEngine;

/// Upper bound on the decode drain loop per frame, in case the engine
/// keeps reporting ready.
const MAX_DECODE_STEPS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Dormant,
    Awake,
}

pub struct WakeGate {
    engine: Box<dyn WakeWordEngine>,
    state: GateState,
    keyword: Option<String>,
}

impl WakeGate {
    /// The gate starts dormant; call [`WakeGate::arm`] before feeding.
    pub fn new(engine: Box<dyn WakeWordEngine>) -> Self {
        Self {
            engine,
            state: GateState::Dormant,
            keyword: None,
        }
    }

    /// Reset the detector and return to dormant, ready for the next
    /// detection cycle.
    pub fn arm(&mut self) {
        self.engine.reset();
        self.state = GateState::Dormant;
        self.keyword = None;
        debug!("Wake gate armed");
    }

    /// Feed one frame while dormant. A frame arriving while awake is a
    /// caller error; it is ignored rather than crashing the capture loop.
    pub fn feed(&mut self, frame: &AudioFrame) -> anyhow::Result<()> {
        if self.state == GateState::Awake {
            debug!("Wake gate fed while awake, ignoring frame");
            return Ok(());
        }

        self.engine
            .accept_waveform(frame.sample_rate, &frame.samples);

        let mut steps = 0;
        while self.engine.is_ready() {
            self.engine.decode_step()?;
            if self.engine.keyword().is_some() {
                break;
            }
            steps += 1;
            if steps >= MAX_DECODE_STEPS {
                warn!("Keyword decode loop hit step cap, deferring to next frame");
                break;
            }
        }

        if let Some(kw) = self.engine.keyword() {
            self.keyword = Some(kw.to_string());
            self.state = GateState::Awake;
            info!(keyword = %kw, "Wake word detected");
        }

        Ok(())
    }

    /// Never blocks.
    pub fn is_awake(&self) -> bool {
        self.state == GateState::Awake
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// The keyword that woke the gate this cycle, for diagnostics.
    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Scripted keyword spotter: reports a match after a fixed number of
    /// fed frames, counting every accept so tests can assert the gate
    /// stopped forwarding.
    struct ScriptedWake {
        match_after: usize,
        fed: usize,
        ready: bool,
        matched: Option<String>,
        accepts: Arc<AtomicUsize>,
    }

    impl ScriptedWake {
        fn new(match_after: usize, accepts: Arc<AtomicUsize>) -> Self {
            Self {
                match_after,
                fed: 0,
                ready: false,
                matched: None,
                accepts,
            }
        }
    }

    impl WakeWordEngine for ScriptedWake {
        fn accept_waveform(&mut self, _sample_rate: u32, _samples: &[f32]) {
            self.fed += 1;
            self.ready = true;
            self.accepts.fetch_add(1, Ordering::SeqCst);
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn decode_step(&mut self) -> anyhow::Result<()> {
            self.ready = false;
            if self.matched.is_none() && self.fed > self.match_after {
                self.matched = Some("hello".to_string());
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

    fn frame() -> AudioFrame {
        AudioFrame::new(vec![0.0; 1600], 16_000)
    }

    #[test]
    fn wakes_once_after_matching_frame() {
        let accepts = Arc::new(AtomicUsize::new(0));
        let engine = ScriptedWake::new(5, accepts.clone());
        let mut gate = WakeGate::new(Box::new(engine));
        gate.arm();

        for _ in 0..5 {
            gate.feed(&frame()).unwrap();
            assert!(!gate.is_awake());
        }

        gate.feed(&frame()).unwrap();
        assert!(gate.is_awake());
        assert_eq!(gate.state(), GateState::Awake);
        assert_eq!(gate.keyword(), Some("hello"));
        assert_eq!(accepts.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn frames_while_awake_are_ignored() {
        let accepts = Arc::new(AtomicUsize::new(0));
        let engine = ScriptedWake::new(0, accepts.clone());
        let mut gate = WakeGate::new(Box::new(engine));
        gate.arm();

        gate.feed(&frame()).unwrap();
        assert!(gate.is_awake());

        // Further feeds must not reach the engine until re-armed.
        gate.feed(&frame()).unwrap();
        gate.feed(&frame()).unwrap();
        assert_eq!(accepts.load(Ordering::SeqCst), 1);
        assert!(gate.is_awake());
    }

    #[test]
    fn rearm_enables_a_new_detection_cycle() {
        let accepts = Arc::new(AtomicUsize::new(0));
        let engine = ScriptedWake::new(0, accepts.clone());
        let mut gate = WakeGate::new(Box::new(engine));
        gate.arm();

        gate.feed(&frame()).unwrap();
        assert!(gate.is_awake());

        gate.arm();
        assert!(!gate.is_awake());
        assert_eq!(gate.keyword(), None);

        gate.feed(&frame()).unwrap();
        assert!(gate.is_awake());
    }
}
