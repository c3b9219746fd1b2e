//! Wake-word detection and gating.
//!
//! The detector itself is a black box behind [`WakeWordDetector`]; the
//! [`WakeGate`] applies the pipeline's acceptance policy (sensitivity
//! threshold and cooldown) on top of whatever the detector reports.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::WakeConfig;
use crate::types::{AudioFrame, WakeEvent};

/// A keyword spotter fed one capture frame at a time.
pub trait WakeWordDetector: Send {
    /// Inspect a frame; return a firing when the keyword was heard.
    fn process_frame(&mut self, frame: &AudioFrame) -> Option<WakeEvent>;

    /// The keyword this detector listens for.
    fn keyword(&self) -> &str;

    /// Clear internal state (called when a session starts).
    fn reset(&mut self);
}

/// A test detector that fires at scripted frame sequence numbers.
pub struct ScriptedWakeDetector {
    keyword: String,
    confidence: f32,
    fire_at: HashSet<u64>,
}

impl ScriptedWakeDetector {
    pub fn at_sequences(sequences: impl IntoIterator<Item = u64>) -> Self {
        Self {
            keyword: "hey assistant".to_string(),
            confidence: 0.9,
            fire_at: sequences.into_iter().collect(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// A detector that never fires.
    pub fn never() -> Self {
        Self::at_sequences([])
    }
}

impl WakeWordDetector for ScriptedWakeDetector {
    fn process_frame(&mut self, frame: &AudioFrame) -> Option<WakeEvent> {
        if self.fire_at.contains(&frame.sequence) {
            Some(WakeEvent::new(self.keyword.clone(), self.confidence))
        } else {
            None
        }
    }

    fn keyword(&self) -> &str {
        &self.keyword
    }

    fn reset(&mut self) {}
}

/// A crude energy-based spotter: fires after `min_frames` consecutive frames
/// above the energy floor. Stands in for a real keyword model.
pub struct EnergyWakeDetector {
    keyword: String,
    energy_floor: f32,
    min_frames: u32,
    run: u32,
}

impl EnergyWakeDetector {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            energy_floor: 0.05,
            min_frames: 3,
            run: 0,
        }
    }

    pub fn with_energy_floor(mut self, floor: f32) -> Self {
        self.energy_floor = floor;
        self
    }

    pub fn with_min_frames(mut self, frames: u32) -> Self {
        self.min_frames = frames;
        self
    }
}

impl WakeWordDetector for EnergyWakeDetector {
    fn process_frame(&mut self, frame: &AudioFrame) -> Option<WakeEvent> {
        let energy = frame.rms_energy();
        if energy < self.energy_floor {
            self.run = 0;
            return None;
        }
        self.run += 1;
        if self.run < self.min_frames {
            return None;
        }
        self.run = 0;
        // Scale confidence with how far the energy clears the floor.
        let confidence = (energy / (self.energy_floor * 4.0)).clamp(0.0, 1.0);
        Some(WakeEvent::new(self.keyword.clone(), confidence))
    }

    fn keyword(&self) -> &str {
        &self.keyword
    }

    fn reset(&mut self) {
        self.run = 0;
    }
}

/// Acceptance policy on top of a detector: firings below the sensitivity
/// threshold are discarded, and accepted firings start a cooldown during
/// which further firings are suppressed.
pub struct WakeGate {
    detector: Box<dyn WakeWordDetector>,
    sensitivity: f32,
    cooldown: Duration,
    last_accepted: Option<Instant>,
}

impl WakeGate {
    pub fn new(detector: Box<dyn WakeWordDetector>, config: &WakeConfig) -> Self {
        Self {
            detector,
            sensitivity: config.sensitivity,
            cooldown: Duration::from_millis(config.cooldown_ms),
            last_accepted: None,
        }
    }

    /// Feed a frame; return an accepted wake event, if any.
    pub fn check(&mut self, frame: &AudioFrame) -> Option<WakeEvent> {
        let event = self.detector.process_frame(frame)?;
        if event.confidence < self.sensitivity {
            debug!(
                keyword = %event.keyword,
                confidence = event.confidence,
                sensitivity = self.sensitivity,
                "wake firing below sensitivity, discarded"
            );
            return None;
        }
        if let Some(last) = self.last_accepted
            && last.elapsed() < self.cooldown
        {
            debug!(keyword = %event.keyword, "wake firing suppressed by cooldown");
            return None;
        }
        self.last_accepted = Some(Instant::now());
        Some(event)
    }

    /// Note an acceptance that bypassed the gate (push-to-talk), so the
    /// cooldown still applies to subsequent detector firings.
    pub fn note_accepted(&mut self) {
        self.last_accepted = Some(Instant::now());
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    pub fn reset_detector(&mut self) {
        self.detector.reset();
    }
}
