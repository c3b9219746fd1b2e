//! Audio front-end: capture sources, playback sinks, WAV conversion, wake
//! word gating, and voice activity detection.

pub mod codec;
pub mod io;
pub mod vad;
pub mod wake;

pub use io::{AudioFrontEnd, AudioSink, AudioSource, CollectingSink, NullSink, ScriptedAudioSource};
pub use vad::{VadEvent, VoiceActivityDetector, ends_with_continuation};
pub use wake::{EnergyWakeDetector, ScriptedWakeDetector, WakeGate, WakeWordDetector};
