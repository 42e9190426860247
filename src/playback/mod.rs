//! Speaking answers: text cleanup, synthesis tiers, media playback and
//! lip-sync

pub mod media;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod sanitize;
pub mod synthesizer;
pub mod viseme;
pub mod wav;

pub use media::{DeviceSpeech, MediaBackend, MediaElement, MediaSource, NoMedia, SilentDevice, SpeechBackend};
#[cfg(feature = "audio-io")]
pub use output::SpeakerOutput;
pub use sanitize::sanitize_for_speech;
pub use synthesizer::{PlaybackMode, PlaybackSource, PlaybackState, Spoken, Synthesizer};
pub use viseme::{LipFrame, LipSync, Phoneme, Viseme};
pub use wav::{amplitude_envelope, AmplitudeEnvelope};
