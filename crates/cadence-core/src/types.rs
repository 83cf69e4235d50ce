//! Common types for Cadence
//!
//! Sample type, identifiers shared between the control and render sides,
//! and the small numeric helpers used by the mix path (volume mapping,
//! output clamping, note pitch).

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default sample rate used when no configuration is supplied
pub const SAMPLE_RATE: u32 = 44100;

/// Default render buffer size in frames
pub const BUFFER_SIZE: usize = 512;

/// Default amount of output channels (stereo)
pub const OUTPUT_CHANNELS: usize = 2;

/// Maximum amount of oscillators a synth instrument can drive
pub const MAX_OSCILLATORS: usize = 8;

/// Audio sample type (32-bit float, normalized to -1.0..=1.0)
pub type Sample = f32;

/// Frames are counted in samples per channel
pub type SamplePosition = usize;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

id_type!(
    /// Identifies an instrument (and therefore its channel) in the registry
    InstrumentId
);
id_type!(
    /// Identifies an event within the engine, unique across instruments
    EventId
);
id_type!(
    /// Identifies a processing chain (channel, group, or master)
    ChainId
);
id_type!(
    /// Identifies a processor instance
    ProcessorId
);
id_type!(
    /// Identifies a channel group
    GroupId
);

/// Chain id reserved for the master bus
pub const MASTER_CHAIN: ChainId = ChainId(0);

/// Chain id reserved for the device input channel
pub const INPUT_CHAIN: ChainId = ChainId(1);

static NEXT_CHAIN_ID: AtomicU32 = AtomicU32::new(2);

/// Allocate a chain id for a channel or group chain
pub fn next_chain_id() -> ChainId {
    ChainId(NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed))
}

/// Convert a linear (UI) volume into the logarithmic scale used for mixing
#[inline]
pub fn to_log(linear: f32) -> f32 {
    let v = linear.clamp(0.0, 1.0);
    v * v
}

/// Convert a logarithmically scaled volume back to its linear (UI) value
#[inline]
pub fn to_linear(log: f32) -> f32 {
    log.max(0.0).sqrt()
}

/// Hard clamp applied to every sample handed to the driver
#[inline]
pub fn cap_sample_safe(sample: Sample) -> Sample {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}

/// Flush values small enough to turn into denormals to zero
#[inline]
pub fn flush_denormal(value: f32) -> f32 {
    if value.abs() < 1.0e-15 || !value.is_finite() {
        0.0
    } else {
        value
    }
}

/// Note names within one octave, starting at C
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Frequency of a note name ("C", "F#", "Bb", ...) in the given octave
///
/// Octave 4 holds A at 440 Hz. Returns `None` for names that are not a
/// valid note.
pub fn note_frequency(note: &str, octave: i32) -> Option<f64> {
    let mut chars = note.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let accidental: String = chars.collect();

    let base = NOTE_NAMES
        .iter()
        .position(|n| n.len() == 1 && n.starts_with(letter))? as i32;

    let offset = match accidental.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return None,
    };

    // semitones relative to A4
    let semitone = base + offset - 9 + (octave - 4) * 12;
    Some(440.0 * 2f64.powf(semitone as f64 / 12.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_mapping_roundtrip() {
        for v in [0.0f32, 0.1, 0.5, 0.75, 1.0] {
            assert!((to_linear(to_log(v)) - v).abs() < 1e-6);
        }
        assert_eq!(to_log(0.5), 0.25);
    }

    #[test]
    fn test_cap_sample_safe() {
        assert_eq!(cap_sample_safe(1.5), 1.0);
        assert_eq!(cap_sample_safe(-3.0), -1.0);
        assert_eq!(cap_sample_safe(0.25), 0.25);
        assert_eq!(cap_sample_safe(f32::NAN), 0.0);
    }

    #[test]
    fn test_note_frequency() {
        assert!((note_frequency("A", 4).unwrap() - 440.0).abs() < 1e-9);
        assert!((note_frequency("a", 5).unwrap() - 880.0).abs() < 1e-9);
        assert!((note_frequency("C", 4).unwrap() - 261.6256).abs() < 1e-3);
        let sharp = note_frequency("C#", 3).unwrap();
        let flat = note_frequency("Db", 3).unwrap();
        assert!((sharp - flat).abs() < 1e-9);
        assert!(note_frequency("H", 4).is_none());
        assert!(note_frequency("Cx", 4).is_none());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(EventId(7).to_string(), "EventId#7");
    }
}
