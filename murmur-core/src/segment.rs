//! Transcribed segment records

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One transcribed span of audio, as reported by an inference pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Transcribed text, trimmed of surrounding whitespace.
    pub text: String,

    /// Start of the span within the audio.
    pub start: Duration,

    /// End of the span within the audio.
    pub end: Duration,

    /// Lowest token probability in the span. Zero unless probability
    /// tracking was enabled.
    pub min_probability: f32,

    /// Highest token probability in the span. Zero unless probability
    /// tracking was enabled.
    pub max_probability: f32,

    /// Mean token probability of the span. Zero unless probability tracking
    /// was enabled.
    pub probability: f32,

    /// Language detected for the pass, e.g. "en".
    pub language: String,

    /// Whether the speaker changes after this segment. Only meaningful when
    /// diarization was enabled with a tinydiarize model.
    pub speaker_turn: bool,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} --> {}] {}",
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.text
        )
    }
}

/// `HH:MM:SS.cc` with centisecond precision, the way segment boundaries are
/// reported by the engine.
fn format_timestamp(at: Duration) -> String {
    let total = at.as_millis();
    let hours = total / 3_600_000;
    let minutes = (total % 3_600_000) / 60_000;
    let seconds = (total % 60_000) / 1000;
    let centis = (total % 1000) / 10;
    format!("{:02}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, start_ms: u64, end_ms: u64) -> Segment {
        Segment {
            text: text.to_string(),
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(end_ms),
            min_probability: 0.0,
            max_probability: 0.0,
            probability: 0.0,
            language: "en".to_string(),
            speaker_turn: false,
        }
    }

    #[test]
    fn display_uses_centisecond_timestamps() {
        let s = segment("hello world", 1_500, 3_620);
        assert_eq!(s.to_string(), "[00:00:01.50 --> 00:00:03.62] hello world");
    }

    #[test]
    fn display_rolls_over_into_hours() {
        let s = segment("late", 3_600_000 + 61_000, 3_600_000 + 62_000);
        assert_eq!(s.to_string(), "[01:01:01.00 --> 01:01:02.00] late");
    }

    #[test]
    fn serializes_to_json_and_back() {
        let s = segment("round trip", 0, 1000);
        let json = serde_json::to_string(&s).unwrap();
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
