//! Subtitle rendering from transcribed segments

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::segment::Segment;

/// Supported subtitle output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
}

/// One subtitle cue: a numbered, timed block of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    /// 1-based cue number.
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// An ordered list of cues built from transcription segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub cues: Vec<SubtitleCue>,
}

impl SubtitleTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a track from segments, skipping any with blank text.
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> Self {
        let mut track = Self::new();
        for segment in segments {
            track.add(segment.start, segment.end, segment.text.trim());
        }
        track
    }

    /// Append a cue, numbering it after the existing ones. Blank text is
    /// ignored.
    pub fn add(&mut self, start: Duration, end: Duration, text: &str) {
        if text.is_empty() {
            return;
        }
        self.cues.push(SubtitleCue {
            index: self.cues.len() + 1,
            start,
            end,
            text: text.to_string(),
        });
    }

    pub fn render(&self, format: SubtitleFormat) -> String {
        match format {
            SubtitleFormat::Srt => self.render_srt(),
            SubtitleFormat::Vtt => self.render_vtt(),
        }
    }

    /// SubRip: numbered blocks with comma-millisecond timestamps.
    pub fn render_srt(&self) -> String {
        let mut out = String::new();
        for cue in &self.cues {
            if cue.index > 1 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}", cue.index);
            let _ = writeln!(
                out,
                "{} --> {}",
                format_srt_time(cue.start),
                format_srt_time(cue.end)
            );
            let _ = writeln!(out, "{}", cue.text);
        }
        out
    }

    /// WebVTT: header plus unnumbered blocks with dot-millisecond
    /// timestamps.
    pub fn render_vtt(&self) -> String {
        let mut out = String::from("WEBVTT\n");
        for cue in &self.cues {
            out.push('\n');
            let _ = writeln!(
                out,
                "{} --> {}",
                format_vtt_time(cue.start),
                format_vtt_time(cue.end)
            );
            let _ = writeln!(out, "{}", cue.text);
        }
        out
    }
}

/// `HH:MM:SS,mmm` as SubRip wants it.
pub fn format_srt_time(at: Duration) -> String {
    let (hours, minutes, seconds, millis) = split_timestamp(at);
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// `HH:MM:SS.mmm` as WebVTT wants it.
pub fn format_vtt_time(at: Duration) -> String {
    let (hours, minutes, seconds, millis) = split_timestamp(at);
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

fn split_timestamp(at: Duration) -> (u128, u128, u128, u128) {
    let total = at.as_millis();
    (
        total / 3_600_000,
        (total % 3_600_000) / 60_000,
        (total % 60_000) / 1000,
        total % 1000,
    )
}
