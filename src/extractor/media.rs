// SPDX-License-Identifier: MIT

//! Audio and video metadata extraction.
//!
//! Audio uses in-process taggers (id3, symphonia). Video shells out
//! to ffprobe; when ffprobe is absent the excerpt stays empty.

use id3::TagLike;
use std::path::Path;
use std::process::Command;

use super::ExtractStrategy;
use crate::{ArquivistaError, Result};

/// Strategy for audio files: duration, bitrate, container tags.
pub struct AudioStrategy;

impl AudioStrategy {
    pub fn new() -> Self {
        Self
    }

    /// ID3 tags for MP3
    fn extract_mp3_tags(path: &Path) -> Option<String> {
        let tag = id3::Tag::read_from_path(path).ok()?;

        let mut text = String::new();
        if let Some(title) = tag.title() {
            text.push_str(&format!("Title: {title}\n"));
        }
        if let Some(artist) = tag.artist() {
            text.push_str(&format!("Artist: {artist}\n"));
        }
        if let Some(album) = tag.album() {
            text.push_str(&format!("Album: {album}\n"));
        }
        if let Some(year) = tag.year() {
            text.push_str(&format!("Year: {year}\n"));
        }
        if let Some(genre) = tag.genre() {
            text.push_str(&format!("Genre: {genre}\n"));
        }

        (!text.is_empty()).then_some(text)
    }

    /// Generic probe via symphonia: duration plus standard tags.
    fn extract_generic(path: &Path) -> Result<String> {
        use symphonia::core::formats::FormatOptions;
        use symphonia::core::io::MediaSourceStream;
        use symphonia::core::meta::{MetadataOptions, StandardTagKey};
        use symphonia::core::probe::Hint;

        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| ArquivistaError::Extraction(format!("unsupported audio: {e}")))?;

        let mut text = String::new();

        if let Some(track) = probed.format.default_track() {
            if let (Some(n_frames), Some(sample_rate)) = (
                track.codec_params.n_frames,
                track.codec_params.sample_rate,
            ) {
                let duration = n_frames as f64 / sample_rate as f64;
                text.push_str(&format!("Duration: {duration:.0}s\n"));
                if duration > 0.0 {
                    let kbps = (size as f64 * 8.0 / duration / 1000.0).round();
                    text.push_str(&format!("Bitrate: {kbps}kbps\n"));
                }
            }
        }

        if let Some(meta) = probed.metadata.get() {
            if let Some(rev) = meta.current() {
                for tag in rev.tags() {
                    let label = match tag.std_key {
                        Some(StandardTagKey::TrackTitle) => "Title",
                        Some(StandardTagKey::Artist) => "Artist",
                        Some(StandardTagKey::Album) => "Album",
                        Some(StandardTagKey::Genre) => "Genre",
                        Some(StandardTagKey::Date) => "Date",
                        _ => continue,
                    };
                    text.push_str(&format!("{label}: {}\n", tag.value));
                }
            }
        }

        if text.is_empty() {
            return Err(ArquivistaError::Extraction(
                "no audio metadata".to_string(),
            ));
        }
        Ok(text)
    }
}

impl Default for AudioStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for AudioStrategy {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["mp3", "wav", "flac", "ogg", "m4a", "aac", "wma", "opus", "aiff"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        if path.extension().and_then(|e| e.to_str()) == Some("mp3") {
            if let Some(tags) = Self::extract_mp3_tags(path) {
                return Ok(tags);
            }
        }
        Self::extract_generic(path)
    }
}

/// Strategy for video files: resolution, codec, duration.
pub struct VideoStrategy;

impl VideoStrategy {
    pub fn new() -> Self {
        Self
    }

    fn ffprobe_json(path: &Path) -> Result<serde_json::Value> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .map_err(|e| ArquivistaError::Extraction(format!("ffprobe unavailable: {e}")))?;

        if !output.status.success() {
            return Err(ArquivistaError::Extraction(format!(
                "ffprobe failed with status {}",
                output.status
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ArquivistaError::Extraction(format!("bad ffprobe output: {e}")))
    }
}

impl Default for VideoStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for VideoStrategy {
    fn name(&self) -> &'static str {
        "video"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["mp4", "mkv", "webm", "avi", "mov", "wmv", "flv", "m4v"]
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let json = Self::ffprobe_json(path)?;

        let mut text = String::new();

        let video_stream = json
            .get("streams")
            .and_then(|s| s.as_array())
            .and_then(|streams| {
                streams
                    .iter()
                    .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"))
            });

        if let Some(stream) = video_stream {
            if let (Some(w), Some(h)) = (
                stream.get("width").and_then(|v| v.as_u64()),
                stream.get("height").and_then(|v| v.as_u64()),
            ) {
                text.push_str(&format!("Resolution: {w}x{h}\n"));
            }
            if let Some(codec) = stream.get("codec_name").and_then(|c| c.as_str()) {
                text.push_str(&format!("Codec: {codec}\n"));
            }
        }

        if let Some(format) = json.get("format") {
            if let Some(duration) = format
                .get("duration")
                .and_then(|d| d.as_str())
                .and_then(|d| d.parse::<f64>().ok())
            {
                text.push_str(&format!("Duration: {duration:.0}s\n"));
            }
            if let Some(title) = format
                .get("tags")
                .and_then(|t| t.get("title"))
                .and_then(|t| t.as_str())
            {
                text.push_str(&format!("Title: {title}\n"));
            }
        }

        if text.is_empty() {
            return Err(ArquivistaError::Extraction(
                "no video metadata".to_string(),
            ));
        }
        Ok(text)
    }
}
