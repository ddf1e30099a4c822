use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Audio container/codec family as far as upgrade decisions care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Flac,
    Alac,
    Wav,
    Aiff,
    Opus,
    Aac,
    Vorbis,
    Mp3,
    #[serde(other)]
    Unknown,
}

impl AudioFormat {
    pub fn is_lossless(self) -> bool {
        matches!(
            self,
            AudioFormat::Flac | AudioFormat::Alac | AudioFormat::Wav | AudioFormat::Aiff
        )
    }

    /// Rank among lossy codecs; higher is better. `None` for lossless.
    pub fn lossy_tier(self) -> Option<u8> {
        match self {
            AudioFormat::Unknown => Some(0),
            AudioFormat::Mp3 => Some(1),
            AudioFormat::Aac | AudioFormat::Vorbis => Some(2),
            AudioFormat::Opus => Some(3),
            _ => None,
        }
    }

    /// Guess the format from a file name's extension.
    pub fn from_path(path: &str) -> Self {
        path.rsplit_once('.')
            .map(|(_, ext)| ext.parse().unwrap_or(AudioFormat::Unknown))
            .unwrap_or(AudioFormat::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Flac => "flac",
            AudioFormat::Alac => "alac",
            AudioFormat::Wav => "wav",
            AudioFormat::Aiff => "aiff",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
            AudioFormat::Vorbis => "vorbis",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Unknown => "unknown",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "flac" => AudioFormat::Flac,
            "alac" => AudioFormat::Alac,
            "wav" | "wave" => AudioFormat::Wav,
            "aif" | "aiff" => AudioFormat::Aiff,
            "opus" => AudioFormat::Opus,
            "aac" | "m4a" | "mp4" => AudioFormat::Aac,
            "ogg" | "oga" | "vorbis" => AudioFormat::Vorbis,
            "mp3" => AudioFormat::Mp3,
            _ => AudioFormat::Unknown,
        })
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
