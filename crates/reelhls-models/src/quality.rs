//! Quality ladder configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};

/// Encoder bitrate as written on an ffmpeg command line (`"800k"`, `"5M"`),
/// together with its value in bits per second.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct Bitrate {
    raw: String,
    bits_per_second: u64,
}

impl Bitrate {
    /// Value in bits per second.
    pub fn bits_per_second(&self) -> u64 {
        self.bits_per_second
    }

    /// The ffmpeg argument form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Bitrate {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        let raw = s.trim();
        let (digits, multiplier) = match raw.chars().last() {
            Some('k') | Some('K') => (&raw[..raw.len() - 1], 1_000),
            Some('m') | Some('M') => (&raw[..raw.len() - 1], 1_000_000),
            _ => (raw, 1),
        };

        let value: u64 = digits
            .parse()
            .map_err(|_| ModelError::invalid_bitrate(s))?;
        let bits_per_second = value
            .checked_mul(multiplier)
            .filter(|bps| *bps > 0)
            .ok_or_else(|| ModelError::invalid_bitrate(s))?;

        Ok(Self {
            raw: raw.to_string(),
            bits_per_second,
        })
    }
}

impl TryFrom<String> for Bitrate {
    type Error = ModelError;

    fn try_from(value: String) -> ModelResult<Self> {
        value.parse()
    }
}

impl From<Bitrate> for String {
    fn from(value: Bitrate) -> Self {
        value.raw
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// One rung of the quality ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    /// Rung name, also used as the output directory (e.g. "720p")
    pub name: String,
    /// Output height in pixels
    pub max_height: u32,
    /// Target video bitrate
    pub video_bitrate: Bitrate,
    /// Target audio bitrate
    pub audio_bitrate: Bitrate,
}

impl QualityProfile {
    pub fn new(name: &str, max_height: u32, video_bitrate: &str, audio_bitrate: &str) -> ModelResult<Self> {
        Ok(Self {
            name: name.to_string(),
            max_height,
            video_bitrate: video_bitrate.parse()?,
            audio_bitrate: audio_bitrate.parse()?,
        })
    }

    /// Advertised bandwidth in bits per second (video + audio).
    pub fn bandwidth(&self) -> u64 {
        self.video_bitrate
            .bits_per_second()
            .saturating_add(self.audio_bitrate.bits_per_second())
    }
}

/// Ordered set of quality profiles every source is transcoded into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct QualityLadder(Vec<QualityProfile>);

impl QualityLadder {
    /// Build a ladder, rejecting empty ladders and unsafe or duplicate names.
    pub fn new(profiles: Vec<QualityProfile>) -> ModelResult<Self> {
        if profiles.is_empty() {
            return Err(ModelError::invalid_ladder("ladder has no profiles"));
        }

        let mut seen = HashSet::new();
        for profile in &profiles {
            let name_ok = !profile.name.is_empty()
                && profile
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !name_ok {
                return Err(ModelError::invalid_ladder(format!(
                    "profile name {:?} is not a valid path component",
                    profile.name
                )));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(ModelError::invalid_ladder(format!(
                    "duplicate profile {}",
                    profile.name
                )));
            }
            if profile.max_height == 0 {
                return Err(ModelError::invalid_ladder(format!(
                    "profile {} has zero height",
                    profile.name
                )));
            }
        }

        Ok(Self(profiles))
    }

    /// Parse a ladder from its JSON form (array of profiles).
    pub fn from_json(json: &str) -> ModelResult<Self> {
        let profiles: Vec<QualityProfile> = serde_json::from_str(json)
            .map_err(|e| ModelError::invalid_ladder(e.to_string()))?;
        Self::new(profiles)
    }

    pub fn profiles(&self) -> &[QualityProfile] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QualityProfile> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for QualityLadder {
    /// 360p / 480p / 720p / 1080p.
    fn default() -> Self {
        let rung = |name: &str, height: u32, video: u64, audio: u64| QualityProfile {
            name: name.to_string(),
            max_height: height,
            video_bitrate: Bitrate {
                raw: format!("{}k", video),
                bits_per_second: video * 1_000,
            },
            audio_bitrate: Bitrate {
                raw: format!("{}k", audio),
                bits_per_second: audio * 1_000,
            },
        };

        Self(vec![
            rung("360p", 360, 800, 96),
            rung("480p", 480, 1400, 128),
            rung("720p", 720, 2800, 128),
            rung("1080p", 1080, 5000, 192),
        ])
    }
}

impl<'a> IntoIterator for &'a QualityLadder {
    type Item = &'a QualityProfile;
    type IntoIter = std::slice::Iter<'a, QualityProfile>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
