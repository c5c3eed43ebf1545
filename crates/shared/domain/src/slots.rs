use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named position reserved for one feature's control inside a per-element container.
///
/// The visual order is fixed at build time by [`Slot::ORDER`], so independently
/// developed features never need to know about each other to avoid overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Rewind,
    PlaybackSpeed,
    Loop,
    Download,
    Share,
}

impl Slot {
    /// Left-to-right rendering order.
    pub const ORDER: [Self; 5] =
        [Self::Rewind, Self::PlaybackSpeed, Self::Loop, Self::Download, Self::Share];

    /// CSS `order` value of this slot.
    pub fn order(self) -> i32 {
        let position = Self::ORDER.iter().position(|s| *s == self).unwrap_or(Self::ORDER.len());
        // Spaced by ten.
        i32::try_from(position).map_or(i32::MAX, |p| (p + 1) * 10)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rewind => "rewind",
            Self::PlaybackSpeed => "playback_speed",
            Self::Loop => "loop",
            Self::Download => "download",
            Self::Share => "share",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown slot '{s}'"))
    }
}
