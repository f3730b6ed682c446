use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "video",
            Self::Audio => "audio",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
    Jpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Mpeg4Aac,
    LinearPcm,
    AppleLossless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub average_bit_rate: u32,
}

impl VideoSettings {
    pub const DEFAULT_BIT_RATE: u32 = 2_300_000;

    pub const fn new(codec: VideoCodec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            average_bit_rate: Self::DEFAULT_BIT_RATE,
        }
    }

    pub const fn with_bit_rate(mut self, average_bit_rate: u32) -> Self {
        self.average_bit_rate = average_bit_rate;
        self
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self::new(VideoCodec::H264, 480, 640)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub format: AudioFormat,
    pub channels: u8,
    pub sample_rate: u32,
    pub bit_rate: u32,
}

impl AudioSettings {
    pub const DEFAULT_BIT_RATE: u32 = 64_000;

    pub const fn new(format: AudioFormat, channels: u8, sample_rate: u32) -> Self {
        Self {
            format,
            channels,
            sample_rate,
            bit_rate: Self::DEFAULT_BIT_RATE,
        }
    }

    pub const fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = bit_rate;
        self
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::new(AudioFormat::Mpeg4Aac, 1, 44_100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSettings {
    Video(VideoSettings),
    Audio(AudioSettings),
}

impl InputSettings {
    pub const fn kind(&self) -> TrackKind {
        match self {
            Self::Video(_) => TrackKind::Video,
            Self::Audio(_) => TrackKind::Audio,
        }
    }

    /// Reason the settings can never describe a usable track, if any.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            Self::Video(v) if v.width == 0 || v.height == 0 => Err("zero video dimension"),
            Self::Audio(a) if a.channels == 0 => Err("zero audio channels"),
            Self::Audio(a) if a.sample_rate == 0 => Err("zero sample rate"),
            _ => Ok(()),
        }
    }
}

impl From<VideoSettings> for InputSettings {
    fn from(value: VideoSettings) -> Self {
        Self::Video(value)
    }
}

impl From<AudioSettings> for InputSettings {
    fn from(value: AudioSettings) -> Self {
        Self::Audio(value)
    }
}
