use serde::{Deserialize, Serialize};
use std::fmt;

/// Container written by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Mp4,
    M4v,
    M4a,
}

impl FileType {
    /// Conventional extension, including the leading dot.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => ".mp4",
            Self::M4v => ".m4v",
            Self::M4a => ".m4a",
        }
    }

    pub const fn supports_video(&self) -> bool {
        !matches!(self, Self::M4a)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mp4 => "MP4",
            Self::M4v => "M4V",
            Self::M4a => "M4A",
        })
    }
}
