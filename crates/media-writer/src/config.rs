use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::FileType;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Where and how a session writes its file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WriterConfig {
    pub output_dir: PathBuf,
    pub file_type: FileType,
    /// Replaces the container's conventional extension, leading dot included.
    pub file_ext: Option<String>,
    pub expects_media_data_in_real_time: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_type: FileType::default(),
            file_ext: None,
            expects_media_data_in_real_time: true,
        }
    }
}

impl WriterConfig {
    pub fn new(file_type: FileType) -> Self {
        Self {
            file_type,
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_file_ext(mut self, file_ext: impl Into<String>) -> Self {
        self.file_ext = Some(file_ext.into());
        self
    }

    pub fn with_real_time(mut self, expects_media_data_in_real_time: bool) -> Self {
        self.expects_media_data_in_real_time = expects_media_data_in_real_time;
        self
    }

    pub fn extension(&self) -> &str {
        self.file_ext
            .as_deref()
            .unwrap_or(self.file_type.extension())
    }

    /// `<seconds>.<micros><ext>` inside the output directory.
    pub fn output_path_at(&self, now: DateTime<Utc>) -> PathBuf {
        let file_name = format!(
            "{}.{:06}{}",
            now.timestamp(),
            now.timestamp_subsec_micros(),
            self.extension()
        );

        self.output_dir.join(file_name)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_path_at(Utc::now())
    }
}

fn default_output_dir() -> PathBuf {
    dirs::document_dir().unwrap_or_else(std::env::temp_dir)
}
