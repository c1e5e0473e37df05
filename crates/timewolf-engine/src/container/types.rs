//! General purpose container types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Container, Metadata};

/// A file on the local filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl File {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl Container for File {
    const CONTAINER_TYPE: &'static str = "file";

    fn metadata(&self) -> Option<&Metadata> {
        Some(&self.metadata)
    }
}

/// A directory on the local filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Directory {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
        }
    }
}

impl Container for Directory {
    const CONTAINER_TYPE: &'static str = "directory";
}

/// A host to collect from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub hostname: String,
    pub platform: String,
}

impl Host {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            platform: "unknown".to_string(),
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

impl Container for Host {
    const CONTAINER_TYPE: &'static str = "host";
}

/// Text format of a [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    #[default]
    Plaintext,
    Markdown,
}

/// An analysis report produced by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub module_name: String,
    pub text: String,
    #[serde(default)]
    pub text_format: TextFormat,
}

impl Report {
    pub fn new(module_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            text: text.into(),
            text_format: TextFormat::Plaintext,
        }
    }

    pub fn markdown(mut self) -> Self {
        self.text_format = TextFormat::Markdown;
        self
    }
}

impl Container for Report {
    const CONTAINER_TYPE: &'static str = "report";
}
