//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `RpConfig` struct, which holds the connection and budget settings,
//! and a `load_config` function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use awful_rp::config::{RpConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: RpConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{error::Error, fs};

use tracing::*;

use crate::instruct::InstructSlug;

/// Represents the application's configuration.
///
/// Missing keys take the values of [`RpConfig::default`], so a file only needs
/// the settings it changes.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RpConfig {
    /// Base URL of the completion service; requests go to `{base}/text`.
    pub service_base_url: String,

    /// The name of the model to be used for generating responses.
    pub model: String,

    /// Delimiter family the model was trained with.
    pub instruct_template: InstructSlug,

    /// Language of the prompt instructions (`en`, `es`).
    pub language: String,

    /// Context size of the model, prompt plus generation.
    pub truncation_length: usize,

    /// Tokens reserved for the generated text.
    pub max_new_tokens: usize,

    /// Upper bound for the history search.
    pub max_memory: usize,

    /// Sent as the `Identifier` header.
    pub identifier: Option<String>,

    /// Forces the `<think>` block on or off; unset follows the template family.
    pub reasoning: Option<bool>,
}

impl Default for RpConfig {
    fn default() -> Self {
        Self {
            service_base_url: "http://localhost:8080".to_string(),
            model: "default".to_string(),
            instruct_template: InstructSlug::Chatml,
            language: "en".to_string(),
            truncation_length: 4096,
            max_new_tokens: 200,
            max_memory: 1000,
            identifier: None,
            reasoning: None,
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Returns
///
/// - `Ok(RpConfig)`: The loaded configuration.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
pub fn load_config(file: &str) -> Result<RpConfig, Box<dyn Error>> {
    debug!("Loading config: {}", file);
    let content = fs::read_to_string(file)?;
    let config: RpConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
service_base_url: "http://example.com"
model: "nemo-12b"
instruct_template: mistral
language: es
truncation_length: 8192
max_new_tokens: 250
max_memory: 500
identifier: "session-7"
reasoning: false
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.service_base_url, "http://example.com");
        assert_eq!(config.model, "nemo-12b");
        assert_eq!(config.instruct_template, InstructSlug::Mistral);
        assert_eq!(config.language, "es");
        assert_eq!(config.truncation_length, 8192);
        assert_eq!(config.max_new_tokens, 250);
        assert_eq!(config.max_memory, 500);
        assert_eq!(config.identifier.as_deref(), Some("session-7"));
        assert_eq!(config.reasoning, Some(false));
    }

    #[test]
    fn test_load_config_fills_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "model: llama-3-8b").unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model, "llama-3-8b");
        assert_eq!(config.truncation_length, 4096);
        assert_eq!(config.instruct_template, InstructSlug::Chatml);
        assert_eq!(config.reasoning, None);
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(config.is_err());
    }

    #[test]
    fn test_unknown_instruct_template_is_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "instruct_template: pygmalion").unwrap();
        assert!(load_config(temp_file.path().to_str().unwrap()).is_err());
    }
}
