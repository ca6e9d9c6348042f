//! Plugin configuration
//!
//! Parsed from the protoc parameter string, e.g.
//! `protoc --plain_out=plain_suffix=Flat,enable_crf=true,json_jx=true:./gen`.

use std::str::FromStr;

use plain_runtime::JsonStyle;

use crate::GeneratorError;

/// Suffix appended to every generated message name unless overridden
pub const DEFAULT_SUFFIX: &str = "Plain";

/// Settings threaded through IR construction and emission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Suffix for Plain message names
    pub plain_suffix: String,
    /// Merge colliding flattened fields through a CRF instead of failing
    pub enable_crf: bool,
    /// JSON layout for Plain messages
    pub json_style: JsonStyle,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plain_suffix: DEFAULT_SUFFIX.to_string(),
            enable_crf: false,
            json_style: JsonStyle::Protojson,
        }
    }
}

impl PluginConfig {
    /// Enable or disable collision resolution fields
    pub fn with_crf(mut self, enable: bool) -> Self {
        self.enable_crf = enable;
        self
    }

    /// Override the Plain suffix
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.plain_suffix = suffix.into();
        self
    }
}

fn parse_bool(key: &str, value: Option<&str>) -> Result<bool, GeneratorError> {
    match value.map(str::trim) {
        None | Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(GeneratorError::Config(format!(
            "{} expects a boolean, got {:?}",
            key, other
        ))),
    }
}

impl FromStr for PluginConfig {
    type Err = GeneratorError;

    fn from_str(param: &str) -> Result<Self, Self::Err> {
        let mut config = PluginConfig::default();

        for part in param.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value)),
                None => (part, None),
            };

            match key {
                "plain_suffix" => {
                    let suffix = value.map(str::trim).unwrap_or_default();
                    if suffix.is_empty() {
                        return Err(GeneratorError::Config(
                            "plain_suffix must not be empty".to_string(),
                        ));
                    }
                    config.plain_suffix = suffix.to_string();
                }
                "enable_crf" => config.enable_crf = parse_bool(key, value)?,
                "json_jx" => {
                    config.json_style = if parse_bool(key, value)? {
                        JsonStyle::Jx
                    } else {
                        JsonStyle::Protojson
                    };
                }
                _ => {
                    return Err(GeneratorError::Config(format!("unknown key {:?}", key)));
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: PluginConfig = "".parse().unwrap();
        assert_eq!(config, PluginConfig::default());
        assert_eq!(config.plain_suffix, "Plain");
        assert!(!config.enable_crf);
        assert_eq!(config.json_style, JsonStyle::Protojson);
    }

    #[test]
    fn test_all_keys() {
        let config: PluginConfig = "plain_suffix=Flat, enable_crf=true,json_jx".parse().unwrap();
        assert_eq!(config.plain_suffix, "Flat");
        assert!(config.enable_crf);
        assert_eq!(config.json_style, JsonStyle::Jx);
    }

    #[test]
    fn test_rejects_unknown_key() {
        assert!(matches!(
            "mode=strict".parse::<PluginConfig>(),
            Err(GeneratorError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_bad_bool_and_empty_suffix() {
        assert!("enable_crf=yes".parse::<PluginConfig>().is_err());
        assert!("plain_suffix=".parse::<PluginConfig>().is_err());
    }
}
