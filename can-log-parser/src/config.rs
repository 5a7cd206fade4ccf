//! Parser configuration types
//!
//! A [`ParserConfig`] holds everything needed to build a parser: the error
//! policy, the line pattern and the spec sources by type. It can be built in
//! code with the builder methods or loaded from a TOML file:
//!
//! ```toml
//! error_policy = "warn"
//! template = "candump"
//!
//! [spec_files]
//! j1939 = "specs/j1939.json"
//! ```
//!
//! Spec file paths are resolved relative to the configuration file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::line_pattern::LineTemplate;
use crate::policy::ErrorPolicy;
use crate::protocol::SpecType;
use crate::types::ConstructionError;

/// Configuration for the parser library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// How content problems are handled (default: warn)
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Regular expression with `timestamp`, `id` and `data` named captures
    #[serde(default = "default_line_pattern")]
    pub line_pattern: String,

    /// Spec source text by spec type
    #[serde(default)]
    pub specs: HashMap<SpecType, String>,
}

fn default_line_pattern() -> String {
    LineTemplate::Candump.pattern().to_string()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            line_pattern: default_line_pattern(),
            specs: HashMap::new(),
        }
    }
}

impl ParserConfig {
    /// Create a new parser configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the error policy
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Builder method: set a custom line pattern
    pub fn with_line_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.line_pattern = pattern.into();
        self
    }

    /// Builder method: use a built-in line format
    pub fn with_template(mut self, template: LineTemplate) -> Self {
        self.line_pattern = template.pattern().to_string();
        self
    }

    /// Builder method: add the spec source text for a spec type
    pub fn with_spec(mut self, spec_type: SpecType, source: impl Into<String>) -> Self {
        self.specs.insert(spec_type, source.into());
        self
    }

    /// Builder method: add a spec source by its textual type tag
    pub fn with_spec_tag(self, tag: &str, source: impl Into<String>) -> Result<Self, ConstructionError> {
        let spec_type: SpecType = tag.parse()?;
        Ok(self.with_spec(spec_type, source))
    }

    /// Parse a TOML configuration; spec file paths are taken as given
    pub fn from_toml_str(text: &str) -> Result<Self, ConstructionError> {
        Self::from_toml_in(text, Path::new(""))
    }

    fn from_toml_in(text: &str, base_dir: &Path) -> Result<Self, ConstructionError> {
        let file: ConfigFile = toml::from_str(text)
            .map_err(|e| ConstructionError::Config(format!("failed to parse TOML: {}", e)))?;

        let mut config = Self::new().with_error_policy(file.error_policy);
        match (file.template, file.line_pattern) {
            (Some(_), Some(_)) => {
                return Err(ConstructionError::Config(
                    "set either 'template' or 'line_pattern', not both".to_string(),
                ))
            }
            (Some(template), None) => config = config.with_template(template),
            (None, Some(pattern)) => config = config.with_line_pattern(pattern),
            (None, None) => {}
        }

        for (tag, path) in file.spec_files {
            let spec_type: SpecType = tag.parse()?;
            let path = base_dir.join(path);
            let bytes = fs::read(&path).map_err(|e| {
                ConstructionError::Config(format!(
                    "failed to read spec file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            // DBC files are often Latin-1
            let source = String::from_utf8(bytes).unwrap_or_else(|e| {
                log::warn!("Spec file {} is not UTF-8, reading it as Latin-1", path.display());
                e.into_bytes().iter().map(|&b| b as char).collect()
            });
            log::debug!("Loaded {} spec from {}", spec_type, path.display());
            config = config.with_spec(spec_type, source);
        }

        Ok(config)
    }
}

/// On-disk layout of a configuration file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    error_policy: ErrorPolicy,
    #[serde(default)]
    template: Option<LineTemplate>,
    #[serde(default)]
    line_pattern: Option<String>,
    #[serde(default)]
    spec_files: HashMap<String, PathBuf>,
}

/// Load configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<ParserConfig, ConstructionError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        ConstructionError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    ParserConfig::from_toml_in(&content, base_dir)
}
