// src/config.rs
//
// =============================================================================
// ESMRUN: COMPONENT CONFIGURATION (v 0.1 )
// =============================================================================
//
// The YAML description of a component: identity, where its file tables live,
// and a registry of named variants (resolutions) to choose from.
//
// Validated once at load time; an unknown variant never reaches the engine.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::{ComponentIdentity, DEFAULT_CATEGORIES};
use crate::error::{EngineError, Result};

fn default_kind() -> String {
    "generic".into()
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

/// A resolution or other configuration flavour of a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Exposed to file names as `@LRES@`.
    #[serde(default)]
    pub lateral_resolution: Option<String>,
    /// Exposed to file names as `@VRES@`.
    #[serde(default)]
    pub vertical_resolution: Option<String>,
    /// Further private tokens, keyed without the `@` delimiters.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

impl VariantConfig {
    pub fn interpolation_tokens(&self) -> Vec<(String, String)> {
        let mut tokens = Vec::new();
        if let Some(lres) = &self.lateral_resolution {
            tokens.push(("LRES".to_string(), lres.clone()));
        }
        if let Some(vres) = &self.vertical_resolution {
            tokens.push(("VRES".to_string(), vres.clone()));
        }
        tokens.extend(self.tokens.iter().map(|(k, v)| (k.clone(), v.clone())));
        tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    pub version: String,

    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,

    /// Where the `<name>_<version>_*_files.json` tables are read from.
    /// Relative paths are taken relative to the config file.
    #[serde(default)]
    pub table_dir: Option<PathBuf>,

    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Selected entry of `variants`, if any.
    #[serde(default)]
    pub variant: Option<String>,

    #[serde(default)]
    pub variants: BTreeMap<String, VariantConfig>,
}

impl ComponentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let mut cfg = Self::from_yaml_str(&text)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        cfg.table_dir = Some(match cfg.table_dir.take() {
            Some(dir) if dir.is_relative() => base.join(dir),
            Some(dir) => dir,
            None => base.to_path_buf(),
        });

        log::debug!("Loaded configuration for {} {}", cfg.name, cfg.version);
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(text)
            .map_err(|e| EngineError::Config(format!("failed to parse YAML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config("`name` must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(EngineError::Config("`version` must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.trim().is_empty() {
                return Err(EngineError::Config("empty category name".into()));
            }
            if !seen.insert(category.as_str()) {
                return Err(EngineError::Config(format!(
                    "category '{category}' declared twice"
                )));
            }
        }

        if let Some(variant) = &self.variant {
            if !self.variants.contains_key(variant) {
                let known: Vec<&str> = self.variants.keys().map(String::as_str).collect();
                return Err(EngineError::Config(format!(
                    "unknown variant '{variant}' for {}; known variants: {known:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Picks a variant (e.g. from the command line), re-validating.
    pub fn select_variant(mut self, variant: Option<&str>) -> Result<Self> {
        if let Some(v) = variant {
            self.variant = Some(v.to_string());
            self.validate()?;
        }
        Ok(self)
    }

    pub fn active_variant(&self) -> Option<(&str, &VariantConfig)> {
        let name = self.variant.as_deref()?;
        self.variants.get_key_value(name).map(|(k, v)| (k.as_str(), v))
    }

    pub fn identity(&self) -> ComponentIdentity {
        ComponentIdentity::new(&self.name, &self.version, &self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHAM: &str = r#"
name: echam
version: 6.3.04p1
type: atmosphere
variant: T63
variants:
  T31:
    lateral_resolution: T31
    vertical_resolution: L19
  T63:
    lateral_resolution: T63
    vertical_resolution: L47
    tokens:
      OCERES: GR15
"#;

    #[test]
    fn parses_registry() {
        let cfg = ComponentConfig::from_yaml_str(ECHAM).unwrap();
        assert_eq!(cfg.identity().kind, "atmosphere");
        assert_eq!(cfg.categories.len(), DEFAULT_CATEGORIES.len());

        let (name, variant) = cfg.active_variant().unwrap();
        assert_eq!(name, "T63");
        assert_eq!(
            variant.interpolation_tokens(),
            vec![
                ("LRES".to_string(), "T63".to_string()),
                ("VRES".to_string(), "L47".to_string()),
                ("OCERES".to_string(), "GR15".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_variant_rejected_at_load() {
        let text = ECHAM.replace("variant: T63", "variant: T255");
        let err = ComponentConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let cfg = ComponentConfig::from_yaml_str(ECHAM).unwrap();
        assert!(cfg.clone().select_variant(Some("T31")).is_ok());
        assert!(cfg.select_variant(Some("T127")).is_err());
    }

    #[test]
    fn minimal_config_and_duplicates() {
        let cfg = ComponentConfig::from_yaml_str("name: fesom\nversion: '2.0'\n").unwrap();
        assert_eq!(cfg.kind, "generic");
        assert!(cfg.active_variant().is_none());

        let dup = "name: x\nversion: '1'\ncategories: [input, input]\n";
        assert!(ComponentConfig::from_yaml_str(dup).is_err());

        let empty = "name: ''\nversion: '1'\n";
        assert!(ComponentConfig::from_yaml_str(empty).is_err());
    }
}
