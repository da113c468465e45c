//! Binding configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::types::{Precision, VarLocation};
use crate::Result;

/// Configuration shared by the engine and the binding layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Precision substituted for `"scalar"`
    pub precision: Precision,
    /// Location of variables without an override
    pub default_var_location: VarLocation,
    /// Per-variable overrides keyed by `"group.var"`
    pub var_locations: HashMap<String, VarLocation>,
    /// Value written into unused ragged index slots
    pub ragged_padding: u32,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Float,
            default_var_location: VarLocation::HOST_DEVICE,
            var_locations: HashMap::new(),
            ragged_padding: u32::MAX,
        }
    }
}

impl BindingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Location of `var` in `group`, falling back to the default
    pub fn var_location(&self, group: &str, var: &str) -> VarLocation {
        self.var_locations
            .get(&format!("{}.{}", group, var))
            .copied()
            .unwrap_or(self.default_var_location)
    }

    pub fn set_var_location(&mut self, group: &str, var: &str, location: VarLocation) {
        self.var_locations
            .insert(format!("{}.{}", group, var), location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BindingConfig::default();
        assert_eq!(config.precision, Precision::Float);
        assert_eq!(config.var_location("Exc", "V"), VarLocation::HOST_DEVICE);
        assert_eq!(config.ragged_padding, u32::MAX);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "precision": "double",
            "var_locations": { "Exc.V": "device" }
        }"#;
        let config = BindingConfig::from_json_str(json).unwrap();
        assert_eq!(config.precision, Precision::Double);
        assert_eq!(config.var_location("Exc", "V"), VarLocation::DEVICE);
        assert_eq!(config.var_location("Exc", "U"), VarLocation::HOST_DEVICE);
    }

    #[test]
    fn test_bad_json() {
        let result = BindingConfig::from_json_str(r#"{ "precision": "half" }"#);
        assert!(matches!(result, Err(crate::BindError::Config(_))));
    }
}
