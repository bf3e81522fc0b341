//! Layered key lookup: the first scope holding a non-null value wins.

use crate::config::ConfigError;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

#[derive(Debug, Clone, Default)]
pub struct ConfigScopes {
    layers: Vec<(String, Mapping)>,
}

impl ConfigScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scope with lower precedence than every scope added before it.
    pub fn with_scope(mut self, name: impl Into<String>, values: Mapping) -> Self {
        self.layers.push((name.into(), values));
        self
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.layers.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.layers
            .iter()
            .filter_map(|(_, values)| values.get(key))
            .find(|v| !v.is_null())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.raw(key).ok_or_else(|| ConfigError::KeyNotFound {
            key: key.to_string(),
            scopes: self.scope_names(),
        })?;
        serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::WrongType {
            key: key.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn earlier_scopes_take_precedence() {
        let scopes = ConfigScopes::new()
            .with_scope("phase warmup", mapping("loss_function: FocalLoss"))
            .with_scope("run", mapping("loss_function: BCELoss\nbatch_size: 4"));
        assert_eq!(scopes.get::<String>("loss_function").unwrap(), "FocalLoss");
        assert_eq!(scopes.get::<usize>("batch_size").unwrap(), 4);
    }

    #[test]
    fn null_values_fall_through() {
        let scopes = ConfigScopes::new()
            .with_scope("phase", mapping("loss_function: ~"))
            .with_scope("run", mapping("loss_function: DiceLoss"));
        assert_eq!(scopes.get::<String>("loss_function").unwrap(), "DiceLoss");
    }

    #[test]
    fn missing_everywhere_names_the_scopes() {
        let scopes = ConfigScopes::new()
            .with_scope("phase p1", Mapping::new())
            .with_scope("run", mapping("batch_size: 4"));
        let err = scopes.get::<String>("loss_function").unwrap_err();
        match &err {
            ConfigError::KeyNotFound { key, scopes } => {
                assert_eq!(key, "loss_function");
                assert_eq!(scopes, &vec!["phase p1".to_string(), "run".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("in any scope"));
    }
}
