use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::forecast::{
    DriftForecaster, Forecaster, HoltForecaster, LinearArForecaster, NaiveForecaster,
};

fn builtins() -> [Arc<dyn Forecaster>; 4] {
    [
        Arc::new(NaiveForecaster),
        Arc::new(DriftForecaster),
        Arc::new(HoltForecaster),
        Arc::new(LinearArForecaster),
    ]
}

/// Named set of forecasters; the pipeline trains every entry.
#[derive(Clone, Default)]
pub struct ForecasterRegistry {
    forecasters: BTreeMap<String, Arc<dyn Forecaster>>,
}

impl ForecasterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in forecasters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for forecaster in builtins() {
            if let Err(error) = registry.register(forecaster) {
                debug_assert!(false, "built-in forecaster rejected: {error}");
                tracing::error!(%error, "built-in forecaster rejected");
            }
        }
        registry
    }

    pub fn register(&mut self, forecaster: Arc<dyn Forecaster>) -> Result<(), RegistryError> {
        let name = forecaster.name().trim().to_owned();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.forecasters.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        self.forecasters.insert(name, forecaster);
        Ok(())
    }

    pub fn with(mut self, forecaster: Arc<dyn Forecaster>) -> Result<Self, RegistryError> {
        self.register(forecaster)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Forecaster>> {
        self.forecasters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.forecasters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.forecasters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Forecaster>)> {
        self.forecasters
            .iter()
            .map(|(name, forecaster)| (name.as_str(), forecaster))
    }

    pub fn len(&self) -> usize {
        self.forecasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasters.is_empty()
    }
}

impl std::fmt::Debug for ForecasterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.forecasters.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = ForecasterRegistry::with_builtins();

        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["drift", "holt", "linear_ar", "naive"]
        );
        assert!(registry.get("holt").is_some());
        assert!(registry.get("tft").is_none());
    }

    #[test]
    fn every_builtin_is_registered_under_its_own_name() {
        let registry = ForecasterRegistry::with_builtins();

        assert_eq!(registry.len(), builtins().len());
        for forecaster in builtins() {
            let registered = registry.get(forecaster.name()).expect("registered");
            assert_eq!(registered.name(), forecaster.name());
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ForecasterRegistry::new();
        registry
            .register(Arc::new(NaiveForecaster))
            .expect("first registration");

        let error = registry
            .register(Arc::new(NaiveForecaster))
            .expect_err("duplicate");

        assert_eq!(
            error,
            RegistryError::Duplicate {
                name: String::from("naive")
            }
        );
        assert_eq!(registry.len(), 1);
    }
}
