// 5.0 registry.rs: capability-key authorization. ledger mutation is only allowed
// under a registered, unpaused module key. keys can be paused individually to
// halt one module without stopping the market.

use crate::errors::{StateError, ValidationError};
use crate::types::ModuleKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModuleEntry {
    paused: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleRegistry {
    entries: HashMap<ModuleKey, ModuleEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every core module registered and active.
    pub fn with_core_modules() -> Self {
        let mut registry = Self::new();
        for key in [
            ModuleKey::PositionBook,
            ModuleKey::StablePool,
            ModuleKey::OrderExecution,
            ModuleKey::LiquidationEngine,
        ] {
            registry.register(key);
        }
        registry
    }

    pub fn register(&mut self, key: ModuleKey) {
        self.entries.insert(key, ModuleEntry { paused: false });
    }

    pub fn remove(&mut self, key: ModuleKey) {
        self.entries.remove(&key);
    }

    pub fn pause(&mut self, key: ModuleKey) -> Result<(), ValidationError> {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.paused = true;
                Ok(())
            }
            None => Err(ValidationError::UnauthorizedModule { key }),
        }
    }

    pub fn unpause(&mut self, key: ModuleKey) -> Result<(), ValidationError> {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.paused = false;
                Ok(())
            }
            None => Err(ValidationError::UnauthorizedModule { key }),
        }
    }

    pub fn is_registered(&self, key: ModuleKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn is_paused(&self, key: ModuleKey) -> bool {
        self.entries.get(&key).map(|e| e.paused).unwrap_or(false)
    }

    /// Gate for every capability-checked mutator.
    pub fn ensure_active(&self, key: ModuleKey) -> Result<(), crate::errors::CoreError> {
        match self.entries.get(&key) {
            None => Err(ValidationError::UnauthorizedModule { key }.into()),
            Some(entry) if entry.paused => Err(StateError::ModulePaused { key }.into()),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoreError;

    #[test]
    fn unregistered_key_is_rejected() {
        let registry = ModuleRegistry::new();
        let err = registry.ensure_active(ModuleKey::PositionBook).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn paused_key_is_rejected_until_unpaused() {
        let mut registry = ModuleRegistry::with_core_modules();
        assert!(registry.ensure_active(ModuleKey::StablePool).is_ok());

        registry.pause(ModuleKey::StablePool).unwrap();
        let err = registry.ensure_active(ModuleKey::StablePool).unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::ModulePaused { .. })));

        registry.unpause(ModuleKey::StablePool).unwrap();
        assert!(registry.ensure_active(ModuleKey::StablePool).is_ok());
    }

    #[test]
    fn removed_key_loses_authorization() {
        let mut registry = ModuleRegistry::with_core_modules();
        registry.remove(ModuleKey::LiquidationEngine);
        assert!(!registry.is_registered(ModuleKey::LiquidationEngine));
        assert!(registry.ensure_active(ModuleKey::LiquidationEngine).is_err());
    }
}
