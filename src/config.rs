//! Engine configuration.
//!
//! Configuration is plain serde data so hosts can ship it as JSON next to
//! the binary.  Every struct fills missing fields from its `Default`, and
//! [`EngineConfig::validate`] rejects malformed values up front with
//! [`EngineError::InvalidShape`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::field::{Field, GOLDILOCKS_GENERATOR, GOLDILOCKS_MODULUS};

/// One size class recognised by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeClassConfig {
    /// Capacity of every buffer in the class, in field elements.
    pub len: usize,
    /// Maximum number of pooled buffers the class may own.
    pub ceiling: usize,
    /// Idle buffers allocated at construction time.
    #[serde(default)]
    pub prewarm: usize,
}

impl SizeClassConfig {
    /// Class without pre-warmed buffers.
    pub const fn new(len: usize, ceiling: usize) -> Self {
        Self {
            len,
            ceiling,
            prewarm: 0,
        }
    }

    /// Sets the number of buffers allocated up front.
    pub const fn with_prewarm(mut self, prewarm: usize) -> Self {
        self.prewarm = prewarm;
        self
    }
}

/// Size classes and per-class ceilings for the pool manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Configured classes; sorted by capacity during validation.
    pub classes: Vec<SizeClassConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            classes: vec![
                SizeClassConfig::new(1 << 10, 100).with_prewarm(20),
                SizeClassConfig::new(1 << 16, 50).with_prewarm(10),
                SizeClassConfig::new(1 << 20, 10),
            ],
        }
    }
}

impl PoolConfig {
    /// Builds a config from parallel `classes` / `ceilings` lists.
    pub fn from_classes(classes: &[usize], ceilings: &[usize]) -> Result<Self> {
        if classes.len() != ceilings.len() {
            return Err(EngineError::shape(format!(
                "{} size classes but {} ceilings",
                classes.len(),
                ceilings.len()
            )));
        }
        let config = Self {
            classes: classes
                .iter()
                .zip(ceilings)
                .map(|(&len, &ceiling)| SizeClassConfig::new(len, ceiling))
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns the classes sorted by capacity.
    pub fn sorted_classes(&self) -> Vec<SizeClassConfig> {
        let mut classes = self.classes.clone();
        classes.sort_by_key(|c| c.len);
        classes
    }

    /// Checks that the class list is usable by the pool manager.
    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(EngineError::shape("pool needs at least one size class"));
        }
        let classes = self.sorted_classes();
        for class in &classes {
            if class.len == 0 {
                return Err(EngineError::shape("size class capacity must be positive"));
            }
            if class.ceiling == 0 {
                return Err(EngineError::shape(format!(
                    "size class {} has a zero ceiling",
                    class.len
                )));
            }
            if class.prewarm > class.ceiling {
                return Err(EngineError::shape(format!(
                    "size class {} pre-warms {} buffers above its ceiling {}",
                    class.len, class.prewarm, class.ceiling
                )));
            }
        }
        if classes.windows(2).any(|w| w[0].len == w[1].len) {
            return Err(EngineError::shape("duplicate size class capacity"));
        }
        Ok(())
    }
}

/// Modulus and generator of the arithmetic domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Odd prime modulus.
    pub modulus: u64,
    /// Generator of the multiplicative group.
    pub generator: u64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            modulus: GOLDILOCKS_MODULUS,
            generator: GOLDILOCKS_GENERATOR,
        }
    }
}

impl FieldConfig {
    /// Builds the field described by this config.
    pub fn field(&self) -> Result<Field> {
        Field::try_new(self.modulus, self.generator)
    }
}

/// Element budget for one table chunk (64K elements, 512 KiB).
pub const DEFAULT_CHUNK_BUDGET: usize = 1 << 16;
/// Element budget for one cache-resident butterfly block (4K elements, 32 KiB).
pub const DEFAULT_CACHE_BUDGET: usize = 1 << 12;
/// Transform length from which butterfly ranges are spread over rayon.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 14;

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pool size classes.
    pub pools: PoolConfig,
    /// Field modulus and generator.
    pub field: FieldConfig,
    /// Maximum elements per table chunk.
    pub chunk_budget: usize,
    /// Elements per cache block in the interpolator.
    pub cache_budget: usize,
    /// Minimum transform length for parallel butterflies.
    pub parallel_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pools: PoolConfig::default(),
            field: FieldConfig::default(),
            chunk_budget: DEFAULT_CHUNK_BUDGET,
            cache_budget: DEFAULT_CACHE_BUDGET,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Default engine settings around the given pool layout.
    pub fn with_pools(pools: PoolConfig) -> Self {
        Self {
            pools,
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input)
            .map_err(|err| EngineError::shape(format!("malformed engine config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Renders the config as pretty JSON.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Checks every section of the config.
    pub fn validate(&self) -> Result<()> {
        self.pools.validate()?;
        self.field.field()?;
        if self.chunk_budget == 0 {
            return Err(EngineError::shape("chunk_budget must be positive"));
        }
        if self.cache_budget < 2 || !self.cache_budget.is_power_of_two() {
            return Err(EngineError::shape(format!(
                "cache_budget {} must be a power of two >= 2",
                self.cache_budget
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = EngineConfig::from_json_str(
            r#"{"pools":{"classes":[{"len":64,"ceiling":4},{"len":1024,"ceiling":4}]}}"#,
        )
        .unwrap();
        assert_eq!(config.pools.classes.len(), 2);
        assert_eq!(config.pools.classes[0].prewarm, 0);
        assert_eq!(config.chunk_budget, DEFAULT_CHUNK_BUDGET);
        assert_eq!(config.field, FieldConfig::default());
    }

    #[test]
    fn json_roundtrip_through_pretty_printer() {
        let config = EngineConfig::default();
        let parsed = EngineConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_malformed_pools() {
        assert!(PoolConfig::from_classes(&[64, 128], &[1]).is_err());
        assert!(PoolConfig::from_classes(&[], &[]).is_err());
        assert!(PoolConfig::from_classes(&[64, 64], &[1, 1]).is_err());
        assert!(PoolConfig::from_classes(&[0], &[1]).is_err());
        assert!(PoolConfig::from_classes(&[64], &[0]).is_err());
        let over = PoolConfig {
            classes: vec![SizeClassConfig::new(64, 2).with_prewarm(3)],
        };
        assert!(over.validate().is_err());
    }

    #[test]
    fn rejects_bad_budgets_and_garbage() {
        let mut config = EngineConfig::default();
        config.cache_budget = 1000;
        assert!(config.validate().is_err());
        config.cache_budget = DEFAULT_CACHE_BUDGET;
        config.chunk_budget = 0;
        assert!(config.validate().is_err());
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(EngineError::InvalidShape(_))
        ));
    }

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("table_forge_{}_{name}.json", std::process::id()))
    }

    #[test]
    fn loads_config_from_file() {
        let path = scratch_path("engine");
        let mut config = EngineConfig::with_pools(PoolConfig::from_classes(&[64], &[3]).unwrap());
        config.chunk_budget = 512;
        fs::write(&path, config.to_json_string().unwrap()).unwrap();
        let loaded = EngineConfig::from_path(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(loaded.unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);
        assert!(matches!(
            EngineConfig::from_path(&path),
            Err(EngineError::Io(_))
        ));
    }
}
