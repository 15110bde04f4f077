//! Engine facade and process-wide pool initialisation.
//!
//! Most callers build an [`Engine`] per workload with [`Engine::new`].  Hosts
//! that want one pool shared by every engine in the process call
//! [`init_memory_pools`] once at startup and then use
//! [`Engine::from_global`].

use std::error::Error as StdError;
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::config::{EngineConfig, PoolConfig};
use crate::error::{EngineError, Result};
use crate::field::Field;
use crate::interpolate::Interpolator;
use crate::polynomial::Polynomial;
use crate::pool::PoolManager;
use crate::report::{self, MemorySnapshot};
use crate::table::{GenerationOrder, Table, TableBuilder};

static GLOBAL_POOLS: OnceLock<PoolManager> = OnceLock::new();

/// Initialises the process-wide pools.
///
/// Calling it again with an identical configuration returns the existing
/// handle; a different configuration is rejected with
/// [`EngineError::InvalidShape`].
pub fn init_memory_pools(config: PoolConfig) -> Result<PoolManager> {
    if let Some(existing) = GLOBAL_POOLS.get() {
        return reuse_global(existing, &config);
    }
    let candidate = PoolManager::new(config.clone())?;
    let installed = GLOBAL_POOLS.get_or_init(|| candidate);
    reuse_global(installed, &config)
}

fn reuse_global(existing: &PoolManager, requested: &PoolConfig) -> Result<PoolManager> {
    let requested = PoolConfig {
        classes: requested.sorted_classes(),
    };
    if existing.config() != &requested {
        return Err(EngineError::shape(
            "memory pools already initialised with a different configuration",
        ));
    }
    debug!("reusing process-wide memory pools");
    Ok(existing.clone())
}

/// The process-wide pools, if [`init_memory_pools`] has run.
pub fn memory_pools() -> Option<PoolManager> {
    GLOBAL_POOLS.get().cloned()
}

/// Table builder, interpolator and reporter sharing one pool.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    field: Field,
    pool: PoolManager,
    builder: TableBuilder,
    interpolator: Interpolator,
}

impl Engine {
    /// Builds an engine with its own pools.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = PoolManager::new(config.pools.clone())?;
        Self::assemble(config, pool)
    }

    /// Builds an engine on the process-wide pools, initialising them from
    /// `config.pools` if needed.
    pub fn from_global(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = init_memory_pools(config.pools.clone())?;
        Self::assemble(config, pool)
    }

    fn assemble(config: EngineConfig, pool: PoolManager) -> Result<Self> {
        let field = config.field.field()?;
        let builder = TableBuilder::new(pool.clone(), field, config.chunk_budget);
        let interpolator = Interpolator::new(
            pool.clone(),
            field,
            config.cache_budget,
            config.parallel_threshold,
        );
        info!(
            modulus = field.modulus(),
            chunk_budget = config.chunk_budget,
            cache_budget = config.cache_budget,
            "engine ready"
        );
        Ok(Self {
            config,
            field,
            pool,
            builder,
            interpolator,
        })
    }

    /// Switches the row generation order used by the builder.
    pub fn with_generation_order(mut self, order: GenerationOrder) -> Self {
        self.builder = self.builder.with_order(order);
        self
    }

    /// The configuration the engine was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared pool handle.
    pub fn pool(&self) -> &PoolManager {
        &self.pool
    }

    /// Arithmetic field.
    pub fn field(&self) -> Field {
        self.field
    }

    /// The table builder.
    pub fn builder(&self) -> &TableBuilder {
        &self.builder
    }

    /// The interpolator.
    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    /// See [`TableBuilder::build_table_streaming`].
    pub fn build_table_streaming<F, E>(&self, height: usize, width: usize, row_gen: F) -> Result<Table>
    where
        F: Fn(usize) -> std::result::Result<Vec<u64>, E> + Sync,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.builder.build_table_streaming(height, width, row_gen)
    }

    /// See [`TableBuilder::build_table`].
    pub fn build_table<F>(&self, height: usize, width: usize, row_gen: F) -> Result<Table>
    where
        F: Fn(usize) -> Vec<u64> + Sync,
    {
        self.builder.build_table(height, width, row_gen)
    }

    /// See [`Interpolator::interpolate_streaming`].
    pub fn interpolate_streaming(&self, values: &[u64], length: usize) -> Result<Polynomial> {
        self.interpolator.interpolate_streaming(values, length)
    }

    /// See [`Interpolator::evaluate_streaming`].
    pub fn evaluate_streaming(&self, coeffs: &[u64], length: usize) -> Result<Vec<u64>> {
        self.interpolator.evaluate_streaming(coeffs, length)
    }

    /// See [`Interpolator::interpolate_column`].
    pub fn interpolate_column(&self, table: &Table, col: usize) -> Result<Polynomial> {
        self.interpolator.interpolate_column(table, col)
    }

    /// See [`report::report_memory_usage`].
    pub fn report_memory_usage(&self) -> MemorySnapshot {
        report::report_memory_usage(&self.pool)
    }
}
