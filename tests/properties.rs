use proptest::prelude::*;
use table_forge::{
    Engine, EngineConfig, Field, GenerationOrder, PoolConfig, PoolManager, TableBuilder,
};

fn engine(cache_budget: usize) -> Engine {
    let mut config =
        EngineConfig::with_pools(PoolConfig::from_classes(&[16, 256, 4096], &[2, 2, 1]).unwrap());
    config.cache_budget = cache_budget;
    config.chunk_budget = 256;
    Engine::new(config).unwrap()
}

fn row_value(seed: u64, row: usize, col: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((row as u64) << 20)
        .wrapping_add(col as u64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn lookups_match_the_row_function(
        height in 0usize..700,
        width in 1usize..40,
        seed in any::<u64>(),
        parallel in any::<bool>(),
    ) {
        let field = Field::goldilocks();
        let order = if parallel { GenerationOrder::Parallel } else { GenerationOrder::Sequential };
        let engine = engine(64).with_generation_order(order);
        let row_gen = |i: usize| (0..width).map(|j| row_value(seed, i, j)).collect::<Vec<_>>();
        let table = engine.build_table(height, width, row_gen).unwrap();
        for i in 0..height {
            for j in 0..width {
                prop_assert_eq!(table.get(i, j), Some(field.reduce(row_value(seed, i, j))));
            }
        }
        prop_assert_eq!(table.get(height, 0), None);
        drop(table);
        prop_assert_eq!(engine.pool().stats().checked_out(), 0);
    }

    #[test]
    fn interpolation_inverts_evaluation_on_power_of_two_domains(
        log_len in 0u32..11,
        budget_log in 1u32..8,
        values in prop::collection::vec(any::<u64>(), 1024),
    ) {
        let length = 1usize << log_len;
        let engine = engine(1 << budget_log);
        let field = engine.field();
        let expected: Vec<u64> = values[..length].iter().map(|&v| field.reduce(v)).collect();
        let poly = engine.interpolate_streaming(&values, length).unwrap();
        prop_assert_eq!(poly.len(), length);
        prop_assert_eq!(engine.evaluate_streaming(poly.coefficients(), length).unwrap(), expected);
        prop_assert_eq!(engine.pool().stats().checked_out(), 0);
    }

    #[test]
    fn interpolation_inverts_evaluation_on_other_lengths(
        length in 2usize..80,
        values in prop::collection::vec(any::<u64>(), 80),
    ) {
        prop_assume!(!length.is_power_of_two());
        let engine = engine(8);
        let field = engine.field();
        let expected: Vec<u64> = values[..length].iter().map(|&v| field.reduce(v)).collect();
        let poly = engine.interpolate_streaming(&values, length).unwrap();
        prop_assert!(poly.degree().map_or(true, |d| d < length));
        prop_assert_eq!(engine.evaluate_streaming(poly.coefficients(), length).unwrap(), expected);
    }

    #[test]
    fn pool_invariant_holds_after_every_step(
        ops in prop::collection::vec((1usize..5000, any::<bool>()), 1..120),
    ) {
        let pool = PoolManager::new(
            PoolConfig::from_classes(&[16, 256, 4096], &[2, 2, 1]).unwrap(),
        ).unwrap();
        let mut held = Vec::new();
        for (len, release) in ops {
            if release && !held.is_empty() {
                let buf: table_forge::PooledBuffer = held.swap_remove(len % held.len());
                buf.release().unwrap();
            } else {
                let buf = pool.checkout(len).unwrap();
                prop_assert_eq!(buf.len(), len);
                held.push(buf);
            }
            let stats = pool.stats();
            prop_assert!(stats.invariant_holds());
            prop_assert_eq!(stats.checked_out(), held.len());
        }
        drop(held);
        prop_assert_eq!(pool.stats().checked_out(), 0);
    }
}

#[test]
fn table_builder_is_usable_without_the_engine() {
    let pool = PoolManager::new(PoolConfig::from_classes(&[64], &[1]).unwrap()).unwrap();
    let table = TableBuilder::new(pool.clone(), Field::goldilocks(), 64)
        .build_table(20, 3, |i| vec![i as u64; 3])
        .unwrap();
    assert_eq!(table.get(19, 2), Some(19));
    assert_eq!(table.chunk_rows(), 21);
    assert_eq!(table.chunk_count(), 1);
}
