use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{Array, Int64Array, RecordBatch};
use arrow::datatypes::DataType;

use strata_table::{ColumnDefinition, StorageConfig, Table, TableDefinition};
use strata_transaction::TransactionManager;
use strata_types::STANDARD_VECTOR_SIZE;

fn filled(rows: i64, config: StorageConfig) -> (TransactionManager, Arc<Table>) {
    let mgr = TransactionManager::new();
    let definition =
        TableDefinition::new("main", "p").with_column(ColumnDefinition::new("v", DataType::Int64));
    let table = Table::new(definition, config).expect("create table");
    let batch = RecordBatch::try_new(
        table.definition().arrow_schema(),
        vec![Arc::new(Int64Array::from_iter_values(0..rows))],
    )
    .expect("batch");
    let txn = mgr.begin();
    table.append(&txn, &batch).expect("append");
    mgr.commit(&txn).expect("commit");
    (mgr, table)
}

#[test]
fn test_morsels_cover_table_exactly_once() {
    strata_test_utils::init_tracing_for_tests();
    let config = StorageConfig {
        parallel_scan_vector_count: 2,
        ..StorageConfig::default()
    };
    let rows = 20_000i64;
    let (mgr, table) = filled(rows, config);
    assert_eq!(table.max_threads(), rows as usize / (2 * STANDARD_VECTOR_SIZE) + 1);

    let parallel = table.initialize_parallel_scan();
    let sum = AtomicU64::new(0);
    let count = AtomicU64::new(0);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let txn = mgr.begin();
                while let Some(mut state) = table
                    .next_parallel_scan(&parallel, &[0], Vec::new())
                    .expect("morsel")
                {
                    while let Some(batch) = table.scan(&txn, &mut state).expect("scan") {
                        let values = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
                        sum.fetch_add(values.values().iter().sum::<i64>() as u64, Ordering::Relaxed);
                        count.fetch_add(batch.num_rows() as u64, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    assert_eq!(count.load(Ordering::Relaxed), rows as u64);
    assert_eq!(sum.load(Ordering::Relaxed), (rows * (rows - 1) / 2) as u64);
}

#[test]
fn test_partition_ranges_are_aligned_and_disjoint() {
    let (_mgr, table) = filled(10_500, StorageConfig::default());
    for n in [1, 3, 8, 100] {
        let ranges = table.partition_ranges(n);
        assert!(!ranges.is_empty() && ranges.len() <= n);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges.last().unwrap().1, 10_500);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
            assert_eq!(pair[1].0 % STANDARD_VECTOR_SIZE as u64, 0);
        }
    }

    let (_mgr, empty) = filled(0, StorageConfig::default());
    assert_eq!(empty.partition_ranges(4), vec![(0, 0)]);
}

#[test]
fn test_forced_parallelism_hands_out_single_vectors() {
    let config = StorageConfig {
        force_parallelism: true,
        ..StorageConfig::default()
    };
    let rows = 5 * STANDARD_VECTOR_SIZE as i64 + 10;
    let (mgr, table) = filled(rows, config);
    assert_eq!(table.max_threads(), 6);

    let parallel = table.initialize_parallel_scan();
    assert_eq!(parallel.morsel_rows(), STANDARD_VECTOR_SIZE as u64);
    let txn = mgr.begin();
    let mut morsels = Vec::new();
    while let Some(mut state) = table
        .next_parallel_scan(&parallel, &[0], Vec::new())
        .expect("morsel")
    {
        morsels.push((state.current_row(), state.max_row()));
        let mut batches = 0;
        while table.scan(&txn, &mut state).expect("scan").is_some() {
            batches += 1;
        }
        assert_eq!(batches, 1);
    }
    assert_eq!(morsels.len(), 6);
    for (k, &(start, end)) in morsels.iter().enumerate() {
        assert_eq!(start, (k * STANDARD_VECTOR_SIZE) as u64);
        assert_eq!(end, (start + STANDARD_VECTOR_SIZE as u64).min(rows as u64));
    }
}
