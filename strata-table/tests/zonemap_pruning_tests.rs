use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::DataType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strata_table::{ColumnDefinition, StorageConfig, Table, TableDefinition};
use strata_transaction::TransactionManager;
use strata_types::{CompareOp, Literal, ROW_ID_COLUMN_ID, STANDARD_VECTOR_SIZE, TableFilter};

const OPS: [CompareOp; 6] = [
    CompareOp::Equal,
    CompareOp::NotEqual,
    CompareOp::LessThan,
    CompareOp::LessThanOrEqual,
    CompareOp::GreaterThan,
    CompareOp::GreaterThanOrEqual,
];

fn build(mgr: &TransactionManager, pruning: bool, a: &[i64], b: &[Option<i64>]) -> Arc<Table> {
    let definition = TableDefinition::new("main", "z")
        .with_column(ColumnDefinition::new("a", DataType::Int64))
        .with_column(ColumnDefinition::new("b", DataType::Int64));
    let config = StorageConfig {
        segment_vectors: 1,
        zonemap_pruning: pruning,
        ..StorageConfig::default()
    };
    let table = Table::new(definition, config).expect("create table");
    let batch = RecordBatch::try_new(
        table.definition().arrow_schema(),
        vec![
            Arc::new(Int64Array::from(a.to_vec())),
            Arc::new(Int64Array::from(b.to_vec())),
        ],
    )
    .expect("batch");
    let txn = mgr.begin();
    table.append(&txn, &batch).expect("append");
    mgr.commit(&txn).expect("commit");
    table
}

fn matching_rows(table: &Table, mgr: &TransactionManager, filters: Vec<TableFilter>) -> Vec<u64> {
    let txn = mgr.begin();
    let batches = table
        .scan_all(&txn, &[0, 1, ROW_ID_COLUMN_ID], filters)
        .expect("scan");
    batches
        .iter()
        .flat_map(|b| {
            b.column(2)
                .as_any()
                .downcast_ref::<UInt64Array>()
                .unwrap()
                .values()
                .to_vec()
        })
        .collect()
}

#[test]
fn test_pruning_never_changes_results() {
    strata_test_utils::init_tracing_for_tests();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mgr = TransactionManager::new();

    // Sorted-ish data so segment ranges are narrow and pruning kicks in.
    let rows = 10 * 1024 + 77;
    let a: Vec<i64> = (0..rows as i64).map(|i| i / 3 + rng.random_range(0..4)).collect();
    let b: Vec<Option<i64>> = (0..rows)
        .map(|_| rng.random_bool(0.9).then(|| rng.random_range(-50..50)))
        .collect();

    let pruned = build(&mgr, true, &a, &b);
    let full = build(&mgr, false, &a, &b);

    for _ in 0..40 {
        let mut filters = vec![TableFilter::new(
            0,
            OPS[rng.random_range(0..OPS.len())],
            rng.random_range(-10..rows as i64 / 3 + 10),
        )];
        if rng.random_bool(0.5) {
            filters.push(TableFilter::new(
                1,
                OPS[rng.random_range(0..OPS.len())],
                rng.random_range(-60..60),
            ));
        }
        let expected: Vec<u64> = (0..rows)
            .filter(|&i| {
                filters.iter().all(|f| {
                    let value = if f.column_index == 0 { Some(a[i]) } else { b[i] };
                    value.is_some_and(|v| f.evaluate(&v.into()))
                })
            })
            .map(|i| i as u64)
            .collect();
        assert_eq!(matching_rows(&pruned, &mgr, filters.clone()), expected, "{filters:?}");
        assert_eq!(matching_rows(&full, &mgr, filters.clone()), expected, "{filters:?}");
    }
}

#[test]
fn test_range_filter_touches_single_segment() {
    let mgr = TransactionManager::new();
    let a: Vec<i64> = (0..4096).collect();
    let b: Vec<Option<i64>> = vec![Some(1); 4096];
    let table = build(&mgr, true, &a, &b);
    let rows = matching_rows(
        &table,
        &mgr,
        vec![
            TableFilter::new(0, CompareOp::GreaterThanOrEqual, 2048),
            TableFilter::new(0, CompareOp::LessThan, 2050),
        ],
    );
    assert_eq!(rows, vec![2048, 2049]);
    assert!(matching_rows(&table, &mgr, vec![TableFilter::new(1, CompareOp::Equal, 2)]).is_empty());
}

/// One-column table `x` holding `values`, one vector per segment.
fn single_column(mgr: &TransactionManager, pruning: bool, values: ArrayRef) -> Arc<Table> {
    let definition = TableDefinition::new("main", "x")
        .with_column(ColumnDefinition::new("x", values.data_type().clone()));
    let config = StorageConfig {
        segment_vectors: 1,
        zonemap_pruning: pruning,
        ..StorageConfig::default()
    };
    let table = Table::new(definition, config).expect("create table");
    let batch = RecordBatch::try_new(table.definition().arrow_schema(), vec![values]).expect("batch");
    let txn = mgr.begin();
    table.append(&txn, &batch).expect("append");
    mgr.commit(&txn).expect("commit");
    table
}

fn matching_single(table: &Table, mgr: &TransactionManager, filters: Vec<TableFilter>) -> Vec<u64> {
    let txn = mgr.begin();
    table
        .scan_all(&txn, &[0, ROW_ID_COLUMN_ID], filters)
        .expect("scan")
        .iter()
        .flat_map(|b| {
            b.column(1)
                .as_any()
                .downcast_ref::<UInt64Array>()
                .unwrap()
                .values()
                .to_vec()
        })
        .collect()
}

/// Rows of `values` whose literal satisfies every filter; NULL and NaN never do.
fn expected_rows(values: &[Literal], filters: &[TableFilter]) -> Vec<u64> {
    (0..values.len())
        .filter(|&i| filters.iter().all(|f| f.evaluate(&values[i])))
        .map(|i| i as u64)
        .collect()
}

#[test]
fn test_nan_in_segment_does_not_break_pruning() {
    let mgr = TransactionManager::new();
    let values: ArrayRef = Arc::new(Float64Array::from(vec![1.0, f64::NAN, 10.0]));
    let filter = || vec![TableFilter::new(0, CompareOp::GreaterThan, 5.0)];
    let pruned = single_column(&mgr, true, Arc::clone(&values));
    let full = single_column(&mgr, false, values);
    assert_eq!(matching_single(&full, &mgr, filter()), vec![2]);
    assert_eq!(matching_single(&pruned, &mgr, filter()), vec![2]);

    let zones = pruned.column(0).expect("column").zonemaps();
    assert_eq!(zones[0].max, Literal::from(10.0));
}

#[test]
fn test_float_pruning_with_nan_matches_full_scan() {
    let mut rng = StdRng::seed_from_u64(0xf10a7);
    let mgr = TransactionManager::new();
    let rows = 6 * STANDARD_VECTOR_SIZE + 300;
    let raw: Vec<Option<f64>> = (0..rows)
        .map(|i| {
            if rng.random_bool(0.05) {
                None
            } else if rng.random_bool(0.05) {
                Some(f64::NAN)
            } else {
                Some(i as f64 / 4.0 + rng.random_range(0.0..2.0))
            }
        })
        .collect();
    let literals: Vec<Literal> = raw.iter().map(|v| Literal::from(*v)).collect();
    let values: ArrayRef = Arc::new(Float64Array::from(raw));
    let pruned = single_column(&mgr, true, Arc::clone(&values));
    let full = single_column(&mgr, false, values);

    for _ in 0..30 {
        let constant: Literal = if rng.random_bool(0.5) {
            rng.random_range(-5.0..rows as f64 / 4.0 + 5.0).into()
        } else {
            rng.random_range(-5..rows as i64 / 4 + 5).into()
        };
        let filters = vec![TableFilter::new(0, OPS[rng.random_range(0..OPS.len())], constant)];
        let expected = expected_rows(&literals, &filters);
        assert_eq!(matching_single(&pruned, &mgr, filters.clone()), expected, "{filters:?}");
        assert_eq!(matching_single(&full, &mgr, filters.clone()), expected, "{filters:?}");
    }
}

#[test]
fn test_string_pruning_matches_full_scan() {
    let mut rng = StdRng::seed_from_u64(0x57a7);
    let mgr = TransactionManager::new();
    let rows = 5 * STANDARD_VECTOR_SIZE + 11;
    let raw: Vec<Option<String>> = (0..rows)
        .map(|i| (!rng.random_bool(0.1)).then(|| format!("k{:05}", i / 2 + rng.random_range(0..3))))
        .collect();
    let literals: Vec<Literal> = raw.iter().cloned().map(Literal::from).collect();
    let values: ArrayRef = Arc::new(StringArray::from(raw));
    let pruned = single_column(&mgr, true, Arc::clone(&values));
    let full = single_column(&mgr, false, values);

    for _ in 0..30 {
        let constant = format!("k{:05}", rng.random_range(0..rows / 2 + 5));
        let filters = vec![TableFilter::new(0, OPS[rng.random_range(0..OPS.len())], constant)];
        let expected = expected_rows(&literals, &filters);
        assert_eq!(matching_single(&pruned, &mgr, filters.clone()), expected, "{filters:?}");
        assert_eq!(matching_single(&full, &mgr, filters.clone()), expected, "{filters:?}");
    }
}

#[test]
fn test_segment_outside_filter_range_is_skipped() {
    let mgr = TransactionManager::new();
    // Segment 0 spans [10, 20]; segment 1 spans [0, 1023].
    let values: Vec<i64> = (0..STANDARD_VECTOR_SIZE as i64)
        .map(|i| 10 + i % 11)
        .chain(0..STANDARD_VECTOR_SIZE as i64)
        .collect();
    let values: ArrayRef = Arc::new(Int64Array::from(values));

    for (pruning, skipped) in [(true, 1), (false, 0)] {
        let table = single_column(&mgr, pruning, Arc::clone(&values));
        let txn = mgr.begin();
        let mut state = table
            .initialize_scan(&[0, ROW_ID_COLUMN_ID], vec![TableFilter::new(0, CompareOp::Equal, 5)])
            .expect("scan");
        let mut rows = Vec::new();
        while let Some(batch) = table.scan(&txn, &mut state).expect("scan") {
            let ids = batch.column(1).as_any().downcast_ref::<UInt64Array>().unwrap();
            rows.extend(ids.values().iter().copied());
        }
        assert_eq!(rows, vec![STANDARD_VECTOR_SIZE as u64 + 5]);
        assert_eq!(state.segments_skipped(), skipped, "pruning={pruning}");
    }
}
