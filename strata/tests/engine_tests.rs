use std::sync::Arc;

use arrow::array::{Array, Int64Array, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::DataType;

use strata::{
    AggregateExpr, AggregateFunction, ColumnDefinition, CompareOp, Engine, EngineConfig, Error,
    PlanRef, SimpleAggregateExec, StorageConfig, TableDefinition, TableFilter, TableScanExec, expr,
};

fn engine(threads: usize) -> Engine {
    strata_test_utils::init_tracing_for_tests();
    Engine::new(EngineConfig {
        threads,
        storage: StorageConfig {
            parallel_scan_vector_count: 1,
            ..StorageConfig::default()
        },
    })
    .unwrap()
}

fn numbers() -> TableDefinition {
    TableDefinition::new("main", "numbers").with_column(ColumnDefinition::new("n", DataType::Int64))
}

fn fill(engine: &Engine, name: &str, values: impl IntoIterator<Item = i64>) {
    let table = engine.table(name).unwrap();
    let batch = RecordBatch::try_new(
        table.definition().arrow_schema(),
        vec![Arc::new(Int64Array::from_iter_values(values))],
    )
    .unwrap();
    let txn = engine.begin();
    table.append(&txn, &batch).unwrap();
    engine.commit(&txn).unwrap();
}

fn sum_of(engine: &Engine, name: &str, column: usize) -> (i64, Option<i64>) {
    let table = engine.table(name).unwrap();
    let scan: PlanRef = Arc::new(TableScanExec::new(table, vec![column], Vec::new()).unwrap());
    let plan: PlanRef = Arc::new(
        SimpleAggregateExec::new(
            scan,
            vec![
                AggregateExpr::count_star("n"),
                AggregateExpr::new(AggregateFunction::Sum, 0, "s"),
            ],
        )
        .unwrap(),
    );
    let batches = engine.execute(&engine.begin(), &plan).unwrap();
    let out = concat_batches(&plan.schema(), &batches).unwrap();
    let col = |i: usize| out.column(i).as_any().downcast_ref::<Int64Array>().unwrap().clone();
    let sum = col(1);
    (col(0).value(0), (!sum.is_null(0)).then(|| sum.value(0)))
}

#[test]
fn test_catalog_registration() {
    let engine = engine(2);
    engine.create_table(numbers()).unwrap();
    let err = engine.create_table(numbers()).unwrap_err();
    assert!(err.is_catalog(), "{err:?}");
    assert_eq!(engine.table_names(), vec!["main.numbers".to_string()]);
    assert!(engine.table("main.other").unwrap_err().is_catalog());

    engine.drop_table("main.numbers").unwrap();
    assert!(engine.table("main.numbers").is_err());
    assert!(engine.drop_table("main.numbers").is_err());
}

#[test]
fn test_parallel_query_through_engine() {
    let engine = engine(4);
    engine.create_table(numbers()).unwrap();
    fill(&engine, "main.numbers", 0..50_000);
    assert_eq!(sum_of(&engine, "main.numbers", 0), (50_000, Some(50_000 * 49_999 / 2)));

    engine.set_threads(0).unwrap();
    assert_eq!(engine.scheduler().thread_count(), 0);
    assert_eq!(sum_of(&engine, "main.numbers", 0), (50_000, Some(50_000 * 49_999 / 2)));
    engine.set_threads(2).unwrap();

    let table = engine.table("main.numbers").unwrap();
    let plan: PlanRef = Arc::new(
        TableScanExec::new(
            table,
            vec![0],
            vec![TableFilter::new(0, CompareOp::LessThan, 3i64)],
        )
        .unwrap(),
    );
    let rows: usize = engine
        .execute(&engine.begin(), &plan)
        .unwrap()
        .iter()
        .map(RecordBatch::num_rows)
        .sum();
    assert_eq!(rows, 3);
}

#[test]
fn test_add_column_swaps_registered_instance() {
    let engine = engine(2);
    let original = engine.create_table(numbers()).unwrap();
    fill(&engine, "main.numbers", 1..=4);

    let altered = engine
        .add_column(
            "main.numbers",
            ColumnDefinition::new("m", DataType::Int64).with_default(expr::constant(10i64, DataType::Int64)),
        )
        .unwrap();
    assert!(Arc::ptr_eq(&altered, &engine.table("main.numbers").unwrap()));
    assert_eq!(sum_of(&engine, "main.numbers", 1), (4, Some(40)));

    // Writers still holding the old instance are turned away.
    let txn = engine.begin();
    let batch = RecordBatch::try_new(
        original.definition().arrow_schema(),
        vec![Arc::new(Int64Array::from(vec![5]))],
    )
    .unwrap();
    let err = original.append(&txn, &batch).unwrap_err();
    assert!(err.is_transaction_conflict(), "{err:?}");
    engine.rollback(&txn).unwrap();

    engine.drop_column("main.numbers", "n").unwrap();
    assert_eq!(sum_of(&engine, "main.numbers", 0), (4, Some(40)));
    let err = engine.drop_column("main.numbers", "n").unwrap_err();
    assert!(matches!(err, Error::CatalogError(_)), "{err:?}");
}

#[test]
fn test_rolled_back_rows_never_reach_queries() {
    let engine = engine(3);
    let table = engine.create_table(numbers()).unwrap();
    fill(&engine, "main.numbers", 0..10);

    let txn = engine.begin();
    let batch = RecordBatch::try_new(
        table.definition().arrow_schema(),
        vec![Arc::new(Int64Array::from_iter_values(100..200))],
    )
    .unwrap();
    table.append(&txn, &batch).unwrap();
    engine.rollback(&txn).unwrap();
    assert_eq!(sum_of(&engine, "main.numbers", 0), (10, Some(45)));
    assert_eq!(engine.transaction_manager().active_count(), 0);
}
