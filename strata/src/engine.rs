use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use strata_executor::{Executor, PlanRef};
use strata_result::{Error, Result};
use strata_scheduler::TaskScheduler;
use strata_table::{ColumnDefinition, Table, TableDefinition};
use strata_transaction::{Transaction, TransactionManager, TxnId};

use crate::config::EngineConfig;

/// One database instance: transactions, the worker pool and the tables.
///
/// The worker pool belongs to the engine and is shut down when the last
/// handle to it is dropped. Tables are registered under their qualified
/// `schema.table` name; schema changes swap the registered instance for the
/// one that superseded it.
pub struct Engine {
    config: EngineConfig,
    transactions: TransactionManager,
    scheduler: Arc<TaskScheduler>,
    executor: Executor,
    tables: RwLock<FxHashMap<String, Arc<Table>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("tables", &self.tables.read().len())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let scheduler = Arc::new(TaskScheduler::new(config.threads)?);
        let executor = Executor::new(Arc::clone(&scheduler));
        tracing::debug!(threads = config.threads, "engine started");
        Ok(Self {
            config,
            transactions: TransactionManager::new(),
            scheduler,
            executor,
            tables: RwLock::new(FxHashMap::default()),
        })
    }

    /// [`Engine::new`] with [`EngineConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Resize the worker pool; running queries keep going.
    pub fn set_threads(&self, threads: usize) -> Result<()> {
        self.scheduler.set_threads(threads)
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.transactions.begin()
    }

    pub fn commit(&self, txn: &Transaction) -> Result<TxnId> {
        self.transactions.commit(txn)
    }

    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        self.transactions.rollback(txn)
    }

    /// Run `plan` as of `txn`.
    pub fn execute(&self, txn: &Arc<Transaction>, plan: &PlanRef) -> Result<Vec<RecordBatch>> {
        self.executor.execute(txn, plan)
    }

    pub fn create_table(&self, definition: TableDefinition) -> Result<Arc<Table>> {
        let name = definition.qualified_name();
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(Error::CatalogError(format!(
                "Table with name {name} already exists!"
            )));
        }
        let table = Table::new(definition, self.config.storage.clone())?;
        tables.insert(name, Arc::clone(&table));
        Ok(table)
    }

    /// The current instance of `schema.table`.
    pub fn table(&self, qualified_name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(qualified_name)
            .cloned()
            .ok_or_else(|| missing_table(qualified_name))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn drop_table(&self, qualified_name: &str) -> Result<()> {
        self.tables
            .write()
            .remove(qualified_name)
            .map(|_| ())
            .ok_or_else(|| missing_table(qualified_name))
    }

    pub fn add_column(&self, qualified_name: &str, column: ColumnDefinition) -> Result<Arc<Table>> {
        self.alter(qualified_name, |table| table.add_column(column))
    }

    pub fn drop_column(&self, qualified_name: &str, column_name: &str) -> Result<Arc<Table>> {
        self.alter(qualified_name, |table| {
            let column = table.definition().column_id(column_name).ok_or_else(|| {
                Error::CatalogError(format!(
                    "Table {qualified_name} does not have a column with name \"{column_name}\""
                ))
            })?;
            table.drop_column(column)
        })
    }

    /// Replace the registered instance with the one `change` derives from it.
    /// The registry stays locked meanwhile, so concurrent changes to the same
    /// table are serialized.
    fn alter<F>(&self, qualified_name: &str, change: F) -> Result<Arc<Table>>
    where
        F: FnOnce(&Arc<Table>) -> Result<Arc<Table>>,
    {
        let mut tables = self.tables.write();
        let current = tables
            .get(qualified_name)
            .cloned()
            .ok_or_else(|| missing_table(qualified_name))?;
        let altered = change(&current)?;
        tables.insert(qualified_name.to_string(), Arc::clone(&altered));
        Ok(altered)
    }
}

fn missing_table(name: &str) -> Error {
    Error::CatalogError(format!("Table with name {name} does not exist!"))
}
