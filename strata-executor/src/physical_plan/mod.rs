pub mod aggregate;
pub mod collect;
pub mod filter;
pub mod join;
pub mod scan;

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use strata_result::Result;

use crate::pipeline::{PipelineBuilder, PipelineId};

pub type PlanRef = Arc<dyn PhysicalPlan>;

pub trait PhysicalPlan: Debug + Send + Sync {
    /// Returns the schema of the output of this plan
    fn schema(&self) -> SchemaRef;

    /// Returns the children of this plan
    fn children(&self) -> Vec<PlanRef>;

    /// Contribute this node to pipeline `current`, whose sink consumes this
    /// node's output. Nodes that need their input fully materialized first
    /// (join build sides, aggregates) open a child pipeline that `current`
    /// depends on.
    fn build_pipelines(&self, builder: &mut PipelineBuilder, current: PipelineId) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}
