pub mod aggregation;
pub mod buffer_generator;
pub mod completion;
pub mod controller;
pub mod partitioner;
pub mod variable_resolver;
pub mod workers;

pub use aggregation::AggregationJoin;
pub use buffer_generator::{BufferGenerator, BufferSet};
pub use completion::{wait_for_batch, BatchWait, CompletionTracker};
pub use controller::{PartitionPlan, PipelineController, PipelineSummary, PoolStrategy};
pub use partitioner::{Partition, Partitioner};
pub use variable_resolver::{mosaic_zone, select_mosaic_file, VariableResolver};
pub use workers::IntersectionWorker;
