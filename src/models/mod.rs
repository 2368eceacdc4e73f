pub mod job;
pub mod keys;
pub mod table;
pub mod variable;

pub use job::{JobArgument, JobOutcome, JobState};
pub use keys::{result_field_name, BufferKey, PartitionKey, ResultKey, ZoneId};
pub use table::{AttrValue, Feature, FeatureTable};
pub use variable::{LayerKind, Variable, VariableSpec, VariableType};
