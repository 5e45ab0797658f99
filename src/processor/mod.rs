pub mod dedup_merger;
pub mod html_table;
pub mod partitioner;
pub mod record_caster;
pub mod schema_normalizer;

pub use dedup_merger::*;
pub use html_table::table_to_frame;
pub use partitioner::*;
pub use record_caster::*;
pub use schema_normalizer::*;
