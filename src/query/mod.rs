// Submodules for separation of concerns
mod builder;
mod compile;
mod eval;
mod exec;
mod parse;
mod state;
mod types;

pub use builder::{Query, TAGS_FIELD};
pub use eval::{apply_projection, compare_bson, compare_docs, eval_filter, resolve, uses_where};
pub use parse::{parse_filter, parse_filter_json};
pub use state::{CompiledQuery, ExpandMode, QueryState, SortKey};
pub use types::{CmpOp, Condition, Filter, FindOptions, Order, Predicate, SortSpec};
