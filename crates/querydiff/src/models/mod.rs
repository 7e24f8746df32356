pub mod outcome;
pub mod query_pair;

pub use outcome::{ExecutionError, Outcome, RunCounters, RunSummary};
pub use query_pair::{IgnoreSet, ParsedPairs, QueryPair};
