mod noop;
mod purge_run_history;

pub use noop::NoopFlow;
pub use purge_run_history::PurgeRunHistoryFlow;
