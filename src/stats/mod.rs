mod collector;
mod realtime;
mod report;


pub use collector::{Collector, RequestDetail, RequestOutcome, Snapshot};
pub use realtime::{RealtimeData, RealtimeServer};
pub use report::Report;
