mod collector;
mod event;
mod store;
pub mod types;

pub use collector::{Correlator, DnsCollector, StoreHandle};
pub use event::{CapturedPacket, DnsLayer, Question, UdpLayer};
pub use store::{ProcessEntry, RetentionPolicy, SortBy, StoreStats};
