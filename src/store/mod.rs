//! Persistence layer: group catalog, locked
//! mutation engine, sharded schedule store, capability index and server
//! cache.

pub mod capability_index;
pub mod group_store;
pub mod mutation;
pub mod schedule_store;
pub mod server_cache;

pub use capability_index::{CapabilityIndex, CapabilityTarget};
pub use group_store::{GroupCounts, GroupStore, InMemoryGroupStore, Quotas};
pub use mutation::{MutationEngine, StateTable};
pub use schedule_store::{NewEvent, ScheduleSpecInput, ScheduleStore, ScheduledEvent};
pub use server_cache::ServerCache;
