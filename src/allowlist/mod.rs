pub mod normalizer;
pub mod persistence;
pub mod store;

pub use normalizer::{host_from_url, normalize_domain};
pub use persistence::{AllowListPersistence, AllowListSnapshot, DomainRule, MemoryPersistence};
pub use store::{AllowListStore, SessionContext};
