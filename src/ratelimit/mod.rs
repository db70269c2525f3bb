//! Rate limiting logic and state management.

mod bucket;
mod individual;
mod middleware;
mod store;
mod total;

pub use bucket::TokenBucket;
pub use individual::{IndividualStore, IndividualStoreConfig, DEFAULT_EXPIRES_IN};
pub use middleware::{
    middleware, new, Admission, AdmissionLayer, DenyHandler, ErrorHandler, IdentifierExtractor,
    LimiterConfig, LimiterConfigBuilder,
};
pub use store::LimiterStore;
pub use total::{TotalStore, TotalStoreConfig};
