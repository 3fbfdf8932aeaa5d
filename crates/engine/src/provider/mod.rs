//! Provider registry and routing.
//!
//! Modules:
//! - `registry`: Ordered provider map with default-provider policy
//! - `selection`: Provider precedence for a contract and its registration
//! - `type_cache`: Memoized resolution keyed by contract kind

mod registry;
mod selection;
mod type_cache;

pub use registry::ProviderRegistry;
pub use selection::{ProviderSelection, SelectionSource};
pub use type_cache::TypeProviderCache;
