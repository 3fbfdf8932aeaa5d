//! Reference providers for the relay contract router.
//!
//! - `mock`: scripted in-memory provider used in tests and demos
//! - `http`: REST transport over `reqwest`
//! - `bridge`: in-process channel to a host task

pub mod bridge;
pub mod http;
pub mod mock;

pub use bridge::{BridgeHost, BridgeProvider, BridgeRequest};
pub use http::{HttpProvider, HttpProviderConfig, HttpProviderError};
pub use mock::{MockFault, MockProvider};
