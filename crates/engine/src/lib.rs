//! # Relay Engine
//!
//! Routes strongly-typed contracts to interchangeable providers and runs them
//! through a single execution pipeline.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use relay_engine::{ContractRouter, MetaTable, RouterSettings};
//! use relay_types::{Contract, MetaRegistration, TypeTag};
//!
//! let table = MetaTable::new(vec![MetaRegistration::new(
//!     "profile/get",
//!     Contract::new("GetProfile", "profile/get").with_output(TypeTag::named("ProfileDto")),
//! )]);
//! let router = Arc::new(ContractRouter::new(RouterSettings::default(), table));
//! assert!(router.providers().is_empty());
//! ```
//!
//! ## Architecture
//!
//! - **`meta`**: Registration table keyed by contract kind and MetaId
//! - **`provider`**: Provider registry, selection order and the type-keyed cache
//! - **`pipeline`**: [`ContractRouter`], response conversion and the history ring
//! - **`debounce`**: Per-path coalescing of bursts of calls
//! - **`config`**: [`RouterSettings`] and their JSON file IO

pub mod config;
pub mod debounce;
pub mod meta;
pub mod pipeline;
pub mod provider;

pub use config::{
    CONFIG_PATH_ENV, ConfigError, RouterSettings, default_config_path, load_settings, load_settings_from_path,
    save_settings_to_path,
};
pub use debounce::Debouncer;
pub use meta::{MetaTable, MetaTableError};
pub use pipeline::{ContractRouter, HistoryRing, JsonConverter, convert_response};
pub use provider::{ProviderRegistry, ProviderSelection, SelectionSource, TypeProviderCache};
