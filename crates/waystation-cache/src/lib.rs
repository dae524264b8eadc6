//! Offline-first request interception.
//!
//! An [`Interceptor`] owns one version-named cache store and serves each
//! intercepted GET request with one of two strategies: network-first for
//! external origins and cache-first with write-through for the
//! application's own origin. Hosts plug in storage through
//! [`CacheStorage`] and the network through [`Network`].

pub mod disk;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod request;
pub mod response;
pub mod sharded;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use interceptor::{
    ActivateOutcome, FetchOutcome, InstallOutcome, Interceptor, InterceptorConfig, Lifecycle,
    Strategy,
};
pub use request::Request;
pub use response::{CachedResponse, Response, ResponseKind};
pub use traits::{CacheStorage, CacheStore, Network};
