// Offline-capable request-interception cache.
//
// Requests are answered from a versioned local cache when possible and
// from the network otherwise, with network responses copied into the
// current cache generation in the background. Install warms the
// generation from an asset manifest; activate deletes every other
// generation.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod network;
pub mod server;
pub mod store;

pub use config::{AssetManifest, CacheConfig};
pub use error::{CacheError, CacheResult};
pub use lifecycle::{CacheWorker, LifecycleController, LifecycleEvent, WorkerState};
pub use model::{CacheRequest, CachedResponse, RequestKey, ResponseKind};
pub use store::CacheStore;
