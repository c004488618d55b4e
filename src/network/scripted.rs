// In-memory network with scripted replies. Applies the same origin rules as
// the HTTP backend and records every call, so offline runs and tests can
// observe exactly what reached the "network".

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use reqwest::Url;

use super::traits::{same_origin, FetchMode, Network};
use crate::error::{CacheError, CacheResult};
use crate::model::{CacheRequest, CachedResponse, ResponseKind};

#[derive(Debug, Clone)]
enum Route {
    Reply {
        status: u16,
        body: Bytes,
        cors_granted: bool,
    },
    Unreachable,
}

/// One recorded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub url: String,
    pub mode: FetchMode,
}

pub struct ScriptedNetwork {
    origin: Url,
    routes: RwLock<HashMap<String, Route>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl ScriptedNetwork {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            routes: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn route_key(&self, url: &str) -> String {
        match self.origin.join(url) {
            Ok(mut u) => {
                u.set_fragment(None);
                u.into()
            }
            Err(_) => url.to_string(),
        }
    }

    /// Reply with `status` and `body`; cross-origin replies grant CORS access.
    pub fn serve(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.insert(url, status, body.into(), true);
    }

    /// Reply with `status` and `body`; cross-origin standard fetches are rejected.
    pub fn serve_without_cors(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.insert(url, status, body.into(), false);
    }

    /// Fail every fetch of `url` with a transport error.
    pub fn unreachable(&self, url: &str) {
        let key = self.route_key(url);
        self.routes.write().insert(key, Route::Unreachable);
    }

    fn insert(&self, url: &str, status: u16, body: Bytes, cors_granted: bool) {
        let key = self.route_key(url);
        self.routes.write().insert(
            key,
            Route::Reply {
                status,
                body,
                cors_granted,
            },
        );
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        let key = self.route_key(url);
        self.calls.lock().iter().filter(|c| c.url == key).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &CacheRequest, mode: FetchMode) -> CacheResult<CachedResponse> {
        let key = self.route_key(request.url.as_str());
        self.calls.lock().push(FetchCall {
            url: key.clone(),
            mode,
        });

        let route = self.routes.read().get(&key).cloned();
        let (status, body, cors_granted) = match route {
            Some(Route::Reply {
                status,
                body,
                cors_granted,
            }) => (status, body, cors_granted),
            Some(Route::Unreachable) => {
                return Err(CacheError::Network {
                    url: key,
                    message: "unreachable".to_string(),
                })
            }
            None => {
                return Err(CacheError::Network {
                    url: key,
                    message: "no scripted route".to_string(),
                })
            }
        };

        let response = CachedResponse::new(key.clone(), status, body);
        if same_origin(&self.origin, &request.url) {
            return Ok(response);
        }
        match mode {
            FetchMode::NoCors => Ok(response.into_opaque()),
            FetchMode::Cors if cors_granted => Ok(CachedResponse {
                kind: ResponseKind::Cors,
                ..response
            }),
            FetchMode::Cors => Err(CacheError::Network {
                url: key,
                message: "cross-origin response without access-control-allow-origin"
                    .to_string(),
            }),
        }
    }
}
