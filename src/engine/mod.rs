// Cache policy: resolving, warming, reaping and intercepting on top of the store.

pub mod interceptor;
pub mod reaper;
pub mod resolver;
pub mod stats;
pub mod warmer;
