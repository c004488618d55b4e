// Host-facing entry points: tracing setup and startup of a running cache.

pub mod bootstrap;
