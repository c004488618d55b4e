// Network primitive: pluggable fetch backends for HTTP and scripted replies.

pub mod http_network;
pub mod scripted;
pub mod traits;
