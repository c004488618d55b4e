// HTTP front end for the interception cache.

pub mod handler;
