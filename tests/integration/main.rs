//! Integration tests driving the client against mock API servers.

mod caching;
mod errors;
mod session;
