//! HTTP helpers: request descriptors, reqwest dispatch, and failure classification.

pub mod classify;
pub mod client;
pub mod request;
