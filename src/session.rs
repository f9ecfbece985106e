//! Session handling: token storage, navigation on session loss, and refresh coordination.

pub mod credentials;
pub mod navigator;
pub mod refresh;
