//! Response caching: eligibility policy, cache entries, storage backends, and the manager that
//! ties them into the request pipeline.

pub mod entry;
pub mod manager;
pub mod policy;
pub mod store;
