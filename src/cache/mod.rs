//! Persisted state: the fingerprint store and the last-build marker.

pub mod marker;
pub mod store;
