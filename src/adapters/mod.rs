// Adapters layer: concrete implementations for external systems (storage, http, providers, reference data)

pub mod cache;
pub mod http;
pub mod overrides;
pub mod providers;
pub mod storage;
