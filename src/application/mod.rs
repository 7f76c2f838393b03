// Application layer - request pipeline and the components it composes
pub mod adaptive_data_service;
pub mod aggregator;
pub mod cache_key;
pub mod cache_store;
pub mod clock;
pub mod data_repository;
pub mod fidelity_cache;
pub mod resolution_policy;
pub mod sampling;
