// Infrastructure layer - External dependencies and adapters
pub mod chunked_stream;
pub mod config;
pub mod http_response;
pub mod json_mapper;
pub mod memory_cache;
pub mod warehouse_repository;
