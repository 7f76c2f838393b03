// Domain layer - Sensor data and request vocabulary
pub mod query;
pub mod resolution;
pub mod timeseries;
