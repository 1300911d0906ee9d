pub mod config;
pub mod horizon;
pub mod limits;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod store;
