pub mod api_types;
pub mod cache;
pub mod client;
pub mod filter;
pub mod store;
pub mod types;
