pub mod config;
pub mod engine;
pub mod extractor;
pub mod languages;
pub mod persistence;
pub mod provider;
pub mod scaffold;
pub mod session;
pub mod store;
pub mod view;
