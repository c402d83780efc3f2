pub mod relevance;
pub mod service;
