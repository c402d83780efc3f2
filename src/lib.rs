pub mod core;
pub mod executor;
pub mod mail;
pub mod markdown;
pub mod pagination;
pub mod storage;
pub mod tracker;
pub mod web;
