pub mod markdown;
pub mod tracker;
