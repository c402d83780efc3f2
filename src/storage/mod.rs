pub mod database;
pub mod pool;
pub mod repositories;
