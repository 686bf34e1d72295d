pub mod directory;
pub mod models;
pub mod pool;
pub mod queries;
