pub mod allocator;
pub mod clock;
pub mod config;
pub mod csv;
pub mod directory;
pub mod engine;
pub mod error;
pub mod models;
pub mod payments;
pub mod prelude;
pub mod repository;
