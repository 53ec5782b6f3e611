pub mod employee_cache;

pub use employee_cache::CachedDirectory;
