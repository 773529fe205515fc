pub mod logs;
pub mod summary;
