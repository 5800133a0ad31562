pub mod cursor_repository;
pub mod database;

pub use cursor_repository::{CursorRepository, CursorStore};
pub use database::Database;
