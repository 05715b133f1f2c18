// Re-export the StateStore struct
pub mod core;
mod entry;
mod schema;

pub use self::core::StateStore;
