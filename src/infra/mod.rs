//! Concrete adapters behind the `app::ports` traits

pub mod firebase_rest;
pub mod memory_tree;
pub mod memory_warehouse;
pub mod sqlite_warehouse;

pub use firebase_rest::FirebaseRestStore;
pub use memory_tree::MemoryTreeStore;
pub use memory_warehouse::MemoryWarehouse;
pub use sqlite_warehouse::SqliteWarehouse;
