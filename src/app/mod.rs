// Application boundaries: collaborator ports and process wiring

pub mod context;
pub mod ports;

pub use context::AppContext;
pub use ports::{HierarchicalStore, Row, Warehouse};
