mod item_store;
mod persist;
mod processed_ids;

pub use item_store::ItemStore;
pub use processed_ids::ProcessedIdStore;
