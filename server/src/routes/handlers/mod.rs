pub mod classify;
pub mod predict;
pub mod sync;
pub mod user_data;
