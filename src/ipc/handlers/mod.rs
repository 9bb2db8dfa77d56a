pub mod backup;
pub mod core;
pub mod trades;
