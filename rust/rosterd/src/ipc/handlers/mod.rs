pub mod core;
pub mod exports;
pub mod imports;
pub mod setup;
pub mod students;
