pub mod accounts;
pub mod catalog;
pub mod core;
pub mod setup;
pub mod students;
