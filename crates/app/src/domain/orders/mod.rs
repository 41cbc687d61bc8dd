//! Orders

pub mod records;
pub mod repository;
