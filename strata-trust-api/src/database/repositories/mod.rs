//! Database repository implementations using SQLx

pub mod trust_repository;

pub use trust_repository::SqlTrustRepository;
