//! Storage layer implementation
//!
//! Fixed-size page file with append-only allocation and a store-owned page cache

pub mod page_store;
mod region;

pub use page_store::{PageId, PageStore, StoreStats, ROOT_PAGE_ID};
