//! Storage seam: record-index trees and their allocator.
//!
//! The partition core does not own records or durability; it owns refcounted
//! handles to record-index trees and the allocator that creates, resumes,
//! and reclaims them across restarts.

pub mod tree;

pub use tree::{RecordTree, TreeAllocator, TreeSlot};
