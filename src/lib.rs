pub mod allocator;
pub mod crd;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod pool;
pub mod range;
pub mod service;

pub use allocator::{Allocation, Allocator, OrphanedAllocation, PoolSource};
pub use crd::{ServiceGroup, ServiceGroupLocalSpec, ServiceGroupSpec};
pub use error::Error;
