//! Analysis of finished task sets.

pub mod aggregator;

pub use aggregator::*;
