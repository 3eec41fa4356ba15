//! Opportunity Scan math utilities.

pub mod math;

pub use math::stable::*;
pub use math::summary::*;
