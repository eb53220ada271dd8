//! # Types
//!
//! Address and region types shared by every overlay component.

pub mod address;
pub mod region;

// Re-export all public types
pub use address::Address;
pub use region::AddressRegion;
