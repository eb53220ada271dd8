//! # ovly-core
//!
//! Overlay mapping and multi-group address translation for debuggers of
//! memory-constrained targets.
//!
//! Targets whose code does not fit in fast execution memory copy ("map")
//! overlay groups from a storage area into a small cache on demand. A
//! debugger for such a target has to know, at any moment, which storage
//! bytes are visible at which cache address, and which routines exist in
//! several copies ("multi-groups"). This crate provides:
//! - The mapping table, rebuilt from the target on every overlay event
//! - The lazily built multi-group table and primary/alternate translation
//! - Storage and cache region bookkeeping
//! - A reference policy for the ComRV overlay engine
//! - An ELF symbol-table resolver for routine bounds
//!
//! ## Collaborators
//!
//! The engine never touches the target directly. The host supplies:
//! - an [`OverlayPolicy`] describing its overlay runtime,
//! - a [`SymbolResolver`] giving routine bounds,
//! - and, for [`comrv::ComrvPolicy`], a [`memory::TargetMemory`].

pub mod comrv;
pub mod error;
pub mod events;
pub mod manager;
pub mod mapping;
pub mod memory;
pub mod multi_group;
pub mod policy;
pub mod prelude;
pub mod regions;
pub mod symbols;
pub mod types;

// Re-export commonly used types
pub use error::{OverlayError, Result};
pub use manager::OverlayManager;
pub use policy::{OverlayPolicy, SymbolResolver};
pub use types::{Address, AddressRegion};
