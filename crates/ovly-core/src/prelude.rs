//! Common module for library exports

pub use crate::comrv::{ComrvConfig, ComrvPolicy};
pub use crate::error::{OverlayError, Result};
pub use crate::events::{event_channel, OverlayEvent};
pub use crate::manager::OverlayManager;
pub use crate::mapping::{Mapping, MappingSink};
pub use crate::memory::TargetMemory;
pub use crate::policy::{OverlayPolicy, PolicyError, PolicyResult, RegionData, SymbolResolver};
pub use crate::symbols::ElfSymbolTable;
pub use crate::types::{Address, AddressRegion};
