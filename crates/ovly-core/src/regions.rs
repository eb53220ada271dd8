//! Configured overlay storage and cache regions.
//!
//! These are a hint, not an input to translation: they let a host decide
//! cheaply whether an address is worth running through the overlay machinery
//! at all (e.g. before symbolizing a PC or validating a breakpoint address).

use crate::types::{Address, AddressRegion};

/// Storage and cache regions known for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionConfig
{
    storage: Vec<AddressRegion>,
    cache: Vec<AddressRegion>,
}

impl RegionConfig
{
    /// Create a configuration with no regions.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Replace the storage regions.
    pub fn set_storage_regions(&mut self, regions: Vec<AddressRegion>)
    {
        self.storage = regions;
    }

    /// Replace the cache regions.
    pub fn set_cache_regions(&mut self, regions: Vec<AddressRegion>)
    {
        self.cache = regions;
    }

    /// Regions overlays are loaded from.
    #[must_use]
    pub fn storage_regions(&self) -> &[AddressRegion]
    {
        &self.storage
    }

    /// Regions overlays execute in.
    #[must_use]
    pub fn cache_regions(&self) -> &[AddressRegion]
    {
        &self.cache
    }

    /// `true` if `address` is inside any storage region.
    #[must_use]
    pub fn is_storage_address(&self, address: Address) -> bool
    {
        self.storage.iter().any(|region| region.contains(address))
    }

    /// `true` if `address` is inside any cache region.
    #[must_use]
    pub fn is_cache_address(&self, address: Address) -> bool
    {
        self.cache.iter().any(|region| region.contains(address))
    }

    /// `true` once at least one region of either kind is known.
    #[must_use]
    pub fn is_configured(&self) -> bool
    {
        !self.storage.is_empty() || !self.cache.is_empty()
    }
}
