//! # Overlay Mappings
//!
//! The set of overlays currently copied from storage into the cache.
//!
//! The table is rebuilt from scratch on every refresh: the policy streams the
//! active mappings into a [`MappingSink`] and the table takes them over only if
//! the policy reports success. Mappings are never merged with the previous
//! contents, so nothing stale survives a refresh.

use std::fmt;

use tracing::{debug, trace, warn};

use crate::policy::OverlayPolicy;
use crate::types::{Address, AddressRegion};

/// An active storage → execution correspondence for one overlay unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping
{
    src: Address,
    dst: Address,
    len: u64,
}

impl Mapping
{
    /// Create a mapping of `len` bytes from storage `src` to cache `dst`.
    ///
    /// Returns `None` if `len` is zero.
    #[must_use]
    pub fn new(src: Address, dst: Address, len: u64) -> Option<Self>
    {
        (len > 0).then_some(Self { src, dst, len })
    }

    /// Storage (load) address of the overlay.
    #[must_use]
    pub const fn src(&self) -> Address
    {
        self.src
    }

    /// Address the overlay currently executes at.
    #[must_use]
    pub const fn dst(&self) -> Address
    {
        self.dst
    }

    /// Length of the overlay in bytes.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> u64
    {
        self.len
    }

    /// `dst <= address < dst + len`
    #[must_use]
    pub fn contains_mapped(&self, address: Address) -> bool
    {
        address.offset_from(self.dst).is_some_and(|offset| offset < self.len)
    }

    /// `src <= address < src + len`
    #[must_use]
    pub fn contains_storage(&self, address: Address) -> bool
    {
        address.offset_from(self.src).is_some_and(|offset| offset < self.len)
    }

    /// Execution-side extent of the mapping.
    #[must_use]
    pub fn mapped_region(&self) -> Option<AddressRegion>
    {
        AddressRegion::with_len(self.dst, self.len).ok()
    }
}

impl fmt::Display for Mapping
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} -> {} (0x{:x} bytes)", self.src, self.dst, self.len)
    }
}

/// Append-only collector handed to [`OverlayPolicy::read_mappings`].
///
/// The sink only lives for the duration of one refresh; the policy cannot
/// keep it.
#[derive(Debug, Default)]
pub struct MappingSink
{
    mappings: Vec<Mapping>,
}

impl MappingSink
{
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record one active mapping.
    ///
    /// Zero-length mappings cannot contain any address and are dropped.
    pub fn add(&mut self, src: Address, dst: Address, len: u64)
    {
        trace!(%src, %dst, len, "overlay mapping reported");
        match Mapping::new(src, dst, len) {
            Some(mapping) => self.mappings.push(mapping),
            None => warn!(%src, %dst, "ignoring zero-length overlay mapping"),
        }
    }

    /// Number of mappings collected so far.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.mappings.len()
    }

    /// `true` if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.mappings.is_empty()
    }

    fn into_mappings(self) -> Vec<Mapping>
    {
        self.mappings
    }
}

/// Currently active mappings, in the order the policy reported them.
#[derive(Debug, Default, Clone)]
pub struct MappingTable
{
    mappings: Vec<Mapping>,
}

impl MappingTable
{
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Replace the table with the policy's current view of the mappings.
    ///
    /// A policy failure or a `false` answer leaves the table empty; that is a
    /// normal state (no overlays active yet) and is only logged.
    ///
    /// Returns the number of mappings now held.
    pub fn refresh<P: OverlayPolicy + ?Sized>(&mut self, policy: &mut P) -> usize
    {
        self.mappings.clear();

        let mut sink = MappingSink::new();
        match policy.read_mappings(&mut sink) {
            Ok(true) => {
                self.mappings = sink.into_mappings();
                debug!(count = self.mappings.len(), "overlay mappings refreshed");
            }
            Ok(false) => {
                debug!(discarded = sink.len(), "overlay policy reported no mappings");
            }
            Err(err) => {
                debug!(error = %err, discarded = sink.len(), "reading overlay mappings failed");
            }
        }

        self.mappings.len()
    }

    /// Drop every mapping.
    pub fn clear(&mut self)
    {
        self.mappings.clear();
    }

    /// First mapping whose execution range contains `address`.
    #[must_use]
    pub fn query(&self, address: Address) -> Option<&Mapping>
    {
        self.mappings.iter().find(|mapping| mapping.contains_mapped(address))
    }

    /// Translate an execution address back to its storage address.
    ///
    /// Addresses outside every mapping are returned unchanged.
    #[must_use]
    pub fn to_storage(&self, address: Address) -> Address
    {
        self.query(address)
            .and_then(|mapping| address.offset_from(mapping.dst).map(|offset| mapping.src + offset))
            .unwrap_or(address)
    }

    /// Every execution address the storage address `address` is currently
    /// mapped at. Empty if its overlay is not mapped.
    #[must_use]
    pub fn mapped_addresses(&self, address: Address) -> Vec<Address>
    {
        self.mappings
            .iter()
            .filter(|mapping| mapping.contains_storage(address))
            .filter_map(|mapping| address.offset_from(mapping.src).map(|offset| mapping.dst + offset))
            .collect()
    }

    /// `true` if the storage address `address` is currently mapped anywhere.
    #[must_use]
    pub fn is_mapped(&self, address: Address) -> bool
    {
        self.mappings.iter().any(|mapping| mapping.contains_storage(address))
    }

    /// All mappings, in the order the policy reported them.
    #[must_use]
    pub fn mappings(&self) -> &[Mapping]
    {
        &self.mappings
    }

    /// Number of mappings.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.mappings.len()
    }

    /// `true` if no overlay is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.mappings.is_empty()
    }
}
