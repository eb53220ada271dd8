//! # Multi-Group Table
//!
//! Routines that the overlay toolchain replicated into more than one overlay
//! group.
//!
//! A multi-group routine has one primary address (where the debug information
//! places it) and one or more alternate addresses, each fronting a copy of
//! the same body. The table is built lazily from the policy, at most once per
//! session, and is all-or-nothing: if any group fails to load, nothing is kept
//! and the next call tries again.

use tracing::{debug, trace, warn};

use crate::error::{OverlayError, Result};
use crate::policy::{OverlayPolicy, PolicyError, SymbolResolver};
use crate::types::Address;

/// One replicated routine: its primary extent plus every alternate entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiGroupDescriptor
{
    base: Address,
    len: u64,
    alternates: Vec<Address>,
}

impl MultiGroupDescriptor
{
    /// Create a descriptor for a routine of `len` bytes at `base`.
    #[must_use]
    pub fn new(base: Address, len: u64, alternates: Vec<Address>) -> Self
    {
        Self { base, len, alternates }
    }

    /// Primary (canonical) address of the routine.
    #[must_use]
    pub const fn base(&self) -> Address
    {
        self.base
    }

    /// Length of the routine body, shared by every copy.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> u64
    {
        self.len
    }

    /// Alternate entry points, in the order the policy reported them.
    #[must_use]
    pub fn alternates(&self) -> &[Address]
    {
        &self.alternates
    }

    /// Offset of `address` inside the primary range, if it is inside.
    #[must_use]
    pub fn primary_offset(&self, address: Address) -> Option<u64>
    {
        address.offset_from(self.base).filter(|offset| *offset < self.len)
    }

    /// The primary address equivalent to `address` if it lies in one of the
    /// alternate ranges.
    #[must_use]
    pub fn primary_for_alternate(&self, address: Address) -> Option<Address>
    {
        self.alternates.iter().find_map(|alt| {
            address
                .offset_from(*alt)
                .filter(|offset| *offset < self.len)
                .map(|offset| self.base + offset)
        })
    }

    fn overlaps(&self, other: &Self) -> bool
    {
        self.base.value() < other.base.value().saturating_add(other.len)
            && other.base.value() < self.base.value().saturating_add(self.len)
    }
}

/// Result of [`MultiGroupTable::find_alternates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlternateMatch<'a>
{
    /// Alternate entry points of the routine that was hit.
    pub alternates: &'a [Address],
    /// Offset of the queried address from the routine's primary address.
    pub offset: u64,
}

impl AlternateMatch<'_>
{
    /// The queried address translated into every alternate copy.
    #[must_use]
    pub fn addresses(&self) -> Vec<Address>
    {
        self.alternates.iter().map(|alt| *alt + self.offset).collect()
    }
}

#[derive(Debug, Clone, Default)]
enum LoadState
{
    #[default]
    Unloaded,
    Loaded(Vec<MultiGroupDescriptor>),
}

/// Lazily built table of multi-group routines, indexed by multi-group number.
#[derive(Debug, Clone, Default)]
pub struct MultiGroupTable
{
    state: LoadState,
}

impl MultiGroupTable
{
    /// Create an unloaded table.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Build a loaded table directly from descriptors.
    #[must_use]
    pub fn from_descriptors(descriptors: Vec<MultiGroupDescriptor>) -> Self
    {
        Self {
            state: LoadState::Loaded(descriptors),
        }
    }

    /// `-1` while unloaded, otherwise the number of descriptors.
    #[must_use]
    pub fn count(&self) -> i64
    {
        match &self.state {
            LoadState::Unloaded => -1,
            LoadState::Loaded(descriptors) => i64::try_from(descriptors.len()).unwrap_or(i64::MAX),
        }
    }

    /// `true` once a definitive answer has been cached.
    #[must_use]
    pub fn is_loaded(&self) -> bool
    {
        matches!(self.state, LoadState::Loaded(_))
    }

    /// Loaded descriptors (empty while unloaded).
    #[must_use]
    pub fn descriptors(&self) -> &[MultiGroupDescriptor]
    {
        match &self.state {
            LoadState::Unloaded => &[],
            LoadState::Loaded(descriptors) => descriptors,
        }
    }

    /// Descriptor for multi-group `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&MultiGroupDescriptor>
    {
        self.descriptors().get(index)
    }

    /// Forget the table so the next query rebuilds it.
    pub fn invalidate(&mut self)
    {
        self.state = LoadState::Unloaded;
    }

    /// Load the table from the policy if that has not happened yet.
    ///
    /// Returns `true` if the target has at least one multi-group.
    ///
    /// ## Errors
    ///
    /// Any failure while loading an individual group (policy error, empty
    /// address list, primary address that is not a routine start) aborts the
    /// load. The table stays unloaded.
    pub fn ensure_loaded<P, S>(&mut self, policy: &mut P, symbols: &S) -> Result<bool>
    where
        P: OverlayPolicy + ?Sized,
        S: SymbolResolver + ?Sized,
    {
        if let LoadState::Loaded(descriptors) = &self.state {
            return Ok(!descriptors.is_empty());
        }

        let count = policy
            .multi_group_count()
            .map_err(|err| OverlayError::policy("multi_group_count", err))?;
        if count < 0 {
            debug!(count, "multi-group count not known yet");
            return Ok(false);
        }

        let count = usize::try_from(count)
            .map_err(|_| OverlayError::InvalidConfig(format!("multi-group count {count} is too large")))?;
        // The count is untrusted until every group has loaded.
        let mut descriptors = Vec::new();
        for index in 0..count {
            descriptors.push(Self::load_group(policy, symbols, index)?);
        }
        Self::warn_on_overlaps(&descriptors);

        debug!(count, "multi-group table loaded");
        self.state = LoadState::Loaded(descriptors);
        Ok(count > 0)
    }

    fn load_group<P, S>(policy: &mut P, symbols: &S, index: usize) -> Result<MultiGroupDescriptor>
    where
        P: OverlayPolicy + ?Sized,
        S: SymbolResolver + ?Sized,
    {
        let addresses = policy.multi_group_addresses(index).map_err(|err| match err {
            PolicyError::Unsupported => OverlayError::MissingCapability("multi_group_addresses"),
            failed => OverlayError::policy("multi_group_addresses", failed),
        })?;
        trace!(index, ?addresses, "multi-group addresses");

        let (&primary, alternates) = addresses.split_first().ok_or(OverlayError::EmptyMultiGroup { index })?;

        let (start, end) = symbols
            .routine_bounds(primary)
            .ok_or(OverlayError::UnresolvedRoutine { index, address: primary })?;
        if start != primary {
            return Err(OverlayError::NotRoutineStart {
                index,
                address: primary,
                start,
            });
        }
        let len = end
            .offset_from(start)
            .filter(|len| *len > 0)
            .ok_or(OverlayError::EmptyRoutine { index, address: primary })?;

        debug!(index, base = %start, end = %end, alternates = alternates.len(), "multi-group function");
        Ok(MultiGroupDescriptor::new(start, len, alternates.to_vec()))
    }

    fn warn_on_overlaps(descriptors: &[MultiGroupDescriptor])
    {
        for (i, first) in descriptors.iter().enumerate() {
            for (j, second) in descriptors.iter().enumerate().skip(i + 1) {
                if first.overlaps(second) {
                    warn!(
                        first = i,
                        second = j,
                        base = %second.base(),
                        "overlapping multi-group primary ranges, the lower index wins"
                    );
                }
            }
        }
    }

    /// Alternates of the routine whose primary range contains `address`.
    ///
    /// Only the primary range is searched: an address inside an alternate copy
    /// does not resolve its siblings here (see [`Self::to_primary`]).
    #[must_use]
    pub fn find_alternates(&self, address: Address) -> Option<AlternateMatch<'_>>
    {
        self.descriptors().iter().find_map(|desc| {
            desc.primary_offset(address).map(|offset| AlternateMatch {
                alternates: desc.alternates(),
                offset,
            })
        })
    }

    /// Map `address` to the primary copy of its routine.
    ///
    /// Addresses already in a primary range, and addresses outside every
    /// multi-group, are returned unchanged.
    #[must_use]
    pub fn to_primary(&self, address: Address) -> Address
    {
        for desc in self.descriptors() {
            if desc.primary_offset(address).is_some() {
                return address;
            }
            if let Some(primary) = desc.primary_for_alternate(address) {
                return primary;
            }
        }
        address
    }
}
