//! Half-open address ranges.

use std::fmt;

use crate::error::{OverlayError, Result};
use crate::types::Address;

/// A half-open address range `[start, end)`
///
/// Used for the overlay storage area, the overlay cache, and the extent of
/// a routine. A region always covers at least one byte: construction rejects
/// `end <= start`.
///
/// ## Example
///
/// ```rust
/// use ovly_core::types::{Address, AddressRegion};
///
/// let cache = AddressRegion::new(Address::from(0x1000), Address::from(0x2000))?;
/// assert!(cache.contains(Address::from(0x1000))); // start (inclusive)
/// assert!(cache.contains(Address::from(0x1fff)));
/// assert!(!cache.contains(Address::from(0x2000))); // end (exclusive)
/// assert_eq!(cache.len(), 0x1000);
/// # Ok::<(), ovly_core::error::OverlayError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRegion
{
    start: Address,
    end: Address,
}

impl AddressRegion
{
    /// Create a region covering `[start, end)`.
    ///
    /// ## Errors
    ///
    /// `InvalidRegion` if `end <= start`.
    pub fn new(start: Address, end: Address) -> Result<Self>
    {
        if end <= start {
            return Err(OverlayError::InvalidRegion { start, end });
        }
        Ok(Self { start, end })
    }

    /// Create a region of `len` bytes starting at `start`.
    ///
    /// ## Errors
    ///
    /// `InvalidRegion` if `len` is zero or the region would wrap the address space.
    pub fn with_len(start: Address, len: u64) -> Result<Self>
    {
        let end = start.checked_add(len).ok_or(OverlayError::InvalidRegion { start, end: start })?;
        Self::new(start, end)
    }

    /// First address inside the region.
    #[must_use]
    pub const fn start(&self) -> Address
    {
        self.start
    }

    /// First address past the end of the region.
    #[must_use]
    pub const fn end(&self) -> Address
    {
        self.end
    }

    /// Size of the region in bytes (never zero).
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> u64
    {
        self.end.value() - self.start.value()
    }

    /// `start <= address < end`
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }

    /// Offset of `address` from the start of the region, if it is inside.
    #[must_use]
    pub fn offset_of(&self, address: Address) -> Option<u64>
    {
        if self.contains(address) {
            address.offset_from(self.start)
        } else {
            None
        }
    }
}

impl fmt::Display for AddressRegion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl TryFrom<(Address, Address)> for AddressRegion
{
    type Error = OverlayError;

    fn try_from((start, end): (Address, Address)) -> Result<Self>
    {
        Self::new(start, end)
    }
}
