//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed target address
///
/// Overlay targets hand out three kinds of address for the same byte of code:
/// the storage address the linker assigned, the cache address it is currently
/// executing at, and the alternate addresses of a multi-group copy. All of them
/// are plain `Address` values; the translation helpers in this crate say which
/// space a value belongs to.
///
/// ## Example
///
/// ```rust
/// use ovly_core::types::Address;
///
/// let base = Address::from(0x1000);
/// let pc = base + 0x10;
/// assert_eq!(pc.offset_from(base), Some(0x10));
/// assert_eq!(format!("{pc}"), "0x1010");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address, also the "unknown" sentinel returned by optional
    /// policy queries.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts).
    ///
    /// ```rust
    /// use ovly_core::types::Address;
    ///
    /// const CACHE_BASE: Address = Address::new(0x8000_0000);
    /// assert_eq!(CACHE_BASE.value(), 0x8000_0000);
    /// ```
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use ovly_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    #[must_use]
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Distance from `base` up to this address
    ///
    /// Returns `None` when this address lies below `base`.
    ///
    /// ```rust
    /// use ovly_core::types::Address;
    ///
    /// let addr = Address::from(0x2008);
    /// assert_eq!(addr.offset_from(Address::from(0x2000)), Some(8));
    /// assert_eq!(addr.offset_from(Address::from(0x3000)), None);
    /// ```
    #[must_use]
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }

    /// Truncate to the 32-bit address space of an RV32 target.
    #[must_use]
    pub const fn low_32(self) -> Self
    {
        Address(self.0 & 0xffff_ffff)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
