//! ComRV overlay tokens.
//!
//! A token is the 32-bit handle ComRV uses to call into an overlay:
//!
//! | Bits | Field |
//! |---|---|
//! | 0 | overlay flag (always set for overlay calls) |
//! | 1..=16 | overlay group id |
//! | 17..=26 | function offset within the group, in 4-byte units |
//! | 31 | multi-group flag |

use std::fmt;

/// A decoded view over a raw ComRV token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayToken(u32);

impl OverlayToken
{
    /// Wrap a raw token.
    #[must_use]
    pub const fn new(raw: u32) -> Self
    {
        Self(raw)
    }

    /// Raw token value.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }

    /// `true` if bit 0 marks this as an overlay token.
    #[must_use]
    pub const fn is_overlay(self) -> bool
    {
        self.0 & 0x1 == 0x1
    }

    /// `true` if bit 31 marks this as a multi-group token.
    #[must_use]
    pub const fn is_multi_group(self) -> bool
    {
        (self.0 >> 31) & 0x1 == 0x1
    }

    /// Overlay group id.
    #[must_use]
    pub const fn group_id(self) -> u32
    {
        (self.0 >> 1) & 0xffff
    }

    /// The function offset field, still in 4-byte units.
    #[must_use]
    pub const fn function_offset_units(self) -> u32
    {
        (self.0 >> 17) & 0x3ff
    }

    /// Byte offset of the function within its group.
    #[must_use]
    pub fn function_offset(self) -> u64
    {
        u64::from(self.function_offset_units()) * 4
    }
}

impl From<u32> for OverlayToken
{
    fn from(raw: u32) -> Self
    {
        Self(raw)
    }
}

impl fmt::Display for OverlayToken
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}
