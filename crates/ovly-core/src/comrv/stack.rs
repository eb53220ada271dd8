//! ComRV stack frames.
//!
//! ComRV keeps its own stack, pointed to by `t3`, with one frame per call that
//! went through the overlay engine. Frame layout:
//!
//! | Offset | Width | Field |
//! |---|---|---|
//! | 0 | 4 | return address |
//! | 4 | 4 | callee token |
//! | 8 | 2 | frame size (`0xdead` for the outermost frame) |
//! | 10 | 1 | alignment, in cache entries |
//! | 11 | 1 | multi-group index (multi-group builds, 12-byte frames) |
//! | 14 | 2 | multi-group index (multi-group builds, larger frames) |

use std::fmt;

use super::token::OverlayToken;
use crate::error::{OverlayError, Result};
use crate::memory::{MemoryReader, TargetMemory};
use crate::types::Address;

/// Frame size marking the outermost ComRV frame.
pub const END_OF_STACK: u16 = 0xdead;

/// One raw frame of the ComRV stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComrvStackFrame
{
    /// Address of the frame (the value `t3` had when it was current).
    pub address: Address,
    /// Return address stored in the frame.
    pub return_address: Address,
    /// Token of the overlay function that was called.
    pub token: OverlayToken,
    /// Distance to the previous frame in bytes.
    pub size: u16,
    /// Alignment field, in cache entries.
    pub align_units: u8,
    /// Index into the multi-group table, `-1` when the token is not a
    /// multi-group token. Always `0` in builds without multi-group support.
    pub multi_group_index: i16,
}

impl ComrvStackFrame
{
    /// Read the frame at `address`.
    ///
    /// ## Errors
    ///
    /// `Memory` if the frame cannot be read.
    pub fn read<T: TargetMemory + ?Sized>(
        reader: &MemoryReader<'_, T>,
        address: Address,
        multi_group: bool,
    ) -> Result<Self>
    {
        let return_address = reader.read_u32(address)?;
        let token = reader.read_u32(address + 4)?;
        let size = reader.read_u16(address + 8)?;
        let align_units = reader.read_u8(address + 10)?;

        let multi_group_index = if !multi_group {
            0
        } else if size == 12 {
            i16::from(i8::from_le_bytes([reader.read_u8(address + 11)?]))
        } else {
            i16::from_le_bytes(reader.read_u16(address + 14)?.to_le_bytes())
        };

        Ok(Self {
            address: address.low_32(),
            return_address: Address::from(u64::from(return_address)),
            token: OverlayToken::new(token),
            size,
            align_units,
            multi_group_index,
        })
    }

    /// `true` for the outermost frame.
    #[must_use]
    pub fn is_outermost(&self) -> bool
    {
        self.size == END_OF_STACK
    }

    /// Alignment in bytes.
    #[must_use]
    pub fn alignment(&self, entry_size: u64) -> u64
    {
        u64::from(self.align_units) * entry_size
    }
}

/// Walk the raw frame chain starting at `start` until the outermost frame.
///
/// ## Errors
///
/// `Memory` if a frame cannot be read; `Comrv` on a zero sized frame or when
/// more than `max_frames` frames are visited.
pub fn walk_frames<T: TargetMemory + ?Sized>(
    reader: &MemoryReader<'_, T>,
    start: Address,
    multi_group: bool,
    max_frames: usize,
) -> Result<Vec<ComrvStackFrame>>
{
    let mut frames = Vec::new();
    let mut address = start;

    loop {
        if frames.len() >= max_frames {
            return Err(OverlayError::Comrv(format!(
                "no end of stack marker within {max_frames} frames of {start}"
            )));
        }
        let frame = ComrvStackFrame::read(reader, address, multi_group)?;
        frames.push(frame);
        if frame.is_outermost() {
            break;
        }
        if frame.size == 0 {
            return Err(OverlayError::Comrv(format!("zero sized stack frame at {}", frame.address)));
        }
        address = address + u64::from(frame.size);
    }

    Ok(frames)
}

/// Offset of a return address within its overlay group.
///
/// `return_address` is the cache address execution returns to. The overlay
/// was loaded at a cache address aligned to `alignment`, and groups never
/// exceed `max_group_size` (a power of two), so the offset is recovered by
/// masking.
#[must_use]
pub fn group_return_offset(return_address: Address, function_offset: u64, alignment: u64, max_group_size: u64) -> u64
{
    let delta = return_address
        .value()
        .wrapping_sub(function_offset)
        .wrapping_sub(alignment);
    function_offset.wrapping_add(delta & max_group_size.wrapping_sub(1))
}

/// Result of unwinding one ComRV frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwoundFrame
{
    /// Where the caller resumes; a storage address when the caller is an overlay.
    pub return_address: Address,
    /// Address of the caller's ComRV frame.
    pub frame_address: Address,
}

/// A raw stack listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComrvStack
{
    /// Whether the frames carry multi-group indices.
    pub multi_group: bool,
    /// Alignment unit in bytes.
    pub entry_size: u64,
    /// Frames, innermost first.
    pub frames: Vec<ComrvStackFrame>,
}

impl fmt::Display for ComrvStack
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.multi_group {
            writeln!(
                f,
                "{:>5} {:>10} {:>10} {:>10} {:>10} {:>6} {:>6}",
                "Frame", "Address", "R/A", "Token", "Alignment", "M/G", "Size"
            )?;
        } else {
            writeln!(
                f,
                "{:>5} {:>10} {:>10} {:>10} {:>10} {:>6}",
                "Frame", "Address", "R/A", "Token", "Alignment", "Size"
            )?;
        }

        for (depth, frame) in self.frames.iter().enumerate() {
            write!(
                f,
                "{:>5} {:>10} {:>10} {:>10} {:>10}",
                format!("#{depth}"),
                format!("0x{:08x}", frame.address.value()),
                format!("0x{:08x}", frame.return_address.value()),
                frame.token.to_string(),
                format!("0x{:08x}", frame.alignment(self.entry_size)),
            )?;
            if self.multi_group {
                write!(f, " {:>6}", format!("0x{:04x}", frame.multi_group_index))?;
            }
            writeln!(f, " {:>6}", format!("0x{:x}", frame.size))?;
        }
        Ok(())
    }
}
