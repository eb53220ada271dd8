//! # Target Memory Access
//!
//! The collaborator a target-aware policy uses to look at the debuggee.
//!
//! The engine never reads target memory itself. Policies such as
//! [`ComrvPolicy`](crate::comrv::ComrvPolicy) are handed a [`TargetMemory`]
//! implementation by the host debugger (backed by its memory cache, a GDB
//! remote connection, a core file, ...). [`MemoryReader`] layers the small
//! fixed-width little-endian reads overlay runtimes need on top of it.

use crate::error::{OverlayError, Result};
use crate::types::Address;

/// Debuggee access provided by the host.
pub trait TargetMemory
{
    /// Read exactly `length` bytes starting at `address`.
    ///
    /// ## Errors
    ///
    /// `Memory` if the range cannot be read.
    fn read_memory(&self, address: Address, length: usize) -> Result<Vec<u8>>;

    /// Address of the named symbol, if the program defines it.
    fn symbol_address(&self, name: &str) -> Option<Address>;

    /// Evaluate a source-level expression (e.g. `g_ctl.table[3].id`) to an
    /// integer, if the host can.
    fn evaluate_integer(&self, expression: &str) -> Option<i64>;

    /// Current value of the named register (e.g. `t3`).
    fn read_register(&self, name: &str) -> Option<u64>;
}

impl<T: TargetMemory + ?Sized> TargetMemory for &T
{
    fn read_memory(&self, address: Address, length: usize) -> Result<Vec<u8>>
    {
        (**self).read_memory(address, length)
    }

    fn symbol_address(&self, name: &str) -> Option<Address>
    {
        (**self).symbol_address(name)
    }

    fn evaluate_integer(&self, expression: &str) -> Option<i64>
    {
        (**self).evaluate_integer(expression)
    }

    fn read_register(&self, name: &str) -> Option<u64>
    {
        (**self).read_register(name)
    }
}

/// Little-endian fixed-width reads on a 32-bit target.
///
/// Addresses are truncated to 32 bits before every read.
pub struct MemoryReader<'a, T: ?Sized>
{
    memory: &'a T,
}

impl<'a, T: TargetMemory + ?Sized> MemoryReader<'a, T>
{
    /// Wrap a target.
    pub fn new(memory: &'a T) -> Self
    {
        Self { memory }
    }

    fn read_le<const N: usize>(&self, address: Address) -> Result<[u8; N]>
    {
        let address = address.low_32();
        let bytes = self.memory.read_memory(address, N)?;
        bytes.as_slice().try_into().map_err(|_| OverlayError::Memory {
            address,
            length: N,
            details: format!("short read of {} bytes", bytes.len()),
        })
    }

    /// Read an unsigned byte.
    ///
    /// ## Errors
    ///
    /// `Memory` if the read fails or comes back short.
    pub fn read_u8(&self, address: Address) -> Result<u8>
    {
        Ok(self.read_le::<1>(address)?[0])
    }

    /// Read an unsigned little-endian halfword.
    ///
    /// ## Errors
    ///
    /// `Memory` if the read fails or comes back short.
    pub fn read_u16(&self, address: Address) -> Result<u16>
    {
        Ok(u16::from_le_bytes(self.read_le::<2>(address)?))
    }

    /// Read an unsigned little-endian word.
    ///
    /// ## Errors
    ///
    /// `Memory` if the read fails or comes back short.
    pub fn read_u32(&self, address: Address) -> Result<u32>
    {
        Ok(u32::from_le_bytes(self.read_le::<4>(address)?))
    }
}
