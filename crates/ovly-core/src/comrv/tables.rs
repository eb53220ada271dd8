//! # ComRV Tables
//!
//! Parsers for the structures ComRV keeps in target memory.
//!
//! ComRV copies its overlay tables into the last entry of the overlay cache
//! when it initialises. That entry starts with the group offset table (one
//! 16-bit entry per group, scaled by the cache entry size) and, in
//! multi-group builds, continues with the multi-group table (32-bit tokens,
//! each multi-group terminated by a zero token, the whole table terminated by
//! an empty multi-group).

use tracing::trace;

use super::token::OverlayToken;
use crate::error::{OverlayError, Result};
use crate::memory::{MemoryReader, TargetMemory};
use crate::types::{Address, AddressRegion};

/// Static description of the overlay cache.
///
/// The cache is divided into entries of `entry_size` bytes; the last entry
/// holds the overlay tables and is not available to overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout
{
    region: AddressRegion,
    entry_size: u64,
}

impl CacheLayout
{
    /// Describe the cache `region` split into `entry_size` byte entries.
    #[must_use]
    pub fn new(region: AddressRegion, entry_size: u64) -> Self
    {
        Self { region, entry_size }
    }

    /// Whole cache, tables entry included.
    #[must_use]
    pub fn region(&self) -> AddressRegion
    {
        self.region
    }

    /// First address of the cache.
    #[must_use]
    pub fn base(&self) -> Address
    {
        self.region.start()
    }

    /// Size of one entry in bytes.
    #[must_use]
    pub fn entry_size(&self) -> u64
    {
        self.entry_size
    }

    /// Size of the tables area, always one entry.
    #[must_use]
    pub fn tables_size(&self) -> u64
    {
        self.entry_size
    }

    /// Address of the overlay tables.
    #[must_use]
    pub fn tables_base(&self) -> Address
    {
        self.region.end() - self.tables_size()
    }

    /// Number of entries in the cache, tables entry included.
    #[must_use]
    pub fn total_entries(&self) -> u64
    {
        self.region.len() / self.entry_size
    }

    /// Number of entries overlays can be loaded into.
    #[must_use]
    pub fn working_entries(&self) -> u64
    {
        self.total_entries().saturating_sub(self.tables_size() / self.entry_size)
    }

    /// Address of cache entry `index`.
    #[must_use]
    pub fn entry_address(&self, index: u64) -> Address
    {
        self.base() + index * self.entry_size
    }
}

/// One overlay group in the storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayGroup
{
    /// Storage address of the first byte of the group.
    pub base: Address,
    /// Size of the group in bytes.
    pub size: u64,
}

impl OverlayGroup
{
    /// First storage address past the group.
    #[must_use]
    pub fn end(&self) -> Address
    {
        self.base + self.size
    }
}

/// One multi-group: the tokens of every copy of a replicated function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiGroupEntry
{
    /// Sequence number of the multi-group.
    pub number: usize,
    /// Index of the first token in the multi-group table.
    pub index: usize,
    /// Member tokens; the first one is the primary copy.
    pub tokens: Vec<OverlayToken>,
}

/// Everything parsed from the overlay tables entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupTables
{
    groups: Vec<OverlayGroup>,
    multi_groups: Vec<MultiGroupEntry>,
    tokens: Vec<u32>,
}

impl GroupTables
{
    /// Parse the tables of `cache` from target memory.
    ///
    /// `multi_group_offset` is the byte offset of the multi-group table from the
    /// start of the tables, `None` for builds without multi-group support.
    ///
    /// ## Errors
    ///
    /// `Memory` if a read fails, `Comrv` if the group table is malformed.
    pub fn read<T: TargetMemory + ?Sized>(
        reader: &MemoryReader<'_, T>,
        cache: &CacheLayout,
        storage_start: Address,
        multi_group_offset: Option<u64>,
    ) -> Result<Self>
    {
        let table_start = cache.tables_base();
        let table_end = table_start + cache.tables_size();
        let group_end = multi_group_offset.map_or(table_end, |offset| table_start + offset);

        let groups = read_groups(reader, table_start, group_end, storage_start, cache.entry_size())?;
        let (multi_groups, tokens) = match multi_group_offset {
            Some(offset) => read_multi_groups(reader, table_start + offset, table_end)?,
            None => (Vec::new(), Vec::new()),
        };

        trace!(
            groups = groups.len(),
            multi_groups = multi_groups.len(),
            tokens = tokens.len(),
            "parsed ComRV tables"
        );
        Ok(Self {
            groups,
            multi_groups,
            tokens,
        })
    }

    /// Overlay groups, indexed by group id.
    #[must_use]
    pub fn groups(&self) -> &[OverlayGroup]
    {
        &self.groups
    }

    /// Group `id`.
    ///
    /// ## Errors
    ///
    /// `Comrv` if no such group exists.
    pub fn group(&self, id: u32) -> Result<&OverlayGroup>
    {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.groups.get(idx))
            .ok_or_else(|| OverlayError::Comrv(format!("no overlay group {id} ({} groups)", self.groups.len())))
    }

    /// Multi-groups in table order.
    #[must_use]
    pub fn multi_groups(&self) -> &[MultiGroupEntry]
    {
        &self.multi_groups
    }

    /// Raw token at `index` of the multi-group table, terminators included.
    #[must_use]
    pub fn token(&self, index: usize) -> Option<u32>
    {
        self.tokens.get(index).copied()
    }
}

fn read_group_offset<T: TargetMemory + ?Sized>(
    reader: &MemoryReader<'_, T>,
    table_start: Address,
    table_end: Address,
    group: u32,
    entry_size: u64,
) -> Result<u64>
{
    let address = table_start + 2 * u64::from(group);
    if address + 1 >= table_end {
        return Err(OverlayError::Comrv(format!(
            "out of bounds access while reading offset table for group {group}"
        )));
    }
    Ok(u64::from(reader.read_u16(address)?) * entry_size)
}

fn read_groups<T: TargetMemory + ?Sized>(
    reader: &MemoryReader<'_, T>,
    table_start: Address,
    table_end: Address,
    storage_start: Address,
    entry_size: u64,
) -> Result<Vec<OverlayGroup>>
{
    let mut groups = Vec::new();
    let mut group = 0;

    let mut prev_offset = read_group_offset(reader, table_start, table_end, group, entry_size)?;
    if prev_offset != 0 {
        return Err(OverlayError::Comrv(format!(
            "offset of first overlay group is {prev_offset:#x} not 0"
        )));
    }

    loop {
        let next_offset = read_group_offset(reader, table_start, table_end, group + 1, entry_size)?;
        // A zero offset terminates the table.
        if next_offset == 0 {
            break;
        }
        groups.push(OverlayGroup {
            base: storage_start + prev_offset,
            size: next_offset.wrapping_sub(prev_offset),
        });
        group += 1;
        prev_offset = next_offset;
    }

    Ok(groups)
}

fn read_multi_groups<T: TargetMemory + ?Sized>(
    reader: &MemoryReader<'_, T>,
    table_start: Address,
    table_end: Address,
) -> Result<(Vec<MultiGroupEntry>, Vec<u32>)>
{
    let mut multi_groups = Vec::new();
    let mut all_tokens = Vec::new();
    let mut members = Vec::new();
    let mut first_index = 0;

    let mut address = table_start;
    while address < table_end {
        let raw = reader.read_u32(address)?;
        all_tokens.push(raw);

        if raw == 0 {
            if members.is_empty() {
                break;
            }
            multi_groups.push(MultiGroupEntry {
                number: multi_groups.len(),
                index: first_index,
                tokens: std::mem::take(&mut members),
            });
            first_index = all_tokens.len();
        } else {
            members.push(OverlayToken::new(raw));
        }
        address = address + 4;
    }

    Ok((multi_groups, all_tokens))
}
