//! Human-readable summary of the ComRV state.

use std::fmt;

use super::tables::{MultiGroupEntry, OverlayGroup};
use crate::types::{Address, AddressRegion};

/// One overlay group currently loaded into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedOverlay
{
    /// Cache entry the group starts in.
    pub cache_index: u64,
    /// Overlay group id.
    pub group: u32,
    /// Storage address of the group.
    pub src: Address,
    /// Cache address of the group.
    pub dst: Address,
    /// Size of the group in bytes.
    pub len: u64,
}

/// Snapshot of the ComRV state, as reported by
/// [`ComrvPolicy::status`](super::ComrvPolicy::status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComrvStatus
{
    /// ComRV has not copied its tables into the cache yet.
    Uninitialised
    {
        /// Value of the initialisation flag, if it could be read.
        flag_value: Option<i64>,
        /// Address of the initialisation flag, if the symbol exists.
        flag_address: Option<Address>,
    },
    /// ComRV is running.
    Initialised(ComrvReport),
}

/// Everything known about an initialised ComRV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComrvReport
{
    /// Storage area.
    pub storage: Option<AddressRegion>,
    /// Cache area.
    pub cache: Option<AddressRegion>,
    /// Groups by id.
    pub groups: Vec<OverlayGroup>,
    /// Multi-groups; `None` for builds without multi-group support.
    pub multi_groups: Option<Vec<MultiGroupEntry>>,
    /// Groups currently in the cache.
    pub mappings: Vec<MappedOverlay>,
}

impl fmt::Display for ComrvStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Uninitialised {
                flag_value,
                flag_address,
            } => {
                writeln!(f, "ComRV not yet initialised:")?;
                match flag_value {
                    Some(value) => writeln!(f, "      {}: {value}", super::INIT_SYMBOL)?,
                    None => writeln!(f, "      {}: <unavailable>", super::INIT_SYMBOL)?,
                }
                match flag_address {
                    Some(address) => writeln!(f, "     &{}: {address}", super::INIT_SYMBOL),
                    None => writeln!(f, "     &{}: <unavailable>", super::INIT_SYMBOL),
                }
            }
            Self::Initialised(report) => fmt::Display::fmt(report, f),
        }
    }
}

fn write_region(f: &mut fmt::Formatter<'_>, name: &str, region: Option<&AddressRegion>) -> fmt::Result
{
    match region {
        Some(region) => writeln!(
            f,
            "  {name:<9}0x{:<10x}0x{:<10x}0x{:<6x}",
            region.start().value(),
            region.end().value(),
            region.len()
        ),
        None => writeln!(f, "  {name:<9}<unknown>"),
    }
}

impl fmt::Display for ComrvReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        writeln!(f, "Overlay Regions:")?;
        writeln!(f, "  {:<9}{:<12}{:<12}{:<8}", "Region", "Start", "End", "Size")?;
        write_region(f, "storage", self.storage.as_ref())?;
        write_region(f, "cache", self.cache.as_ref())?;
        writeln!(f)?;

        writeln!(f, "Overlay groups:")?;
        if !self.groups.is_empty() {
            writeln!(f, "  {:<7}{:<12}{:<12}{:<8}", "Group", "Start", "End", "Size")?;
        }
        for (id, group) in self.groups.iter().enumerate() {
            writeln!(
                f,
                "  {id:<7}0x{:<10x}0x{:<10x}0x{:<6x}",
                group.base.value(),
                group.end().value(),
                group.size
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Overlay multi-groups:")?;
        match &self.multi_groups {
            Some(multi_groups) => {
                for (num, entry) in multi_groups.iter().enumerate() {
                    if num == 0 {
                        writeln!(f, "  {:6}{:7}{:12}{:<9}{:<8}", "", "", "", "Overlay", "Function")?;
                        writeln!(f, "  {:<6}{:<7}{:<12}{:<9}{:<8}", "Num", "Index", "Token", "Group", "Offset")?;
                    } else {
                        writeln!(f, "  {:<6}{:<7}{:<12}{:<9}{:<8}", "---", "---", "---", "---", "---")?;
                    }
                    for token in &entry.tokens {
                        writeln!(
                            f,
                            "  {num:<6}{:<7}{token}  {:<9}0x{:<8x}",
                            entry.index,
                            token.group_id(),
                            token.function_offset()
                        )?;
                    }
                }
            }
            None => writeln!(f, "  Not supported in this ComRV build.")?,
        }
        writeln!(f)?;

        writeln!(f, "Current overlay mappings:")?;
        if self.mappings.is_empty() {
            return writeln!(f, "  No overlays groups are currently mapped.");
        }
        writeln!(f, "  {:<7}{:<9}{:<12}{:<12}{:<8}", "Cache", "Overlay", "Storage", "Cache", "")?;
        writeln!(f, "  {:<7}{:<9}{:<12}{:<12}{:<8}", "Index", "Group", "Addr", "Addr", "Size")?;
        for mapping in &self.mappings {
            writeln!(
                f,
                "  {:<7}{:<9}0x{:<10x}0x{:<10x}0x{:<8x}",
                mapping.cache_index,
                mapping.group,
                mapping.src.value(),
                mapping.dst.value(),
                mapping.len
            )?;
        }
        Ok(())
    }
}
