//! # ELF Symbol Table
//!
//! A [`SymbolResolver`] backed by the function symbols of an ELF file.
//!
//! Overlay toolchains emit every overlay function at its storage address, so
//! the ELF symbol table is enough to find where a multi-group routine starts
//! and ends. Hosts that already have a DWARF-aware symbolizer should implement
//! [`SymbolResolver`] on that instead.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ovly_core::symbols::ElfSymbolTable;
//! use ovly_core::policy::SymbolResolver;
//! use ovly_core::types::Address;
//!
//! let symbols = ElfSymbolTable::load("firmware.elf")?;
//! if let Some((start, end)) = symbols.routine_bounds(Address::from(0x2000_0104)) {
//!     println!("function spans {start}..{end}");
//! }
//! # Ok::<(), ovly_core::error::OverlayError>(())
//! ```

use std::fs;
use std::path::Path;

use object::{Object, ObjectSymbol, SymbolKind};
use tracing::debug;

use crate::error::{OverlayError, Result};
use crate::policy::SymbolResolver;
use crate::types::Address;

/// A named routine with a non-empty extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineSymbol
{
    /// Symbol name as it appears in the file.
    pub name: String,
    /// First address of the routine.
    pub start: Address,
    /// Size of the routine in bytes.
    pub size: u64,
}

impl RoutineSymbol
{
    /// First address past the routine.
    #[must_use]
    pub fn end(&self) -> Address
    {
        self.start + self.size
    }

    fn contains(&self, address: Address) -> bool
    {
        address.offset_from(self.start).is_some_and(|offset| offset < self.size)
    }
}

/// Function symbols of one ELF file, sorted by address.
#[derive(Debug, Clone, Default)]
pub struct ElfSymbolTable
{
    routines: Vec<RoutineSymbol>,
}

impl ElfSymbolTable
{
    /// Read and parse the ELF file at `path`.
    ///
    /// ## Errors
    ///
    /// `Io` if the file cannot be read, `SymbolFile` if it is not a valid object file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let table = Self::parse(&data)?;
        debug!(path = %path.display(), routines = table.routines.len(), "loaded symbol table");
        Ok(table)
    }

    /// Parse an in-memory ELF image.
    ///
    /// ## Errors
    ///
    /// `SymbolFile` if `data` is not a valid object file.
    pub fn parse(data: &[u8]) -> Result<Self>
    {
        let file = object::File::parse(data).map_err(|err| OverlayError::SymbolFile(err.to_string()))?;

        let mut routines: Vec<RoutineSymbol> = file
            .symbols()
            .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.size() > 0)
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                Some(RoutineSymbol {
                    name: name.to_string(),
                    start: Address::from(symbol.address()),
                    size: symbol.size(),
                })
            })
            .collect();
        routines.sort_by_key(|routine| routine.start);
        routines.dedup_by(|later, earlier| later.start == earlier.start && later.size == earlier.size);

        Ok(Self { routines })
    }

    /// Build a table from already known routines.
    #[must_use]
    pub fn from_routines(mut routines: Vec<RoutineSymbol>) -> Self
    {
        routines.retain(|routine| routine.size > 0);
        routines.sort_by_key(|routine| routine.start);
        Self { routines }
    }

    /// All routines, sorted by start address.
    #[must_use]
    pub fn routines(&self) -> &[RoutineSymbol]
    {
        &self.routines
    }

    /// The routine containing `address`.
    #[must_use]
    pub fn routine_at(&self, address: Address) -> Option<&RoutineSymbol>
    {
        // Last routine starting at or before the address.
        let idx = self.routines.partition_point(|routine| routine.start <= address);
        self.routines[..idx].iter().rev().find(|routine| routine.contains(address))
    }

    /// Start address of the routine called `name`.
    #[must_use]
    pub fn address_of(&self, name: &str) -> Option<Address>
    {
        self.routines
            .iter()
            .find(|routine| routine.name == name)
            .map(|routine| routine.start)
    }
}

impl SymbolResolver for ElfSymbolTable
{
    fn routine_bounds(&self, address: Address) -> Option<(Address, Address)>
    {
        self.routine_at(address).map(|routine| (routine.start, routine.end()))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn routine(name: &str, start: u64, size: u64) -> RoutineSymbol
    {
        RoutineSymbol {
            name: name.to_string(),
            start: Address::from(start),
            size,
        }
    }

    #[test]
    fn test_routine_lookup()
    {
        let table = ElfSymbolTable::from_routines(vec![
            routine("b", 0x1100, 0x40),
            routine("a", 0x1000, 0x20),
            routine("empty", 0x1050, 0),
        ]);

        assert_eq!(table.routines().len(), 2);
        assert_eq!(table.routine_at(Address::from(0x1000)).unwrap().name, "a");
        assert_eq!(table.routine_at(Address::from(0x101f)).unwrap().name, "a");
        assert!(table.routine_at(Address::from(0x1020)).is_none());
        assert!(table.routine_at(Address::from(0x0fff)).is_none());
        assert_eq!(
            table.routine_bounds(Address::from(0x1104)),
            Some((Address::from(0x1100), Address::from(0x1140)))
        );
        assert_eq!(table.address_of("b"), Some(Address::from(0x1100)));
        assert_eq!(table.address_of("missing"), None);
    }

    #[test]
    fn test_parse_rejects_garbage()
    {
        assert!(matches!(
            ElfSymbolTable::parse(b"definitely not an object file"),
            Err(OverlayError::SymbolFile(_))
        ));
    }
}
