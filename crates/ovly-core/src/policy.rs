//! # Overlay Policy
//!
//! The capability interface the embedding host implements to describe its
//! target's overlay runtime.
//!
//! The engine knows nothing about how a particular overlay manager lays out
//! its tables in target memory. Everything target-specific is answered by an
//! [`OverlayPolicy`]: which overlays are mapped right now, how big a group is,
//! which routines are replicated across groups. Each query is an independent
//! capability with a default implementation that means "not provided", so a
//! policy only implements what its target supports.
//!
//! ## Defaults
//!
//! | Query | Default | Engine behaviour |
//! |---|---|---|
//! | `event_symbol_name` | `None` | no event breakpoint |
//! | `read_mappings` | `Ok(false)` | mapping table left empty |
//! | `group_size` / `group_base` | `Unsupported` | answers `0` |
//! | `multi_group_count` | `Ok(0)` | no multi-groups, cached |
//! | `multi_group_addresses` | `Unsupported` | fatal if the count was non-zero |
//! | `multi_group_enabled` | `Unsupported` | answers `false` |
//! | `multi_group_token` | `Unsupported` | answers `0` |
//! | `region_data` | `Unsupported` | fatal when region loading is requested |

use thiserror::Error;

use crate::mapping::MappingSink;
use crate::types::{Address, AddressRegion};

/// Failure reported by a policy query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError
{
    /// The policy does not provide this capability.
    #[error("capability not provided by the overlay policy")]
    Unsupported,

    /// The policy provides the capability but could not answer.
    #[error("{0}")]
    Failed(String),
}

impl PolicyError
{
    /// Convenience constructor for [`PolicyError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self
    {
        Self::Failed(message.into())
    }
}

impl From<crate::error::OverlayError> for PolicyError
{
    fn from(err: crate::error::OverlayError) -> Self
    {
        Self::Failed(err.to_string())
    }
}

/// Convenience type alias for policy answers.
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Storage and cache regions reported by a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionData
{
    /// Regions overlays are loaded from (where the debug information points).
    pub storage: Vec<AddressRegion>,
    /// Regions overlays execute in.
    pub cache: Vec<AddressRegion>,
}

/// Target-specific overlay knowledge supplied by the host.
///
/// Every method takes `&mut self` so implementations can cache whatever they
/// read from the target between queries.
///
/// ## Example
///
/// ```rust
/// use ovly_core::mapping::MappingSink;
/// use ovly_core::policy::{OverlayPolicy, PolicyResult};
/// use ovly_core::types::Address;
///
/// /// A target with a single overlay permanently mapped.
/// struct FixedPolicy;
///
/// impl OverlayPolicy for FixedPolicy
/// {
///     fn read_mappings(&mut self, sink: &mut MappingSink) -> PolicyResult<bool>
///     {
///         sink.add(Address::from(0x4000), Address::from(0x8000), 0x200);
///         Ok(true)
///     }
/// }
/// ```
pub trait OverlayPolicy
{
    /// Name of the symbol whose execution signals that the overlay state may
    /// have changed.
    fn event_symbol_name(&mut self) -> Option<String>
    {
        None
    }

    /// Push every currently active mapping into `sink`.
    ///
    /// Return `Ok(true)` when the mappings were read completely. `Ok(false)`
    /// or an error makes the engine discard whatever was pushed.
    fn read_mappings(&mut self, _sink: &mut MappingSink) -> PolicyResult<bool>
    {
        Ok(false)
    }

    /// Size in bytes of overlay group `group_id`.
    fn group_size(&mut self, _group_id: u32) -> PolicyResult<u64>
    {
        Err(PolicyError::Unsupported)
    }

    /// Storage address of the first byte of overlay group `group_id`.
    fn group_base(&mut self, _group_id: u32) -> PolicyResult<Address>
    {
        Err(PolicyError::Unsupported)
    }

    /// Number of multi-groups.
    ///
    /// Negative means "not known yet, ask again later"; zero or more is final
    /// for the session.
    fn multi_group_count(&mut self) -> PolicyResult<i64>
    {
        Ok(0)
    }

    /// Addresses of every copy of the routine in multi-group `index`.
    ///
    /// The first address is the primary one and must be the start of a routine.
    fn multi_group_addresses(&mut self, _index: usize) -> PolicyResult<Vec<Address>>
    {
        Err(PolicyError::Unsupported)
    }

    /// Whether the target's overlay runtime was built with multi-group support.
    ///
    /// Negative means "not known yet", zero means no, positive means yes.
    fn multi_group_enabled(&mut self) -> PolicyResult<i64>
    {
        Err(PolicyError::Unsupported)
    }

    /// Raw overlay token at `index` in the target's multi-group table.
    fn multi_group_token(&mut self, _index: usize) -> PolicyResult<u32>
    {
        Err(PolicyError::Unsupported)
    }

    /// Storage and cache regions of the overlay system.
    fn region_data(&mut self) -> PolicyResult<RegionData>
    {
        Err(PolicyError::Unsupported)
    }
}

impl<P: OverlayPolicy + ?Sized> OverlayPolicy for Box<P>
{
    fn event_symbol_name(&mut self) -> Option<String>
    {
        (**self).event_symbol_name()
    }

    fn read_mappings(&mut self, sink: &mut MappingSink) -> PolicyResult<bool>
    {
        (**self).read_mappings(sink)
    }

    fn group_size(&mut self, group_id: u32) -> PolicyResult<u64>
    {
        (**self).group_size(group_id)
    }

    fn group_base(&mut self, group_id: u32) -> PolicyResult<Address>
    {
        (**self).group_base(group_id)
    }

    fn multi_group_count(&mut self) -> PolicyResult<i64>
    {
        (**self).multi_group_count()
    }

    fn multi_group_addresses(&mut self, index: usize) -> PolicyResult<Vec<Address>>
    {
        (**self).multi_group_addresses(index)
    }

    fn multi_group_enabled(&mut self) -> PolicyResult<i64>
    {
        (**self).multi_group_enabled()
    }

    fn multi_group_token(&mut self, index: usize) -> PolicyResult<u32>
    {
        (**self).multi_group_token(index)
    }

    fn region_data(&mut self) -> PolicyResult<RegionData>
    {
        (**self).region_data()
    }
}

/// Resolves an address to the bounds of the routine containing it.
///
/// Only used while building the multi-group table.
pub trait SymbolResolver
{
    /// `(start, end)` of the routine containing `address`, `end` exclusive.
    fn routine_bounds(&self, address: Address) -> Option<(Address, Address)>;
}

impl<S: SymbolResolver + ?Sized> SymbolResolver for &S
{
    fn routine_bounds(&self, address: Address) -> Option<(Address, Address)>
    {
        (**self).routine_bounds(address)
    }
}
