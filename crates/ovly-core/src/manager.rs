//! # Overlay Manager
//!
//! The facade a debugger core talks to.
//!
//! [`OverlayManager`] owns the mapping table, the multi-group table, the
//! region configuration and the cached multi-group enablement flag for one
//! debugging session. It forwards questions it cannot answer from its caches
//! to the [`OverlayPolicy`] and the [`SymbolResolver`] supplied by the host.
//!
//! ## Typical use
//!
//! 1. Create the manager with the host's policy and symbol resolver.
//! 2. Plant a breakpoint on [`OverlayManager::event_symbol_name`].
//! 3. Whenever it is hit, call [`OverlayManager::event_breakpoint_hit`].
//! 4. Translate addresses with [`OverlayManager::to_primary`],
//!    [`OverlayManager::find_alternates`] and [`OverlayManager::to_storage`]
//!    before setting breakpoints, unwinding or symbolizing.
//!
//! ## Example
//!
//! ```rust
//! use ovly_core::manager::OverlayManager;
//! use ovly_core::mapping::MappingSink;
//! use ovly_core::policy::{OverlayPolicy, PolicyResult, SymbolResolver};
//! use ovly_core::types::Address;
//!
//! struct OneOverlay;
//!
//! impl OverlayPolicy for OneOverlay
//! {
//!     fn read_mappings(&mut self, sink: &mut MappingSink) -> PolicyResult<bool>
//!     {
//!         sink.add(Address::from(0x4000), Address::from(0x8000), 0x200);
//!         Ok(true)
//!     }
//! }
//!
//! struct NoSymbols;
//!
//! impl SymbolResolver for NoSymbols
//! {
//!     fn routine_bounds(&self, _address: Address) -> Option<(Address, Address)>
//!     {
//!         None
//!     }
//! }
//!
//! let mut manager = OverlayManager::new(OneOverlay, NoSymbols);
//! manager.refresh_mappings();
//! assert_eq!(manager.to_storage(Address::from(0x8010)), Address::from(0x4010));
//! assert!(!manager.has_multi_groups()?);
//! # Ok::<(), ovly_core::error::OverlayError>(())
//! ```

use tracing::{debug, info};

use crate::error::{OverlayError, Result};
use crate::events::{OverlayEvent, OverlayEventSender};
use crate::mapping::{Mapping, MappingTable};
use crate::multi_group::{AlternateMatch, MultiGroupTable};
use crate::policy::{OverlayPolicy, PolicyError, SymbolResolver};
use crate::regions::RegionConfig;
use crate::types::{Address, AddressRegion};

/// Overlay state for one debugging session.
///
/// ## Thread Safety
///
/// The manager is **not** safe to share between threads. The lazy build of
/// the multi-group table is not reentrant, so a host that calls into the
/// manager from several threads must serialize every call behind a single
/// `Mutex` (or route them through one owning task).
pub struct OverlayManager<P, S>
{
    policy: P,
    symbols: S,
    mappings: MappingTable,
    multi_groups: MultiGroupTable,
    regions: RegionConfig,
    multi_group_enabled: Option<bool>,
    reload_on_event: bool,
    events: Option<OverlayEventSender>,
}

impl<P, S> OverlayManager<P, S>
where
    P: OverlayPolicy,
    S: SymbolResolver,
{
    /// Create a manager for a new session.
    ///
    /// Mappings are reloaded whenever the event breakpoint is hit; see
    /// [`Self::with_reload_on_event`].
    pub fn new(policy: P, symbols: S) -> Self
    {
        Self {
            policy,
            symbols,
            mappings: MappingTable::new(),
            multi_groups: MultiGroupTable::new(),
            regions: RegionConfig::new(),
            multi_group_enabled: None,
            reload_on_event: true,
            events: None,
        }
    }

    /// Choose whether [`Self::event_breakpoint_hit`] refreshes the mappings.
    #[must_use]
    pub fn with_reload_on_event(mut self, reload_on_event: bool) -> Self
    {
        self.reload_on_event = reload_on_event;
        self
    }

    /// Publish [`OverlayEvent`]s to `sender`.
    #[must_use]
    pub fn with_event_sender(mut self, sender: OverlayEventSender) -> Self
    {
        self.events = Some(sender);
        self
    }

    /// The host's policy.
    pub fn policy(&self) -> &P
    {
        &self.policy
    }

    /// Mutable access to the host's policy.
    pub fn policy_mut(&mut self) -> &mut P
    {
        &mut self.policy
    }

    /// The host's symbol resolver.
    pub fn symbols(&self) -> &S
    {
        &self.symbols
    }

    fn emit(&self, event: OverlayEvent)
    {
        if let Some(sender) = &self.events {
            // A dropped receiver just means nobody is listening any more.
            let _ = sender.send(event);
        }
    }

    // ----------------------------------------------------------------------
    // Events and mappings
    // ----------------------------------------------------------------------

    /// Name of the symbol whose execution signals an overlay state change.
    pub fn event_symbol_name(&mut self) -> Option<String>
    {
        self.policy.event_symbol_name().filter(|name| !name.is_empty())
    }

    /// Whether hitting the event breakpoint reloads the mappings.
    pub fn reload_on_event(&self) -> bool
    {
        self.reload_on_event
    }

    /// Tell the manager the event breakpoint was hit.
    ///
    /// Returns `true` if the mappings were refreshed.
    pub fn event_breakpoint_hit(&mut self) -> bool
    {
        if !self.reload_on_event {
            debug!("overlay event hit, reload disabled");
            return false;
        }
        self.refresh_mappings();
        true
    }

    /// Rebuild the mapping table from the policy.
    ///
    /// Never fails: a policy that cannot report its mappings leaves the table
    /// empty. Returns the number of active mappings.
    pub fn refresh_mappings(&mut self) -> usize
    {
        let count = self.mappings.refresh(&mut self.policy);
        if count == 0 {
            self.emit(OverlayEvent::MappingsCleared);
        } else {
            self.emit(OverlayEvent::MappingsRefreshed { count });
        }
        count
    }

    /// Currently active mappings.
    pub fn mappings(&self) -> &MappingTable
    {
        &self.mappings
    }

    /// Mapping whose execution range contains `address`.
    pub fn query_mapping(&self, address: Address) -> Option<&Mapping>
    {
        self.mappings.query(address)
    }

    /// Translate an execution address to its storage address.
    pub fn to_storage(&self, address: Address) -> Address
    {
        self.mappings.to_storage(address)
    }

    /// Every execution address a storage address is currently mapped at.
    pub fn mapped_addresses(&self, address: Address) -> Vec<Address>
    {
        self.mappings.mapped_addresses(address)
    }

    // ----------------------------------------------------------------------
    // Group metadata
    // ----------------------------------------------------------------------

    /// Size in bytes of overlay group `group_id`, asked fresh from the policy.
    ///
    /// ## Errors
    ///
    /// `Policy` if the policy fails. A policy without this capability answers `0`.
    pub fn group_size(&mut self, group_id: u32) -> Result<u64>
    {
        match self.policy.group_size(group_id) {
            Ok(size) => Ok(size),
            Err(PolicyError::Unsupported) => Ok(0),
            Err(err) => Err(OverlayError::policy("group_size", err)),
        }
    }

    /// Storage base address of overlay group `group_id`, asked fresh from the policy.
    ///
    /// ## Errors
    ///
    /// `Policy` if the policy fails. A policy without this capability answers
    /// [`Address::ZERO`].
    pub fn group_base(&mut self, group_id: u32) -> Result<Address>
    {
        match self.policy.group_base(group_id) {
            Ok(base) => Ok(base),
            Err(PolicyError::Unsupported) => Ok(Address::ZERO),
            Err(err) => Err(OverlayError::policy("group_base", err)),
        }
    }

    /// Raw token at `index` of the target's multi-group table.
    ///
    /// ## Errors
    ///
    /// `Policy` if the policy fails. A policy without this capability answers `0`.
    pub fn multi_group_token(&mut self, index: usize) -> Result<u32>
    {
        match self.policy.multi_group_token(index) {
            Ok(token) => Ok(token),
            Err(PolicyError::Unsupported) => Ok(0),
            Err(err) => Err(OverlayError::policy("multi_group_token", err)),
        }
    }

    // ----------------------------------------------------------------------
    // Multi-groups
    // ----------------------------------------------------------------------

    /// Load the multi-group table if needed and report whether it has entries.
    ///
    /// ## Errors
    ///
    /// Any fatal error while building the table; the table stays unloaded and
    /// the next call retries.
    pub fn has_multi_groups(&mut self) -> Result<bool>
    {
        let was_loaded = self.multi_groups.is_loaded();
        let has_groups = self.multi_groups.ensure_loaded(&mut self.policy, &self.symbols)?;
        if !was_loaded && self.multi_groups.is_loaded() {
            let count = self.multi_groups.descriptors().len();
            info!(count, "multi-group table ready");
            self.emit(OverlayEvent::MultiGroupsLoaded { count });
        }
        Ok(has_groups)
    }

    /// The multi-group table as currently cached (possibly unloaded).
    pub fn multi_groups(&self) -> &MultiGroupTable
    {
        &self.multi_groups
    }

    /// Discard the cached multi-group table and enablement flag.
    pub fn invalidate_multi_groups(&mut self)
    {
        self.multi_groups.invalidate();
        self.multi_group_enabled = None;
    }

    /// Alternates of the multi-group routine whose primary range holds `address`.
    ///
    /// Works on the cached table only; call [`Self::has_multi_groups`] first.
    pub fn find_alternates(&self, address: Address) -> Option<AlternateMatch<'_>>
    {
        self.multi_groups.find_alternates(address)
    }

    /// Map an address inside any copy of a multi-group routine to its primary copy.
    ///
    /// Works on the cached table only; call [`Self::has_multi_groups`] first.
    pub fn to_primary(&self, address: Address) -> Address
    {
        self.multi_groups.to_primary(address)
    }

    /// Whether the target's overlay runtime supports multi-groups.
    ///
    /// A definitive answer is cached for the session; "don't know yet" is
    /// reported as `false` and asked again next time.
    ///
    /// ## Errors
    ///
    /// `Policy` if the policy fails. A policy without this capability answers `false`.
    pub fn is_multi_group_enabled(&mut self) -> Result<bool>
    {
        if let Some(enabled) = self.multi_group_enabled {
            return Ok(enabled);
        }

        let answer = match self.policy.multi_group_enabled() {
            Ok(answer) => answer,
            Err(PolicyError::Unsupported) => return Ok(false),
            Err(err) => return Err(OverlayError::policy("multi_group_enabled", err)),
        };
        if answer < 0 {
            debug!("multi-group support not known yet");
            return Ok(false);
        }

        let enabled = answer > 0;
        debug!(enabled, "multi-group support cached");
        self.multi_group_enabled = Some(enabled);
        Ok(enabled)
    }

    // ----------------------------------------------------------------------
    // Regions
    // ----------------------------------------------------------------------

    /// Replace the storage regions.
    pub fn set_storage_regions(&mut self, regions: Vec<AddressRegion>)
    {
        self.regions.set_storage_regions(regions);
        self.emit_regions();
    }

    /// Replace the cache regions.
    pub fn set_cache_regions(&mut self, regions: Vec<AddressRegion>)
    {
        self.regions.set_cache_regions(regions);
        self.emit_regions();
    }

    /// Ask the policy for its storage and cache regions and install them.
    ///
    /// ## Errors
    ///
    /// `MissingCapability` if the policy cannot describe its regions, `Policy`
    /// if it fails to.
    pub fn load_region_data(&mut self) -> Result<()>
    {
        debug!("loading overlay region data from policy");
        let data = self.policy.region_data().map_err(|err| match err {
            PolicyError::Unsupported => OverlayError::MissingCapability("region_data"),
            failed => OverlayError::policy("region_data", failed),
        })?;
        for region in &data.storage {
            debug!(%region, "storage region");
        }
        for region in &data.cache {
            debug!(%region, "cache region");
        }
        self.regions.set_storage_regions(data.storage);
        self.regions.set_cache_regions(data.cache);
        self.emit_regions();
        Ok(())
    }

    fn emit_regions(&self)
    {
        self.emit(OverlayEvent::RegionsUpdated {
            storage: self.regions.storage_regions().len(),
            cache: self.regions.cache_regions().len(),
        });
    }

    /// Configured storage and cache regions.
    pub fn regions(&self) -> &RegionConfig
    {
        &self.regions
    }

    /// `true` if `address` lies in a configured storage region.
    pub fn is_storage_address(&self, address: Address) -> bool
    {
        self.regions.is_storage_address(address)
    }

    /// `true` if `address` lies in a configured cache region.
    pub fn is_cache_address(&self, address: Address) -> bool
    {
        self.regions.is_cache_address(address)
    }
}
