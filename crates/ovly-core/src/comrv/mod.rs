//! # ComRV Overlay Policy
//!
//! An [`OverlayPolicy`] for targets running the ComRV overlay engine
//! (RISC-V, RV32).
//!
//! Everything is read from the target through a [`TargetMemory`]: the cache
//! and storage areas from linker symbols, the group and multi-group tables
//! from the last cache entry, and the set of loaded groups from ComRV's cache
//! descriptors. The parsed state is kept once ComRV reports itself
//! initialised; before that every query reads the target again, so the
//! policy never gets stuck with a half-initialised view.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ovly_core::comrv::{ComrvConfig, ComrvPolicy};
//! use ovly_core::manager::OverlayManager;
//!
//! let policy = ComrvPolicy::new(target, ComrvConfig::from_env()?)?;
//! let mut manager = OverlayManager::new(policy, symbols);
//! manager.refresh_mappings();
//! ```

mod config;
mod stack;
mod status;
mod tables;
mod token;

use std::sync::Arc;

use tracing::{debug, trace};

pub use config::{ComrvConfig, DEFAULT_MAX_GROUP_SIZE, DEFAULT_MAX_STACK_FRAMES, DEFAULT_MIN_ENTRY_SIZE};
pub use stack::{group_return_offset, walk_frames, ComrvStack, ComrvStackFrame, UnwoundFrame, END_OF_STACK};
pub use status::{ComrvReport, ComrvStatus, MappedOverlay};
pub use tables::{CacheLayout, GroupTables, MultiGroupEntry, OverlayGroup};
pub use token::OverlayToken;

use crate::error::{OverlayError, Result};
use crate::mapping::MappingSink;
use crate::memory::{MemoryReader, TargetMemory};
use crate::policy::{OverlayPolicy, PolicyError, PolicyResult, RegionData};
use crate::types::{Address, AddressRegion};

/// Non-zero once ComRV has loaded its tables.
pub const INIT_SYMBOL: &str = "g_stComrvCB.ucTablesLoaded";
/// Offset of the multi-group table from the start of the tables, in 2-byte units.
pub const MULTI_GROUP_OFFSET_SYMBOL: &str = "g_stComrvCB.ucMultiGroupOffset";
/// First address of the storage area.
pub const STORAGE_START_SYMBOL: &str = "OVERLAY_START_OF_OVERLAYS";
/// First address past the storage area.
pub const STORAGE_END_SYMBOL: &str = "OVERLAY_END_OF_OVERLAYS";
/// First address of the cache area.
pub const CACHE_START_SYMBOL: &str = "__OVERLAY_CACHE_START__";
/// First address past the cache area.
pub const CACHE_END_SYMBOL: &str = "__OVERLAY_CACHE_END__";
/// Label overlay functions return through.
pub const RETURN_LABEL_SYMBOL: &str = "comrv_ret_from_callee";
/// Function ComRV calls whenever the cache contents change.
pub const EVENT_SYMBOL: &str = "_ovly_debug_event";

/// Register holding the current ComRV stack frame.
const STACK_REGISTER: &str = "t3";

/// Group id of a free cache entry.
const FREE_ENTRY_GROUP: i64 = 0xffff;

fn cache_group_expression(index: u64) -> String
{
    format!("g_stComrvCB.stOverlayCache[{index}].unToken.stFields.uiOverlayGroupID")
}

fn cache_size_expression(index: u64) -> String
{
    format!("g_stComrvCB.stOverlayCache[{index}].unProperties.stFields.ucSizeInMinGroupSizeUnits")
}

/// State read from the target.
#[derive(Debug)]
struct ComrvState
{
    cache: Option<CacheLayout>,
    storage: Option<AddressRegion>,
    tables: Option<GroupTables>,
    multi_group: bool,
}

impl ComrvState
{
    fn is_initialised(&self) -> bool
    {
        self.tables.is_some()
    }

    fn tables(&self) -> Result<&GroupTables>
    {
        self.tables
            .as_ref()
            .ok_or_else(|| OverlayError::Comrv("ComRV is not initialised".to_string()))
    }

    fn cache(&self) -> Result<&CacheLayout>
    {
        self.cache
            .as_ref()
            .ok_or_else(|| OverlayError::Comrv(format!("symbols {CACHE_START_SYMBOL}/{CACHE_END_SYMBOL} not found")))
    }

    fn storage(&self) -> Result<&AddressRegion>
    {
        self.storage.as_ref().ok_or_else(|| {
            OverlayError::Comrv(format!("symbols {STORAGE_START_SYMBOL}/{STORAGE_END_SYMBOL} not found"))
        })
    }
}

/// Overlay policy for the ComRV engine.
pub struct ComrvPolicy<T>
{
    memory: T,
    config: ComrvConfig,
    state: Option<Arc<ComrvState>>,
}

impl<T: TargetMemory> ComrvPolicy<T>
{
    /// Create a policy reading from `memory`.
    ///
    /// ## Errors
    ///
    /// `InvalidConfig` if `config` does not [`validate`](ComrvConfig::validate);
    /// return addresses are recovered by masking with the maximum group size.
    pub fn new(memory: T, config: ComrvConfig) -> Result<Self>
    {
        config.validate()?;
        Ok(Self {
            memory,
            config,
            state: None,
        })
    }

    /// The target this policy reads.
    pub fn memory(&self) -> &T
    {
        &self.memory
    }

    /// Active configuration.
    pub fn config(&self) -> &ComrvConfig
    {
        &self.config
    }

    /// Discard the cached state; the next query reads the target again.
    pub fn clear(&mut self)
    {
        if self.state.take().is_some() {
            debug!("discarded cached ComRV state");
        }
    }

    /// `true` once ComRV has initialised on the target.
    ///
    /// ## Errors
    ///
    /// Propagates failures reading the ComRV tables.
    pub fn is_initialised(&mut self) -> Result<bool>
    {
        Ok(self.fetch()?.is_initialised())
    }

    fn fetch(&mut self) -> Result<Arc<ComrvState>>
    {
        if let Some(state) = &self.state {
            return Ok(Arc::clone(state));
        }

        let state = Arc::new(self.load_state()?);
        // Only an initialised state is stable enough to keep.
        if state.is_initialised() {
            self.state = Some(Arc::clone(&state));
        }
        Ok(state)
    }

    fn region_from_symbols(&self, start: &str, end: &str) -> Option<AddressRegion>
    {
        let start = self.memory.symbol_address(start).filter(|a| *a != Address::ZERO)?;
        let end = self.memory.symbol_address(end).filter(|a| *a != Address::ZERO)?;
        AddressRegion::new(start, end).ok()
    }

    fn load_state(&self) -> Result<ComrvState>
    {
        let cache = self
            .region_from_symbols(CACHE_START_SYMBOL, CACHE_END_SYMBOL)
            .map(|region| CacheLayout::new(region, self.config.min_entry_size));
        let storage = self.region_from_symbols(STORAGE_START_SYMBOL, STORAGE_END_SYMBOL);

        let initialised = self.memory.evaluate_integer(INIT_SYMBOL).is_some_and(|flag| flag != 0);
        if !initialised {
            trace!("ComRV not initialised yet");
            return Ok(ComrvState {
                cache,
                storage,
                tables: None,
                multi_group: false,
            });
        }

        // Held in 2-byte units; a build without multi-group support lacks the
        // symbol or leaves it zero.
        let multi_group_offset = self
            .memory
            .evaluate_integer(MULTI_GROUP_OFFSET_SYMBOL)
            .and_then(|units| u64::try_from(units).ok())
            .filter(|units| *units > 0)
            .map(|units| units * 2);

        let mut state = ComrvState {
            cache,
            storage,
            tables: None,
            multi_group: multi_group_offset.is_some(),
        };
        let reader = MemoryReader::new(&self.memory);
        let tables = GroupTables::read(&reader, state.cache()?, state.storage()?.start(), multi_group_offset)?;
        debug!(
            groups = tables.groups().len(),
            multi_groups = tables.multi_groups().len(),
            multi_group = state.multi_group,
            "loaded ComRV tables"
        );
        state.tables = Some(tables);
        Ok(state)
    }

    fn evaluate(&self, expression: &str) -> Result<i64>
    {
        self.memory
            .evaluate_integer(expression)
            .ok_or_else(|| OverlayError::Comrv(format!("unable to evaluate {expression}")))
    }

    /// Groups currently loaded into the cache, in cache order.
    ///
    /// Empty before ComRV is initialised.
    ///
    /// ## Errors
    ///
    /// `Comrv` if a cache descriptor cannot be read or names an unknown group.
    pub fn mapped_overlays(&mut self) -> Result<Vec<MappedOverlay>>
    {
        let state = self.fetch()?;
        let Some(tables) = state.tables.as_ref() else {
            return Ok(Vec::new());
        };
        let cache = state.cache()?;

        let mut mapped = Vec::new();
        let mut index = 0;
        while index < cache.working_entries() {
            let group = self.evaluate(&cache_group_expression(index))?;
            if group == FREE_ENTRY_GROUP {
                index += 1;
                continue;
            }

            let group = u32::try_from(group)
                .map_err(|_| OverlayError::Comrv(format!("cache entry {index} holds invalid group {group}")))?;
            let descriptor = tables.group(group)?;
            mapped.push(MappedOverlay {
                cache_index: index,
                group,
                src: descriptor.base,
                dst: cache.entry_address(index),
                len: descriptor.size,
            });

            // A mapped entry claiming zero size would stall the walk.
            let units = self.evaluate(&cache_size_expression(index))?;
            index += u64::try_from(units).ok().filter(|units| *units > 0).unwrap_or(1);
        }

        Ok(mapped)
    }

    fn return_label(&self) -> Option<Address>
    {
        self.memory
            .symbol_address(RETURN_LABEL_SYMBOL)
            .filter(|address| *address != Address::ZERO)
    }

    /// Unwind the ComRV frame at `address`.
    ///
    /// Frames that merely return through the ComRV engine are skipped. When
    /// the caller is itself an overlay, its cache return address is translated
    /// back to the storage address of the caller's group.
    ///
    /// ## Errors
    ///
    /// `Comrv` if ComRV is not initialised, the return label is missing, the
    /// top of the stack is reached, or a frame is inconsistent.
    pub fn unwind_frame(&mut self, address: Address) -> Result<UnwoundFrame>
    {
        let state = self.fetch()?;
        let tables = state.tables()?;
        let label = self
            .return_label()
            .ok_or_else(|| OverlayError::Comrv("ComRV unwinding is disabled".to_string()))?;

        let reader = MemoryReader::new(&self.memory);
        let mut address = address;
        let mut frame = ComrvStackFrame::read(&reader, address, state.multi_group)?;
        let mut skipped = 0;
        while frame.return_address == label {
            if frame.is_outermost() {
                return Err(OverlayError::Comrv("hit top of ComRV stack (1)".to_string()));
            }
            skipped += 1;
            if skipped > self.config.max_stack_frames {
                return Err(OverlayError::Comrv(format!(
                    "more than {} ComRV frames return through {RETURN_LABEL_SYMBOL}",
                    self.config.max_stack_frames
                )));
            }
            address = address + u64::from(frame.size);
            frame = ComrvStackFrame::read(&reader, address, state.multi_group)?;
        }

        if frame.return_address == Address::ZERO && frame.token.raw() == 0 {
            return Err(OverlayError::Comrv("hit top of ComRV stack (2)".to_string()));
        }
        address = address + u64::from(frame.size);

        let mut return_address = frame.return_address;
        if state.cache()?.region().contains(return_address) {
            let previous = ComrvStackFrame::read(&reader, address, state.multi_group)?;
            if !previous.token.is_overlay() {
                return Err(OverlayError::Comrv(format!(
                    "returning to overlay function, second stack frame token is {}",
                    previous.token
                )));
            }

            let mut token = previous.token;
            if token.is_multi_group() {
                let index = usize::try_from(previous.multi_group_index).map_err(|_| {
                    OverlayError::Comrv("multi-group stack token with no valid token index".to_string())
                })?;
                token = tables.token(index).map(OverlayToken::new).ok_or_else(|| {
                    OverlayError::Comrv(format!("multi-group table has no token at index {index}"))
                })?;
            }

            let group = tables.group(token.group_id())?;
            let function_offset = u64::from(token.function_offset_units());
            let alignment = previous.alignment(self.config.min_entry_size);
            let group_offset =
                group_return_offset(frame.return_address, function_offset, alignment, self.config.max_group_size);
            return_address = group.base + group_offset;

            debug!(
                cache_return = %frame.return_address,
                group = token.group_id(),
                function_offset,
                alignment,
                group_size = group.size,
                group_offset,
                storage_return = %return_address,
                "unwound ComRV frame into overlay"
            );
        }

        Ok(UnwoundFrame {
            return_address,
            frame_address: address,
        })
    }

    /// Raw ComRV stack starting at the frame at `start`.
    ///
    /// Discards the cached state afterwards, so the next query reads the
    /// target again.
    ///
    /// ## Errors
    ///
    /// `Comrv` if ComRV is not initialised or the stack is malformed,
    /// `Memory` if a frame cannot be read.
    pub fn stack_frames(&mut self, start: Address) -> Result<ComrvStack>
    {
        let state = self.fetch()?;
        self.clear();
        if !state.is_initialised() {
            return Err(OverlayError::Comrv("ComRV not yet initialised".to_string()));
        }

        let reader = MemoryReader::new(&self.memory);
        let frames = walk_frames(&reader, start, state.multi_group, self.config.max_stack_frames)?;
        Ok(ComrvStack {
            multi_group: state.multi_group,
            entry_size: self.config.min_entry_size,
            frames,
        })
    }

    /// Raw ComRV stack starting at the frame `t3` points to.
    ///
    /// ## Errors
    ///
    /// As [`stack_frames`](Self::stack_frames), plus `Comrv` if `t3` cannot be read.
    pub fn current_stack(&mut self) -> Result<ComrvStack>
    {
        let start = self
            .memory
            .read_register(STACK_REGISTER)
            .ok_or_else(|| OverlayError::Comrv(format!("unable to read register {STACK_REGISTER}")))?;
        self.stack_frames(Address::from(start))
    }

    /// Summary of the ComRV state.
    ///
    /// Discards the cached state afterwards, so the next query reads the
    /// target again.
    ///
    /// ## Errors
    ///
    /// Propagates failures reading the tables or the cache descriptors.
    pub fn status(&mut self) -> Result<ComrvStatus>
    {
        let state = self.fetch()?;
        let status = match state.tables.as_ref() {
            None => ComrvStatus::Uninitialised {
                flag_value: self.memory.evaluate_integer(INIT_SYMBOL),
                flag_address: self.memory.symbol_address(INIT_SYMBOL),
            },
            Some(tables) => ComrvStatus::Initialised(ComrvReport {
                storage: state.storage,
                cache: state.cache.map(|cache| cache.region()),
                groups: tables.groups().to_vec(),
                multi_groups: state.multi_group.then(|| tables.multi_groups().to_vec()),
                mappings: self.mapped_overlays()?,
            }),
        };
        self.clear();
        Ok(status)
    }
}

impl<T: TargetMemory> OverlayPolicy for ComrvPolicy<T>
{
    fn event_symbol_name(&mut self) -> Option<String>
    {
        Some(EVENT_SYMBOL.to_string())
    }

    fn read_mappings(&mut self, sink: &mut MappingSink) -> PolicyResult<bool>
    {
        for overlay in self.mapped_overlays()? {
            trace!(
                cache_index = overlay.cache_index,
                group = overlay.group,
                src = %overlay.src,
                dst = %overlay.dst,
                len = overlay.len,
                "mapped overlay group"
            );
            sink.add(overlay.src, overlay.dst, overlay.len);
        }
        Ok(true)
    }

    fn group_size(&mut self, group_id: u32) -> PolicyResult<u64>
    {
        let state = self.fetch()?;
        match state.tables.as_ref() {
            Some(tables) => Ok(tables.group(group_id)?.size),
            None => Ok(0),
        }
    }

    fn group_base(&mut self, group_id: u32) -> PolicyResult<Address>
    {
        let state = self.fetch()?;
        let tables = state
            .tables
            .as_ref()
            .ok_or_else(|| PolicyError::failed("ComRV not initialised, overlay storage area address unknown"))?;
        Ok(tables.group(group_id)?.base)
    }

    fn multi_group_count(&mut self) -> PolicyResult<i64>
    {
        let state = self.fetch()?;
        match state.tables.as_ref() {
            Some(tables) => i64::try_from(tables.multi_groups().len())
                .map_err(|_| PolicyError::failed("multi-group count out of range")),
            None => Ok(-1),
        }
    }

    fn multi_group_addresses(&mut self, index: usize) -> PolicyResult<Vec<Address>>
    {
        let state = self.fetch()?;
        let tables = state.tables()?;
        let entry = tables
            .multi_groups()
            .get(index)
            .ok_or_else(|| PolicyError::failed("Multi-group index out of range"))?;

        entry
            .tokens
            .iter()
            .map(|token| -> PolicyResult<Address> {
                Ok(tables.group(token.group_id())?.base + token.function_offset())
            })
            .collect()
    }

    fn multi_group_enabled(&mut self) -> PolicyResult<i64>
    {
        let state = self.fetch()?;
        Ok(match (state.is_initialised(), state.multi_group) {
            (false, _) => -1,
            (true, true) => 1,
            (true, false) => 0,
        })
    }

    fn multi_group_token(&mut self, index: usize) -> PolicyResult<u32>
    {
        let state = self.fetch()?;
        let tables = state.tables()?;
        if !state.multi_group {
            return Err(PolicyError::failed("Multi-group not supported"));
        }
        tables
            .token(index)
            .ok_or_else(|| PolicyError::failed(format!("multi-group table has no token at index {index}")))
    }

    fn region_data(&mut self) -> PolicyResult<RegionData>
    {
        let state = self.fetch()?;
        let storage = *state.storage()?;
        let cache = state.cache()?.region();
        debug!(%storage, %cache, "ComRV overlay regions");
        Ok(RegionData {
            storage: vec![storage],
            cache: vec![cache],
        })
    }
}
