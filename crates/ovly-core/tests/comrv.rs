//! Tests for the ComRV overlay policy against a fake RV32 target

use std::cell::RefCell;
use std::collections::HashMap;

use ovly_core::comrv::{ComrvConfig, ComrvPolicy, ComrvStatus, UnwoundFrame, EVENT_SYMBOL};
use ovly_core::error::{OverlayError, Result};
use ovly_core::manager::OverlayManager;
use ovly_core::mapping::MappingSink;
use ovly_core::memory::TargetMemory;
use ovly_core::policy::{OverlayPolicy, PolicyError};
use ovly_core::symbols::{ElfSymbolTable, RoutineSymbol};
use ovly_core::types::Address;
use ovly_utils::{init_logging_with_level, LogFormat, LogLevel};

const CACHE_START: u64 = 0x8000;
const CACHE_END: u64 = 0x9000;
const TABLES: u64 = 0x8e00;
const STORAGE_START: u64 = 0x4000_0000;
const STORAGE_END: u64 = 0x4001_0000;
const RETURN_LABEL: u64 = 0x2000_0100;

/// Byte-addressed target image with symbols, expressions and registers.
#[derive(Default)]
struct FakeTarget
{
    bytes: RefCell<HashMap<u64, u8>>,
    symbols: HashMap<String, u64>,
    values: RefCell<HashMap<String, i64>>,
    registers: HashMap<String, u64>,
}

impl FakeTarget
{
    fn write(&self, address: u64, data: &[u8])
    {
        let mut bytes = self.bytes.borrow_mut();
        for (offset, byte) in (0u64..).zip(data) {
            bytes.insert(address + offset, *byte);
        }
    }

    fn write_u16(&self, address: u64, value: u16)
    {
        self.write(address, &value.to_le_bytes());
    }

    fn write_u32(&self, address: u64, value: u32)
    {
        self.write(address, &value.to_le_bytes());
    }

    fn set_value(&self, expression: &str, value: i64)
    {
        self.values.borrow_mut().insert(expression.to_string(), value);
    }

    fn remove_value(&self, expression: &str)
    {
        self.values.borrow_mut().remove(expression);
    }

    fn set_cache_entry(&self, index: u64, group: i64, size_units: i64)
    {
        self.set_value(
            &format!("g_stComrvCB.stOverlayCache[{index}].unToken.stFields.uiOverlayGroupID"),
            group,
        );
        self.set_value(
            &format!("g_stComrvCB.stOverlayCache[{index}].unProperties.stFields.ucSizeInMinGroupSizeUnits"),
            size_units,
        );
    }

    /// A 16-byte ComRV frame carrying both multi-group index slots.
    fn write_frame(&self, address: u64, ra: u32, token: u32, size: u16, align: u8, mg_index: i16)
    {
        let index = mg_index.to_le_bytes();
        self.write_u32(address, ra);
        self.write_u32(address + 4, token);
        self.write_u16(address + 8, size);
        self.write(address + 10, &[align, index[0], 0, 0]);
        self.write(address + 14, &index);
    }
}

impl TargetMemory for FakeTarget
{
    fn read_memory(&self, address: Address, length: usize) -> Result<Vec<u8>>
    {
        let bytes = self.bytes.borrow();
        (address.value()..address.value() + length as u64)
            .map(|a| {
                bytes.get(&a).copied().ok_or_else(|| OverlayError::Memory {
                    address,
                    length,
                    details: format!("{a:#x} not mapped"),
                })
            })
            .collect()
    }

    fn symbol_address(&self, name: &str) -> Option<Address>
    {
        self.symbols.get(name).copied().map(Address::from)
    }

    fn evaluate_integer(&self, expression: &str) -> Option<i64>
    {
        self.values.borrow().get(expression).copied()
    }

    fn read_register(&self, name: &str) -> Option<u64>
    {
        self.registers.get(name).copied()
    }
}

fn token(group: u32, function_units: u32) -> u32
{
    (function_units << 17) | (group << 1) | 1
}

/// A ComRV target with three groups, two multi-groups and two groups mapped.
///
/// | Group | Storage | Size |
/// |---|---|---|
/// | 0 | 0x4000_0000 | 0x200 |
/// | 1 | 0x4000_0200 | 0x400 |
/// | 2 | 0x4000_0600 | 0x200 |
fn comrv_target() -> FakeTarget
{
    let mut target = FakeTarget::default();
    for (name, address) in [
        ("__OVERLAY_CACHE_START__", CACHE_START),
        ("__OVERLAY_CACHE_END__", CACHE_END),
        ("OVERLAY_START_OF_OVERLAYS", STORAGE_START),
        ("OVERLAY_END_OF_OVERLAYS", STORAGE_END),
        ("comrv_ret_from_callee", RETURN_LABEL),
        ("g_stComrvCB.ucTablesLoaded", 0x2000_8000),
    ] {
        target.symbols.insert(name.to_string(), address);
    }
    target.registers.insert("t3".to_string(), 0x7100);

    target.set_value("g_stComrvCB.ucTablesLoaded", 1);
    // Multi-group table 0x20 bytes into the tables entry
    target.set_value("g_stComrvCB.ucMultiGroupOffset", 0x10);

    for (index, scaled) in [0u16, 1, 3, 4, 0].into_iter().enumerate() {
        target.write_u16(TABLES + 2 * index as u64, scaled);
    }
    let tokens = [token(1, 2), token(2, 0), 0, token(0, 4), token(2, 8), 0, 0];
    for (index, raw) in tokens.into_iter().enumerate() {
        target.write_u32(TABLES + 0x20 + 4 * index as u64, raw);
    }

    // Group 1 fills entries 0 and 1, group 2 sits in entry 3
    target.set_cache_entry(0, 1, 2);
    target.set_cache_entry(2, 0xffff, 0);
    target.set_cache_entry(3, 2, 1);
    for index in 4..7 {
        target.set_cache_entry(index, 0xffff, 0);
    }
    target
}

fn routines() -> ElfSymbolTable
{
    ElfSymbolTable::from_routines(vec![
        RoutineSymbol {
            name: "replicated_a".to_string(),
            start: Address::from(0x4000_0208u64),
            size: 0x20,
        },
        RoutineSymbol {
            name: "replicated_b".to_string(),
            start: Address::from(0x4000_0010u64),
            size: 0x30,
        },
    ])
}

fn addr(value: u64) -> Address
{
    Address::from(value)
}

#[test]
fn test_uninitialised_answers()
{
    let target = comrv_target();
    target.set_value("g_stComrvCB.ucTablesLoaded", 0);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    assert_eq!(policy.event_symbol_name().as_deref(), Some(EVENT_SYMBOL));
    assert_eq!(policy.multi_group_count(), Ok(-1));
    assert_eq!(policy.multi_group_enabled(), Ok(-1));
    assert_eq!(policy.group_size(0), Ok(0));
    assert!(matches!(policy.group_base(0), Err(PolicyError::Failed(_))));
    assert!(matches!(policy.multi_group_token(0), Err(PolicyError::Failed(_))));

    let mut sink = MappingSink::new();
    assert_eq!(policy.read_mappings(&mut sink), Ok(true));
    assert!(sink.is_empty());

    // Regions come from link-time symbols and do not need ComRV running
    let regions = policy.region_data().unwrap();
    assert_eq!(regions.cache[0].start(), addr(CACHE_START));
    assert_eq!(regions.storage[0].end(), addr(STORAGE_END));

    assert!(matches!(
        policy.status().unwrap(),
        ComrvStatus::Uninitialised {
            flag_value: Some(0),
            flag_address: Some(_)
        }
    ));
}

#[test]
fn test_state_is_cached_only_once_initialised()
{
    let target = comrv_target();
    target.set_value("g_stComrvCB.ucTablesLoaded", 0);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();
    assert!(!policy.is_initialised().unwrap());

    target.set_value("g_stComrvCB.ucTablesLoaded", 1);
    assert!(policy.is_initialised().unwrap());
    assert_eq!(policy.group_size(1), Ok(0x400));

    // Cached: a changed offset table is not seen until clear()
    target.write_u16(TABLES + 6, 6);
    assert_eq!(policy.group_size(2), Ok(0x200));
    policy.clear();
    assert_eq!(policy.group_size(2), Ok(0x600));
}

#[test]
fn test_policy_rejects_unusable_config()
{
    let target = comrv_target();

    let result = ComrvPolicy::new(&target, ComrvConfig::default().with_max_group_size(3000));
    assert!(matches!(result, Err(OverlayError::InvalidConfig(_))));
    let result = ComrvPolicy::new(&target, ComrvConfig::default().with_min_entry_size(0));
    assert!(matches!(result, Err(OverlayError::InvalidConfig(_))));

    let policy = ComrvPolicy::new(&target, ComrvConfig::default().with_max_group_size(0x2000)).unwrap();
    assert_eq!(policy.config().max_group_size, 0x2000);
    assert_eq!(policy.memory().read_register("t3"), Some(0x7100));
}

#[test]
fn test_groups_and_multi_groups()
{
    let target = comrv_target();
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    assert_eq!(policy.group_size(0), Ok(0x200));
    assert_eq!(policy.group_size(2), Ok(0x200));
    assert_eq!(policy.group_base(2), Ok(addr(0x4000_0600)));
    assert!(matches!(policy.group_size(3), Err(PolicyError::Failed(_))));

    assert_eq!(policy.multi_group_enabled(), Ok(1));
    assert_eq!(policy.multi_group_count(), Ok(2));
    assert_eq!(
        policy.multi_group_addresses(0),
        Ok(vec![addr(0x4000_0208), addr(0x4000_0600)])
    );
    assert_eq!(
        policy.multi_group_addresses(1),
        Ok(vec![addr(0x4000_0010), addr(0x4000_0620)])
    );
    assert!(policy.multi_group_addresses(2).is_err());

    assert_eq!(policy.multi_group_token(0), Ok(token(1, 2)));
    assert_eq!(policy.multi_group_token(2), Ok(0));
    assert_eq!(policy.multi_group_token(3), Ok(token(0, 4)));
    assert!(policy.multi_group_token(7).is_err());
}

#[test]
fn test_manager_over_comrv()
{
    // Only the first test to get here installs the subscriber
    let _logging = init_logging_with_level(LogLevel::Trace, LogFormat::Pretty);
    let target = comrv_target();
    let mut manager = OverlayManager::new(ComrvPolicy::new(&target, ComrvConfig::default()).unwrap(), routines());

    assert_eq!(manager.event_symbol_name().as_deref(), Some("_ovly_debug_event"));
    assert_eq!(manager.refresh_mappings(), 2);
    let mappings = manager.mappings().mappings();
    assert_eq!((mappings[0].src(), mappings[0].dst(), mappings[0].len()), (addr(0x4000_0200), addr(0x8000), 0x400));
    assert_eq!((mappings[1].src(), mappings[1].dst(), mappings[1].len()), (addr(0x4000_0600), addr(0x8600), 0x200));
    assert_eq!(manager.to_storage(addr(0x8610)), addr(0x4000_0610));

    assert!(manager.has_multi_groups().unwrap());
    assert_eq!(manager.to_primary(addr(0x4000_0604)), addr(0x4000_020c));
    assert_eq!(manager.to_primary(addr(0x4000_0628)), addr(0x4000_0018));
    let hit = manager.find_alternates(addr(0x4000_0210)).unwrap();
    assert_eq!(hit.addresses(), vec![addr(0x4000_0608)]);

    assert!(manager.is_multi_group_enabled().unwrap());
    assert_eq!(manager.multi_group_token(3).unwrap(), token(0, 4));

    manager.load_region_data().unwrap();
    assert!(manager.is_cache_address(addr(0x8fff)));
    assert!(manager.is_storage_address(addr(0x4000_0600)));
}

#[test]
fn test_build_without_multi_groups()
{
    let target = comrv_target();
    target.remove_value("g_stComrvCB.ucMultiGroupOffset");
    let mut manager = OverlayManager::new(ComrvPolicy::new(&target, ComrvConfig::default()).unwrap(), routines());

    assert!(!manager.is_multi_group_enabled().unwrap());
    assert!(!manager.has_multi_groups().unwrap());
    assert!(matches!(
        manager.multi_group_token(0),
        Err(OverlayError::Policy {
            operation: "multi_group_token",
            ..
        })
    ));
    // The group table now spans the whole tables entry
    assert_eq!(manager.group_size(1).unwrap(), 0x400);
}

#[test]
fn test_malformed_group_table()
{
    let target = comrv_target();
    target.write_u16(TABLES, 2);
    let mut manager = OverlayManager::new(ComrvPolicy::new(&target, ComrvConfig::default()).unwrap(), routines());

    assert!(matches!(
        manager.has_multi_groups(),
        Err(OverlayError::Policy {
            operation: "multi_group_count",
            ..
        })
    ));
    // Mapping failures are absorbed
    assert_eq!(manager.refresh_mappings(), 0);
}

#[test]
fn test_zero_sized_cache_entry_advances()
{
    let target = comrv_target();
    target.set_cache_entry(0, 1, 0);
    target.set_cache_entry(1, 0xffff, 0);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    let mapped = policy.mapped_overlays().unwrap();
    assert_eq!(mapped.len(), 2);
    assert_eq!(mapped[1].cache_index, 3);
}

#[test]
fn test_unwind_to_non_overlay_caller()
{
    let target = comrv_target();
    target.write_frame(0x7000, 0x2000_0500, token(1, 0), 0x10, 0, -1);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    assert_eq!(
        policy.unwind_frame(addr(0x7000)).unwrap(),
        UnwoundFrame {
            return_address: addr(0x2000_0500),
            frame_address: addr(0x7010),
        }
    );
}

#[test]
fn test_unwind_into_overlay_caller()
{
    let target = comrv_target();
    // Returns through the engine first, then into group 1 loaded in the cache
    target.write_frame(0x7100, RETURN_LABEL as u32, token(2, 0), 0x10, 0, -1);
    target.write_frame(0x7110, 0x8434, token(2, 0), 0x10, 0, -1);
    target.write_frame(0x7120, 0, token(1, 4), 0xdead, 2, -1);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    let unwound = policy.unwind_frame(addr(0x7100)).unwrap();
    assert_eq!(unwound.frame_address, addr(0x7120));
    assert_eq!(unwound.return_address, addr(0x4000_0200 + 0x34));
}

#[test]
fn test_unwind_through_multi_group_token()
{
    let target = comrv_target();
    target.write_frame(0x7200, 0x8010, token(2, 0), 0x10, 0, -1);
    // 12-byte frame: the multi-group index is the byte at offset 11
    target.write_frame(0x7210, 0, 0x8000_0001, 12, 0, 3);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    let unwound = policy.unwind_frame(addr(0x7200)).unwrap();
    assert_eq!(unwound.return_address, addr(0x4000_0010));

    target.write_frame(0x7210, 0, 0x8000_0001, 0x10, 0, -1);
    policy.clear();
    let err = policy.unwind_frame(addr(0x7200)).unwrap_err();
    assert!(err.to_string().contains("no valid token index"));
}

#[test]
fn test_unwind_errors()
{
    let target = comrv_target();
    target.write_frame(0x7300, RETURN_LABEL as u32, 0, 0xdead, 0, -1);
    target.write_frame(0x7400, 0, 0, 0x10, 0, -1);
    target.write_frame(0x7500, 0x8010, token(2, 0), 0x10, 0, -1);
    target.write_frame(0x7510, 0, 0x0000_0004, 0xdead, 0, -1);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    let message = |result: Result<UnwoundFrame>| result.unwrap_err().to_string();
    assert!(message(policy.unwind_frame(addr(0x7300))).contains("top of ComRV stack (1)"));
    assert!(message(policy.unwind_frame(addr(0x7400))).contains("top of ComRV stack (2)"));
    assert!(message(policy.unwind_frame(addr(0x7500))).contains("second stack frame token"));

    let mut target = comrv_target();
    target.symbols.remove("comrv_ret_from_callee");
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();
    assert!(message(policy.unwind_frame(addr(0x7000))).contains("unwinding is disabled"));

    target.set_value("g_stComrvCB.ucTablesLoaded", 0);
    policy.clear();
    assert!(message(policy.unwind_frame(addr(0x7000))).contains("not initialised"));
}

#[test]
fn test_raw_stack_walk()
{
    let target = comrv_target();
    target.write_frame(0x7100, RETURN_LABEL as u32, token(2, 0), 0x10, 0, -1);
    target.write_frame(0x7110, 0x8434, token(2, 0), 0x10, 0, -1);
    target.write_frame(0x7120, 0, token(1, 4), 0xdead, 2, -1);
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    let stack = policy.current_stack().unwrap();
    assert!(stack.multi_group);
    assert_eq!(stack.frames.len(), 3);
    assert_eq!(stack.frames[1].return_address, addr(0x8434));
    assert!(stack.frames[2].is_outermost());
    assert_eq!(stack.frames[2].alignment(stack.entry_size), 0x400);

    let listing = stack.to_string();
    assert!(listing.contains("M/G"));
    assert!(listing.contains("0xdead"));
    assert!(listing.contains("0xffff"));

    let mut bounded = ComrvPolicy::new(&target, ComrvConfig::default().with_max_stack_frames(2)).unwrap();
    assert!(matches!(bounded.current_stack(), Err(OverlayError::Comrv(_))));

    target.write_frame(0x7110, 0x8434, token(2, 0), 0, 0, -1);
    assert!(matches!(policy.current_stack(), Err(OverlayError::Comrv(_))));
}

#[test]
fn test_status_report()
{
    let target = comrv_target();
    let mut policy = ComrvPolicy::new(&target, ComrvConfig::default()).unwrap();

    let status = policy.status().unwrap();
    let ComrvStatus::Initialised(report) = &status else {
        panic!("expected an initialised report, got {status:?}");
    };
    assert_eq!(report.groups.len(), 3);
    assert_eq!(report.multi_groups.as_ref().map(Vec::len), Some(2));
    assert_eq!(report.mappings.len(), 2);

    let text = status.to_string();
    assert!(text.contains("Overlay Regions:"));
    assert!(text.contains("0x40000600"));
    assert!(text.contains("Overlay multi-groups:"));
    assert!(text.contains("Current overlay mappings:"));

    target.remove_value("g_stComrvCB.ucMultiGroupOffset");
    let text = policy.status().unwrap().to_string();
    assert!(text.contains("Not supported in this ComRV build."));
}
