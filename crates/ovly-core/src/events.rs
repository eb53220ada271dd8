//! Overlay event types and helpers.
//!
//! Higher layers (breakpoint managers, frontends) consume these events to
//! re-resolve breakpoints or redraw views when the overlay state changes,
//! without polling the [`OverlayManager`](crate::manager::OverlayManager).

use std::sync::mpsc;

/// Event emitted by an overlay manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayEvent
{
    /// The mapping table was rebuilt and holds `count` mappings.
    MappingsRefreshed
    {
        /// Number of active mappings.
        count: usize,
    },
    /// The mapping table was rebuilt empty.
    MappingsCleared,
    /// The multi-group table was loaded.
    MultiGroupsLoaded
    {
        /// Number of multi-group routines.
        count: usize,
    },
    /// The storage/cache regions were replaced.
    RegionsUpdated
    {
        /// Number of storage regions.
        storage: usize,
        /// Number of cache regions.
        cache: usize,
    },
}

impl OverlayEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::MappingsRefreshed { count } => format!("{count} overlay mapping(s) active"),
            Self::MappingsCleared => "No overlays mapped".to_string(),
            Self::MultiGroupsLoaded { count } => format!("{count} multi-group routine(s) loaded"),
            Self::RegionsUpdated { storage, cache } => {
                format!("Overlay regions updated ({storage} storage, {cache} cache)")
            }
        }
    }
}

/// Sender side of the overlay event channel.
pub type OverlayEventSender = mpsc::Sender<OverlayEvent>;
/// Receiver side of the overlay event channel.
pub type OverlayEventReceiver = mpsc::Receiver<OverlayEvent>;

/// Create a new overlay event channel.
#[must_use]
pub fn event_channel() -> (OverlayEventSender, OverlayEventReceiver)
{
    mpsc::channel()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_describe()
    {
        assert_eq!(OverlayEvent::MappingsRefreshed { count: 2 }.describe(), "2 overlay mapping(s) active");
        assert_eq!(OverlayEvent::MappingsCleared.describe(), "No overlays mapped");
        assert_eq!(
            OverlayEvent::RegionsUpdated { storage: 1, cache: 1 }.describe(),
            "Overlay regions updated (1 storage, 1 cache)"
        );
    }
}
