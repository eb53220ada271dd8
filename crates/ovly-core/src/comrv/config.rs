//! ComRV toolchain constants.
//!
//! The group size and cache entry size are fixed when the firmware is built;
//! the debugger has no way to read them back from the target, so they are
//! configured here and must match the toolchain.

use std::env;

use crate::error::{OverlayError, Result};

/// Default maximum overlay group size in bytes.
pub const DEFAULT_MAX_GROUP_SIZE: u64 = 4096;

/// Default size of one cache entry ("page") in bytes.
pub const DEFAULT_MIN_ENTRY_SIZE: u64 = 512;

/// Default bound on the number of frames a raw stack walk visits.
pub const DEFAULT_MAX_STACK_FRAMES: usize = 1024;

/// Settings for [`ComrvPolicy`](super::ComrvPolicy).
///
/// ```rust
/// use ovly_core::comrv::ComrvConfig;
///
/// let config = ComrvConfig::default().with_min_entry_size(256);
/// assert!(config.validate().is_ok());
/// assert!(ComrvConfig::default().with_max_group_size(3000).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComrvConfig
{
    /// Maximum overlay group size in bytes; a power of two.
    pub max_group_size: u64,
    /// Size of a cache entry in bytes; the unit most table values are scaled by.
    pub min_entry_size: u64,
    /// Raw stack walks stop with an error after this many frames.
    pub max_stack_frames: usize,
}

impl Default for ComrvConfig
{
    fn default() -> Self
    {
        Self {
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            min_entry_size: DEFAULT_MIN_ENTRY_SIZE,
            max_stack_frames: DEFAULT_MAX_STACK_FRAMES,
        }
    }
}

impl ComrvConfig
{
    /// Set the maximum group size.
    #[must_use]
    pub fn with_max_group_size(mut self, size: u64) -> Self
    {
        self.max_group_size = size;
        self
    }

    /// Set the cache entry size.
    #[must_use]
    pub fn with_min_entry_size(mut self, size: u64) -> Self
    {
        self.min_entry_size = size;
        self
    }

    /// Set the raw stack walk bound.
    #[must_use]
    pub fn with_max_stack_frames(mut self, frames: usize) -> Self
    {
        self.max_stack_frames = frames;
        self
    }

    /// Check the values are usable.
    ///
    /// ## Errors
    ///
    /// `InvalidConfig` if the group size is not a non-zero power of two or the
    /// entry size is zero.
    pub fn validate(&self) -> Result<()>
    {
        if !self.max_group_size.is_power_of_two() {
            return Err(OverlayError::InvalidConfig(format!(
                "max group size {} is not a power of two",
                self.max_group_size
            )));
        }
        if self.min_entry_size == 0 {
            return Err(OverlayError::InvalidConfig("min entry size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Defaults overridden by the environment.
    ///
    /// Reads `OVLY_COMRV_MAX_GROUP_SIZE`, `OVLY_COMRV_MIN_ENTRY_SIZE` and
    /// `OVLY_COMRV_MAX_STACK_FRAMES`. Values are decimal or `0x`-prefixed hex.
    ///
    /// ## Errors
    ///
    /// `InvalidConfig` if a variable is set but unparsable, or the result does
    /// not [`validate`](Self::validate).
    pub fn from_env() -> Result<Self>
    {
        let mut config = Self::default();
        if let Some(value) = read_env_number("OVLY_COMRV_MAX_GROUP_SIZE")? {
            config.max_group_size = value;
        }
        if let Some(value) = read_env_number("OVLY_COMRV_MIN_ENTRY_SIZE")? {
            config.min_entry_size = value;
        }
        if let Some(value) = read_env_number("OVLY_COMRV_MAX_STACK_FRAMES")? {
            config.max_stack_frames = usize::try_from(value)
                .map_err(|_| OverlayError::InvalidConfig(format!("OVLY_COMRV_MAX_STACK_FRAMES={value} is too large")))?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn read_env_number(name: &str) -> Result<Option<u64>>
{
    match env::var(name) {
        Ok(raw) => parse_number(&raw)
            .map(Some)
            .ok_or_else(|| OverlayError::InvalidConfig(format!("{name}={raw:?} is not a number"))),
        Err(_) => Ok(None),
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub(crate) fn parse_number(raw: &str) -> Option<u64>
{
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults()
    {
        let config = ComrvConfig::default();
        assert_eq!(config.max_group_size, 4096);
        assert_eq!(config.min_entry_size, 512);
        assert_eq!(config.max_stack_frames, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate()
    {
        assert!(ComrvConfig::default().with_max_group_size(0).validate().is_err());
        assert!(ComrvConfig::default().with_max_group_size(0x3000).validate().is_err());
        assert!(ComrvConfig::default().with_min_entry_size(0).validate().is_err());
        assert!(ComrvConfig::default().with_max_group_size(0x2000).validate().is_ok());
    }

    #[test]
    fn test_parse_number()
    {
        assert_eq!(parse_number("4096"), Some(4096));
        assert_eq!(parse_number(" 0x200 "), Some(0x200));
        assert_eq!(parse_number("0X1000"), Some(0x1000));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("lots"), None);
    }
}
