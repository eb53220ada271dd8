//! # Error Types
//!
//! General error handling for the overlay engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::policy::PolicyError;
use crate::types::Address;

/// Main error type for overlay operations
///
/// Only contract violations reach the caller as an `OverlayError`. Soft
/// failures (a policy that cannot read the current mappings, a capability the
/// policy does not provide) are absorbed by the component that sees them and
/// answered with an empty table or a sentinel value instead.
///
/// ## Error Categories
///
/// 1. **Policy errors**: Policy, MissingCapability
/// 2. **Multi-group errors**: EmptyMultiGroup, UnresolvedRoutine, NotRoutineStart, EmptyRoutine
/// 3. **Data errors**: InvalidRegion, InvalidConfig
/// 4. **Target errors**: Memory, Comrv
/// 5. **Symbol errors**: SymbolFile, Io
#[derive(Error, Debug)]
pub enum OverlayError
{
    /// The policy collaborator failed while answering a required query
    ///
    /// `operation` names the query (`multi_group_count`, `group_base`, ...).
    #[error("overlay policy failed in {operation}: {source}")]
    Policy
    {
        /// Name of the policy query that failed
        operation: &'static str,
        /// Failure reported by the policy
        #[source]
        source: PolicyError,
    },

    /// The policy does not implement a query that is required at this point
    ///
    /// Raised for `multi_group_addresses` when the policy reported a non-zero
    /// multi-group count, and for `region_data` when region loading is requested.
    #[error("overlay policy is missing required method {0}")]
    MissingCapability(&'static str),

    /// The policy returned an empty address list for a multi-group
    #[error("multi-group {index} has no addresses")]
    EmptyMultiGroup
    {
        /// Index of the offending multi-group
        index: usize,
    },

    /// The primary address of a multi-group is not inside any known routine
    #[error("unable to compute function bounds for multi-group {index} at {address}")]
    UnresolvedRoutine
    {
        /// Index of the offending multi-group
        index: usize,
        /// The primary address reported by the policy
        address: Address,
    },

    /// The primary address of a multi-group is inside a routine but not at its start
    #[error("multi-group {index} address {address} is not the start of a function (function starts at {start})")]
    NotRoutineStart
    {
        /// Index of the offending multi-group
        index: usize,
        /// The primary address reported by the policy
        address: Address,
        /// Start of the enclosing routine
        start: Address,
    },

    /// The routine fronting a multi-group has no extent
    #[error("function at {address} for multi-group {index} is empty")]
    EmptyRoutine
    {
        /// Index of the offending multi-group
        index: usize,
        /// The primary address reported by the policy
        address: Address,
    },

    /// A region whose end does not lie after its start
    #[error("invalid address region {start}..{end}")]
    InvalidRegion
    {
        /// First address of the rejected region
        start: Address,
        /// First address past the rejected region
        end: Address,
    },

    /// Reading target memory failed
    #[error("failed to read {length} bytes at {address}: {details}")]
    Memory
    {
        /// Address of the failed read
        address: Address,
        /// Number of bytes requested
        length: usize,
        /// Additional error details from the host
        details: String,
    },

    /// The ComRV runtime state on the target is missing or inconsistent
    #[error("ComRV: {0}")]
    Comrv(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse a symbol file
    #[error("Failed to parse symbol file: {0}")]
    SymbolFile(String),

    /// I/O error (reading symbol files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverlayError
{
    /// Wrap a policy failure for the named query.
    #[must_use]
    pub fn policy(operation: &'static str, source: PolicyError) -> Self
    {
        Self::Policy { operation, source }
    }
}

/// Convenience type alias for `Result<T, OverlayError>`
///
/// ```rust
/// use ovly_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, OverlayError>;
