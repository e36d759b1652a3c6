//! 🐦 Bondybird device manager
//!
//! The policy core of a BR/EDR host: a table-driven search/discovery state
//! machine and a per-link power-mode arbiter, fed by a single message queue.
//!
//! The crate owns no radio. It talks to the controller, the timer wheel and
//! the application through the traits in [`platform`], and reacts to
//! [`Message`]s the embedder feeds it, either one by one through
//! [`DeviceManager::handle`] or with the async loop in [`processor::run`].
//!
//! ```rust
//! use bondybird_dm::{DmConfig, search::ServiceMask};
//!
//! let config = DmConfig::default();
//! let request = config.search_request(ServiceMask::A2DP_SINK, true);
//! assert_eq!(request.inquiry, config.inquiry);
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

mod fmt;

mod address;
pub mod constants;
pub mod device;
pub mod dispatch;
pub mod dm;
mod manager;
pub mod message;
pub mod platform;
pub mod pm;
pub mod processor;
pub mod search;

#[cfg(test)]
mod mock;

pub use address::BluetoothAddress;
pub use manager::DeviceManager;
pub use message::{Message, MessageId};

use device::{LinkPolicy, Role};
use pm::{DEFAULT_PM_CONFIG, PmConfig};
use search::{InquiryParams, SearchRequest, ServiceMask};

/// Device manager errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmError {
    /// A bounded table (links, services) is full
    RegistryFull,
    /// No link record for the peer
    UnknownPeer,
    /// Every power-mode timer slot is taken
    NoTimerAvailable,
    /// A bounded queue is full
    QueueFull,
    /// Operation not valid in the current state
    InvalidState,
    /// The device manager is not enabled
    NotEnabled,
    /// The controller failed the command with this HCI status
    Controller(u8),
    /// Invalid parameter provided (e.g., malformed address)
    InvalidParameter,
}

impl core::fmt::Display for DmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::RegistryFull => f.write_str("registry full"),
            Self::UnknownPeer => f.write_str("unknown peer"),
            Self::NoTimerAvailable => f.write_str("no power-mode timer available"),
            Self::QueueFull => f.write_str("queue full"),
            Self::InvalidState => f.write_str("invalid state"),
            Self::NotEnabled => f.write_str("not enabled"),
            Self::Controller(status) => write!(f, "controller error {status:#04x}"),
            Self::InvalidParameter => f.write_str("invalid parameter"),
        }
    }
}

impl core::error::Error for DmError {}

/// Device manager configuration
///
/// ```rust
/// use bondybird_dm::{DmConfig, constants, device::{LinkPolicy, Role}};
///
/// // Never park, stay master, limited inquiry
/// let config = DmConfig {
///     link_policy: LinkPolicy::all() - LinkPolicy::PARK,
///     preferred_role: Role::MasterOnly,
///     ..DmConfig::default()
/// };
/// assert_eq!(config.inquiry.lap, constants::GIAC);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DmConfig {
    /// Inquiry parameters used by [`DmConfig::search_request`]
    pub inquiry: InquiryParams,
    /// Link policy applied to every new link, masked by what the controller reports
    pub link_policy: LinkPolicy,
    /// Role preference for new links
    pub preferred_role: Role,
    /// Power-mode tables
    pub pm: &'static PmConfig,
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            inquiry: InquiryParams::default(),
            link_policy: LinkPolicy::default(),
            preferred_role: Role::default(),
            pm: &DEFAULT_PM_CONFIG,
        }
    }
}

impl DmConfig {
    /// Build a search request using the configured inquiry parameters
    #[must_use]
    pub fn search_request(&self, services: ServiceMask, resolve_names: bool) -> SearchRequest {
        SearchRequest { inquiry: self.inquiry, services, resolve_names }
    }
}
