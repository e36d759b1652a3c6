//! `BondyBird` Device Manager Constants
//!
//! Registry capacities, inquiry defaults and HCI values shared by the search
//! machine and the power arbiter. All registries are fixed-size; a full
//! registry rejects new entries instead of growing.

/// Maximum number of simultaneous ACL links tracked in the peer registry
pub const MAX_PEER_DEVICES: usize = 7;

/// Maximum number of (link, profile) pairs contributing a power-mode opinion
pub const MAX_CONNECTED_SERVICES: usize = 5;

/// Number of power-mode timer slots
pub const MAX_PM_TIMERS: usize = 3;

/// Maximum number of inquiry results kept for name resolution and service discovery
pub const MAX_DISCOVERED_DEVICES: usize = 8;

/// Depth of the internal follow-up event queue
pub const MAX_PENDING_MESSAGES: usize = 8;

/// Maximum device name length in bytes
pub const MAX_DEVICE_NAME_LENGTH: usize = 32;

/// Maximum local name length in bytes (HCI `Write_Local_Name`)
pub const MAX_LOCAL_NAME_LENGTH: usize = 248;

/// Maximum PIN code length in bytes
pub const MAX_PIN_LENGTH: usize = 16;

/// General Inquiry Access Code (GIAC) - standard inquiry LAP
pub const GIAC: [u8; 3] = [0x9E, 0x8B, 0x33];

/// Limited Inquiry Access Code (LIAC)
pub const LIAC: [u8; 3] = [0x00, 0x8B, 0x9E];

/// Default inquiry duration in 1.28s units (0x0A = ~12.8 seconds)
pub const DEFAULT_INQUIRY_DURATION: u8 = 0x0A;

/// Unlimited number of inquiry responses
pub const UNLIMITED_RESPONSES: u8 = 0;

/// HCI status code for success
pub const HCI_SUCCESS: u8 = 0x00;

/// HCI status "Unsupported Feature or Parameter Value"
pub const HCI_ERR_UNSUPPORTED_VALUE: u8 = 0x11;

/// HCI reason "Remote User Terminated Connection", used for local disconnects
pub const HCI_ERR_REMOTE_USER_TERMINATED: u8 = 0x13;

/// HCI status "Operation Cancelled by Host"
pub const HCI_ERR_CANCELLED_BY_HOST: u8 = 0x44;

/// Application id wildcard in the power-mode profile map
pub const ALL_APP_ID: u8 = 0xFF;
