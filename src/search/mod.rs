//! Search and discovery
//!
//! Inquiry, name resolution and service discovery are serialized by a small
//! state machine (see [`table`] for the full transition table). A search
//! walks every device the inquiry found: resolve its name if asked to, search
//! it for services if a service mask is set, report it, move on. A discover
//! runs the same walk on a single known peer.
//!
//! Cancelling is cooperative: the in-flight controller operation is asked to
//! stop, and whatever completion arrives next finishes the transaction. A
//! search or discover issued while cancelling is held in a single queue slot
//! and started once the cancel completes.

mod machine;
pub mod table;

pub use machine::{PendingRequest, SearchContext, SearchMachine};

use bitflags::bitflags;
use heapless::String;

use crate::{
    BluetoothAddress,
    constants::{DEFAULT_INQUIRY_DURATION, GIAC, MAX_DEVICE_NAME_LENGTH, UNLIMITED_RESPONSES},
};

bitflags! {
    /// Services to look for during service discovery
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServiceMask: u32 {
        /// Serial port
        const SPP = 1 << 1;
        /// Dial-up networking
        const DUN = 1 << 2;
        /// Headset
        const HSP = 1 << 5;
        /// Hands-free
        const HFP = 1 << 6;
        /// Object push
        const OPP = 1 << 7;
        /// File transfer
        const FTP = 1 << 8;
        /// Cordless telephony
        const CTP = 1 << 9;
        /// Basic printing
        const BPP = 1 << 12;
        /// Basic imaging
        const BIP = 1 << 13;
        /// PAN user
        const PANU = 1 << 14;
        /// PAN network access point
        const NAP = 1 << 15;
        /// SIM access
        const SAP = 1 << 17;
        /// Audio sink
        const A2DP_SINK = 1 << 18;
        /// Remote control
        const AVRCP = 1 << 19;
        /// Human interface device
        const HID = 1 << 20;
        /// Phonebook access
        const PBAP = 1 << 22;
        /// Headset, headset role
        const HSP_HS = 1 << 23;
        /// Hands-free, hands-free role
        const HFP_HS = 1 << 24;
        /// Message access
        const MAP = 1 << 25;
        /// Health device
        const HDP = 1 << 27;
        /// Audio source
        const A2DP_SOURCE = 1 << 29;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ServiceMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ServiceMask({=u32:#010x})", self.bits());
    }
}

/// Inquiry parameters
///
/// ```rust
/// use bondybird_dm::{constants, search::InquiryParams};
///
/// // Limited inquiry, about 6.4 seconds, stop after 10 devices
/// let fast = InquiryParams {
///     lap: constants::LIAC,
///     duration: 5,
///     num_responses: 10,
/// };
/// assert_ne!(fast, InquiryParams::default());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InquiryParams {
    /// Inquiry access code: [`GIAC`] for all discoverable devices, `LIAC` for
    /// devices in limited discoverable mode
    pub lap: [u8; 3],
    /// Inquiry length in 1.28 s units (1-48)
    pub duration: u8,
    /// Stop after this many responses, 0 for unlimited
    pub num_responses: u8,
}

impl Default for InquiryParams {
    fn default() -> Self {
        Self { lap: GIAC, duration: DEFAULT_INQUIRY_DURATION, num_responses: UNLIMITED_RESPONSES }
    }
}

/// Start a search: inquiry, then name resolution and service discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SearchRequest {
    /// Inquiry parameters
    pub inquiry: InquiryParams,
    /// Services to search every found device for; empty skips service discovery
    pub services: ServiceMask,
    /// Read the names of found devices that did not report one
    pub resolve_names: bool,
}

/// Discover the services of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverRequest {
    /// Peer to discover
    pub peer: BluetoothAddress,
    /// Services to look for
    pub services: ServiceMask,
}

/// A device found by inquiry or named in a discover request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Bluetooth device address (`BD_ADDR`)
    pub addr: BluetoothAddress,
    /// Received Signal Strength Indicator (RSSI) in dBm, if available
    pub rssi: Option<i8>,
    /// Class of Device, if reported
    pub class_of_device: Option<u32>,
    /// Device name, if known
    pub name: Option<String<MAX_DEVICE_NAME_LENGTH>>,
    /// Services found by service discovery
    pub services: ServiceMask,
}

impl DiscoveredDevice {
    /// Create a device with nothing but its address
    #[must_use]
    pub fn new(addr: BluetoothAddress) -> Self {
        Self { addr, rssi: None, class_of_device: None, name: None, services: ServiceMask::empty() }
    }

    /// Set the RSSI
    #[must_use]
    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the class of device from its 3 little-endian bytes
    #[must_use]
    pub fn with_class_of_device(mut self, class_of_device: [u8; 3]) -> Self {
        self.class_of_device = Self::parse_class_of_device(&class_of_device);
        self
    }

    /// Set the name from a raw, possibly NUL-terminated byte buffer
    #[must_use]
    pub fn with_name_bytes(mut self, name_bytes: &[u8]) -> Self {
        if let Some(name) = Self::bytes_to_name(name_bytes) {
            self.name = Some(name);
        }
        self
    }

    /// Convert a raw name buffer to a string, stopping at the first NUL
    ///
    /// Returns `None` for invalid UTF-8 or a name longer than
    /// [`MAX_DEVICE_NAME_LENGTH`].
    #[must_use]
    pub fn bytes_to_name(name_bytes: &[u8]) -> Option<String<MAX_DEVICE_NAME_LENGTH>> {
        let len = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = core::str::from_utf8(&name_bytes[..len]).ok()?;
        String::try_from(name).ok()
    }

    /// Class of device as a 24-bit value; all-zero means not reported
    #[must_use]
    pub fn parse_class_of_device(class_of_device: &[u8; 3]) -> Option<u32> {
        if class_of_device.iter().all(|&x| x == 0) {
            None
        } else {
            Some(u32::from_le_bytes([class_of_device[0], class_of_device[1], class_of_device[2], 0]))
        }
    }
}

/// Search machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchState {
    /// Nothing running
    #[default]
    Idle,
    /// Search (or Device ID discovery) in progress
    SearchActive,
    /// Waiting for the in-flight operation to acknowledge a cancel
    Cancelling,
    /// Single-device discovery in progress
    DiscoverActive,
}

/// Search machine event, a column of the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchEvent {
    /// Start a search
    Search,
    /// Cancel the running search or discover
    SearchCancel,
    /// Discover one peer
    Discover,
    /// Inquiry finished
    InquiryComplete,
    /// Remote name request finished
    RemoteName,
    /// Service discovery finished
    SdpResult,
    /// Transaction finished
    SearchComplete,
    /// One device is fully discovered
    DiscoveryResult,
    /// Read a peer's Device ID records
    DiDiscover,
}

/// Search machine action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchAction {
    /// Terminates the action list
    Ignore,
    /// Start the inquiry
    ApiSearch,
    /// Start a single-device walk
    ApiDiscover,
    /// Start Device ID discovery
    ApiDiDiscover,
    /// Cancel whatever is in flight
    ApiSearchCancel,
    /// Tell the caller the cancel completed
    CancelNotify,
    /// Report inquiry completion and start the walk
    InquiryComplete,
    /// Record a name during a search
    RemoteName,
    /// Record a name during a discover
    DiscoverRemoteName,
    /// Record service discovery results
    SdpResult,
    /// Report a device and walk on
    SearchResult,
    /// Report the discovered peer and finish
    DiscoverResult,
    /// Finish the transaction
    SearchComplete,
    /// Hold a search until the cancel completes
    QueueSearch,
    /// Hold a discover until the cancel completes
    QueueDiscover,
    /// Drop the held request
    ClearQueue,
    /// Tear down the cancelled transaction
    CancelTransactionComplete,
    /// Tell the caller the cancel completed and start the held request
    CancelComplete,
    /// Drop a late service discovery result
    FreeSdpDb,
}

/// Search machine input: a table event together with its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMessage {
    /// Start a search
    Search(SearchRequest),
    /// Cancel the running search or discover
    SearchCancel,
    /// Discover one peer
    Discover(DiscoverRequest),
    /// Inquiry finished
    InquiryComplete {
        /// Number of responses the controller reported
        responses: u8,
    },
    /// Remote name request finished
    RemoteName {
        /// Peer asked
        peer: BluetoothAddress,
        /// HCI status of the request
        status: u8,
        /// Name, when the request succeeded
        name: Option<String<MAX_DEVICE_NAME_LENGTH>>,
    },
    /// Service discovery finished
    SdpResult {
        /// Peer searched
        peer: BluetoothAddress,
        /// Discovery status, 0 on success
        status: u8,
        /// Services found
        services: ServiceMask,
        /// Device ID records found
        di_records: u8,
    },
    /// Transaction finished
    SearchComplete,
    /// One device is fully discovered
    DiscoveryResult {
        /// Device reported
        peer: BluetoothAddress,
    },
    /// Read a peer's Device ID records
    DiDiscover {
        /// Peer to query
        peer: BluetoothAddress,
    },
}

impl SearchMessage {
    /// Table column for this message
    #[must_use]
    pub const fn event(&self) -> SearchEvent {
        match self {
            Self::Search(_) => SearchEvent::Search,
            Self::SearchCancel => SearchEvent::SearchCancel,
            Self::Discover(_) => SearchEvent::Discover,
            Self::InquiryComplete { .. } => SearchEvent::InquiryComplete,
            Self::RemoteName { .. } => SearchEvent::RemoteName,
            Self::SdpResult { .. } => SearchEvent::SdpResult,
            Self::SearchComplete => SearchEvent::SearchComplete,
            Self::DiscoveryResult { .. } => SearchEvent::DiscoveryResult,
            Self::DiDiscover { .. } => SearchEvent::DiDiscover,
        }
    }
}

/// Results delivered to the [`SearchListener`](crate::platform::SearchListener)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchNotification {
    /// Inquiry found a device
    InquiryResult(DiscoveredDevice),
    /// Inquiry finished
    InquiryComplete {
        /// Number of responses
        responses: u8,
    },
    /// A device is fully discovered
    DiscoveryResult(DiscoveredDevice),
    /// Search or discover finished
    DiscoveryComplete,
    /// Device ID discovery finished
    DiDiscoveryComplete {
        /// Peer queried
        peer: BluetoothAddress,
        /// Records found
        records: u8,
        /// Discovery status, 0 on success
        status: u8,
    },
    /// A cancel request completed
    SearchCancelComplete,
    /// The cancelled transaction was torn down
    TransactionCancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_bytes_stop_at_nul() {
        let mut raw = [0u8; 48];
        raw[..7].copy_from_slice(b"Speaker");
        let device = DiscoveredDevice::new(BluetoothAddress::ZERO).with_name_bytes(&raw);
        assert_eq!(device.name.as_deref(), Some("Speaker"));
    }

    #[test]
    fn test_name_bytes_reject_invalid() {
        assert!(DiscoveredDevice::bytes_to_name(&[0xFF, 0xFE]).is_none());
        assert!(DiscoveredDevice::bytes_to_name(&[b'a'; MAX_DEVICE_NAME_LENGTH + 1]).is_none());
        assert_eq!(DiscoveredDevice::bytes_to_name(b"").as_deref(), Some(""));
    }

    #[test]
    fn test_class_of_device_is_little_endian() {
        let device = DiscoveredDevice::new(BluetoothAddress::ZERO)
            .with_class_of_device([0x04, 0x04, 0x24])
            .with_rssi(-60);
        assert_eq!(device.class_of_device, Some(0x0024_0404));
        assert_eq!(device.rssi, Some(-60));
        assert_eq!(DiscoveredDevice::parse_class_of_device(&[0, 0, 0]), None);
    }

    #[test]
    fn test_message_maps_to_event() {
        let peer = BluetoothAddress::ZERO;
        assert_eq!(SearchMessage::Search(SearchRequest::default()).event(), SearchEvent::Search);
        assert_eq!(SearchMessage::DiDiscover { peer }.event(), SearchEvent::DiDiscover);
        assert_eq!(SearchMessage::DiscoveryResult { peer }.event(), SearchEvent::DiscoveryResult);
    }
}
