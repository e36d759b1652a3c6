//! Inbound messages
//!
//! Everything the device manager reacts to arrives as a [`Message`]. Each
//! message has a 16-bit event code, `(module << 8) | index`, with the index
//! contiguous inside a module:
//!
//! | module | range             |
//! |--------|-------------------|
//! | 0x01   | device manager    |
//! | 0x02   | search            |
//! | 0x03   | power manager     |

use crate::{
    BluetoothAddress, DmError,
    dm::DmCommand,
    pm::{ConnStatus, PowerModeStatus, ProfileId, TimerSlot},
    search::{DiscoveredDevice, SearchMessage},
};

const DM_MODULE: u8 = 0x01;
const SEARCH_MODULE: u8 = 0x02;
const PM_MODULE: u8 = 0x03;

/// Event code of a message
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum MessageId {
    Enable = 0x0100,
    Disable = 0x0101,
    SetLocalName = 0x0102,
    SetVisibility = 0x0103,
    Bond = 0x0104,
    BondCancel = 0x0105,
    PinReply = 0x0106,
    ConfirmReply = 0x0107,
    RemoveDevice = 0x0108,
    SetEncryption = 0x0109,
    BleSetConnParams = 0x010A,
    AclUp = 0x010B,
    AclDown = 0x010C,
    SetPreferredRole = 0x010D,

    Search = 0x0200,
    SearchCancel = 0x0201,
    Discover = 0x0202,
    InquiryComplete = 0x0203,
    RemoteName = 0x0204,
    SdpResult = 0x0205,
    SearchComplete = 0x0206,
    DiscoveryResult = 0x0207,
    DiDiscover = 0x0208,
    InquiryResult = 0x0209,

    ConnectionStatus = 0x0300,
    PowerModeResult = 0x0301,
    PmTimerExpired = 0x0302,
}

impl MessageId {
    const DM: [Self; 14] = [
        Self::Enable,
        Self::Disable,
        Self::SetLocalName,
        Self::SetVisibility,
        Self::Bond,
        Self::BondCancel,
        Self::PinReply,
        Self::ConfirmReply,
        Self::RemoveDevice,
        Self::SetEncryption,
        Self::BleSetConnParams,
        Self::AclUp,
        Self::AclDown,
        Self::SetPreferredRole,
    ];

    const SEARCH: [Self; 10] = [
        Self::Search,
        Self::SearchCancel,
        Self::Discover,
        Self::InquiryComplete,
        Self::RemoteName,
        Self::SdpResult,
        Self::SearchComplete,
        Self::DiscoveryResult,
        Self::DiDiscover,
        Self::InquiryResult,
    ];

    const PM: [Self; 3] = [Self::ConnectionStatus, Self::PowerModeResult, Self::PmTimerExpired];

    /// Owning module, the high byte of the code
    #[must_use]
    pub const fn module(self) -> u8 {
        (self as u16 >> 8) as u8
    }

    /// Position inside the module, the low byte of the code
    #[must_use]
    pub const fn index(self) -> u8 {
        (self as u16 & 0xFF) as u8
    }
}

impl TryFrom<u16> for MessageId {
    type Error = DmError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let [module, index] = code.to_be_bytes();
        let table: &[Self] = match module {
            DM_MODULE => &Self::DM,
            SEARCH_MODULE => &Self::SEARCH,
            PM_MODULE => &Self::PM,
            _ => return Err(DmError::InvalidParameter),
        };
        table.get(usize::from(index)).copied().ok_or(DmError::InvalidParameter)
    }
}

impl From<MessageId> for u16 {
    fn from(id: MessageId) -> Self {
        id as u16
    }
}

/// A message for the device manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Top-level command
    Dm(DmCommand),
    /// Search machine input
    Search(SearchMessage),
    /// The running inquiry found a device
    InquiryResult(DiscoveredDevice),
    /// A profile reports a connection status change
    ConnectionStatus {
        /// Peer
        peer: BluetoothAddress,
        /// Reporting profile
        profile: ProfileId,
        /// Application instance of the profile
        app_id: u8,
        /// Status
        status: ConnStatus,
    },
    /// The link layer reports a power mode change
    PowerModeResult {
        /// Peer
        peer: BluetoothAddress,
        /// New mode
        status: PowerModeStatus,
        /// Mode-specific value (sniff interval, SSR in use)
        value: u16,
        /// HCI status, non-zero when the request failed
        hci_status: u8,
    },
    /// A power-mode timer slot expired
    PmTimerExpired(TimerSlot),
}

impl Message {
    /// Event code of this message
    #[must_use]
    pub const fn id(&self) -> MessageId {
        match self {
            Self::Dm(command) => command.id(),
            Self::Search(message) => match message {
                SearchMessage::Search(_) => MessageId::Search,
                SearchMessage::SearchCancel => MessageId::SearchCancel,
                SearchMessage::Discover(_) => MessageId::Discover,
                SearchMessage::InquiryComplete { .. } => MessageId::InquiryComplete,
                SearchMessage::RemoteName { .. } => MessageId::RemoteName,
                SearchMessage::SdpResult { .. } => MessageId::SdpResult,
                SearchMessage::SearchComplete => MessageId::SearchComplete,
                SearchMessage::DiscoveryResult { .. } => MessageId::DiscoveryResult,
                SearchMessage::DiDiscover { .. } => MessageId::DiDiscover,
            },
            Self::InquiryResult(_) => MessageId::InquiryResult,
            Self::ConnectionStatus { .. } => MessageId::ConnectionStatus,
            Self::PowerModeResult { .. } => MessageId::PowerModeResult,
            Self::PmTimerExpired(_) => MessageId::PmTimerExpired,
        }
    }
}

impl From<DmCommand> for Message {
    fn from(command: DmCommand) -> Self {
        Self::Dm(command)
    }
}

impl From<SearchMessage> for Message {
    fn from(message: SearchMessage) -> Self {
        Self::Search(message)
    }
}
