//! Device manager commands and events
//!
//! Commands are handled by a flat dispatch in [`DeviceManager`](crate::DeviceManager):
//! one handler per command, no state machine.

use heapless::{String, Vec};

use crate::{
    BluetoothAddress, DmError,
    constants::{MAX_LOCAL_NAME_LENGTH, MAX_PIN_LENGTH},
    device::Role,
    message::MessageId,
};

/// Scan enable setting of the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Visibility {
    /// Neither inquiry scan nor page scan
    Hidden,
    /// Page scan only
    #[default]
    Connectable,
    /// Inquiry scan only
    Discoverable,
    /// Inquiry scan and page scan
    DiscoverableConnectable,
}

impl Visibility {
    /// HCI `Scan_Enable` value
    #[must_use]
    pub const fn scan_enable(self) -> u8 {
        match self {
            Self::Hidden => 0x00,
            Self::Discoverable => 0x01,
            Self::Connectable => 0x02,
            Self::DiscoverableConnectable => 0x03,
        }
    }
}

/// Preferred LE connection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BleConnParams {
    /// Minimum connection interval, 1.25 ms units
    pub min_interval: u16,
    /// Maximum connection interval, 1.25 ms units
    pub max_interval: u16,
    /// Peripheral latency in connection events
    pub latency: u16,
    /// Supervision timeout, 10 ms units
    pub supervision_timeout: u16,
}

impl BleConnParams {
    const INTERVAL_RANGE: core::ops::RangeInclusive<u16> = 0x0006..=0x0C80;
    const TIMEOUT_RANGE: core::ops::RangeInclusive<u16> = 0x000A..=0x0C80;
    const MAX_LATENCY: u16 = 0x01F3;

    /// Check the parameters against the ranges the controller accepts
    ///
    /// # Errors
    /// Returns [`DmError::InvalidParameter`] if an interval, the latency or the
    /// timeout is out of range, the intervals are swapped, or the timeout is
    /// too short for the interval and latency.
    pub fn validate(&self) -> Result<(), DmError> {
        if !Self::INTERVAL_RANGE.contains(&self.min_interval)
            || !Self::INTERVAL_RANGE.contains(&self.max_interval)
            || self.min_interval > self.max_interval
            || self.latency > Self::MAX_LATENCY
            || !Self::TIMEOUT_RANGE.contains(&self.supervision_timeout)
        {
            return Err(DmError::InvalidParameter);
        }

        // timeout * 10 ms > (1 + latency) * max_interval * 1.25 ms * 2
        let timeout_us = u32::from(self.supervision_timeout) * 10_000;
        let needed_us = (1 + u32::from(self.latency)) * u32::from(self.max_interval) * 2_500;
        if timeout_us <= needed_us {
            return Err(DmError::InvalidParameter);
        }
        Ok(())
    }
}

/// A command to the device manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmCommand {
    /// Power the controller up
    Enable,
    /// Stop timers and searches, drop all links, power down
    Disable,
    /// Set the local name
    SetLocalName(String<MAX_LOCAL_NAME_LENGTH>),
    /// Set discoverability and connectability
    SetVisibility(Visibility),
    /// Bond with a peer
    Bond {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Abort bonding
    BondCancel {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Answer a PIN request
    PinReply {
        /// Peer
        peer: BluetoothAddress,
        /// PIN, `None` rejects the request
        pin: Option<Vec<u8, MAX_PIN_LENGTH>>,
    },
    /// Answer a numeric comparison
    ConfirmReply {
        /// Peer
        peer: BluetoothAddress,
        /// Accept the pairing
        accept: bool,
    },
    /// Forget a peer, disconnecting it first if needed
    RemoveDevice {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Switch link encryption
    SetEncryption {
        /// Peer
        peer: BluetoothAddress,
        /// Encrypt the link
        enable: bool,
    },
    /// Set preferred LE connection parameters
    BleSetConnParams {
        /// Peer
        peer: BluetoothAddress,
        /// Parameters
        params: BleConnParams,
    },
    /// An ACL link came up
    AclUp {
        /// Peer
        peer: BluetoothAddress,
    },
    /// An ACL link went down
    AclDown {
        /// Peer
        peer: BluetoothAddress,
        /// HCI disconnect reason
        reason: u8,
    },
    /// Change the preferred role of a link
    SetPreferredRole {
        /// Peer
        peer: BluetoothAddress,
        /// Role
        role: Role,
    },
}

impl DmCommand {
    /// Event code of this command
    #[must_use]
    pub const fn id(&self) -> MessageId {
        match self {
            Self::Enable => MessageId::Enable,
            Self::Disable => MessageId::Disable,
            Self::SetLocalName(_) => MessageId::SetLocalName,
            Self::SetVisibility(_) => MessageId::SetVisibility,
            Self::Bond { .. } => MessageId::Bond,
            Self::BondCancel { .. } => MessageId::BondCancel,
            Self::PinReply { .. } => MessageId::PinReply,
            Self::ConfirmReply { .. } => MessageId::ConfirmReply,
            Self::RemoveDevice { .. } => MessageId::RemoveDevice,
            Self::SetEncryption { .. } => MessageId::SetEncryption,
            Self::BleSetConnParams { .. } => MessageId::BleSetConnParams,
            Self::AclUp { .. } => MessageId::AclUp,
            Self::AclDown { .. } => MessageId::AclDown,
            Self::SetPreferredRole { .. } => MessageId::SetPreferredRole,
        }
    }
}

/// Events delivered to the [`DmListener`](crate::platform::DmListener)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmEvent {
    /// Controller is up
    Enabled,
    /// Controller is down and every link is gone
    Disabled,
    /// A link was registered
    LinkUp {
        /// Peer
        peer: BluetoothAddress,
    },
    /// A link was dropped
    LinkDown {
        /// Peer
        peer: BluetoothAddress,
        /// HCI disconnect reason
        reason: u8,
    },
    /// A bond was deleted
    BondRemoved {
        /// Peer
        peer: BluetoothAddress,
    },
    /// A command could not be carried out
    CommandFailed {
        /// Command
        command: MessageId,
        /// Why
        error: DmError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min: u16, max: u16, latency: u16, timeout: u16) -> BleConnParams {
        BleConnParams { min_interval: min, max_interval: max, latency, supervision_timeout: timeout }
    }

    #[test]
    fn test_conn_params_ranges() {
        assert!(params(0x18, 0x28, 0, 0x1F4).validate().is_ok());
        assert_eq!(params(0x05, 0x28, 0, 0x1F4).validate(), Err(DmError::InvalidParameter));
        assert_eq!(params(0x30, 0x28, 0, 0x1F4).validate(), Err(DmError::InvalidParameter));
        assert_eq!(params(0x18, 0x28, 0x200, 0x1F4).validate(), Err(DmError::InvalidParameter));
        assert_eq!(params(0x18, 0x28, 0, 0x09).validate(), Err(DmError::InvalidParameter));
    }

    #[test]
    fn test_conn_params_timeout_must_cover_latency() {
        // 100 ms max interval, 4 skipped events: needs more than 1 s
        assert_eq!(params(0x50, 0x50, 4, 100).validate(), Err(DmError::InvalidParameter));
        assert!(params(0x50, 0x50, 4, 101).validate().is_ok());
    }

    #[test]
    fn test_scan_enable_values() {
        assert_eq!(Visibility::Hidden.scan_enable(), 0);
        assert_eq!(Visibility::DiscoverableConnectable.scan_enable(), 3);
        assert_eq!(Visibility::default().scan_enable(), 2);
    }

    #[test]
    fn test_command_ids_are_dm_codes() {
        let peer = BluetoothAddress::ZERO;
        assert_eq!(DmCommand::Enable.id() as u16, 0x0100);
        assert_eq!(DmCommand::SetPreferredRole { peer, role: Role::Any }.id() as u16, 0x010D);
    }
}
