//! Outbound interfaces
//!
//! The device manager never talks to the controller, the timer wheel or the
//! application directly. Everything it needs from the outside world goes
//! through the traits in this module; the embedder implements them once on a
//! single platform type, which then satisfies [`Platform`] automatically.
//!
//! All calls are synchronous. Anything the controller answers later (mode
//! changes, name responses, SDP results, timer expiry) comes back as a
//! [`Message`](crate::Message).

use crate::{
    BluetoothAddress, DmError,
    device::{LinkPolicy, LinkPowerMode, Role},
    dm::{BleConnParams, DmEvent, Visibility},
    pm::{ParkParams, SniffParams, SsrSpec, TimerSlot},
    search::{InquiryParams, SearchNotification, ServiceMask},
};

/// Power mode change requested from the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerModeRequest {
    /// Leave any low-power mode
    Active,
    /// Enter sniff mode
    Sniff {
        /// Sniff parameters
        params: SniffParams,
        /// Re-enter sniff even if the link is already sniffing
        force: bool,
    },
    /// Enter park state
    Park(ParkParams),
}

/// How the link layer accepted a power mode request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeRequestStatus {
    /// Command sent; the outcome arrives as a power-mode result
    Started,
    /// The link is already in the requested mode
    Completed,
}

/// Link layer (ACL power management and policy)
pub trait LinkController {
    /// Current power mode of a link, `None` if the link layer does not know the peer
    fn power_mode(&self, peer: &BluetoothAddress) -> Option<LinkPowerMode>;

    /// Request a power mode change
    ///
    /// # Errors
    /// Returns an error if the link layer refuses the request outright.
    fn request_power_mode(
        &mut self,
        peer: &BluetoothAddress,
        request: PowerModeRequest,
    ) -> Result<ModeRequestStatus, DmError>;

    /// Write sniff subrating parameters
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn write_ssr(&mut self, peer: &BluetoothAddress, params: &SsrSpec) -> Result<(), DmError>;

    /// Link policy currently configured in the controller, `None` if unknown
    fn link_policy(&self, peer: &BluetoothAddress) -> Option<LinkPolicy>;

    /// Write the link policy settings
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn set_link_policy(&mut self, peer: &BluetoothAddress, policy: LinkPolicy)
    -> Result<(), DmError>;

    /// Switch role on a link
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn switch_role(&mut self, peer: &BluetoothAddress, role: Role) -> Result<(), DmError>;

    /// Local controller supports sniff subrating
    fn local_supports_ssr(&self) -> bool;

    /// Remote device advertised sniff subrating in its feature bits
    fn remote_supports_ssr(&self, peer: &BluetoothAddress) -> bool;

    /// Tear down the ACL link
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn disconnect(&mut self, peer: &BluetoothAddress, reason: u8) -> Result<(), DmError>;
}

/// One-shot timers backing the power-mode timer pool
///
/// Expiry is reported back as [`Message::PmTimerExpired`](crate::Message::PmTimerExpired).
pub trait PmTimerService {
    /// Arm (or re-arm) a timer slot
    fn start_timer(&mut self, slot: TimerSlot, timeout_ms: u32);

    /// Disarm a timer slot; a no-op for an idle slot
    fn stop_timer(&mut self, slot: TimerSlot);
}

/// Inquiry, name discovery and service discovery
pub trait SearchController {
    /// Start an inquiry
    ///
    /// # Errors
    /// Returns an error if the controller refuses to start the inquiry.
    fn start_inquiry(&mut self, params: &InquiryParams) -> Result<(), DmError>;

    /// Cancel the running inquiry
    ///
    /// # Errors
    /// Returns an error if there is nothing to cancel.
    fn cancel_inquiry(&mut self) -> Result<(), DmError>;

    /// Request the user-friendly name of a peer
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent.
    fn read_remote_name(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;

    /// Cancel an outstanding name request
    ///
    /// # Errors
    /// Returns an error if there is nothing to cancel.
    fn cancel_remote_name(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;

    /// Search a peer for the given services
    ///
    /// # Errors
    /// Returns an error if the search cannot be started.
    fn start_service_discovery(
        &mut self,
        peer: &BluetoothAddress,
        services: ServiceMask,
    ) -> Result<(), DmError>;

    /// Abort an outstanding service search
    ///
    /// # Errors
    /// Returns an error if there is nothing to cancel.
    fn cancel_service_discovery(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;

    /// Read the Device ID records of a peer
    ///
    /// # Errors
    /// Returns an error if the search cannot be started.
    fn start_di_discovery(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;
}

/// Local device control
pub trait DeviceController {
    /// Power the controller up
    ///
    /// # Errors
    /// Returns an error if the controller fails to come up.
    fn enable(&mut self) -> Result<(), DmError>;

    /// Power the controller down
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn disable(&mut self) -> Result<(), DmError>;

    /// Write the local name
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn set_local_name(&mut self, name: &str) -> Result<(), DmError>;

    /// Write scan enable
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn set_visibility(&mut self, visibility: Visibility) -> Result<(), DmError>;

    /// Start bonding with a peer
    ///
    /// # Errors
    /// Returns an error if bonding cannot start.
    fn create_bond(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;

    /// Abort bonding
    ///
    /// # Errors
    /// Returns an error if no bonding is in progress.
    fn cancel_bond(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;

    /// Answer a PIN request; `None` rejects it
    ///
    /// # Errors
    /// Returns an error if the reply cannot be sent.
    fn pin_reply(&mut self, peer: &BluetoothAddress, pin: Option<&[u8]>) -> Result<(), DmError>;

    /// Answer a numeric comparison
    ///
    /// # Errors
    /// Returns an error if the reply cannot be sent.
    fn confirm_reply(&mut self, peer: &BluetoothAddress, accept: bool) -> Result<(), DmError>;

    /// Delete the stored bond
    ///
    /// # Errors
    /// Returns an error if the bond store refuses.
    fn remove_bond(&mut self, peer: &BluetoothAddress) -> Result<(), DmError>;

    /// Switch link encryption
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn set_encryption(&mut self, peer: &BluetoothAddress, enable: bool) -> Result<(), DmError>;

    /// Set preferred LE connection parameters
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent.
    fn set_ble_conn_params(
        &mut self,
        peer: &BluetoothAddress,
        params: &BleConnParams,
    ) -> Result<(), DmError>;
}

/// Receives search and discovery results
///
/// Called synchronously while a message is being processed; must not block.
pub trait SearchListener {
    /// Deliver one notification
    fn on_search(&mut self, notification: &SearchNotification);
}

/// Receives device manager events
///
/// Called synchronously while a message is being processed; must not block.
pub trait DmListener {
    /// Deliver one event
    fn on_dm_event(&mut self, event: &DmEvent);
}

/// Everything the device manager needs, implemented for any type providing all the pieces
pub trait Platform:
    LinkController + PmTimerService + SearchController + DeviceController + SearchListener + DmListener
{
}

impl<T> Platform for T where
    T: LinkController
        + PmTimerService
        + SearchController
        + DeviceController
        + SearchListener
        + DmListener
{
}
