//! Device Manager - single context that handles every message
//!
//! The manager owns the search machine, the power-mode arbiter and the
//! platform. Each [`Message`] is handled to completion before the next one:
//! device manager commands go through a flat dispatch (one handler per
//! command), search messages through the search machine's transition table,
//! power-mode reports straight to the arbiter. Follow-up search events that a
//! handler produces are queued and drained before [`DeviceManager::handle`]
//! returns, so no handler is ever re-entered.
//!
//! Errors never escape `handle`: a failed command is logged and reported to
//! the [`DmListener`](crate::platform::DmListener) as
//! [`DmEvent::CommandFailed`].

use heapless::Deque;

use crate::{
    BluetoothAddress, DmConfig, DmError, Message, MessageId,
    constants::{HCI_ERR_REMOTE_USER_TERMINATED, MAX_PENDING_MESSAGES},
    device::{ConnectionState, LinkPolicy, PeerLinkRecord, Role},
    dm::{DmCommand, DmEvent},
    platform::Platform,
    pm::PowerManager,
    search::{SearchContext, SearchMachine, SearchMessage, ServiceMask},
};

/// Device manager context
pub struct DeviceManager<P> {
    config: DmConfig,
    enabled: bool,
    disabling: bool,
    pm: PowerManager,
    search: SearchMachine,
    outbox: Deque<SearchMessage, MAX_PENDING_MESSAGES>,
    platform: P,
}

impl<P: Platform> DeviceManager<P> {
    /// Create a disabled device manager
    #[must_use]
    pub fn new(config: DmConfig, platform: P) -> Self {
        Self {
            config,
            enabled: false,
            disabling: false,
            pm: PowerManager::new(config.pm),
            search: SearchMachine::new(),
            outbox: Deque::new(),
            platform,
        }
    }

    /// Get a reference to the configuration
    #[must_use]
    pub fn config(&self) -> &DmConfig {
        &self.config
    }

    /// Check whether the controller is up
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Power-mode arbiter, with the link and service registries
    #[must_use]
    pub fn power_manager(&self) -> &PowerManager {
        &self.pm
    }

    /// Search machine
    #[must_use]
    pub fn search(&self) -> &SearchMachine {
        &self.search
    }

    /// Platform
    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Platform, mutable
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Start a search with the configured inquiry parameters
    pub fn start_search(&mut self, services: ServiceMask, resolve_names: bool) {
        let request = self.config.search_request(services, resolve_names);
        self.handle(Message::Search(SearchMessage::Search(request)));
    }

    /// Handle one message to completion
    pub fn handle(&mut self, message: Message) {
        debug!("[DM] handling {:?}", message.id());
        match message {
            Message::Dm(command) => {
                let id = command.id();
                if let Err(error) = self.handle_command(command) {
                    warn!("[DM] {:?} failed: {:?}", id, error);
                    self.platform.on_dm_event(&DmEvent::CommandFailed { command: id, error });
                }
            }
            Message::Search(message) => self.handle_search_request(&message),
            Message::InquiryResult(device) => {
                let mut ctx = SearchContext { platform: &mut self.platform, outbox: &mut self.outbox };
                self.search.on_inquiry_result(device, &mut ctx);
            }
            Message::ConnectionStatus { peer, profile, app_id, status } => {
                self.pm.report_connection_status(peer, profile, app_id, status, &mut self.platform);
            }
            Message::PowerModeResult { peer, status, value, hci_status } => {
                self.pm.on_mode_result(&peer, status, value, hci_status, &mut self.platform);
            }
            Message::PmTimerExpired(slot) => self.pm.on_timer_expired(slot, &mut self.platform),
        }
        self.drain();
    }

    fn handle_search_request(&mut self, message: &SearchMessage) {
        let starts_work = matches!(
            message,
            SearchMessage::Search(_) | SearchMessage::Discover(_) | SearchMessage::DiDiscover { .. }
        );
        if starts_work && (!self.enabled || self.disabling) {
            let command = Message::Search(message.clone()).id();
            warn!("[DM] {:?} while not enabled", command);
            self.platform
                .on_dm_event(&DmEvent::CommandFailed { command, error: DmError::NotEnabled });
            return;
        }
        self.run_search(message);
    }

    fn run_search(&mut self, message: &SearchMessage) {
        let mut ctx = SearchContext { platform: &mut self.platform, outbox: &mut self.outbox };
        self.search.handle(message, &mut ctx);
    }

    fn drain(&mut self) {
        while let Some(next) = self.outbox.pop_front() {
            self.run_search(&next);
        }
    }

    fn require_enabled(&self) -> Result<(), DmError> {
        if self.enabled && !self.disabling { Ok(()) } else { Err(DmError::NotEnabled) }
    }

    fn handle_command(&mut self, command: DmCommand) -> Result<(), DmError> {
        match command {
            DmCommand::Enable => self.handle_enable(),
            DmCommand::Disable => {
                self.handle_disable();
                Ok(())
            }
            DmCommand::SetLocalName(name) => {
                self.require_enabled()?;
                self.platform.set_local_name(&name)
            }
            DmCommand::SetVisibility(visibility) => {
                self.require_enabled()?;
                self.platform.set_visibility(visibility)
            }
            DmCommand::Bond { peer } => {
                self.require_enabled()?;
                info!("[DM] bonding with {}", peer);
                self.platform.create_bond(&peer)
            }
            DmCommand::BondCancel { peer } => {
                self.require_enabled()?;
                self.platform.cancel_bond(&peer)
            }
            DmCommand::PinReply { peer, pin } => {
                self.require_enabled()?;
                self.platform.pin_reply(&peer, pin.as_deref())
            }
            DmCommand::ConfirmReply { peer, accept } => {
                self.require_enabled()?;
                self.platform.confirm_reply(&peer, accept)
            }
            DmCommand::RemoveDevice { peer } => self.handle_remove_device(peer),
            DmCommand::SetEncryption { peer, enable } => {
                self.require_enabled()?;
                self.platform.set_encryption(&peer, enable)
            }
            DmCommand::BleSetConnParams { peer, params } => {
                self.require_enabled()?;
                params.validate()?;
                self.platform.set_ble_conn_params(&peer, &params)
            }
            DmCommand::AclUp { peer } => self.handle_acl_up(peer),
            DmCommand::AclDown { peer, reason } => {
                self.handle_acl_down(peer, reason);
                Ok(())
            }
            DmCommand::SetPreferredRole { peer, role } => self.handle_set_preferred_role(peer, role),
        }
    }

    fn handle_enable(&mut self) -> Result<(), DmError> {
        if self.enabled {
            debug!("[DM] already enabled");
            return Ok(());
        }
        self.platform.enable()?;
        self.enabled = true;
        self.disabling = false;
        info!("[DM] enabled");
        self.platform.on_dm_event(&DmEvent::Enabled);
        Ok(())
    }

    fn handle_disable(&mut self) {
        if !self.enabled || self.disabling {
            debug!("[DM] not enabled, nothing to disable");
            return;
        }
        info!("[DM] disabling, {} link(s) up", self.pm.devices().len());
        self.disabling = true;
        self.pm.stop_all_timers(&mut self.platform);

        if self.search.is_busy() {
            self.run_search(&SearchMessage::SearchCancel);
        }

        let peers: heapless::Vec<BluetoothAddress, { crate::constants::MAX_PEER_DEVICES }> =
            self.pm.devices().iter().map(|record| record.addr).collect();
        if peers.is_empty() {
            self.finish_disable();
            return;
        }
        for peer in &peers {
            if let Err(e) = self.platform.disconnect(peer, HCI_ERR_REMOTE_USER_TERMINATED) {
                warn!("[DM] disconnect of {} failed: {:?}", peer, e);
            }
        }
    }

    fn finish_disable(&mut self) {
        if let Err(e) = self.platform.disable() {
            warn!("[DM] controller disable failed: {:?}", e);
        }
        self.enabled = false;
        self.disabling = false;
        info!("[DM] disabled");
        self.platform.on_dm_event(&DmEvent::Disabled);
    }

    fn handle_remove_device(&mut self, peer: BluetoothAddress) -> Result<(), DmError> {
        if let Some(record) = self.pm.devices_mut().get_mut(&peer) {
            if record.conn_state == ConnectionState::Connected {
                self.platform.disconnect(&peer, HCI_ERR_REMOTE_USER_TERMINATED)?;
                record.conn_state = ConnectionState::Unpairing;
                record.remove_pending = true;
                info!("[DM] unpairing {}, bond removed once the link is down", peer);
                return Ok(());
            }
            if record.conn_state == ConnectionState::Unpairing {
                debug!("[DM] {} is already being unpaired", peer);
                return Ok(());
            }
        }
        self.remove_bond(peer)
    }

    fn remove_bond(&mut self, peer: BluetoothAddress) -> Result<(), DmError> {
        self.platform.remove_bond(&peer)?;
        info!("[DM] bond with {} removed", peer);
        self.platform.on_dm_event(&DmEvent::BondRemoved { peer });
        Ok(())
    }

    fn handle_acl_up(&mut self, peer: BluetoothAddress) -> Result<(), DmError> {
        if self.disabling {
            debug!("[DM] link to {} came up while disabling", peer);
            return self.platform.disconnect(&peer, HCI_ERR_REMOTE_USER_TERMINATED);
        }

        let supported = self.platform.link_policy(&peer).unwrap_or(LinkPolicy::all());
        let mut policy = self.config.link_policy & supported;
        if self.config.preferred_role == Role::MasterOnly {
            policy.remove(LinkPolicy::ROLE_SWITCH);
        }

        let mut record = PeerLinkRecord::new(peer, policy, self.config.preferred_role);
        record.info.use_ssr =
            self.platform.local_supports_ssr() && self.platform.remote_supports_ssr(&peer);

        if let Err(e) = self.pm.link_up(record) {
            warn!("[DM] no room for link {}: {:?}", peer, e);
            return Ok(());
        }
        if let Err(e) = self.platform.set_link_policy(&peer, policy) {
            warn!("[DM] link policy write for {} failed: {:?}", peer, e);
        }

        info!("[DM] link up {}", peer);
        self.platform.on_dm_event(&DmEvent::LinkUp { peer });
        Ok(())
    }

    fn handle_acl_down(&mut self, peer: BluetoothAddress, reason: u8) {
        let Some(record) = self.pm.link_down(&peer, &mut self.platform) else {
            debug!("[DM] link down for unknown peer {}", peer);
            return;
        };
        info!("[DM] link down {}, reason {}", peer, reason);
        self.platform.on_dm_event(&DmEvent::LinkDown { peer, reason });

        if record.remove_pending {
            if let Err(e) = self.remove_bond(peer) {
                warn!("[DM] removing bond with {} failed: {:?}", peer, e);
                self.platform.on_dm_event(&DmEvent::CommandFailed {
                    command: MessageId::RemoveDevice,
                    error: e,
                });
            }
        }

        if self.disabling && self.pm.devices().is_empty() {
            self.finish_disable();
        }
    }

    fn handle_set_preferred_role(&mut self, peer: BluetoothAddress, role: Role) -> Result<(), DmError> {
        let record = self.pm.devices_mut().get_mut(&peer).ok_or(DmError::UnknownPeer)?;
        record.preferred_role = role;

        let mut policy = record.link_policy;
        policy.set(LinkPolicy::ROLE_SWITCH, role != Role::MasterOnly);
        let changed = policy != record.link_policy;
        record.link_policy = policy;

        if changed {
            self.platform.set_link_policy(&peer, policy)?;
        }
        if role == Role::MasterOnly {
            self.platform.switch_role(&peer, Role::MasterOnly)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::HCI_SUCCESS,
        device::LinkPowerMode,
        dm::{BleConnParams, Visibility},
        mock::{Call, MockPlatform},
        pm::{ConnStatus, PowerModeStatus, ProfileId, TimerSlot},
        search::{SearchNotification, SearchState},
    };

    const PHONE: BluetoothAddress = BluetoothAddress([0x00, 0x1B, 0xDC, 0x00, 0x00, 0x01]);
    const HEADSET: BluetoothAddress = BluetoothAddress([0x00, 0x1B, 0xDC, 0x00, 0x00, 0x02]);

    fn enabled_manager() -> DeviceManager<MockPlatform> {
        let mut dm = DeviceManager::new(DmConfig::default(), MockPlatform::new());
        dm.handle(DmCommand::Enable.into());
        dm.platform_mut().calls.clear();
        dm.platform_mut().events.clear();
        dm
    }

    fn link_up(dm: &mut DeviceManager<MockPlatform>, peer: BluetoothAddress) {
        dm.handle(DmCommand::AclUp { peer }.into());
    }

    #[test]
    fn test_enable_once() {
        let mut dm = DeviceManager::new(DmConfig::default(), MockPlatform::new());
        dm.handle(DmCommand::Enable.into());
        dm.handle(DmCommand::Enable.into());

        assert!(dm.is_enabled());
        assert_eq!(dm.platform().calls, [Call::Enable]);
        assert_eq!(dm.platform().events, [DmEvent::Enabled]);
    }

    #[test]
    fn test_commands_need_enable() {
        let mut dm = DeviceManager::new(DmConfig::default(), MockPlatform::new());
        dm.handle(DmCommand::SetVisibility(Visibility::Discoverable).into());
        dm.start_search(ServiceMask::empty(), false);

        assert!(dm.platform().calls.is_empty());
        assert_eq!(
            dm.platform().events,
            [
                DmEvent::CommandFailed { command: MessageId::SetVisibility, error: DmError::NotEnabled },
                DmEvent::CommandFailed { command: MessageId::Search, error: DmError::NotEnabled },
            ]
        );
        assert_eq!(dm.search().current_state(), SearchState::Idle);
    }

    #[test]
    fn test_acl_up_masks_policy_and_detects_ssr() {
        let mut dm = enabled_manager();
        dm.platform_mut().controller_policy = Some(LinkPolicy::SNIFF | LinkPolicy::ROLE_SWITCH);
        dm.platform_mut().local_ssr = true;
        dm.platform_mut().remote_ssr = true;

        link_up(&mut dm, PHONE);

        let record = dm.power_manager().devices().get(&PHONE).unwrap();
        assert_eq!(record.link_policy, LinkPolicy::SNIFF | LinkPolicy::ROLE_SWITCH);
        assert!(record.info.use_ssr);
        assert_eq!(dm.platform().calls, [Call::SetLinkPolicy(PHONE, record.link_policy)]);
        assert_eq!(dm.platform().events, [DmEvent::LinkUp { peer: PHONE }]);
    }

    #[test]
    fn test_acl_up_with_full_registry_is_dropped() {
        let mut dm = enabled_manager();
        for last in 0..=u8::try_from(crate::constants::MAX_PEER_DEVICES).unwrap() {
            link_up(&mut dm, BluetoothAddress::new([0, 0, 0, 0, 1, last]));
        }
        assert_eq!(dm.power_manager().devices().len(), crate::constants::MAX_PEER_DEVICES);
        assert!(dm.platform().events.iter().all(|e| matches!(e, DmEvent::LinkUp { .. })));
    }

    #[test]
    fn test_remove_connected_device_waits_for_link_down() {
        let mut dm = enabled_manager();
        link_up(&mut dm, PHONE);
        dm.platform_mut().calls.clear();
        dm.platform_mut().events.clear();

        dm.handle(DmCommand::RemoveDevice { peer: PHONE }.into());
        assert_eq!(dm.platform().calls, [Call::Disconnect(PHONE, HCI_ERR_REMOTE_USER_TERMINATED)]);
        let record = dm.power_manager().devices().get(&PHONE).unwrap();
        assert_eq!(record.conn_state, ConnectionState::Unpairing);

        dm.handle(DmCommand::AclDown { peer: PHONE, reason: 0x16 }.into());
        assert_eq!(dm.platform().calls.last(), Some(&Call::RemoveBond(PHONE)));
        assert_eq!(
            dm.platform().events,
            [DmEvent::LinkDown { peer: PHONE, reason: 0x16 }, DmEvent::BondRemoved { peer: PHONE }]
        );
        assert!(dm.power_manager().devices().is_empty());
    }

    #[test]
    fn test_remove_device_retries_after_failed_disconnect() {
        let mut dm = enabled_manager();
        link_up(&mut dm, PHONE);
        dm.platform_mut().calls.clear();
        dm.platform_mut().events.clear();
        dm.platform_mut().disconnect_error = Some(DmError::Controller(0x0C));

        dm.handle(DmCommand::RemoveDevice { peer: PHONE }.into());
        let record = dm.power_manager().devices().get(&PHONE).unwrap();
        assert_eq!(record.conn_state, ConnectionState::Connected);
        assert!(!record.remove_pending);
        assert_eq!(
            dm.platform().events,
            [DmEvent::CommandFailed { command: MessageId::RemoveDevice, error: DmError::Controller(0x0C) }]
        );

        dm.platform_mut().disconnect_error = None;
        dm.platform_mut().calls.clear();
        dm.handle(DmCommand::RemoveDevice { peer: PHONE }.into());
        assert_eq!(dm.platform().calls, [Call::Disconnect(PHONE, HCI_ERR_REMOTE_USER_TERMINATED)]);
        let record = dm.power_manager().devices().get(&PHONE).unwrap();
        assert_eq!(record.conn_state, ConnectionState::Unpairing);
        assert!(record.remove_pending);
    }

    #[test]
    fn test_remove_unconnected_device_is_immediate() {
        let mut dm = enabled_manager();
        dm.handle(DmCommand::RemoveDevice { peer: HEADSET }.into());

        assert_eq!(dm.platform().calls, [Call::RemoveBond(HEADSET)]);
        assert_eq!(dm.platform().events, [DmEvent::BondRemoved { peer: HEADSET }]);
    }

    #[test]
    fn test_disable_drops_links_and_reports_after_last() {
        let mut dm = enabled_manager();
        link_up(&mut dm, PHONE);
        link_up(&mut dm, HEADSET);
        dm.handle(Message::ConnectionStatus {
            peer: PHONE,
            profile: ProfileId::Ag,
            app_id: 0,
            status: ConnStatus::ConnOpen,
        });
        dm.platform_mut().calls.clear();
        dm.platform_mut().events.clear();

        dm.handle(DmCommand::Disable.into());
        assert_eq!(dm.power_manager().timers().in_use().count(), 0);
        assert!(dm.platform().calls.contains(&Call::Disconnect(PHONE, HCI_ERR_REMOTE_USER_TERMINATED)));
        assert!(dm.platform().calls.contains(&Call::Disconnect(HEADSET, HCI_ERR_REMOTE_USER_TERMINATED)));
        assert!(dm.is_enabled());

        dm.handle(DmCommand::AclDown { peer: PHONE, reason: 0x16 }.into());
        assert!(!dm.platform().events.contains(&DmEvent::Disabled));

        dm.handle(DmCommand::AclDown { peer: HEADSET, reason: 0x16 }.into());
        assert!(!dm.is_enabled());
        assert_eq!(dm.platform().events.last(), Some(&DmEvent::Disabled));
        assert_eq!(dm.platform().calls.last(), Some(&Call::Disable));
    }

    #[test]
    fn test_disable_cancels_search() {
        let mut dm = enabled_manager();
        dm.start_search(ServiceMask::empty(), false);
        assert_eq!(dm.search().current_state(), SearchState::SearchActive);

        dm.handle(DmCommand::Disable.into());
        assert!(dm.platform().calls.contains(&Call::CancelInquiry));
        assert_eq!(dm.search().current_state(), SearchState::Cancelling);
        // No links, so the controller goes down right away
        assert_eq!(dm.platform().events, [DmEvent::Disabled]);

        dm.handle(Message::Search(SearchMessage::InquiryComplete { responses: 0 }));
        assert_eq!(dm.search().current_state(), SearchState::Idle);
        assert_eq!(
            dm.platform().notifications.last(),
            Some(&SearchNotification::SearchCancelComplete)
        );
    }

    #[test]
    fn test_search_round_trip_through_manager() {
        let mut dm = enabled_manager();
        dm.start_search(ServiceMask::empty(), false);
        dm.handle(Message::InquiryResult(crate::search::DiscoveredDevice::new(PHONE).with_rssi(-50)));
        dm.handle(Message::Search(SearchMessage::InquiryComplete { responses: 1 }));

        assert_eq!(dm.search().current_state(), SearchState::Idle);
        assert_eq!(
            dm.platform().notifications.last(),
            Some(&SearchNotification::DiscoveryComplete)
        );
        assert_eq!(dm.platform().notifications.len(), 4);
    }

    #[test]
    fn test_power_mode_messages_reach_arbiter() {
        let mut dm = enabled_manager();
        link_up(&mut dm, PHONE);
        dm.platform_mut().calls.clear();

        dm.platform_mut().set_mode(PHONE, LinkPowerMode::Sniff);
        dm.handle(Message::PowerModeResult {
            peer: PHONE,
            status: PowerModeStatus::Sniff,
            value: 800,
            hci_status: HCI_SUCCESS,
        });
        let record = dm.power_manager().devices().get(&PHONE).unwrap();
        assert_eq!(record.info.sniff, crate::device::SniffOrigin::Remote);

        // Expiry of an idle slot is ignored
        dm.handle(Message::PmTimerExpired(TimerSlot(2)));
        assert!(dm.platform().calls.is_empty());
    }

    #[test]
    fn test_preferred_role_master_only() {
        let mut dm = enabled_manager();
        link_up(&mut dm, PHONE);
        dm.platform_mut().calls.clear();

        dm.handle(DmCommand::SetPreferredRole { peer: PHONE, role: Role::MasterOnly }.into());
        let policy = LinkPolicy::all() - LinkPolicy::ROLE_SWITCH;
        assert_eq!(
            dm.platform().calls,
            [Call::SetLinkPolicy(PHONE, policy), Call::SwitchRole(PHONE, Role::MasterOnly)]
        );

        dm.handle(DmCommand::SetPreferredRole { peer: HEADSET, role: Role::Any }.into());
        assert_eq!(
            dm.platform().events.last(),
            Some(&DmEvent::CommandFailed {
                command: MessageId::SetPreferredRole,
                error: DmError::UnknownPeer
            })
        );
    }

    #[test]
    fn test_invalid_conn_params_are_rejected() {
        let mut dm = enabled_manager();
        let params = BleConnParams {
            min_interval: 0x40,
            max_interval: 0x20,
            latency: 0,
            supervision_timeout: 0x100,
        };
        dm.handle(DmCommand::BleSetConnParams { peer: PHONE, params }.into());

        assert!(dm.platform().calls.is_empty());
        assert_eq!(
            dm.platform().events,
            [DmEvent::CommandFailed {
                command: MessageId::BleSetConnParams,
                error: DmError::InvalidParameter
            }]
        );
    }

    #[test]
    fn test_pin_reply_passes_pin() {
        let mut dm = enabled_manager();
        let pin = heapless::Vec::from_slice(b"0000").unwrap();
        dm.handle(DmCommand::PinReply { peer: PHONE, pin: Some(pin) }.into());
        dm.handle(DmCommand::PinReply { peer: PHONE, pin: None }.into());

        assert_eq!(
            dm.platform().calls,
            [Call::PinReply(PHONE, Some(b"0000".to_vec())), Call::PinReply(PHONE, None)]
        );
    }
}
