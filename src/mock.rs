//! Recording platform for unit tests

use std::{string::String, vec::Vec};

use crate::{
    BluetoothAddress, DmError,
    device::{LinkPolicy, LinkPowerMode, Role},
    dm::{BleConnParams, DmEvent, Visibility},
    platform::{
        DeviceController, DmListener, LinkController, ModeRequestStatus, PmTimerService,
        PowerModeRequest, SearchController, SearchListener,
    },
    pm::{SsrSpec, TimerSlot},
    search::{InquiryParams, SearchNotification, ServiceMask},
};

/// One outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RequestPowerMode(BluetoothAddress, PowerModeRequest),
    WriteSsr(BluetoothAddress, SsrSpec),
    SetLinkPolicy(BluetoothAddress, LinkPolicy),
    SwitchRole(BluetoothAddress, Role),
    Disconnect(BluetoothAddress, u8),
    StartTimer(TimerSlot, u32),
    StopTimer(TimerSlot),
    StartInquiry(InquiryParams),
    CancelInquiry,
    ReadRemoteName(BluetoothAddress),
    CancelRemoteName(BluetoothAddress),
    StartServiceDiscovery(BluetoothAddress, ServiceMask),
    CancelServiceDiscovery(BluetoothAddress),
    StartDiDiscovery(BluetoothAddress),
    Enable,
    Disable,
    SetLocalName(String),
    SetVisibility(Visibility),
    CreateBond(BluetoothAddress),
    CancelBond(BluetoothAddress),
    PinReply(BluetoothAddress, Option<Vec<u8>>),
    ConfirmReply(BluetoothAddress, bool),
    RemoveBond(BluetoothAddress),
    SetEncryption(BluetoothAddress, bool),
    SetBleConnParams(BluetoothAddress, BleConnParams),
}

/// Records every call; answers from its fields
pub struct MockPlatform {
    pub calls: Vec<Call>,
    pub notifications: Vec<SearchNotification>,
    pub events: Vec<DmEvent>,
    pub local_ssr: bool,
    pub remote_ssr: bool,
    /// Link policy the controller reports, `None` for unknown
    pub controller_policy: Option<LinkPolicy>,
    /// Answer to power mode requests
    pub mode_request: Result<ModeRequestStatus, DmError>,
    /// Makes every start call of the search controller fail
    pub search_error: Option<DmError>,
    /// Makes every device controller call fail
    pub device_error: Option<DmError>,
    /// Makes disconnect fail
    pub disconnect_error: Option<DmError>,
    modes: Vec<(BluetoothAddress, LinkPowerMode)>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            notifications: Vec::new(),
            events: Vec::new(),
            local_ssr: false,
            remote_ssr: false,
            controller_policy: None,
            mode_request: Ok(ModeRequestStatus::Started),
            search_error: None,
            device_error: None,
            disconnect_error: None,
            modes: Vec::new(),
        }
    }

    /// Set the mode reported for a peer; peers not set report `Active`
    pub fn set_mode(&mut self, peer: BluetoothAddress, mode: LinkPowerMode) {
        self.modes.retain(|(addr, _)| *addr != peer);
        self.modes.push((peer, mode));
    }

    fn search_call(&mut self, call: Call) -> Result<(), DmError> {
        self.calls.push(call);
        self.search_error.map_or(Ok(()), Err)
    }

    fn device_call(&mut self, call: Call) -> Result<(), DmError> {
        self.calls.push(call);
        self.device_error.map_or(Ok(()), Err)
    }
}

impl LinkController for MockPlatform {
    fn power_mode(&self, peer: &BluetoothAddress) -> Option<LinkPowerMode> {
        let mode = self.modes.iter().find(|(addr, _)| addr == peer).map(|(_, mode)| *mode);
        Some(mode.unwrap_or(LinkPowerMode::Active))
    }

    fn request_power_mode(
        &mut self,
        peer: &BluetoothAddress,
        request: PowerModeRequest,
    ) -> Result<ModeRequestStatus, DmError> {
        self.calls.push(Call::RequestPowerMode(*peer, request));
        self.mode_request
    }

    fn write_ssr(&mut self, peer: &BluetoothAddress, params: &SsrSpec) -> Result<(), DmError> {
        self.calls.push(Call::WriteSsr(*peer, *params));
        Ok(())
    }

    fn link_policy(&self, _peer: &BluetoothAddress) -> Option<LinkPolicy> {
        self.controller_policy
    }

    fn set_link_policy(
        &mut self,
        peer: &BluetoothAddress,
        policy: LinkPolicy,
    ) -> Result<(), DmError> {
        self.calls.push(Call::SetLinkPolicy(*peer, policy));
        Ok(())
    }

    fn switch_role(&mut self, peer: &BluetoothAddress, role: Role) -> Result<(), DmError> {
        self.calls.push(Call::SwitchRole(*peer, role));
        Ok(())
    }

    fn local_supports_ssr(&self) -> bool {
        self.local_ssr
    }

    fn remote_supports_ssr(&self, _peer: &BluetoothAddress) -> bool {
        self.remote_ssr
    }

    fn disconnect(&mut self, peer: &BluetoothAddress, reason: u8) -> Result<(), DmError> {
        self.calls.push(Call::Disconnect(*peer, reason));
        self.disconnect_error.map_or(Ok(()), Err)
    }
}

impl PmTimerService for MockPlatform {
    fn start_timer(&mut self, slot: TimerSlot, timeout_ms: u32) {
        self.calls.push(Call::StartTimer(slot, timeout_ms));
    }

    fn stop_timer(&mut self, slot: TimerSlot) {
        self.calls.push(Call::StopTimer(slot));
    }
}

impl SearchController for MockPlatform {
    fn start_inquiry(&mut self, params: &InquiryParams) -> Result<(), DmError> {
        self.search_call(Call::StartInquiry(*params))
    }

    fn cancel_inquiry(&mut self) -> Result<(), DmError> {
        self.calls.push(Call::CancelInquiry);
        Ok(())
    }

    fn read_remote_name(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.search_call(Call::ReadRemoteName(*peer))
    }

    fn cancel_remote_name(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.calls.push(Call::CancelRemoteName(*peer));
        Ok(())
    }

    fn start_service_discovery(
        &mut self,
        peer: &BluetoothAddress,
        services: ServiceMask,
    ) -> Result<(), DmError> {
        self.search_call(Call::StartServiceDiscovery(*peer, services))
    }

    fn cancel_service_discovery(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.calls.push(Call::CancelServiceDiscovery(*peer));
        Ok(())
    }

    fn start_di_discovery(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.search_call(Call::StartDiDiscovery(*peer))
    }
}

impl DeviceController for MockPlatform {
    fn enable(&mut self) -> Result<(), DmError> {
        self.device_call(Call::Enable)
    }

    fn disable(&mut self) -> Result<(), DmError> {
        self.device_call(Call::Disable)
    }

    fn set_local_name(&mut self, name: &str) -> Result<(), DmError> {
        self.device_call(Call::SetLocalName(name.into()))
    }

    fn set_visibility(&mut self, visibility: Visibility) -> Result<(), DmError> {
        self.device_call(Call::SetVisibility(visibility))
    }

    fn create_bond(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.device_call(Call::CreateBond(*peer))
    }

    fn cancel_bond(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.device_call(Call::CancelBond(*peer))
    }

    fn pin_reply(&mut self, peer: &BluetoothAddress, pin: Option<&[u8]>) -> Result<(), DmError> {
        self.device_call(Call::PinReply(*peer, pin.map(<[u8]>::to_vec)))
    }

    fn confirm_reply(&mut self, peer: &BluetoothAddress, accept: bool) -> Result<(), DmError> {
        self.device_call(Call::ConfirmReply(*peer, accept))
    }

    fn remove_bond(&mut self, peer: &BluetoothAddress) -> Result<(), DmError> {
        self.device_call(Call::RemoveBond(*peer))
    }

    fn set_encryption(&mut self, peer: &BluetoothAddress, enable: bool) -> Result<(), DmError> {
        self.device_call(Call::SetEncryption(*peer, enable))
    }

    fn set_ble_conn_params(
        &mut self,
        peer: &BluetoothAddress,
        params: &BleConnParams,
    ) -> Result<(), DmError> {
        self.device_call(Call::SetBleConnParams(*peer, *params))
    }
}

impl SearchListener for MockPlatform {
    fn on_search(&mut self, notification: &SearchNotification) {
        self.notifications.push(notification.clone());
    }
}

impl DmListener for MockPlatform {
    fn on_dm_event(&mut self, event: &DmEvent) {
        self.events.push(*event);
    }
}
