use super::{
    ConnStatus, PmAction, PmActionEntry, PmConfig, PmModeMask, ProfileId, ServiceRegistry,
    SsrClass, TimerPool, TimerSlot,
};
use crate::{
    BluetoothAddress, DmError,
    constants::{HCI_SUCCESS, MAX_PEER_DEVICES},
    device::{DeviceRegistry, LinkPolicy, LinkPowerMode, PeerLinkRecord, SniffOrigin},
    platform::{LinkController, ModeRequestStatus, PmTimerService, PowerModeRequest},
};

/// Power mode state reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerModeStatus {
    /// Link is active
    Active,
    /// Link is in hold mode
    Hold,
    /// Link is sniffing
    Sniff,
    /// Link is parked
    Park,
    /// Sniff subrating changed; the accompanying value is non-zero when in use
    Ssr,
}

/// Why a recompute runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PmRequest {
    /// Status change; a timed winner waits for a timer
    New,
    /// Apply the winner right away
    Execute,
    /// The timer armed for this action fired
    Timer(PmAction),
}

/// Per-link power mode arbitration
///
/// Owns the peer link registry, the connected service registry and the timer
/// pool, so a service record can never outlive its link.
#[derive(Debug)]
pub struct PowerManager {
    config: &'static PmConfig,
    devices: DeviceRegistry,
    services: ServiceRegistry,
    timers: TimerPool,
}

impl PowerManager {
    /// Create an arbiter over a static configuration
    #[must_use]
    pub fn new(config: &'static PmConfig) -> Self {
        Self {
            config,
            devices: DeviceRegistry::new(),
            services: ServiceRegistry::new(),
            timers: TimerPool::new(),
        }
    }

    /// Known links
    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Known links, mutable
    pub fn devices_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.devices
    }

    /// Services currently holding a power-mode opinion
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Timer pool
    #[must_use]
    pub fn timers(&self) -> &TimerPool {
        &self.timers
    }

    /// Start tracking a link
    ///
    /// # Errors
    /// Returns [`DmError::RegistryFull`] if no more links can be tracked.
    pub fn link_up(&mut self, record: PeerLinkRecord) -> Result<(), DmError> {
        self.devices.insert(record).map(|_| ())
    }

    /// Stop tracking a link, dropping its services and timer
    pub fn link_down<P: PmTimerService>(
        &mut self,
        peer: &BluetoothAddress,
        platform: &mut P,
    ) -> Option<PeerLinkRecord> {
        self.stop_peer_timer(peer, platform);
        let dropped = self.services.remove_peer(peer);
        if dropped > 0 {
            debug!("[PM] {} dropped {} service(s)", peer, dropped);
        }
        self.devices.remove(peer)
    }

    /// Disarm every timer
    pub fn stop_all_timers<P: PmTimerService>(&mut self, platform: &mut P) {
        let slots: heapless::Vec<TimerSlot, { crate::constants::MAX_PM_TIMERS }> =
            self.timers.in_use().collect();
        for slot in slots {
            self.timers.release(slot);
            platform.stop_timer(slot);
        }
    }

    /// A profile changed its connection status on a link
    pub fn report_connection_status<P: LinkController + PmTimerService>(
        &mut self,
        peer: BluetoothAddress,
        profile: ProfileId,
        app_id: u8,
        status: ConnStatus,
        platform: &mut P,
    ) {
        let config = self.config;
        let Some(spec) = config.lookup(profile, app_id) else {
            trace!("[PM] {:?} app {} does not take part", profile, app_id);
            return;
        };

        self.stop_peer_timer(&peer, platform);

        let Some(device) = self.devices.get_mut(&peer) else {
            debug!("[PM] {:?} {:?} for unknown link {}", profile, status, peer);
            return;
        };

        match status {
            ConnStatus::ScoOpen => device.info.sco_active = true,
            ConnStatus::ScoClose => device.info.sco_active = false,
            _ => {}
        }

        let mut ssr = SsrClass::Off;
        let mut request = PmRequest::New;
        if status == ConnStatus::ConnOpen && device.info.use_ssr {
            ssr = spec.ssr;
        } else if profile == ProfileId::Av {
            match status {
                ConnStatus::Busy => {
                    device.info.av_active = true;
                    ssr = SsrClass::A2dp;
                    request = PmRequest::Execute;
                }
                ConnStatus::Idle => device.info.av_active = false,
                _ => {}
            }
        }

        let preferred = spec.preferences(status)[0].action;
        if preferred != PmAction::NoAction || ssr != SsrClass::Off {
            self.update_service(peer, profile, app_id, status, preferred, ssr, request, platform);
        } else {
            trace!("[PM] {:?} {:?}: nothing to do", profile, status);
        }

        if matches!(status, ConnStatus::ScoOpen | ConnStatus::ScoClose) {
            let sco_up = self.sco_active();
            let hid_links: heapless::Vec<BluetoothAddress, MAX_PEER_DEVICES> = self
                .devices
                .iter()
                .map(|d| d.addr)
                .filter(|addr| self.services.has_profile(addr, ProfileId::Hh))
                .collect();
            for hid in &hid_links {
                self.hid_sniff_check(hid, sco_up, platform);
            }
        } else if profile == ProfileId::Hh && status == ConnStatus::ConnOpen && self.sco_active() {
            self.hid_sniff_check(&peer, true, platform);
        }
    }

    /// Check whether a voice link is up on any link
    #[must_use]
    pub fn sco_active(&self) -> bool {
        self.devices.iter().any(|d| d.info.sco_active)
    }

    #[allow(clippy::too_many_arguments)]
    fn update_service<P: LinkController + PmTimerService>(
        &mut self,
        peer: BluetoothAddress,
        profile: ProfileId,
        app_id: u8,
        status: ConnStatus,
        preferred: PmAction,
        ssr: SsrClass,
        request: PmRequest,
        platform: &mut P,
    ) {
        if preferred == PmAction::NoPreference {
            if self.services.remove(&peer, profile, app_id).is_none() {
                warn!("[PM] {:?} released {} without a service record", profile, peer);
                return;
            }
        } else if self.services.upsert(peer, profile, app_id, status).is_err() {
            warn!("[PM] no more connected service records, dropping {:?} on {}", profile, peer);
            return;
        }

        if let Some(device) = self.devices.get_mut(&peer) {
            device.reset_pm_history();
        }

        if ssr != SsrClass::Off {
            self.apply_ssr(&peer, ssr, platform);
        }

        self.recompute(&peer, request, platform);
    }

    /// A power-mode timer fired for a link
    pub fn on_timer_fired<P: LinkController + PmTimerService>(
        &mut self,
        peer: &BluetoothAddress,
        platform: &mut P,
    ) {
        let Some(slot) = self.timers.find(peer) else {
            debug!("[PM] timer fired for {} with no timer bound", peer);
            return;
        };
        self.on_timer_expired(slot, platform);
    }

    /// A timer slot expired
    pub fn on_timer_expired<P: LinkController + PmTimerService>(
        &mut self,
        slot: TimerSlot,
        platform: &mut P,
    ) {
        let Some(timer) = self.timers.release(slot) else {
            debug!("[PM] stale expiry for timer {:?}", slot);
            return;
        };
        trace!("[PM] timer {:?} fired for {}", slot, timer.peer);
        self.recompute(&timer.peer, PmRequest::Timer(timer.action), platform);
    }

    /// The link layer reported a power mode change or a failed request
    pub fn on_mode_result<P: LinkController + PmTimerService>(
        &mut self,
        peer: &BluetoothAddress,
        status: PowerModeStatus,
        value: u16,
        hci_status: u8,
        platform: &mut P,
    ) {
        let Some(device) = self.devices.get_mut(peer) else {
            debug!("[PM] mode {:?} for unknown link {}", status, peer);
            return;
        };

        let failed = hci_status != HCI_SUCCESS
            && matches!(status, PowerModeStatus::Active | PowerModeStatus::Sniff | PowerModeStatus::Park);
        if failed {
            device.info.sniff = SniffOrigin::None;
            let modes = device.fail_attempted();
            debug!("[PM] {} rejected {:?} (status {})", peer, modes, hci_status);
            if !modes.is_empty() {
                self.stop_peer_timer(peer, platform);
                self.recompute(peer, PmRequest::New, platform);
            }
            return;
        }

        match status {
            PowerModeStatus::Active => {
                let resend_ssr = device.prev_low.is_some();
                device.prev_low = None;
                if device.info.sniff != SniffOrigin::Requested {
                    device.info.sniff = SniffOrigin::None;
                }
                if resend_ssr {
                    self.apply_ssr(peer, SsrClass::Off, platform);
                }
                self.stop_peer_timer(peer, platform);
                self.recompute(peer, PmRequest::New, platform);
            }
            PowerModeStatus::Park | PowerModeStatus::Hold => {
                if device.info.use_ssr {
                    device.prev_low = Some(if status == PowerModeStatus::Park {
                        LinkPowerMode::Park
                    } else {
                        LinkPowerMode::Hold
                    });
                }
            }
            PowerModeStatus::Ssr => {
                device.info.use_ssr = value != 0;
            }
            PowerModeStatus::Sniff => {
                device.info.sniff = if device.info.sniff == SniffOrigin::Requested {
                    SniffOrigin::Local
                } else {
                    SniffOrigin::Remote
                };
                if device.info.use_ssr {
                    device.prev_low = Some(LinkPowerMode::Sniff);
                }
                // Link is already sniffing, a pending timer has nothing left to do
                self.stop_peer_timer(peer, platform);
            }
        }
    }

    fn stop_peer_timer<P: PmTimerService>(&mut self, peer: &BluetoothAddress, platform: &mut P) {
        if let Some(slot) = self.timers.find(peer) {
            self.timers.release(slot);
            platform.stop_timer(slot);
        }
    }

    fn arm_timer<P: PmTimerService>(
        &mut self,
        peer: &BluetoothAddress,
        action: PmAction,
        timeout_ms: u32,
        platform: &mut P,
    ) {
        if let Some(slot) = self.timers.find(peer) {
            let armed = self.timers.get(slot).map_or(0, |t| t.timeout_ms);
            if timeout_ms > armed {
                platform.stop_timer(slot);
                self.timers.rearm(slot, action, timeout_ms);
                platform.start_timer(slot, timeout_ms);
            }
            return;
        }

        match self.timers.claim(*peer, action, timeout_ms) {
            Ok(slot) => {
                debug!("[PM] {} waits {} ms for {:?}", peer, timeout_ms, action);
                platform.start_timer(slot, timeout_ms);
            }
            Err(_) => warn!("[PM] no more timers, dropping {:?} for {}", action, peer),
        }
    }

    fn recompute<P: LinkController + PmTimerService>(
        &mut self,
        peer: &BluetoothAddress,
        request: PmRequest,
        platform: &mut P,
    ) {
        let Some(device) = self.devices.get(peer) else {
            return;
        };
        let failed = device.pm_mode_failed;

        let mut winner = PmActionEntry::NONE;
        let mut allowed = PmModeMask::LOW_POWER;
        let mut preferred = PmModeMask::empty();
        let mut best_sniff = PmAction::NoAction;
        for service in self.services.for_peer(peer) {
            let Some(spec) = self.config.lookup(service.profile, service.app_id) else {
                continue;
            };
            allowed &= spec.allow;

            let Some(choice) = spec
                .preferences(service.status)
                .iter()
                .find(|entry| (entry.action.mode_mask() & failed).is_empty())
            else {
                continue;
            };

            preferred |= choice.action.mode_mask();
            if choice.action.is_sniff() && choice.action > best_sniff {
                best_sniff = choice.action;
            }
            if choice.action > winner.action {
                winner = *choice;
            }
        }

        let mut action = winner.action;
        let mut timeout_ms = winner.timeout_ms;
        let wanted = action.mode_mask();
        if !wanted.is_empty() && !allowed.contains(wanted) {
            action = match PmAction::from_mode_mask(allowed & preferred) {
                PmAction::Sniff => best_sniff,
                other => other,
            };
            if action == PmAction::NoAction {
                timeout_ms = 0;
            }
            debug!("[PM] {:?} not allowed on {}, using {:?}", winner.action, peer, action);
        }

        match request {
            PmRequest::New if timeout_ms > 0 => {
                self.arm_timer(peer, action, timeout_ms, platform);
                return;
            }
            PmRequest::Timer(armed) if armed < action => {
                debug!("[PM] timer for {:?} is stale, {:?} wins on {}", armed, action, peer);
                return;
            }
            _ => {}
        }

        match action {
            PmAction::Park => self.request_park(peer, platform),
            PmAction::Active => self.request_active(peer, platform),
            sniff if sniff.is_sniff() => self.request_sniff(peer, sniff, platform),
            _ => {}
        }
    }

    fn request_park<P: LinkController>(&mut self, peer: &BluetoothAddress, platform: &mut P) {
        if platform.power_mode(peer) == Some(LinkPowerMode::Park) {
            return;
        }
        let Some(device) = self.devices.get_mut(peer) else {
            return;
        };
        if !device.link_policy.contains(LinkPolicy::PARK) {
            debug!("[PM] park disabled by link policy on {}", peer);
            return;
        }

        device.record_attempt(PmModeMask::PARK);
        if let Err(e) = platform.request_power_mode(peer, PowerModeRequest::Park(self.config.park)) {
            warn!("[PM] park request for {} failed: {:?}", peer, e);
        }
    }

    fn request_sniff<P: LinkController>(
        &mut self,
        peer: &BluetoothAddress,
        action: PmAction,
        platform: &mut P,
    ) {
        let mode = platform.power_mode(peer);
        let ssr_capable = platform.local_supports_ssr() && platform.remote_supports_ssr(peer);
        let Some(device) = self.devices.get_mut(peer) else {
            return;
        };
        if !device.link_policy.contains(LinkPolicy::SNIFF) {
            debug!("[PM] sniff disabled by link policy on {}", peer);
            return;
        }

        if mode == Some(LinkPowerMode::Sniff) {
            // Leave sniff the peer set up alone
            if device.info.sniff == SniffOrigin::Remote {
                return;
            }
            // Re-enter sniff only to get subrating going
            if !ssr_capable || device.info.use_ssr {
                return;
            }
        }

        device.record_attempt(PmModeMask::SNIFF);
        let request = PowerModeRequest::Sniff {
            params: self.config.sniff_params(action),
            force: device.info.sniff == SniffOrigin::Local,
        };
        match platform.request_power_mode(peer, request) {
            Ok(ModeRequestStatus::Started) => device.info.sniff = SniffOrigin::Requested,
            Ok(ModeRequestStatus::Completed) => device.info.sniff = SniffOrigin::Local,
            Err(e) => {
                device.info.sniff = SniffOrigin::None;
                warn!("[PM] sniff request for {} failed: {:?}", peer, e);
            }
        }
    }

    fn request_active<P: LinkController>(&mut self, peer: &BluetoothAddress, platform: &mut P) {
        if platform.power_mode(peer) == Some(LinkPowerMode::Active) {
            return;
        }
        if let Err(e) = platform.request_power_mode(peer, PowerModeRequest::Active) {
            warn!("[PM] active request for {} failed: {:?}", peer, e);
        }
    }

    /// Write subrating parameters: the smallest non-zero latency among the
    /// link's services wins, A2DP streaming uses its own class as is
    fn apply_ssr<P: LinkController>(
        &mut self,
        peer: &BluetoothAddress,
        class: SsrClass,
        platform: &mut P,
    ) {
        let Some(device) = self.devices.get(peer) else {
            return;
        };

        let mut chosen = *self.config.ssr_spec(class);
        if class != SsrClass::A2dp {
            for service in self.services.for_peer(peer) {
                let Some(spec) = self.config.lookup(service.profile, service.app_id) else {
                    continue;
                };
                let candidate = self.config.ssr_spec(spec.ssr);
                if candidate.max_latency != 0
                    && (chosen.max_latency == 0 || candidate.max_latency < chosen.max_latency)
                {
                    chosen = *candidate;
                }
            }
        }

        if chosen.max_latency == 0 {
            return;
        }
        if device.info.sco_active {
            debug!("[PM] voice link up on {}, keeping subrating", peer);
            return;
        }
        if !platform.local_supports_ssr() || !platform.remote_supports_ssr(peer) {
            return;
        }

        if let Err(e) = platform.write_ssr(peer, &chosen) {
            warn!("[PM] subrating write for {} failed: {:?}", peer, e);
        }
    }

    /// Some controllers mishandle sniff on a HID link while a voice link is
    /// up on any link: take sniff out of the HID link's policy while SCO is
    /// active
    fn hid_sniff_check<P: LinkController + PmTimerService>(
        &mut self,
        peer: &BluetoothAddress,
        sco_active: bool,
        platform: &mut P,
    ) {
        let mode = platform.power_mode(peer);
        let Some(device) = self.devices.get_mut(peer) else {
            return;
        };

        if sco_active {
            if !device.link_policy.contains(LinkPolicy::SNIFF) {
                return;
            }
            if mode == Some(LinkPowerMode::Sniff) {
                if let Err(e) = platform.request_power_mode(peer, PowerModeRequest::Active) {
                    warn!("[PM] active request for {} failed: {:?}", peer, e);
                }
            }
            device.link_policy.remove(LinkPolicy::SNIFF);
            device.info.sniff_blocked_by_sco = true;
            info!("[PM] voice link up, sniff disabled on HID link {}", peer);
            if let Err(e) = platform.set_link_policy(peer, device.link_policy) {
                warn!("[PM] link policy write for {} failed: {:?}", peer, e);
            }
        } else {
            if !device.info.sniff_blocked_by_sco {
                return;
            }
            device.link_policy.insert(LinkPolicy::SNIFF);
            device.info.sniff_blocked_by_sco = false;
            info!("[PM] voice link down, sniff restored on HID link {}", peer);
            if let Err(e) = platform.set_link_policy(peer, device.link_policy) {
                warn!("[PM] link policy write for {} failed: {:?}", peer, e);
            }
            self.recompute(peer, PmRequest::New, platform);
        }
    }
}
