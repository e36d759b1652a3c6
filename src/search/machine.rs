use heapless::{Deque, Vec};

use super::{
    DiscoverRequest, DiscoveredDevice, SearchAction, SearchEvent, SearchMessage,
    SearchNotification, SearchRequest, SearchState, ServiceMask, table,
};
use crate::{
    BluetoothAddress,
    constants::{HCI_SUCCESS, MAX_DEVICE_NAME_LENGTH, MAX_DISCOVERED_DEVICES, MAX_PENDING_MESSAGES},
    dispatch::{StateMachine, Transition, dispatch},
    platform::{SearchController, SearchListener},
};

/// Status reported when Device ID discovery could not even be started
const DI_NOT_STARTED: u8 = 0xFF;

/// Request held while a cancel completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PendingRequest {
    /// A search
    Search(SearchRequest),
    /// A single-device discovery
    Discover(DiscoverRequest),
}

impl PendingRequest {
    fn into_message(self) -> SearchMessage {
        match self {
            Self::Search(request) => SearchMessage::Search(request),
            Self::Discover(request) => SearchMessage::Discover(request),
        }
    }
}

/// What an action needs from outside the machine
pub struct SearchContext<'a, P> {
    /// Controller and listener
    pub platform: &'a mut P,
    /// Follow-up messages, processed after the current one
    pub outbox: &'a mut Deque<SearchMessage, MAX_PENDING_MESSAGES>,
}

impl<P> SearchContext<'_, P> {
    fn post(&mut self, message: SearchMessage) {
        if let Err(message) = self.outbox.push_back(message) {
            error!("[SEARCH] outbox full, dropping {:?}", message.event());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Search,
    Discover,
    DeviceId(BluetoothAddress),
}

/// Controller operation the transaction is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum InFlight {
    Idle,
    Inquiry,
    RemoteName(BluetoothAddress),
    ServiceDiscovery(BluetoothAddress),
}

#[derive(Debug, Clone, Copy)]
struct Transaction {
    mode: Mode,
    services: ServiceMask,
    resolve_names: bool,
    in_flight: InFlight,
    cursor: usize,
    di_records: u8,
    di_status: u8,
}

impl Transaction {
    fn new(mode: Mode, services: ServiceMask, resolve_names: bool) -> Self {
        Self {
            mode,
            services,
            resolve_names,
            in_flight: InFlight::Idle,
            cursor: 0,
            di_records: 0,
            di_status: HCI_SUCCESS,
        }
    }
}

#[derive(Debug, Clone)]
struct WalkEntry {
    device: DiscoveredDevice,
    name_done: bool,
    sdp_done: bool,
}

impl WalkEntry {
    fn new(device: DiscoveredDevice) -> Self {
        Self { device, name_done: false, sdp_done: false }
    }
}

/// The search/discovery state machine
#[derive(Debug, Default)]
pub struct SearchMachine {
    state: SearchState,
    queued: Option<PendingRequest>,
    transaction: Option<Transaction>,
    devices: Vec<WalkEntry, MAX_DISCOVERED_DEVICES>,
}

impl SearchMachine {
    /// Create an idle machine
    #[must_use]
    pub const fn new() -> Self {
        Self { state: SearchState::Idle, queued: None, transaction: None, devices: Vec::new() }
    }

    /// Current state
    #[must_use]
    pub fn current_state(&self) -> SearchState {
        self.state
    }

    /// Request waiting for the running cancel to complete
    #[must_use]
    pub fn queued(&self) -> Option<&PendingRequest> {
        self.queued.as_ref()
    }

    /// Devices collected by the running search
    pub fn devices(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.iter().map(|entry| &entry.device)
    }

    /// Check whether a search or discover is running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != SearchState::Idle
    }

    /// Run one message through the transition table
    pub fn handle<P>(&mut self, message: &SearchMessage, ctx: &mut SearchContext<'_, P>) -> SearchState
    where
        P: SearchController + SearchListener,
    {
        trace!("[SEARCH] {:?} in {:?}", message.event(), self.state);
        dispatch(self, message.event(), message, ctx)
    }

    /// Store a device reported by the running inquiry
    ///
    /// Results outside an inquiry are dropped. A device seen twice is
    /// updated in place; once the device table is full, new devices are
    /// still reported but not walked.
    pub fn on_inquiry_result<P>(&mut self, device: DiscoveredDevice, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        let inquiring = self.state == SearchState::SearchActive
            && self.transaction.is_some_and(|tx| tx.in_flight == InFlight::Inquiry);
        if !inquiring {
            trace!("[SEARCH] inquiry result for {} outside an inquiry", device.addr);
            return;
        }

        if let Some(entry) = self.devices.iter_mut().find(|e| e.device.addr == device.addr) {
            let known = &mut entry.device;
            known.rssi = device.rssi.or(known.rssi);
            known.class_of_device = device.class_of_device.or(known.class_of_device);
            if device.name.is_some() {
                known.name.clone_from(&device.name);
            }
        } else if self.devices.push(WalkEntry::new(device.clone())).is_err() {
            warn!("[SEARCH] device table full, {} will not be walked", device.addr);
        }

        ctx.platform.on_search(&SearchNotification::InquiryResult(device));
    }

    fn api_search<P: SearchController>(&mut self, request: &SearchRequest, ctx: &mut SearchContext<'_, P>) {
        self.devices.clear();
        let mut tx = Transaction::new(Mode::Search, request.services, request.resolve_names);

        match ctx.platform.start_inquiry(&request.inquiry) {
            Ok(()) => {
                debug!("[SEARCH] inquiry started");
                tx.in_flight = InFlight::Inquiry;
                self.transaction = Some(tx);
            }
            Err(e) => {
                warn!("[SEARCH] inquiry refused: {:?}", e);
                self.transaction = Some(tx);
                ctx.post(SearchMessage::SearchComplete);
            }
        }
    }

    fn api_discover<P>(&mut self, request: &DiscoverRequest, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        self.devices.clear();
        // Cannot fail, the table was just cleared
        let _ = self.devices.push(WalkEntry::new(DiscoveredDevice::new(request.peer)));
        self.transaction = Some(Transaction::new(Mode::Discover, request.services, true));
        debug!("[SEARCH] discovering {}", request.peer);
        self.continue_walk(ctx);
    }

    fn api_di_discover<P: SearchController>(&mut self, peer: BluetoothAddress, ctx: &mut SearchContext<'_, P>) {
        self.devices.clear();
        let mut tx = Transaction::new(Mode::DeviceId(peer), ServiceMask::empty(), false);

        match ctx.platform.start_di_discovery(&peer) {
            Ok(()) => tx.in_flight = InFlight::ServiceDiscovery(peer),
            Err(e) => {
                warn!("[SEARCH] device id discovery on {} refused: {:?}", peer, e);
                tx.di_status = DI_NOT_STARTED;
                ctx.post(SearchMessage::SearchComplete);
            }
        }
        self.transaction = Some(tx);
    }

    fn api_search_cancel<P: SearchController>(&mut self, ctx: &mut SearchContext<'_, P>) {
        let in_flight = self.transaction.map_or(InFlight::Idle, |tx| tx.in_flight);
        let result = match in_flight {
            InFlight::Inquiry => ctx.platform.cancel_inquiry(),
            InFlight::RemoteName(peer) => ctx.platform.cancel_remote_name(&peer),
            InFlight::ServiceDiscovery(peer) => ctx.platform.cancel_service_discovery(&peer),
            InFlight::Idle => {
                // Nothing will complete on its own
                ctx.post(SearchMessage::SearchComplete);
                return;
            }
        };

        if let Err(e) = result {
            warn!("[SEARCH] cancel of {:?} failed: {:?}", in_flight, e);
            ctx.post(SearchMessage::SearchComplete);
        }
    }

    fn inquiry_complete<P>(&mut self, responses: u8, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        let Some(tx) = self.transaction.as_mut().filter(|tx| tx.mode == Mode::Search) else {
            debug!("[SEARCH] inquiry complete without a search");
            return;
        };
        tx.in_flight = InFlight::Idle;
        tx.cursor = 0;

        debug!("[SEARCH] inquiry complete, {} response(s), {} stored", responses, self.devices.len());
        ctx.platform.on_search(&SearchNotification::InquiryComplete { responses });
        self.continue_walk(ctx);
    }

    fn remote_name<P>(&mut self, message: &SearchMessage, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        let SearchMessage::RemoteName { peer, status, name } = message else {
            return;
        };
        let Some(tx) = self.transaction.as_mut() else {
            return;
        };
        if tx.in_flight != InFlight::RemoteName(*peer) {
            debug!("[SEARCH] unexpected name response from {}", peer);
            return;
        }
        tx.in_flight = InFlight::Idle;
        let cursor = tx.cursor;

        self.record_name(cursor, *status, name);
        self.continue_walk(ctx);
    }

    /// Name response while discovering one peer: only the requested peer's
    /// answer counts, and service discovery follows whether or not it worked
    fn discover_remote_name<P>(&mut self, message: &SearchMessage, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        let SearchMessage::RemoteName { peer, status, name } = message else {
            return;
        };
        let Some(tx) = self.transaction.as_mut().filter(|tx| tx.mode == Mode::Discover) else {
            debug!("[DISCOVER] name response from {} without a discover", peer);
            return;
        };
        if tx.in_flight != InFlight::RemoteName(*peer) {
            debug!("[DISCOVER] name response from {} while waiting for {:?}", peer, tx.in_flight);
            return;
        }
        tx.in_flight = InFlight::Idle;

        if *status != HCI_SUCCESS {
            info!("[DISCOVER] {} did not give its name, discovering services anyway", peer);
        }
        // A discover walks exactly one device
        self.record_name(0, *status, name);
        self.continue_walk(ctx);
    }

    fn record_name(
        &mut self,
        cursor: usize,
        status: u8,
        name: &Option<heapless::String<MAX_DEVICE_NAME_LENGTH>>,
    ) {
        let Some(entry) = self.devices.get_mut(cursor) else {
            return;
        };
        if status == HCI_SUCCESS {
            entry.device.name.clone_from(name);
        } else {
            debug!("[SEARCH] name request to {} failed: {}", entry.device.addr, status);
        }
        entry.name_done = true;
    }

    fn sdp_result<P>(&mut self, message: &SearchMessage, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        let SearchMessage::SdpResult { peer, status, services, di_records } = message else {
            return;
        };
        let Some(tx) = self.transaction.as_mut() else {
            return;
        };
        if tx.in_flight != InFlight::ServiceDiscovery(*peer) {
            debug!("[SEARCH] unexpected discovery result from {}", peer);
            return;
        }
        tx.in_flight = InFlight::Idle;

        if let Mode::DeviceId(_) = tx.mode {
            tx.di_records = *di_records;
            tx.di_status = *status;
            ctx.post(SearchMessage::SearchComplete);
            return;
        }

        let cursor = tx.cursor;
        if let Some(entry) = self.devices.get_mut(cursor) {
            if *status == HCI_SUCCESS {
                entry.device.services = *services;
            } else {
                debug!("[SEARCH] service discovery on {} failed: {}", peer, status);
            }
            entry.sdp_done = true;
        }
        self.continue_walk(ctx);
    }

    /// Drive the current device as far as it goes without waiting
    fn continue_walk<P: SearchController>(&mut self, ctx: &mut SearchContext<'_, P>) {
        let Some(tx) = self.transaction.as_mut() else {
            return;
        };
        let Some(entry) = self.devices.get_mut(tx.cursor) else {
            tx.in_flight = InFlight::Idle;
            ctx.post(SearchMessage::SearchComplete);
            return;
        };
        let addr = entry.device.addr;

        if !entry.name_done {
            if tx.resolve_names && entry.device.name.is_none() {
                match ctx.platform.read_remote_name(&addr) {
                    Ok(()) => {
                        tx.in_flight = InFlight::RemoteName(addr);
                        return;
                    }
                    Err(e) => warn!("[SEARCH] name request to {} refused: {:?}", addr, e),
                }
            }
            entry.name_done = true;
        }

        if !entry.sdp_done {
            if !tx.services.is_empty() {
                match ctx.platform.start_service_discovery(&addr, tx.services) {
                    Ok(()) => {
                        tx.in_flight = InFlight::ServiceDiscovery(addr);
                        return;
                    }
                    Err(e) => warn!("[SEARCH] service discovery on {} refused: {:?}", addr, e),
                }
            }
            entry.sdp_done = true;
        }

        tx.in_flight = InFlight::Idle;
        ctx.post(SearchMessage::DiscoveryResult { peer: addr });
    }

    fn current_device(&self, peer: &BluetoothAddress) -> Option<&DiscoveredDevice> {
        let tx = self.transaction.as_ref()?;
        let entry = self.devices.get(tx.cursor)?;
        (entry.device.addr == *peer).then_some(&entry.device)
    }

    fn search_result<P>(&mut self, peer: &BluetoothAddress, ctx: &mut SearchContext<'_, P>)
    where
        P: SearchController + SearchListener,
    {
        let Some(device) = self.current_device(peer) else {
            debug!("[SEARCH] result for {} is not the current device", peer);
            return;
        };
        ctx.platform.on_search(&SearchNotification::DiscoveryResult(device.clone()));

        if let Some(tx) = self.transaction.as_mut() {
            tx.cursor += 1;
        }
        self.continue_walk(ctx);
    }

    fn discover_result<P: SearchListener>(&mut self, peer: &BluetoothAddress, ctx: &mut SearchContext<'_, P>) {
        let Some(device) = self.current_device(peer) else {
            debug!("[SEARCH] result for {} is not the discovered peer", peer);
            return;
        };
        ctx.platform.on_search(&SearchNotification::DiscoveryResult(device.clone()));
        ctx.post(SearchMessage::SearchComplete);
    }

    fn search_complete<P: SearchListener>(&mut self, ctx: &mut SearchContext<'_, P>) {
        let notification = match self.transaction.take() {
            Some(Transaction { mode: Mode::DeviceId(peer), di_records, di_status, .. }) => {
                SearchNotification::DiDiscoveryComplete { peer, records: di_records, status: di_status }
            }
            _ => SearchNotification::DiscoveryComplete,
        };
        info!("[SEARCH] complete");
        ctx.platform.on_search(&notification);
    }

    fn queue(&mut self, request: PendingRequest) {
        if self.queued.is_some() {
            warn!("[SEARCH] a request is already waiting for the cancel, dropping {:?}", request);
            return;
        }
        self.queued = Some(request);
    }

    fn cancel_transaction_complete<P: SearchListener>(&mut self, ctx: &mut SearchContext<'_, P>) {
        self.transaction = None;
        self.devices.clear();
        ctx.platform.on_search(&SearchNotification::TransactionCancelled);
    }

    fn cancel_complete<P: SearchListener>(&mut self, ctx: &mut SearchContext<'_, P>) {
        info!("[SEARCH] cancelled");
        ctx.platform.on_search(&SearchNotification::SearchCancelComplete);
        if let Some(request) = self.queued.take() {
            ctx.post(request.into_message());
        }
    }
}

impl<'a, P> StateMachine<SearchContext<'a, P>> for SearchMachine
where
    P: SearchController + SearchListener,
{
    type State = SearchState;
    type Event = SearchEvent;
    type Action = SearchAction;
    type Payload = SearchMessage;

    const IGNORE: SearchAction = SearchAction::Ignore;

    fn state(&self) -> SearchState {
        self.state
    }

    fn set_state(&mut self, state: SearchState) {
        self.state = state;
    }

    fn transition(state: SearchState, event: SearchEvent) -> Transition<SearchState, SearchAction> {
        table::lookup(state, event)
    }

    fn execute(&mut self, action: SearchAction, payload: &SearchMessage, ctx: &mut SearchContext<'a, P>) {
        match (action, payload) {
            (SearchAction::ApiSearch, SearchMessage::Search(request)) => self.api_search(request, ctx),
            (SearchAction::ApiDiscover, SearchMessage::Discover(request)) => {
                self.api_discover(request, ctx);
            }
            (SearchAction::ApiDiDiscover, SearchMessage::DiDiscover { peer }) => {
                self.api_di_discover(*peer, ctx);
            }
            (SearchAction::ApiSearchCancel, _) => self.api_search_cancel(ctx),
            (SearchAction::CancelNotify, _) => {
                ctx.platform.on_search(&SearchNotification::SearchCancelComplete);
            }
            (SearchAction::InquiryComplete, SearchMessage::InquiryComplete { responses }) => {
                self.inquiry_complete(*responses, ctx);
            }
            (SearchAction::RemoteName, _) => self.remote_name(payload, ctx),
            (SearchAction::DiscoverRemoteName, _) => self.discover_remote_name(payload, ctx),
            (SearchAction::SdpResult, _) => self.sdp_result(payload, ctx),
            (SearchAction::SearchResult, SearchMessage::DiscoveryResult { peer }) => {
                self.search_result(peer, ctx);
            }
            (SearchAction::DiscoverResult, SearchMessage::DiscoveryResult { peer }) => {
                self.discover_result(peer, ctx);
            }
            (SearchAction::SearchComplete, _) => self.search_complete(ctx),
            (SearchAction::QueueSearch, SearchMessage::Search(request)) => {
                self.queue(PendingRequest::Search(*request));
            }
            (SearchAction::QueueDiscover, SearchMessage::Discover(request)) => {
                self.queue(PendingRequest::Discover(*request));
            }
            (SearchAction::ClearQueue, _) => self.queued = None,
            (SearchAction::CancelTransactionComplete, _) => self.cancel_transaction_complete(ctx),
            (SearchAction::CancelComplete, _) => self.cancel_complete(ctx),
            (SearchAction::FreeSdpDb, _) => trace!("[SEARCH] dropping late discovery result"),
            (action, _) => {
                error!("[SEARCH] {:?} does not match {:?}", action, payload.event());
            }
        }
    }
}
