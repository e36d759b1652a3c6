//! Peer link registry
//!
//! One [`PeerLinkRecord`] exists per ACL link the device manager knows about.
//! The registry is bounded by [`MAX_PEER_DEVICES`]; an insert into a full
//! registry is rejected.

use bitflags::bitflags;
use heapless::Vec;

use crate::{BluetoothAddress, DmError, constants::MAX_PEER_DEVICES, pm::PmModeMask};

bitflags! {
    /// HCI link policy settings: which low-power features the link layer may use
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LinkPolicy: u16 {
        /// Role switch allowed
        const ROLE_SWITCH = 0x0001;
        /// Hold mode allowed
        const HOLD = 0x0002;
        /// Sniff mode allowed
        const SNIFF = 0x0004;
        /// Park state allowed
        const PARK = 0x0008;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkPolicy {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "LinkPolicy({=u16:#06x})", self.bits());
    }
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self::all()
    }
}

/// Connection state of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// No ACL link
    #[default]
    NotConnected,
    /// ACL link is up
    Connected,
    /// Link is being torn down because the bond is being removed
    Unpairing,
}

/// Preferred role on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Local device must stay master
    MasterOnly,
    /// Local device prefers master but accepts a role switch
    MasterPreferred,
    /// No preference
    #[default]
    Any,
}

/// Power mode reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkPowerMode {
    /// Fully active
    #[default]
    Active,
    /// Hold mode
    Hold,
    /// Sniff mode
    Sniff,
    /// Park state
    Park,
}

impl LinkPowerMode {
    /// Check whether this is one of the low-power modes
    #[must_use]
    pub const fn is_low_power(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Who put (or is putting) the link into sniff mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SniffOrigin {
    /// No sniff activity tracked
    #[default]
    None,
    /// We asked the link layer for sniff and are waiting for the mode change
    Requested,
    /// The link entered sniff because we asked for it
    Local,
    /// The peer put the link into sniff on its own
    Remote,
}

/// Per-link device information, one named field per concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Both sides support sniff subrating and it is in use on this link
    pub use_ssr: bool,
    /// An A/V stream is running on this link
    pub av_active: bool,
    /// A SCO/eSCO voice link is up alongside this ACL
    pub sco_active: bool,
    /// Sniff was removed from the link policy because of an active voice link
    pub sniff_blocked_by_sco: bool,
    /// Sniff initiator tracking
    pub sniff: SniffOrigin,
}

/// State kept for one ACL link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerLinkRecord {
    /// Peer address, the registry key
    pub addr: BluetoothAddress,
    /// Low-power features the link layer may use on this link
    pub link_policy: LinkPolicy,
    /// Connection state
    pub conn_state: ConnectionState,
    /// Preferred role
    pub preferred_role: Role,
    /// Device information flags
    pub info: DeviceInfo,
    /// Last low-power mode the link was in, kept to re-apply SSR
    pub prev_low: Option<LinkPowerMode>,
    /// Power modes requested since the last successful recompute
    pub pm_mode_attempted: PmModeMask,
    /// Power modes the controller rejected for this link
    pub pm_mode_failed: PmModeMask,
    /// Remove the bond once the link goes down
    pub remove_pending: bool,
}

impl PeerLinkRecord {
    /// Create a record for a newly connected link
    #[must_use]
    pub fn new(addr: BluetoothAddress, link_policy: LinkPolicy, preferred_role: Role) -> Self {
        Self {
            addr,
            link_policy,
            conn_state: ConnectionState::Connected,
            preferred_role,
            info: DeviceInfo::default(),
            prev_low: None,
            pm_mode_attempted: PmModeMask::empty(),
            pm_mode_failed: PmModeMask::empty(),
            remove_pending: false,
        }
    }

    /// Forget all power-mode attempts and failures
    pub fn reset_pm_history(&mut self) {
        self.pm_mode_attempted = PmModeMask::empty();
        self.pm_mode_failed = PmModeMask::empty();
    }

    /// Record that `mode` was requested from the link layer
    pub fn record_attempt(&mut self, mode: PmModeMask) {
        self.pm_mode_attempted |= mode;
    }

    /// Move the attempted low-power modes into the failed set
    ///
    /// Returns the modes that were marked as failed.
    pub fn fail_attempted(&mut self) -> PmModeMask {
        let failed = self.pm_mode_attempted & PmModeMask::LOW_POWER;
        self.pm_mode_failed |= failed;
        failed
    }
}

/// Bounded registry of known peer links
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    links: Vec<PeerLinkRecord, MAX_PEER_DEVICES>,
}

impl DeviceRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self { links: Vec::new() }
    }

    /// Insert a record, replacing any existing record for the same peer
    ///
    /// # Errors
    /// Returns [`DmError::RegistryFull`] if the peer is new and the registry is full.
    pub fn insert(&mut self, record: PeerLinkRecord) -> Result<&mut PeerLinkRecord, DmError> {
        let index = match self.links.iter().position(|r| r.addr == record.addr) {
            Some(index) => {
                self.links[index] = record;
                index
            }
            None => {
                self.links
                    .push(record)
                    .map_err(|_| DmError::RegistryFull)?;
                self.links.len() - 1
            }
        };
        Ok(&mut self.links[index])
    }

    /// Look up a peer
    #[must_use]
    pub fn get(&self, addr: &BluetoothAddress) -> Option<&PeerLinkRecord> {
        self.links.iter().find(|r| r.addr == *addr)
    }

    /// Look up a peer for modification
    pub fn get_mut(&mut self, addr: &BluetoothAddress) -> Option<&mut PeerLinkRecord> {
        self.links.iter_mut().find(|r| r.addr == *addr)
    }

    /// Remove a peer, returning its record
    pub fn remove(&mut self, addr: &BluetoothAddress) -> Option<PeerLinkRecord> {
        let index = self.links.iter().position(|r| r.addr == *addr)?;
        Some(self.links.remove(index))
    }

    /// Check whether a peer is known
    #[must_use]
    pub fn contains(&self, addr: &BluetoothAddress) -> bool {
        self.get(addr).is_some()
    }

    /// Iterate over all records
    pub fn iter(&self) -> impl Iterator<Item = &PeerLinkRecord> {
        self.links.iter()
    }

    /// Number of known links
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check whether no link is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, last])
    }

    #[test]
    fn test_registry_rejects_overflow() {
        let mut registry = DeviceRegistry::new();
        for i in 0..MAX_PEER_DEVICES {
            let last = u8::try_from(i).unwrap();
            registry
                .insert(PeerLinkRecord::new(addr(last), LinkPolicy::all(), Role::Any))
                .unwrap();
        }
        assert_eq!(registry.len(), MAX_PEER_DEVICES);

        let overflow = registry.insert(PeerLinkRecord::new(addr(0xEE), LinkPolicy::all(), Role::Any));
        assert_eq!(overflow.err(), Some(DmError::RegistryFull));

        // Re-inserting a known peer replaces in place
        let again = registry.insert(PeerLinkRecord::new(addr(0), LinkPolicy::SNIFF, Role::Any));
        assert_eq!(again.unwrap().link_policy, LinkPolicy::SNIFF);
        assert_eq!(registry.len(), MAX_PEER_DEVICES);
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut registry = DeviceRegistry::new();
        registry
            .insert(PeerLinkRecord::new(addr(1), LinkPolicy::all(), Role::Any))
            .unwrap();
        registry
            .insert(PeerLinkRecord::new(addr(2), LinkPolicy::all(), Role::MasterOnly))
            .unwrap();

        assert!(registry.contains(&addr(2)));
        let removed = registry.remove(&addr(2)).unwrap();
        assert_eq!(removed.preferred_role, Role::MasterOnly);
        assert!(!registry.contains(&addr(2)));
        assert!(registry.remove(&addr(2)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_modes_come_from_attempts() {
        let mut record = PeerLinkRecord::new(addr(1), LinkPolicy::all(), Role::Any);
        record.record_attempt(PmModeMask::SNIFF);
        let failed = record.fail_attempted();

        assert_eq!(failed, PmModeMask::SNIFF);
        assert!(record.pm_mode_failed.contains(PmModeMask::SNIFF));
        assert!(!record.pm_mode_failed.contains(PmModeMask::PARK));

        record.reset_pm_history();
        assert!(record.pm_mode_attempted.is_empty());
        assert!(record.pm_mode_failed.is_empty());
    }
}
