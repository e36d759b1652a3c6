use heapless::Vec;

use super::{ConnStatus, ProfileId};
use crate::{BluetoothAddress, DmError, constants::MAX_CONNECTED_SERVICES};

/// A profile currently contributing a power-mode opinion on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectedServiceRecord {
    /// Link the profile runs on
    pub peer: BluetoothAddress,
    /// Reporting profile
    pub profile: ProfileId,
    /// Application id within the profile
    pub app_id: u8,
    /// Last reported status
    pub status: ConnStatus,
}

/// Bounded registry keyed by (peer, profile, app id)
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<ConnectedServiceRecord, MAX_CONNECTED_SERVICES>,
}

impl ServiceRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self { services: Vec::new() }
    }

    fn position(&self, peer: &BluetoothAddress, profile: ProfileId, app_id: u8) -> Option<usize> {
        self.services
            .iter()
            .position(|s| s.peer == *peer && s.profile == profile && s.app_id == app_id)
    }

    /// Update the status of an existing record or insert a new one
    ///
    /// # Errors
    /// Returns [`DmError::RegistryFull`] if the record is new and there is no room.
    pub fn upsert(
        &mut self,
        peer: BluetoothAddress,
        profile: ProfileId,
        app_id: u8,
        status: ConnStatus,
    ) -> Result<(), DmError> {
        if let Some(index) = self.position(&peer, profile, app_id) {
            self.services[index].status = status;
            return Ok(());
        }
        self.services
            .push(ConnectedServiceRecord { peer, profile, app_id, status })
            .map_err(|_| DmError::RegistryFull)
    }

    /// Remove a record, keeping the order of the others
    pub fn remove(
        &mut self,
        peer: &BluetoothAddress,
        profile: ProfileId,
        app_id: u8,
    ) -> Option<ConnectedServiceRecord> {
        let index = self.position(peer, profile, app_id)?;
        Some(self.services.remove(index))
    }

    /// Drop every record bound to a peer, returning how many were dropped
    pub fn remove_peer(&mut self, peer: &BluetoothAddress) -> usize {
        let before = self.services.len();
        self.services.retain(|s| s.peer != *peer);
        before - self.services.len()
    }

    /// Records bound to a peer
    pub fn for_peer<'a>(
        &'a self,
        peer: &'a BluetoothAddress,
    ) -> impl Iterator<Item = &'a ConnectedServiceRecord> + 'a {
        self.services.iter().filter(move |s| s.peer == *peer)
    }

    /// Check whether a profile has a record on a peer
    #[must_use]
    pub fn has_profile(&self, peer: &BluetoothAddress, profile: ProfileId) -> bool {
        self.for_peer(peer).any(|s| s.profile == profile)
    }

    /// Total number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Check whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: BluetoothAddress = BluetoothAddress([1, 2, 3, 4, 5, 6]);
    const OTHER: BluetoothAddress = BluetoothAddress([6, 5, 4, 3, 2, 1]);

    #[test]
    fn test_upsert_updates_in_place() {
        let mut services = ServiceRegistry::new();
        services.upsert(PEER, ProfileId::Av, 0, ConnStatus::ConnOpen).unwrap();
        services.upsert(PEER, ProfileId::Av, 0, ConnStatus::Busy).unwrap();

        assert_eq!(services.len(), 1);
        assert_eq!(services.for_peer(&PEER).next().unwrap().status, ConnStatus::Busy);
    }

    #[test]
    fn test_full_registry_rejects_new_records() {
        let mut services = ServiceRegistry::new();
        for app_id in 0..MAX_CONNECTED_SERVICES {
            let app_id = u8::try_from(app_id).unwrap();
            services.upsert(PEER, ProfileId::Jv, app_id, ConnStatus::ConnOpen).unwrap();
        }
        assert_eq!(
            services.upsert(OTHER, ProfileId::Hh, 0, ConnStatus::ConnOpen),
            Err(DmError::RegistryFull)
        );
        // Updating an existing record still works when full
        assert!(services.upsert(PEER, ProfileId::Jv, 0, ConnStatus::Idle).is_ok());
    }

    #[test]
    fn test_remove_peer_only_touches_that_peer() {
        let mut services = ServiceRegistry::new();
        services.upsert(PEER, ProfileId::Av, 0, ConnStatus::ConnOpen).unwrap();
        services.upsert(PEER, ProfileId::Hh, 0, ConnStatus::ConnOpen).unwrap();
        services.upsert(OTHER, ProfileId::Hh, 0, ConnStatus::ConnOpen).unwrap();

        assert_eq!(services.remove_peer(&PEER), 2);
        assert!(!services.has_profile(&PEER, ProfileId::Hh));
        assert!(services.has_profile(&OTHER, ProfileId::Hh));
        assert!(services.remove(&OTHER, ProfileId::Hh, 0).is_some());
        assert!(services.is_empty());
    }
}
