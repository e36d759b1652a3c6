use super::PmAction;
use crate::{BluetoothAddress, DmError, constants::MAX_PM_TIMERS};

/// Identity of a power-mode timer slot, echoed back when the timer expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerSlot(pub u8);

impl TimerSlot {
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One power-mode timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PmTimer {
    /// Slot is claimed
    pub in_use: bool,
    /// Peer the timer is bound to
    pub peer: BluetoothAddress,
    /// Action to apply when the timer fires
    pub action: PmAction,
    /// Timeout the timer was armed with
    pub timeout_ms: u32,
}

/// Fixed pool of power-mode timers; at most one slot is bound to a peer
#[derive(Debug, Default)]
pub struct TimerPool {
    slots: [PmTimer; MAX_PM_TIMERS],
}

impl TimerPool {
    /// Create a pool with every slot free
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot bound to a peer
    #[must_use]
    pub fn find(&self, peer: &BluetoothAddress) -> Option<TimerSlot> {
        self.slots
            .iter()
            .position(|t| t.in_use && t.peer == *peer)
            .and_then(|i| u8::try_from(i).ok())
            .map(TimerSlot)
    }

    /// Timer in a slot, if the slot is claimed
    #[must_use]
    pub fn get(&self, slot: TimerSlot) -> Option<&PmTimer> {
        self.slots.get(slot.index()).filter(|t| t.in_use)
    }

    /// Bind a free slot to a peer
    ///
    /// # Errors
    /// Returns [`DmError::InvalidState`] if a slot is already bound to the peer,
    /// or [`DmError::NoTimerAvailable`] if every slot is in use.
    pub fn claim(
        &mut self,
        peer: BluetoothAddress,
        action: PmAction,
        timeout_ms: u32,
    ) -> Result<TimerSlot, DmError> {
        if self.find(&peer).is_some() {
            return Err(DmError::InvalidState);
        }
        let index = self
            .slots
            .iter()
            .position(|t| !t.in_use)
            .ok_or(DmError::NoTimerAvailable)?;
        self.slots[index] = PmTimer { in_use: true, peer, action, timeout_ms };
        u8::try_from(index).map(TimerSlot).map_err(|_| DmError::NoTimerAvailable)
    }

    /// Re-arm a claimed slot with a new action and timeout
    pub fn rearm(&mut self, slot: TimerSlot, action: PmAction, timeout_ms: u32) {
        if let Some(timer) = self.slots.get_mut(slot.index()).filter(|t| t.in_use) {
            timer.action = action;
            timer.timeout_ms = timeout_ms;
        }
    }

    /// Free a slot, returning what it was bound to
    pub fn release(&mut self, slot: TimerSlot) -> Option<PmTimer> {
        let timer = self.slots.get_mut(slot.index()).filter(|t| t.in_use)?;
        let released = *timer;
        *timer = PmTimer::default();
        Some(released)
    }

    /// Claimed slots
    pub fn in_use(&self) -> impl Iterator<Item = TimerSlot> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, t)| t.in_use)
            .filter_map(|(i, _)| u8::try_from(i).ok())
            .map(TimerSlot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0xAA, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = TimerPool::new();
        for i in 0..MAX_PM_TIMERS {
            let last = u8::try_from(i).unwrap();
            pool.claim(peer(last), PmAction::Sniff, 1000).unwrap();
        }
        assert_eq!(pool.claim(peer(0xFF), PmAction::Sniff, 1000), Err(DmError::NoTimerAvailable));
        assert_eq!(pool.in_use().count(), MAX_PM_TIMERS);
    }

    #[test]
    fn test_one_timer_per_peer() {
        let mut pool = TimerPool::new();
        let slot = pool.claim(peer(1), PmAction::Park, 5000).unwrap();
        assert_eq!(pool.claim(peer(1), PmAction::Sniff, 1000), Err(DmError::InvalidState));
        assert_eq!(pool.find(&peer(1)), Some(slot));

        pool.rearm(slot, PmAction::Sniff, 9000);
        let timer = pool.get(slot).unwrap();
        assert_eq!(timer.action, PmAction::Sniff);
        assert_eq!(timer.timeout_ms, 9000);
    }

    #[test]
    fn test_release_frees_slot() {
        let mut pool = TimerPool::new();
        let slot = pool.claim(peer(1), PmAction::Sniff, 1000).unwrap();

        let released = pool.release(slot).unwrap();
        assert_eq!(released.peer, peer(1));
        assert!(pool.find(&peer(1)).is_none());
        assert!(pool.get(slot).is_none());
        assert!(pool.release(slot).is_none());
    }
}
