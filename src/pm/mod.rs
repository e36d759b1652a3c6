//! Power Arbiter
//!
//! Every profile running on a link has an opinion about the link's power
//! mode. The arbiter keeps one [`ConnectedServiceRecord`] per (link, profile)
//! pair, and each time a profile reports a connection-status change it
//! recomputes the single mode the link should be in:
//!
//! 1. every service picks its first preference for its current status, or
//!    its second preference when the first one already failed on this link
//! 2. the numerically highest [`PmAction`] wins
//! 3. a low-power winner that some service does not allow falls back to a
//!    low-power mode every service allows and some service prefers
//! 4. a winner with a timeout arms a [`PmTimer`](timer::PmTimer) slot; the
//!    mode is applied when the timer fires
//!
//! The link layer answers asynchronously through
//! [`PowerManager::on_mode_result`]. A rejected sniff or park is remembered in
//! the link's `pm_mode_failed` set so the next recompute falls through to the
//! second preference.

mod arbiter;
pub mod config;
mod services;
mod timer;

pub use arbiter::{PowerManager, PowerModeStatus};
pub use config::{
    DEFAULT_PM_CONFIG, ParkParams, PmActionEntry, PmConfig, PmProfileEntry, PowerModeSpec,
    SniffParams, SsrClass, SsrSpec,
};
pub use services::{ConnectedServiceRecord, ServiceRegistry};
pub use timer::{PmTimer, TimerPool, TimerSlot};

use bitflags::bitflags;

bitflags! {
    /// Set of low-power modes, used for allow-masks and per-link attempt/failure history
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PmModeMask: u8 {
        /// Park state
        const PARK = 0x10;
        /// Sniff mode (any sniff level)
        const SNIFF = 0x20;
        /// Every low-power mode
        const LOW_POWER = Self::PARK.bits() | Self::SNIFF.bits();
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PmModeMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "PmModeMask({=u8:#04x})", self.bits());
    }
}

/// A power-mode preference
///
/// The discriminants are the arbitration order: when several services on one
/// link disagree, the highest value wins. `Park < Sniff* < Active < Retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PmAction {
    /// Leave the link alone
    #[default]
    NoAction = 0x00,
    /// The service no longer has a preference (its record is removed)
    NoPreference = 0x01,
    /// Park the link
    Park = 0x10,
    /// Sniff with the level 0 parameters
    Sniff = 0x20,
    /// Sniff level 1
    Sniff1 = 0x21,
    /// Sniff level 2
    Sniff2 = 0x22,
    /// Sniff level 3
    Sniff3 = 0x23,
    /// Sniff level 4
    Sniff4 = 0x24,
    /// Sniff level 5
    Sniff5 = 0x25,
    /// Sniff level 6
    Sniff6 = 0x26,
    /// Sniff level 7
    Sniff7 = 0x27,
    /// First user-defined sniff level
    SniffUser0 = 0x28,
    /// Second user-defined sniff level
    SniffUser1 = 0x29,
    /// Force the link active
    Active = 0x40,
    /// Retry the last mode change
    Retry = 0x80,
}

impl PmAction {
    /// Raw action value
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Decode a raw action value
    #[must_use]
    pub const fn from_value(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::NoAction,
            0x01 => Self::NoPreference,
            0x10 => Self::Park,
            0x20 => Self::Sniff,
            0x21 => Self::Sniff1,
            0x22 => Self::Sniff2,
            0x23 => Self::Sniff3,
            0x24 => Self::Sniff4,
            0x25 => Self::Sniff5,
            0x26 => Self::Sniff6,
            0x27 => Self::Sniff7,
            0x28 => Self::SniffUser0,
            0x29 => Self::SniffUser1,
            0x40 => Self::Active,
            0x80 => Self::Retry,
            _ => return None,
        })
    }

    /// Low-power mode this action asks for, empty for non low-power actions
    #[must_use]
    pub const fn mode_mask(self) -> PmModeMask {
        match self {
            Self::Park => PmModeMask::PARK,
            Self::Sniff
            | Self::Sniff1
            | Self::Sniff2
            | Self::Sniff3
            | Self::Sniff4
            | Self::Sniff5
            | Self::Sniff6
            | Self::Sniff7
            | Self::SniffUser0
            | Self::SniffUser1 => PmModeMask::SNIFF,
            _ => PmModeMask::empty(),
        }
    }

    /// Check whether this is any sniff level
    #[must_use]
    pub const fn is_sniff(self) -> bool {
        self.value() & 0xF0 == 0x20
    }

    /// Index into the sniff parameter table
    #[must_use]
    pub const fn sniff_index(self) -> usize {
        (self.value() & 0x0F) as usize
    }

    /// Pick the action for a set of low-power modes; sniff beats park
    #[must_use]
    pub fn from_mode_mask(mask: PmModeMask) -> Self {
        if mask.contains(PmModeMask::SNIFF) {
            Self::Sniff
        } else if mask.contains(PmModeMask::PARK) {
            Self::Park
        } else {
            Self::NoAction
        }
    }
}

/// Connection status a profile reports for a link
///
/// Also the row index into a [`PowerModeSpec`] action table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnStatus {
    /// Profile connection opened
    ConnOpen = 0,
    /// Profile connection closed
    ConnClose = 1,
    /// Application opened the profile
    AppOpen = 2,
    /// Application closed the profile
    AppClose = 3,
    /// Voice link opened
    ScoOpen = 4,
    /// Voice link closed
    ScoClose = 5,
    /// Profile went idle
    Idle = 6,
    /// Profile is busy
    Busy = 7,
    /// Profile asks for its last mode change to be retried
    ModeRetry = 8,
}

impl ConnStatus {
    /// Number of statuses, the row count of an action table
    pub const COUNT: usize = 9;

    /// Row index into an action table
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Profiles (subsystems) that may report connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ProfileId {
    /// Device manager itself
    Dm = 0,
    /// Audio gateway (HFP/HSP AG)
    Ag = 1,
    /// Headset / hands-free unit
    Hs = 2,
    /// Cordless telephony terminal
    Ct = 3,
    /// Cordless telephony gateway
    Cg = 4,
    /// Data gateway (SPP/DUN)
    Dg = 5,
    /// Advanced audio source
    Av = 6,
    /// Advanced audio sink
    Avk = 7,
    /// File transfer client
    Ftc = 8,
    /// File transfer server
    Fts = 9,
    /// HID device
    Hd = 10,
    /// HID host
    Hh = 11,
    /// Phonebook client
    Pbc = 12,
    /// Phonebook server
    Pbs = 13,
    /// Object push client
    Opc = 14,
    /// Object push server
    Ops = 15,
    /// Message access server
    Mse = 16,
    /// Java/socket layer
    Jv = 17,
    /// Health device profile
    Hl = 18,
    /// Personal area networking
    Pan = 19,
    /// GATT client
    Gattc = 20,
    /// GATT server
    Gatts = 21,
}
