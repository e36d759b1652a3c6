//! Static power-mode configuration
//!
//! [`DEFAULT_PM_CONFIG`] ships the stock tables. An embedder with different
//! latency needs builds its own `static` [`PmConfig`] and hands it to
//! [`DmConfig`](crate::DmConfig).

use super::{ConnStatus, PmAction, PmModeMask, ProfileId};
use crate::constants::ALL_APP_ID;

/// One preference: a power action and the delay before applying it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PmActionEntry {
    /// Requested action
    pub action: PmAction,
    /// Delay in milliseconds, 0 = apply immediately
    pub timeout_ms: u32,
}

impl PmActionEntry {
    /// An entry that leaves the link alone
    pub const NONE: Self = Self::new(PmAction::NoAction, 0);

    /// Create an entry
    #[must_use]
    pub const fn new(action: PmAction, timeout_ms: u32) -> Self {
        Self { action, timeout_ms }
    }
}

/// Sniff subrating class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SsrClass {
    /// No subrating
    #[default]
    Off,
    /// HID host; latency comes from the HID descriptor, so no write
    HidHost,
    /// Generic subrating for data profiles
    Generic,
    /// HID device
    HidDevice,
    /// A2DP streaming
    A2dp,
}

impl SsrClass {
    /// Index into [`PmConfig::ssr`]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Sniff subrating parameters, in baseband slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SsrSpec {
    /// Maximum latency; 0 disables the write
    pub max_latency: u16,
    /// Minimum remote timeout
    pub min_remote_timeout: u16,
    /// Minimum local timeout
    pub min_local_timeout: u16,
}

impl SsrSpec {
    const fn new(max_latency: u16, min_remote_timeout: u16, min_local_timeout: u16) -> Self {
        Self { max_latency, min_remote_timeout, min_local_timeout }
    }
}

/// Parameters of one sniff level, in baseband slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SniffParams {
    /// Maximum sniff interval
    pub max_interval: u16,
    /// Minimum sniff interval
    pub min_interval: u16,
    /// Sniff attempt
    pub attempt: u16,
    /// Sniff timeout
    pub timeout: u16,
}

impl SniffParams {
    const fn new(max_interval: u16, min_interval: u16, attempt: u16, timeout: u16) -> Self {
        Self { max_interval, min_interval, attempt, timeout }
    }
}

/// Park beacon interval bounds, in baseband slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParkParams {
    /// Maximum beacon interval
    pub max_interval: u16,
    /// Minimum beacon interval
    pub min_interval: u16,
}

/// Power-mode preferences of one profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerModeSpec {
    /// Low-power modes the profile tolerates
    pub allow: PmModeMask,
    /// Subrating class used when the profile opens on an SSR-capable link
    pub ssr: SsrClass,
    /// First and second preference for every [`ConnStatus`]
    pub actions: [[PmActionEntry; 2]; ConnStatus::COUNT],
}

impl PowerModeSpec {
    /// Both preferences for a status
    #[must_use]
    pub const fn preferences(&self, status: ConnStatus) -> &[PmActionEntry; 2] {
        &self.actions[status.index()]
    }
}

/// Maps a (profile, application) pair to a [`PowerModeSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmProfileEntry {
    /// Reporting profile
    pub profile: ProfileId,
    /// Application id, or [`ALL_APP_ID`] to match any
    pub app_id: u8,
    /// Index into [`PmConfig::specs`]
    pub spec_index: usize,
}

/// Complete power-mode configuration, read-only after startup
#[derive(Debug)]
pub struct PmConfig {
    /// Profile map, searched in order
    pub profiles: &'static [PmProfileEntry],
    /// Preference tables
    pub specs: &'static [PowerModeSpec],
    /// Subrating parameters, indexed by [`SsrClass::index`]
    pub ssr: [SsrSpec; 5],
    /// Sniff parameters, indexed by [`PmAction::sniff_index`]
    pub sniff: [SniffParams; 10],
    /// Park parameters
    pub park: ParkParams,
}

impl PmConfig {
    /// Find the preference table for a profile
    ///
    /// An entry for exactly `(profile, app_id)` wins over a
    /// `(profile, ALL_APP_ID)` entry, wherever either sits in the map.
    #[must_use]
    pub fn lookup(&self, profile: ProfileId, app_id: u8) -> Option<&PowerModeSpec> {
        let exact = self.profiles.iter().find(|e| e.profile == profile && e.app_id == app_id);
        exact
            .or_else(|| {
                self.profiles.iter().find(|e| e.profile == profile && e.app_id == ALL_APP_ID)
            })
            .and_then(|e| self.specs.get(e.spec_index))
    }

    /// Subrating parameters of a class
    #[must_use]
    pub const fn ssr_spec(&self, class: SsrClass) -> &SsrSpec {
        &self.ssr[class.index()]
    }

    /// Sniff parameters for a sniff action
    #[must_use]
    pub fn sniff_params(&self, action: PmAction) -> SniffParams {
        self.sniff.get(action.sniff_index()).copied().unwrap_or(self.sniff[0])
    }
}

const fn e(action: PmAction, timeout_ms: u32) -> PmActionEntry {
    PmActionEntry::new(action, timeout_ms)
}

const fn one(action: PmAction, timeout_ms: u32) -> [PmActionEntry; 2] {
    [e(action, timeout_ms), PmActionEntry::NONE]
}

const fn two(first: PmActionEntry, second: PmActionEntry) -> [PmActionEntry; 2] {
    [first, second]
}

const NOTHING: [PmActionEntry; 2] = [PmActionEntry::NONE, PmActionEntry::NONE];
const RELEASE: [PmActionEntry; 2] = one(PmAction::NoPreference, 0);
const BUSY: [PmActionEntry; 2] = one(PmAction::Active, 0);

/// Application id the socket layer uses for client-side channels
pub const JV_CLIENT_APP_ID: u8 = 0x01;
/// Application id the socket layer uses for server-side channels
pub const JV_SERVER_APP_ID: u8 = 0x02;
/// PAN user role application id
pub const PAN_USER_APP_ID: u8 = 0x01;
/// PAN network access point application id
pub const PAN_NAP_APP_ID: u8 = 0x02;

const SPEC_AG: usize = 0;
const SPEC_CT: usize = 1;
const SPEC_DG: usize = 2;
const SPEC_HD: usize = 3;
const SPEC_AV: usize = 4;
const SPEC_HH: usize = 5;
const SPEC_FT_CLIENT: usize = 6;
const SPEC_FT_SERVER: usize = 7;
const SPEC_HL: usize = 8;
const SPEC_PANU: usize = 9;
const SPEC_NAP: usize = 10;
const SPEC_HS: usize = 11;
const SPEC_AVK: usize = 12;
const SPEC_GATTC: usize = 13;
const SPEC_GATTS: usize = 14;

const fn map(profile: ProfileId, app_id: u8, spec_index: usize) -> PmProfileEntry {
    PmProfileEntry { profile, app_id, spec_index }
}

static DEFAULT_PROFILES: [PmProfileEntry; 23] = [
    map(ProfileId::Ag, ALL_APP_ID, SPEC_AG),
    map(ProfileId::Ct, ALL_APP_ID, SPEC_CT),
    map(ProfileId::Cg, ALL_APP_ID, SPEC_CT),
    map(ProfileId::Dg, ALL_APP_ID, SPEC_DG),
    map(ProfileId::Av, ALL_APP_ID, SPEC_AV),
    map(ProfileId::Ftc, ALL_APP_ID, SPEC_FT_CLIENT),
    map(ProfileId::Fts, ALL_APP_ID, SPEC_FT_SERVER),
    map(ProfileId::Hd, ALL_APP_ID, SPEC_HD),
    map(ProfileId::Hh, ALL_APP_ID, SPEC_HH),
    map(ProfileId::Pbc, ALL_APP_ID, SPEC_DG),
    map(ProfileId::Pbs, ALL_APP_ID, SPEC_FT_SERVER),
    map(ProfileId::Opc, ALL_APP_ID, SPEC_FT_CLIENT),
    map(ProfileId::Ops, ALL_APP_ID, SPEC_FT_SERVER),
    map(ProfileId::Mse, ALL_APP_ID, SPEC_FT_SERVER),
    map(ProfileId::Jv, JV_CLIENT_APP_ID, SPEC_FT_CLIENT),
    map(ProfileId::Jv, JV_SERVER_APP_ID, SPEC_FT_SERVER),
    map(ProfileId::Hl, ALL_APP_ID, SPEC_HL),
    map(ProfileId::Pan, PAN_USER_APP_ID, SPEC_PANU),
    map(ProfileId::Pan, PAN_NAP_APP_ID, SPEC_NAP),
    map(ProfileId::Hs, ALL_APP_ID, SPEC_HS),
    map(ProfileId::Avk, ALL_APP_ID, SPEC_AVK),
    map(ProfileId::Gattc, ALL_APP_ID, SPEC_GATTC),
    map(ProfileId::Gatts, ALL_APP_ID, SPEC_GATTS),
];

/// Rows in [`ConnStatus`] order:
/// conn-open, conn-close, app-open, app-close, sco-open, sco-close, idle, busy, retry
const fn spec(
    allow: PmModeMask,
    ssr: SsrClass,
    actions: [[PmActionEntry; 2]; ConnStatus::COUNT],
) -> PowerModeSpec {
    PowerModeSpec { allow, ssr, actions }
}

const HANDSFREE: PowerModeSpec = spec(
    PmModeMask::SNIFF,
    SsrClass::Generic,
    [
        one(PmAction::Sniff, 7000),
        RELEASE,
        NOTHING,
        NOTHING,
        one(PmAction::Sniff3, 7000),
        one(PmAction::Sniff, 7000),
        one(PmAction::Sniff, 7000),
        BUSY,
        one(PmAction::Retry, 7000),
    ],
);

static DEFAULT_SPECS: [PowerModeSpec; 15] = [
    // SPEC_AG
    HANDSFREE,
    // SPEC_CT
    spec(
        PmModeMask::LOW_POWER,
        SsrClass::Off,
        [
            two(e(PmAction::Park, 5000), e(PmAction::Sniff, 5000)),
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            two(e(PmAction::Park, 5000), e(PmAction::Sniff, 5000)),
            BUSY,
            one(PmAction::Retry, 5000),
        ],
    ),
    // SPEC_DG
    spec(
        PmModeMask::empty(),
        SsrClass::Generic,
        [BUSY, RELEASE, NOTHING, NOTHING, NOTHING, NOTHING, NOTHING, NOTHING, NOTHING],
    ),
    // SPEC_HD
    spec(
        PmModeMask::LOW_POWER,
        SsrClass::HidDevice,
        [
            one(PmAction::Sniff2, 5000),
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff2, 5000),
            one(PmAction::Sniff4, 5000),
            NOTHING,
        ],
    ),
    // SPEC_AV
    spec(
        PmModeMask::SNIFF,
        SsrClass::A2dp,
        [
            one(PmAction::Sniff, 7000),
            RELEASE,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 7000),
            NOTHING,
            one(PmAction::Sniff, 7000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_HH
    spec(
        PmModeMask::SNIFF,
        SsrClass::HidHost,
        [
            one(PmAction::Sniff4, 30000),
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff4, 30000),
            one(PmAction::Sniff2, 30000),
            NOTHING,
        ],
    ),
    // SPEC_FT_CLIENT
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            BUSY,
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 7000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_FT_SERVER
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            one(PmAction::Sniff, 7000),
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 7000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_HL
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            one(PmAction::Sniff, 5000),
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 5000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_PANU
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            BUSY,
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 5000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_NAP
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            BUSY,
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 5000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_HS
    HANDSFREE,
    // SPEC_AVK
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            one(PmAction::Sniff, 3000),
            RELEASE,
            NOTHING,
            NOTHING,
            BUSY,
            one(PmAction::Sniff, 7000),
            one(PmAction::Sniff, 7000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_GATTC
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            BUSY,
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 10000),
            BUSY,
            NOTHING,
        ],
    ),
    // SPEC_GATTS
    spec(
        PmModeMask::SNIFF,
        SsrClass::Generic,
        [
            BUSY,
            RELEASE,
            NOTHING,
            NOTHING,
            NOTHING,
            NOTHING,
            one(PmAction::Sniff, 10000),
            BUSY,
            NOTHING,
        ],
    ),
];

/// Stock power-mode configuration
pub static DEFAULT_PM_CONFIG: PmConfig = PmConfig {
    profiles: &DEFAULT_PROFILES,
    specs: &DEFAULT_SPECS,
    ssr: DEFAULT_SSR,
    sniff: DEFAULT_SNIFF,
    park: DEFAULT_PARK,
};

/// Stock subrating table, indexed by [`SsrClass::index`]
pub const DEFAULT_SSR: [SsrSpec; 5] = [
    SsrSpec::new(0, 0, 0),
    SsrSpec::new(0, 0, 2),
    SsrSpec::new(1200, 2, 2),
    SsrSpec::new(360, 160, 1600),
    SsrSpec::new(1200, 65534, 65534),
];

/// Stock sniff levels, indexed by [`PmAction::sniff_index`]
pub const DEFAULT_SNIFF: [SniffParams; 10] = [
    SniffParams::new(800, 400, 4, 1),
    SniffParams::new(400, 200, 4, 1),
    SniffParams::new(54, 30, 4, 1),
    SniffParams::new(150, 50, 4, 1),
    SniffParams::new(18, 10, 4, 1),
    SniffParams::new(36, 30, 2, 0),
    SniffParams::new(18, 14, 1, 0),
    SniffParams::new(18, 14, 1, 0),
    SniffParams::new(800, 400, 4, 1),
    SniffParams::new(800, 400, 4, 1),
];

/// Stock park beacon interval
pub const DEFAULT_PARK: ParkParams = ParkParams { max_interval: 800, min_interval: 400 };
