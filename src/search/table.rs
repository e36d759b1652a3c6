//! Search machine transition table
//!
//! | state \ event  | Search      | SearchCancel            | Discover      | InquiryComplete | RemoteName         | SdpResult | SearchComplete | DiscoveryResult | DiDiscover    |
//! |----------------|-------------|-------------------------|---------------|-----------------|--------------------|-----------|----------------|-----------------|---------------|
//! | Idle           | ApiSearch   | CancelNotify            | ApiDiscover   | -               | -                  | FreeSdpDb | -              | -               | ApiDiDiscover |
//! | SearchActive   | -           | ApiSearchCancel         | -             | InquiryComplete | RemoteName         | SdpResult | SearchComplete | SearchResult    | -             |
//! | Cancelling     | QueueSearch | ClearQueue CancelNotify | QueueDiscover | (*)             | (*)                | (*)       | (*)            | (*)             | -             |
//! | DiscoverActive | -           | ApiSearchCancel         | -             | -               | DiscoverRemoteName | SdpResult | SearchComplete | DiscoverResult  | -             |
//!
//! (*) CancelTransactionComplete then CancelComplete, next state Idle.
//!
//! `SearchComplete` always lands in `Idle`, `ApiSearchCancel` always lands in
//! `Cancelling`, and any completion while cancelling finishes the cancel.

use super::{SearchAction as A, SearchEvent as E, SearchState as S};
use crate::dispatch::Transition;

type T = Transition<S, A>;

const fn one(action: A, next: S) -> T {
    T::new(action, A::Ignore, next)
}

const fn stay(state: S) -> T {
    T::new(A::Ignore, A::Ignore, state)
}

/// Look up the transition for `(state, event)`
#[must_use]
pub const fn lookup(state: S, event: E) -> T {
    match state {
        S::Idle => match event {
            E::Search => one(A::ApiSearch, S::SearchActive),
            E::SearchCancel => one(A::CancelNotify, S::Idle),
            E::Discover => one(A::ApiDiscover, S::DiscoverActive),
            E::SdpResult => one(A::FreeSdpDb, S::Idle),
            E::DiDiscover => one(A::ApiDiDiscover, S::SearchActive),
            E::InquiryComplete | E::RemoteName | E::SearchComplete | E::DiscoveryResult => {
                stay(S::Idle)
            }
        },
        S::SearchActive => match event {
            E::SearchCancel => one(A::ApiSearchCancel, S::Cancelling),
            E::InquiryComplete => one(A::InquiryComplete, S::SearchActive),
            E::RemoteName => one(A::RemoteName, S::SearchActive),
            E::SdpResult => one(A::SdpResult, S::SearchActive),
            E::SearchComplete => one(A::SearchComplete, S::Idle),
            E::DiscoveryResult => one(A::SearchResult, S::SearchActive),
            E::Search | E::Discover | E::DiDiscover => stay(S::SearchActive),
        },
        S::Cancelling => match event {
            E::Search => one(A::QueueSearch, S::Cancelling),
            E::SearchCancel => T::new(A::ClearQueue, A::CancelNotify, S::Cancelling),
            E::Discover => one(A::QueueDiscover, S::Cancelling),
            E::InquiryComplete
            | E::RemoteName
            | E::SdpResult
            | E::SearchComplete
            | E::DiscoveryResult => {
                T::new(A::CancelTransactionComplete, A::CancelComplete, S::Idle)
            }
            E::DiDiscover => stay(S::Cancelling),
        },
        S::DiscoverActive => match event {
            E::SearchCancel => one(A::ApiSearchCancel, S::Cancelling),
            E::RemoteName => one(A::DiscoverRemoteName, S::DiscoverActive),
            E::SdpResult => one(A::SdpResult, S::DiscoverActive),
            E::SearchComplete => one(A::SearchComplete, S::Idle),
            E::DiscoveryResult => one(A::DiscoverResult, S::DiscoverActive),
            E::Search | E::Discover | E::InquiryComplete | E::DiDiscover => {
                stay(S::DiscoverActive)
            }
        },
    }
}
