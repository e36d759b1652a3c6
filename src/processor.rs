//! Processor Task - drives a [`DeviceManager`] from a message channel
//!
//! The device manager itself is synchronous. On an Embassy target the
//! embedder owns a static channel that HCI event handling, profiles and the
//! timer service post [`Message`]s into, and runs [`run`] as a task:
//!
//! ```rust,ignore
//! use bondybird_dm::{DeviceManager, DmConfig, Message, processor};
//! use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, signal::Signal};
//!
//! static INBOX: Channel<CriticalSectionRawMutex, Message, 16> = Channel::new();
//! static STOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();
//!
//! # async fn task<P: bondybird_dm::platform::Platform>(platform: P) {
//! let mut dm = DeviceManager::new(DmConfig::default(), platform);
//! processor::run(&mut dm, &INBOX, &STOP).await;
//! # }
//! ```
//!
//! Messages are handled one at a time, in arrival order. Signalling `stop`
//! ends the loop once the message being handled is done; messages still in
//! the channel are left there.

use embassy_futures::select::{Either, select};
use embassy_sync::{blocking_mutex::raw::RawMutex, channel::Channel, signal::Signal};

use crate::{DeviceManager, Message, platform::Platform};

/// Receive and handle messages until `stop` is signalled
pub async fn run<M, P, const N: usize>(
    dm: &mut DeviceManager<P>,
    inbox: &Channel<M, Message, N>,
    stop: &Signal<M, ()>,
) where
    M: RawMutex,
    P: Platform,
{
    info!("[PROCESSOR] device manager running");
    loop {
        match select(inbox.receive(), stop.wait()).await {
            Either::First(message) => {
                trace!("[PROCESSOR] message {:?}", message.id());
                dm.handle(message);
            }
            Either::Second(()) => {
                info!("[PROCESSOR] stop requested");
                break;
            }
        }
    }
}
