use crate::channel::ChannelNumber;
use crate::scheduler::AccessRequest;
use serde::{Deserialize, Serialize};

/// Timer events armed by a WAVE device on the surrounding event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveEvent {
    /// Next guard/control/service transition of the channel coordinator
    SlotBoundary,
    /// A deferred access request reached its channel interval
    RetryAccess(AccessRequest),
    /// Extended access ran out of extensions
    AccessExpired(ChannelNumber),
}
