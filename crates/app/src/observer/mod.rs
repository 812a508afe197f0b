//! State observers — telling the rules' own commands from human actions.
//!
//! Every output item a rule drives is wrapped in an observer. Commands the
//! rule sends are recorded as expected echoes with a short lifetime; when
//! the resulting state change comes back over the bus it is consumed
//! silently. Anything else that moves the item is classified as a manual
//! action and returned to the rule, which typically reacts by suspending
//! its automatic behavior.
//!
//! Optional control items (wall switches, group items) are always-manual
//! sources: rules never command them, so their commands bypass the echo
//! filter entirely.

use std::time::Duration;

mod dimmer;
mod number;
mod shutter;
mod switch;

pub use dimmer::DimmerObserver;
pub use number::NumberObserver;
pub use shutter::ShutterObserver;
pub use switch::SwitchObserver;

/// How long a sent command may take to echo back as a state change.
pub(crate) const ECHO_TTL: Duration = Duration::from_secs(20);

/// A human interaction with an observed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualAction {
    /// The item was switched on (off or zero before).
    On,
    /// The item was switched off (on or above zero before).
    Off,
    /// The item was moved without crossing the on/off boundary.
    Changed,
}
