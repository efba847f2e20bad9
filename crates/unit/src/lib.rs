//! Hornet Guard Edge Unit
//!
//! Brings the unit up and down in a fixed order:
//! - [`UnitContext`] holds one handle to every component, built once
//! - [`Heartbeat`] reports to the backend and picks up remote arming
//! - [`UnitControls`] arms, emergency-stops and resets the unit; the
//!   physical button drives it through [`ButtonWatcher`]
//! - Hardware implementations are chosen through [`Hardware`]

mod button;
mod context;
mod controls;
mod heartbeat;
mod logging;

pub use button::{ButtonEvent, ButtonInput, ButtonWatcher, MockButton, PressDetector};
pub use context::{Hardware, UnitContext, UnitOptions};
pub use controls::UnitControls;
pub use heartbeat::{Heartbeat, HeartbeatOutcome, HeartbeatReport, HEARTBEAT_ENDPOINT};
pub use logging::init_logging;
