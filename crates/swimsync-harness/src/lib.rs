//! SwimSync test harness
//!
//! Deterministic doubles for the two external collaborators — the host
//! sensor platform and the cross-device transport — so the pipeline can be
//! exercised without hardware: a scriptable sensor platform, a scriptable
//! peer link with reachability and reply control, an in-memory loopback
//! link pair for two-device tests, and a settable clock.

pub mod link;
pub mod loopback;
pub mod sensor;
pub mod time;

pub use link::{MockLink, MockLinkConfig};
pub use loopback::{loopback_pair, LoopbackEnd};
pub use sensor::MockSensorPlatform;
pub use time::MockTimeSource;
