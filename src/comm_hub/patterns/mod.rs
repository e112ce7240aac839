//! Composite coordination patterns built atop the hub
//!
//! Pure composition: every pattern here is expressed through the hub's
//! public surface (subscribe, broadcast, request, collectors) and holds no
//! state of its own. Each pattern lives in its own file.

pub mod election;
pub mod fan_out;
pub mod gossip;
pub mod map_reduce;
pub mod pipeline;
pub mod saga;

pub use election::elect_leader;
pub use fan_out::{FanOutOptions, fan_out};
pub use gossip::gossip;
pub use map_reduce::map_reduce;
pub use pipeline::pipeline;
pub use saga::{SagaStep, saga};
