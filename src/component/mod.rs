//! Building blocks for fault tolerant actor systems.
//!
//! All components are plain [`Actor`](quacktor_process::Actor)s and are spawned like any other
//! actor.

mod dynamic_supervisor;
mod link;
mod load_balancer;
mod relay;
mod supervisor;

pub use dynamic_supervisor::DynamicSupervisor;
pub use link::Link;
pub use load_balancer::LoadBalancer;
pub use relay::Relay;
pub use supervisor::{Strategy, Supervisor};
