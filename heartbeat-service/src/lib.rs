//! The agent's run engine: the decision pipeline, its pre-write guards, the
//! manual trigger front door and the heartbeat scheduler.

pub mod guard;
pub mod pipeline;
pub mod runner;
pub mod scheduler;

pub use guard::GuardBlock;
pub use pipeline::{next_stage, AgentStatus, Collaborators, DecisionPipeline, RunContext};
pub use runner::{AgentRunner, AsyncTrigger};
pub use scheduler::Scheduler;
