pub mod compactor;
pub mod context;
pub mod scheduler;
pub mod session;
pub mod turn;

pub use context::{assemble, estimate_tokens, AssembledContext};
pub use scheduler::{parse_cron, Scheduler, TaskContext, TaskHandler};
pub use session::{FactStore, Session, SessionManager};
pub use turn::TurnEngine;
