mod context;
mod event;
mod sequence;
mod session;

pub use context::{ContextEdge, ContextNode, ContextType, EdgeType};
pub use event::{ActivityEvent, ActivityEventType};
pub use sequence::{Sequence, SequenceStatus};
pub use session::{DistractedPeriod, FocusSession};
