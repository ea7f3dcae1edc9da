mod event;
mod reporter;

pub use event::{EventEnvelope, StatusMap, WorkflowEvent};
pub use reporter::{StatusReporter, Subscription};
