//! Conversation data model and stage state machine.

pub mod classifier;
pub mod model;
pub mod stage;

pub use classifier::{ClassifierOutcome, StageClassifier};
pub use model::{Channel, Conversation, Direction, Turn};
pub use stage::Stage;
