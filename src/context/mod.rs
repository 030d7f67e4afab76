mod categories;
mod classifier;
mod engine;

pub use categories::{category_for, label_for};
pub use classifier::{NeuralSample, SceneClassifier};
pub use engine::{ContextGraphEngine, GraphChange};
