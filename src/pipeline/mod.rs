mod buffer;
mod normalizer;

pub use buffer::{spawn_writer, EventSink, SaveErrorFlag, WriterHandle, WriterState};
pub use normalizer::Normalizer;
