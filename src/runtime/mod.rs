pub mod output;
pub mod processor;
pub mod resources;
pub mod stream;

pub use output::OutputLayer;
pub use processor::{build_processors, run_processors, Processor, ProcessorError};
pub use resources::{MemoryCache, ResourceError, ResourceManager};
pub use stream::{spawn_stream, Pipeline, PipelineError, RunningPipeline, StreamError, StreamHandle};
