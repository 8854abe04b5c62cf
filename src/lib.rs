//! Lowers hierarchical pipelines into the operator graph of a streaming engine.

pub mod context;
pub mod engine;
pub mod options;
pub mod overrides;
pub mod translator;

pub use context::{AppliedTransform, TranslationContext};
pub use engine::{StreamEnvironment, StreamHandle, StreamOperator};
pub use options::{OptionsError, PipelineOptions};
pub use translator::walker::{CompositeBehavior, StreamingPipelineTranslator, WalkerState};
pub use translator::{StreamTransformTranslator, TranslationError};

use pipeline_graph::Pipeline;

/// Translates `pipeline` with the default handler set.
pub fn translate(
    pipeline: &mut Pipeline,
    options: PipelineOptions,
) -> Result<StreamEnvironment, TranslationError> {
    StreamingPipelineTranslator::new(options).translate(pipeline)
}
