use crate::context::{AppliedTransform, TranslationContext};
use crate::engine::StreamEnvironment;
use crate::options::PipelineOptions;
use crate::overrides::unconsumed_reads::ensure_all_reads_consumed;
use crate::overrides::{StreamingShardedWriteFactory, apply_overrides};
use crate::translator::TranslationError;
use crate::translator::registry::{TranslatorRegistry, default_registry};
use pipeline_graph::{CollectionId, NodeId, Pipeline, PipelineGraphError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum WalkerState {
    Idle,
    Walking,
    Done,
}

/// What the walker does with a composite after offering it to its handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeBehavior {
    EnterTransform,
    DoNotEnterTransform,
}

/// Lowers a [`Pipeline`] into a [`StreamEnvironment`], composites first.
///
/// A composite whose handler accepts it is translated as a unit and its children are never
/// visited. Every other composite is entered, and every primitive reached must have a handler
/// that accepts it. One translator handles exactly one pipeline.
pub struct StreamingPipelineTranslator<'r> {
    registry: &'r TranslatorRegistry,
    options: PipelineOptions,
    state: WalkerState,
}

impl StreamingPipelineTranslator<'static> {
    pub fn new(options: PipelineOptions) -> Self {
        Self::with_registry(default_registry(), options)
    }
}

impl<'r> StreamingPipelineTranslator<'r> {
    pub fn with_registry(registry: &'r TranslatorRegistry, options: PipelineOptions) -> Self {
        Self {
            registry,
            options,
            state: WalkerState::Idle,
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    /// Runs the pre-passes on `pipeline` in place, then walks it.
    ///
    /// No environment is returned unless every node was handled.
    pub fn translate(
        &mut self,
        pipeline: &mut Pipeline,
    ) -> Result<StreamEnvironment, TranslationError> {
        if self.state != WalkerState::Idle {
            return Err(TranslationError::InvalidState(self.state));
        }
        self.state = WalkerState::Walking;
        let res = self.run(pipeline);
        self.state = WalkerState::Done;
        res
    }

    fn run(&self, pipeline: &mut Pipeline) -> Result<StreamEnvironment, TranslationError> {
        self.options
            .validate()
            .map_err(|e| TranslationError::InvalidConfiguration(e.to_string()))?;
        if self.options.streaming {
            let sharded_writes = StreamingShardedWriteFactory::new(self.options.parallelism)?;
            apply_overrides(pipeline, &[&sharded_writes])?;
        }
        ensure_all_reads_consumed(pipeline)?;

        log::info!(
            "Translating \"{}\" at parallelism {}",
            self.options.job_name,
            self.options.parallelism
        );
        let pipeline: &Pipeline = pipeline;
        let mut ctx = TranslationContext::new(self.options.clone());
        let root = pipeline.node(pipeline.root())?;
        for child in root.children() {
            self.visit(pipeline, *child, 0, &mut ctx)?;
        }
        let env = ctx.into_environment();
        log::info!(
            "Translated {} nodes into {} operators",
            env.translated_nodes().len(),
            env.operators().len()
        );
        Ok(env)
    }

    fn visit(
        &self,
        pipeline: &Pipeline,
        id: NodeId,
        depth: usize,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        // Only the root may lack a transform, and the root is never visited.
        let Some(node) = AppliedTransform::new(pipeline, id)? else {
            return Err(PipelineGraphError::MalformedPipeline(format!(
                "\"{}\" carries no transform",
                pipeline.node(id)?.full_name()
            ))
            .into());
        };
        if node.node().is_composite() {
            if self.enter_composite(&node, depth, ctx)? == CompositeBehavior::EnterTransform {
                for child in node.node().children() {
                    self.visit(pipeline, *child, depth + 1, ctx)?;
                }
                self.leave_composite(&node, depth);
            }
        } else {
            self.visit_primitive(&node, depth, ctx)?;
        }
        for collection in node.outputs().values() {
            self.visit_value(*collection, depth);
        }
        Ok(())
    }

    fn enter_composite(
        &self,
        node: &AppliedTransform<'_>,
        depth: usize,
        ctx: &mut TranslationContext,
    ) -> Result<CompositeBehavior, TranslationError> {
        log::debug!("{}enter composite \"{}\"", indent(depth), node.full_name());
        match self.registry.lookup(node.transform()) {
            Some(translator) if translator.can_translate(node, ctx) => {
                ctx.set_current_node(node);
                translator.translate_node(node, ctx)?;
                ctx.mark_translated(node);
                log::debug!(
                    "{}translated \"{}\" as {}",
                    indent(depth),
                    node.full_name(),
                    node.transform().urn()
                );
                Ok(CompositeBehavior::DoNotEnterTransform)
            }
            _ => Ok(CompositeBehavior::EnterTransform),
        }
    }

    fn leave_composite(&self, node: &AppliedTransform<'_>, depth: usize) {
        log::debug!("{}leave composite \"{}\"", indent(depth), node.full_name());
    }

    fn visit_primitive(
        &self,
        node: &AppliedTransform<'_>,
        depth: usize,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        log::debug!("{}visit primitive \"{}\"", indent(depth), node.full_name());
        let translator = self
            .registry
            .lookup(node.transform())
            .filter(|x| x.can_translate(node, ctx))
            .ok_or_else(|| TranslationError::UnsupportedTransform {
                urn: node.transform().urn().to_string(),
                node: node.full_name().to_string(),
            })?;
        ctx.set_current_node(node);
        translator.translate_node(node, ctx)?;
        ctx.mark_translated(node);
        log::debug!("{}translated \"{}\"", indent(depth), node.full_name());
        Ok(())
    }

    fn visit_value(&self, collection: CollectionId, depth: usize) {
        log::trace!("{}visit value {}", indent(depth), collection);
    }
}

fn indent(depth: usize) -> String {
    "|   ".repeat(depth)
}
