use crate::engine::{StreamEnvironment, StreamHandle};
use crate::options::PipelineOptions;
use crate::translator::TranslationError;
use pipeline_graph::{
    AnyTransform, Collection, CollectionId, Node, NodeId, Pipeline, PipelineGraphError,
};
use std::collections::{BTreeMap, HashMap};

/// A non-root node seen together with the pipeline it lives in.
#[derive(Clone, Copy)]
pub struct AppliedTransform<'a> {
    pipeline: &'a Pipeline,
    node: &'a Node,
    transform: &'a AnyTransform,
}

impl<'a> AppliedTransform<'a> {
    /// `None` for the root, which carries no transform.
    pub fn new(pipeline: &'a Pipeline, id: NodeId) -> Result<Option<Self>, PipelineGraphError> {
        let node = pipeline.node(id)?;
        Ok(node.transform().map(|transform| Self {
            pipeline,
            node,
            transform,
        }))
    }

    pub fn pipeline(&self) -> &'a Pipeline {
        self.pipeline
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    pub fn full_name(&self) -> &'a str {
        self.node.full_name()
    }

    pub fn transform(&self) -> &'a AnyTransform {
        self.transform
    }

    pub fn inputs(&self) -> &'a BTreeMap<String, CollectionId> {
        self.node.inputs()
    }

    pub fn outputs(&self) -> &'a BTreeMap<String, CollectionId> {
        self.node.outputs()
    }

    pub fn collection(&self, id: CollectionId) -> Result<&'a Collection, PipelineGraphError> {
        self.pipeline.collection(id)
    }

    pub fn main_input(&self) -> Result<CollectionId, PipelineGraphError> {
        self.node.main_input().ok_or_else(|| {
            PipelineGraphError::InvalidInput(
                self.transform.kind(),
                format!("\"{}\" has no main input", self.full_name()),
            )
        })
    }

    pub fn main_output(&self) -> Result<CollectionId, PipelineGraphError> {
        self.node.single_output().ok_or_else(|| {
            PipelineGraphError::InvalidInput(
                self.transform.kind(),
                format!("\"{}\" has no single output", self.full_name()),
            )
        })
    }
}

/// State shared by the handlers of one translation run.
pub struct TranslationContext {
    options: PipelineOptions,
    environment: StreamEnvironment,
    current_node: Option<String>,
    outputs: HashMap<CollectionId, StreamHandle>,
}

impl TranslationContext {
    pub fn new(options: PipelineOptions) -> Self {
        let environment = StreamEnvironment::new(&options);
        Self {
            options,
            environment,
            current_node: None,
            outputs: HashMap::new(),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn environment(&self) -> &StreamEnvironment {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut StreamEnvironment {
        &mut self.environment
    }

    pub fn set_current_node(&mut self, node: &AppliedTransform<'_>) {
        self.current_node = Some(node.full_name().to_string());
    }

    /// Used for diagnostics only; handlers receive their node explicitly.
    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    pub fn record_output(
        &mut self,
        collection: CollectionId,
        handle: StreamHandle,
    ) -> Result<(), TranslationError> {
        if self.outputs.contains_key(&collection) {
            return Err(TranslationError::OutputAlreadyBound(collection));
        }
        self.outputs.insert(collection, handle);
        Ok(())
    }

    pub fn lookup_output(&self, collection: CollectionId) -> Result<StreamHandle, TranslationError> {
        self.outputs
            .get(&collection)
            .cloned()
            .ok_or_else(|| TranslationError::UnboundInput {
                collection,
                node: self.current_node.clone().unwrap_or_default(),
            })
    }

    pub fn is_bound(&self, collection: CollectionId) -> bool {
        self.outputs.contains_key(&collection)
    }

    pub(crate) fn mark_translated(&mut self, node: &AppliedTransform<'_>) {
        self.environment.mark_translated(node.full_name());
    }

    pub fn into_environment(self) -> StreamEnvironment {
        self.environment
    }
}
