//! Hierarchical pipeline model consumed by the streaming translator.
//!
//! A [`Pipeline`] is a tree of applied transforms: composites own ordered children,
//! primitives are leaves, and typed [`Collection`]s connect producers to consumers.

pub mod builder;
pub mod collection;
pub mod expansions;
pub mod pipeline;
pub mod transform;

pub use builder::PipelineBuilder;
pub use collection::{Boundedness, Collection, CollectionId, ElementType, WindowingStrategy};
pub use pipeline::{ExpansionScope, Node, NodeId, Pipeline};
pub use transform::{AnyTransform, TransformKind, TransformVariant};

#[derive(Debug, thiserror::Error)]
pub enum PipelineGraphError {
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("Unknown collection {0}")]
    UnknownCollection(CollectionId),
    #[error("Input {collection} of \"{node}\" is not produced by any earlier transform")]
    InputNotProduced { node: String, collection: CollectionId },
    #[error("Collection {collection} is already produced by \"{producer}\"")]
    DuplicateProducer {
        collection: CollectionId,
        producer: String,
    },
    #[error("Output {collection} of \"{node}\" is not produced inside it")]
    OutputNotProducedInside { node: String, collection: CollectionId },
    #[error("A transform named \"{0}\" already exists")]
    DuplicateName(String),
    #[error("Malformed pipeline: {0}")]
    MalformedPipeline(String),
    #[error("The pipeline root cannot be replaced")]
    RootNotReplaceable,
    #[error("Composite \"{0}\" was never closed")]
    UnclosedComposite(String),
    #[error("No composite is open")]
    NoOpenComposite,
    #[error("{0} has no canonical expansion")]
    NoExpansion(TransformKind),
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(TransformKind, String),
    #[error(transparent)]
    SerdeJSONError(#[from] serde_json::Error),
}
