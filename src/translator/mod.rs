pub mod registry;
pub mod translators;
pub mod walker;

use crate::context::{AppliedTransform, TranslationContext};
use crate::engine::EngineError;
use pipeline_graph::{CollectionId, PipelineGraphError, TransformKind, TransformVariant};
use std::marker::PhantomData;

#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("No translator for {urn} at \"{node}\"")]
    UnsupportedTransform { urn: String, node: String },
    #[error("Collection {collection} is consumed by \"{node}\" before it was produced")]
    UnboundInput {
        collection: CollectionId,
        node: String,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to build replacement for \"{node}\": {source}")]
    ReplacementBuildFailure {
        node: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Collection {0} is already bound")]
    OutputAlreadyBound(CollectionId),
    #[error("{expected} translator was given a {actual} transform at \"{node}\"")]
    KindMismatch {
        expected: TransformKind,
        actual: TransformKind,
        node: String,
    },
    #[error("Translator is {0}, expected Idle")]
    InvalidState(walker::WalkerState),
    #[error(transparent)]
    PipelineGraphError(#[from] PipelineGraphError),
    #[error(transparent)]
    EngineError(#[from] EngineError),
}

/// Lowers one transform kind into native operators.
pub trait StreamTransformTranslator<T: TransformVariant>: Send + Sync {
    /// Must not touch the context. The default accepts every instance.
    fn can_translate(
        &self,
        _transform: &T,
        _node: &AppliedTransform<'_>,
        _ctx: &TranslationContext,
    ) -> bool {
        true
    }

    fn translate_node(
        &self,
        transform: &T,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError>;
}

/// Kind-erased handler as stored in the registry.
pub trait AnyTranslator: Send + Sync {
    fn kind(&self) -> TransformKind;
    fn can_translate(&self, node: &AppliedTransform<'_>, ctx: &TranslationContext) -> bool;
    fn translate_node(
        &self,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError>;
}

pub(crate) struct TypedTranslator<T, H> {
    handler: H,
    _variant: PhantomData<fn() -> T>,
}

impl<T, H> TypedTranslator<T, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _variant: PhantomData,
        }
    }
}

impl<T, H> AnyTranslator for TypedTranslator<T, H>
where
    T: TransformVariant,
    H: StreamTransformTranslator<T>,
{
    fn kind(&self) -> TransformKind {
        T::KIND
    }

    fn can_translate(&self, node: &AppliedTransform<'_>, ctx: &TranslationContext) -> bool {
        match T::from_any(node.transform()) {
            Some(transform) => self.handler.can_translate(transform, node, ctx),
            None => false,
        }
    }

    fn translate_node(
        &self,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let transform =
            T::from_any(node.transform()).ok_or_else(|| TranslationError::KindMismatch {
                expected: T::KIND,
                actual: node.transform().kind(),
                node: node.full_name().to_string(),
            })?;
        self.handler.translate_node(transform, node, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PipelineOptions;
    use pipeline_graph::transform::{GroupByKey, Read};
    use pipeline_graph::{ElementType, PipelineBuilder};

    struct Refuse;

    impl StreamTransformTranslator<GroupByKey> for Refuse {
        fn translate_node(
            &self,
            _transform: &GroupByKey,
            _node: &AppliedTransform<'_>,
            _ctx: &mut TranslationContext,
        ) -> Result<(), TranslationError> {
            Ok(())
        }
    }

    #[test]
    fn mismatched_kinds_are_rejected_not_cast() {
        let mut b = PipelineBuilder::new();
        b.read("Read", Read::bounded("numbers"), ElementType::Int64)
            .unwrap();
        let pipeline = b.build().unwrap();
        let id = pipeline.node_by_name("Read").unwrap().id();
        let node = AppliedTransform::new(&pipeline, id).unwrap().unwrap();

        let erased = TypedTranslator::<GroupByKey, _>::new(Refuse);
        let mut ctx = TranslationContext::new(PipelineOptions::default());
        assert_eq!(erased.kind(), TransformKind::GroupByKey);
        assert!(!erased.can_translate(&node, &ctx));
        assert!(matches!(
            erased.translate_node(&node, &mut ctx),
            Err(TranslationError::KindMismatch {
                expected: TransformKind::GroupByKey,
                actual: TransformKind::Read,
                ..
            })
        ));
    }
}
