use crate::translator::translators::{
    AssignWindowsTranslator, CombinePerKeyTranslator, FlattenTranslator, GroupByKeyTranslator,
    ImpulseTranslator, ParDoTranslator, ReadTranslator, ReshuffleTranslator,
    WriteFilesTranslator,
};
use crate::translator::{AnyTranslator, StreamTransformTranslator, TypedTranslator};
use pipeline_graph::transform::{
    AssignWindows, CombinePerKey, Flatten, GroupByKey, Impulse, ParDo, Read, Reshuffle, WriteFiles,
};
use pipeline_graph::{AnyTransform, TransformKind, TransformVariant};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Transform kind to handler. Immutable once built.
#[derive(Default)]
pub struct TranslatorRegistry {
    translators: HashMap<TransformKind, Box<dyn AnyTranslator>>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler set of the streaming engine.
    pub fn streaming() -> Self {
        let mut registry = Self::new();
        registry.register::<Impulse, _>(ImpulseTranslator);
        registry.register::<Read, _>(ReadTranslator);
        registry.register::<ParDo, _>(ParDoTranslator);
        registry.register::<GroupByKey, _>(GroupByKeyTranslator);
        registry.register::<Flatten, _>(FlattenTranslator);
        registry.register::<AssignWindows, _>(AssignWindowsTranslator);
        registry.register::<CombinePerKey, _>(CombinePerKeyTranslator);
        registry.register::<Reshuffle, _>(ReshuffleTranslator);
        registry.register::<WriteFiles, _>(WriteFilesTranslator);
        registry
    }

    pub fn register<T, H>(&mut self, handler: H)
    where
        T: TransformVariant,
        H: StreamTransformTranslator<T> + 'static,
    {
        let previous = self
            .translators
            .insert(T::KIND, Box::new(TypedTranslator::<T, H>::new(handler)));
        if previous.is_some() {
            log::warn!("Replacing registered translator for {}", T::KIND);
        }
    }

    pub fn lookup(&self, transform: &AnyTransform) -> Option<&dyn AnyTranslator> {
        self.translators.get(&transform.kind()).map(|x| x.as_ref())
    }

    pub fn kinds(&self) -> impl Iterator<Item = TransformKind> + '_ {
        self.translators.keys().copied()
    }
}

static DEFAULT_REGISTRY: LazyLock<TranslatorRegistry> = LazyLock::new(TranslatorRegistry::streaming);

pub fn default_registry() -> &'static TranslatorRegistry {
    &DEFAULT_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_graph::transform::{CoGroupByKey, Composite, Custom};

    #[test]
    fn lookup_is_by_kind() {
        let registry = default_registry();
        assert_eq!(
            registry.lookup(&ParDo::of("Parse").into()).map(|x| x.kind()),
            Some(TransformKind::ParDo)
        );
        assert!(registry.lookup(&Composite {}.into()).is_none());
        assert!(registry.lookup(&CoGroupByKey {}.into()).is_none());
        let custom: AnyTransform = Custom {
            urn: "beam:transform:test_stream:v1".to_string(),
        }
        .into();
        assert!(registry.lookup(&custom).is_none());
    }

    #[test]
    fn only_expandable_kinds_lack_a_handler() {
        use std::str::FromStr;
        use strum::VariantNames;

        let mut missing: Vec<TransformKind> = TransformKind::VARIANTS
            .iter()
            .map(|x| TransformKind::from_str(x).unwrap())
            .filter(|x| !default_registry().kinds().any(|k| k == *x))
            .collect();
        missing.sort_by_key(|x| x.to_string());
        assert_eq!(
            missing,
            vec![
                TransformKind::CoGroupByKey,
                TransformKind::Composite,
                TransformKind::Custom
            ]
        );
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = TranslatorRegistry::new();
        registry.register::<GroupByKey, _>(GroupByKeyTranslator);
        registry.register::<GroupByKey, _>(GroupByKeyTranslator);
        assert_eq!(registry.kinds().count(), 1);
    }
}
