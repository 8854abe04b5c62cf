//! Streaming-engine handlers, one per supported transform kind.

use crate::context::{AppliedTransform, TranslationContext};
use crate::engine::{OperatorKind, OperatorSpec, StreamHandle};
use crate::translator::{StreamTransformTranslator, TranslationError};
use pipeline_graph::CollectionId;
use pipeline_graph::transform::{
    AssignWindows, CombinePerKey, Flatten, GroupByKey, Impulse, ParDo, Read, Reshuffle,
    WriteFiles,
};

fn lookup_all(
    ctx: &TranslationContext,
    collections: &[CollectionId],
) -> Result<Vec<StreamHandle>, TranslationError> {
    collections.iter().map(|x| ctx.lookup_output(*x)).collect()
}

fn main_input_is_kv(node: &AppliedTransform<'_>) -> bool {
    node.main_input()
        .and_then(|x| node.collection(x))
        .map(|x| x.element_type().is_kv())
        .unwrap_or(false)
}

/// Adds a single-output operator reading the node's main input and binds its output.
fn add_one_to_one(
    node: &AppliedTransform<'_>,
    ctx: &mut TranslationContext,
    spec: OperatorSpec,
) -> Result<(), TranslationError> {
    let input = ctx.lookup_output(node.main_input()?)?;
    let output = node.main_output()?;
    let env = ctx.environment_mut();
    let op = env.add_operator(spec.with_inputs(vec![input]))?;
    let handle = env.main_output(op)?;
    ctx.record_output(output, handle)
}

pub struct ImpulseTranslator;

impl StreamTransformTranslator<Impulse> for ImpulseTranslator {
    fn translate_node(
        &self,
        _transform: &Impulse,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let output = node.main_output()?;
        let env = ctx.environment_mut();
        let op = env.add_operator(
            OperatorSpec::new(node.full_name(), OperatorKind::Impulse).with_parallelism(1),
        )?;
        let handle = env.main_output(op)?;
        ctx.record_output(output, handle)
    }
}

pub struct ReadTranslator;

impl StreamTransformTranslator<Read> for ReadTranslator {
    fn translate_node(
        &self,
        transform: &Read,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let output = node.main_output()?;
        let env = ctx.environment_mut();
        let op = env.add_operator(OperatorSpec::new(
            node.full_name(),
            OperatorKind::Source {
                name: transform.source.name.clone(),
                boundedness: transform.source.boundedness,
            },
        ))?;
        let handle = env.main_output(op)?;
        ctx.record_output(output, handle)
    }
}

pub struct ParDoTranslator;

impl StreamTransformTranslator<ParDo> for ParDoTranslator {
    fn translate_node(
        &self,
        transform: &ParDo,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let input = ctx.lookup_output(node.main_input()?)?;
        let side_inputs = lookup_all(ctx, &transform.side_inputs)?;
        let tags: Vec<String> = transform.output_tags().map(|x| x.to_string()).collect();

        let env = ctx.environment_mut();
        let op = env.add_operator(
            OperatorSpec::new(
                node.full_name(),
                OperatorKind::ParDo {
                    do_fn: transform.do_fn.clone(),
                },
            )
            .with_inputs(vec![input])
            .with_broadcast_inputs(side_inputs)
            .with_output_tags(tags.clone()),
        )?;
        // Tags without a declared collection are dropped.
        let mut bound = vec![];
        for tag in &tags {
            if let Some(collection) = node.outputs().get(tag) {
                bound.push((*collection, env.output(op, tag)?));
            }
        }
        for (collection, handle) in bound {
            ctx.record_output(collection, handle)?;
        }
        Ok(())
    }
}

pub struct GroupByKeyTranslator;

impl StreamTransformTranslator<GroupByKey> for GroupByKeyTranslator {
    fn can_translate(
        &self,
        _transform: &GroupByKey,
        node: &AppliedTransform<'_>,
        _ctx: &TranslationContext,
    ) -> bool {
        main_input_is_kv(node)
    }

    fn translate_node(
        &self,
        _transform: &GroupByKey,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let windowing = node.collection(node.main_input()?)?.windowing().clone();
        add_one_to_one(
            node,
            ctx,
            OperatorSpec::new(
                node.full_name(),
                OperatorKind::GroupByKeyAndWindow { windowing },
            ),
        )
    }
}

pub struct FlattenTranslator;

impl StreamTransformTranslator<Flatten> for FlattenTranslator {
    fn translate_node(
        &self,
        _transform: &Flatten,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let output = node.main_output()?;
        let collections: Vec<CollectionId> = node.inputs().values().copied().collect();
        let inputs = lookup_all(ctx, &collections)?;
        let spec = if inputs.is_empty() {
            OperatorSpec::new(node.full_name(), OperatorKind::EmptySource).with_parallelism(1)
        } else {
            OperatorSpec::new(node.full_name(), OperatorKind::Union).with_inputs(inputs)
        };
        let env = ctx.environment_mut();
        let op = env.add_operator(spec)?;
        let handle = env.main_output(op)?;
        ctx.record_output(output, handle)
    }
}

pub struct AssignWindowsTranslator;

impl StreamTransformTranslator<AssignWindows> for AssignWindowsTranslator {
    fn translate_node(
        &self,
        transform: &AssignWindows,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        add_one_to_one(
            node,
            ctx,
            OperatorSpec::new(
                node.full_name(),
                OperatorKind::AssignWindows {
                    windowing: transform.windowing.clone(),
                },
            ),
        )
    }
}

/// Lowers the whole composite to one keyed aggregation when native combining is on.
pub struct CombinePerKeyTranslator;

impl StreamTransformTranslator<CombinePerKey> for CombinePerKeyTranslator {
    fn can_translate(
        &self,
        _transform: &CombinePerKey,
        node: &AppliedTransform<'_>,
        ctx: &TranslationContext,
    ) -> bool {
        ctx.options().native_combine && main_input_is_kv(node)
    }

    fn translate_node(
        &self,
        transform: &CombinePerKey,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        add_one_to_one(
            node,
            ctx,
            OperatorSpec::new(
                node.full_name(),
                OperatorKind::CombinePerKey {
                    combine_fn: transform.combine_fn.clone(),
                },
            ),
        )
    }
}

pub struct ReshuffleTranslator;

impl StreamTransformTranslator<Reshuffle> for ReshuffleTranslator {
    fn translate_node(
        &self,
        _transform: &Reshuffle,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        add_one_to_one(
            node,
            ctx,
            OperatorSpec::new(node.full_name(), OperatorKind::Rebalance),
        )
    }
}

/// Runner-determined sharding writes one file per bundle at the default parallelism.
pub struct WriteFilesTranslator;

impl StreamTransformTranslator<WriteFiles> for WriteFilesTranslator {
    fn can_translate(
        &self,
        transform: &WriteFiles,
        _node: &AppliedTransform<'_>,
        _ctx: &TranslationContext,
    ) -> bool {
        !transform.sink.output_prefix.is_empty()
    }

    fn translate_node(
        &self,
        transform: &WriteFiles,
        node: &AppliedTransform<'_>,
        ctx: &mut TranslationContext,
    ) -> Result<(), TranslationError> {
        let side_inputs = lookup_all(ctx, &transform.side_inputs)?;
        let mut spec = OperatorSpec::new(
            node.full_name(),
            OperatorKind::FileSink {
                output_prefix: transform.sink.output_prefix.clone(),
                suffix: transform.sink.suffix.clone(),
                num_shards: transform.fixed_num_shards(),
                windowed_writes: transform.windowed_writes,
            },
        )
        .with_broadcast_inputs(side_inputs);
        if let Some(num_shards) = transform.fixed_num_shards() {
            let parallelism = i32::try_from(num_shards).map_err(|_| {
                TranslationError::InvalidConfiguration(format!(
                    "{num_shards} shards for \"{}\" exceed the engine's parallelism range",
                    node.full_name()
                ))
            })?;
            spec = spec.with_parallelism(parallelism);
        }
        add_one_to_one(node, ctx, spec)
    }
}
