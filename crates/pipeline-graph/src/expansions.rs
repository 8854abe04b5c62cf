//! Canonical expansions of the composite transforms the model knows about.
//!
//! The same functions are used when a pipeline is first built and when a composite is
//! replaced in place, so a rewritten node always has the structure a fresh one would have.

use crate::PipelineGraphError;
use crate::collection::{Boundedness, CollectionId, ElementType, WindowingStrategy};
use crate::pipeline::ExpansionScope;
use crate::transform::{
    AnyTransform, AssignWindows, CombinePerKey, Flatten, GroupByKey, MAIN_INPUT_TAG,
    MAIN_OUTPUT_TAG, ParDo, TransformKind, WriteFiles,
};
use std::collections::BTreeMap;

pub fn side_input_tag(index: usize) -> String {
    format!("side_input_{index}")
}

pub(crate) fn single(tag: &str, id: CollectionId) -> BTreeMap<String, CollectionId> {
    BTreeMap::from([(tag.to_string(), id)])
}

/// Main input plus tagged side inputs, as recorded on a node.
pub fn main_and_side_inputs(
    main: CollectionId,
    side_inputs: &[CollectionId],
) -> BTreeMap<String, CollectionId> {
    let mut inputs = single(MAIN_INPUT_TAG, main);
    for (i, side_input) in side_inputs.iter().enumerate() {
        inputs.insert(side_input_tag(i), *side_input);
    }
    inputs
}

fn derived(
    scope: &mut ExpansionScope<'_>,
    name: &str,
    from: &[CollectionId],
    element_type: ElementType,
) -> Result<CollectionId, PipelineGraphError> {
    let mut boundedness = vec![];
    let mut windowing = None;
    for id in from {
        let collection = scope.collection(*id)?;
        boundedness.push(collection.boundedness());
        if windowing.is_none() {
            windowing = Some(collection.windowing().clone());
        }
    }
    Ok(scope.new_collection(
        name,
        element_type,
        Boundedness::combine(boundedness),
        windowing.unwrap_or_default(),
    ))
}

fn required(
    kind: TransformKind,
    map: &BTreeMap<String, CollectionId>,
    tag: &str,
) -> Result<CollectionId, PipelineGraphError> {
    map.get(tag)
        .copied()
        .ok_or_else(|| PipelineGraphError::InvalidInput(kind, format!("missing \"{tag}\"")))
}

/// Adds the children of a composite carrying `transform` to `scope`.
///
/// Primitive kinds expand to nothing. A plain user composite has no canonical expansion.
pub fn expand(
    scope: &mut ExpansionScope<'_>,
    transform: &AnyTransform,
    inputs: &BTreeMap<String, CollectionId>,
    outputs: &BTreeMap<String, CollectionId>,
) -> Result<(), PipelineGraphError> {
    match transform {
        AnyTransform::CombinePerKey(x) => expand_combine_per_key(scope, x, inputs, outputs),
        AnyTransform::CoGroupByKey(_) => expand_co_group_by_key(scope, inputs, outputs),
        AnyTransform::Reshuffle(_) => expand_reshuffle(scope, inputs, outputs),
        AnyTransform::WriteFiles(x) => expand_write_files(scope, x, inputs, outputs),
        AnyTransform::Composite(_) => Err(PipelineGraphError::NoExpansion(TransformKind::Composite)),
        _ => Ok(()),
    }
}

fn expand_combine_per_key(
    scope: &mut ExpansionScope<'_>,
    combine: &CombinePerKey,
    inputs: &BTreeMap<String, CollectionId>,
    outputs: &BTreeMap<String, CollectionId>,
) -> Result<(), PipelineGraphError> {
    let kind = TransformKind::CombinePerKey;
    let input = required(kind, inputs, MAIN_INPUT_TAG)?;
    let output = required(kind, outputs, MAIN_OUTPUT_TAG)?;
    let grouped_type = scope
        .collection(input)?
        .element_type()
        .grouped()
        .ok_or_else(|| PipelineGraphError::InvalidInput(kind, "expects a KV input".to_string()))?;
    let grouped = derived(scope, "GroupByKey.output", &[input], grouped_type)?;
    scope.apply_primitive(
        "GroupByKey",
        GroupByKey {}.into(),
        single(MAIN_INPUT_TAG, input),
        single(MAIN_OUTPUT_TAG, grouped),
    )?;
    scope.apply_primitive(
        "Combine.GroupedValues",
        ParDo::of(&combine.combine_fn).into(),
        single(MAIN_INPUT_TAG, grouped),
        single(MAIN_OUTPUT_TAG, output),
    )?;
    Ok(())
}

fn expand_co_group_by_key(
    scope: &mut ExpansionScope<'_>,
    inputs: &BTreeMap<String, CollectionId>,
    outputs: &BTreeMap<String, CollectionId>,
) -> Result<(), PipelineGraphError> {
    let kind = TransformKind::CoGroupByKey;
    let output = required(kind, outputs, MAIN_OUTPUT_TAG)?;
    if inputs.is_empty() {
        return Err(PipelineGraphError::InvalidInput(
            kind,
            "needs at least one keyed input".to_string(),
        ));
    }

    let mut key_type = None;
    let mut unions = BTreeMap::new();
    for (i, (tag, input)) in inputs.iter().enumerate() {
        let this_key = scope
            .collection(*input)?
            .element_type()
            .key_type()
            .cloned()
            .ok_or_else(|| PipelineGraphError::InvalidInput(kind, format!("input \"{tag}\" is not KV")))?;
        let key = key_type.get_or_insert(this_key).clone();
        let union = derived(
            scope,
            &format!("MakeUnionTable{i}.output"),
            &[*input],
            ElementType::kv(key, ElementType::Bytes),
        )?;
        scope.apply_primitive(
            &format!("MakeUnionTable{i}"),
            ParDo::of(&format!("ConstructUnionTable[{tag}]")).into(),
            single(MAIN_INPUT_TAG, *input),
            single(MAIN_OUTPUT_TAG, union),
        )?;
        unions.insert(format!("{MAIN_INPUT_TAG}{i}"), union);
    }

    let key = key_type.unwrap_or(ElementType::Bytes);
    let union_ids: Vec<CollectionId> = unions.values().copied().collect();
    let flattened = derived(
        scope,
        "Flatten.output",
        &union_ids,
        ElementType::kv(key.clone(), ElementType::Bytes),
    )?;
    scope.apply_primitive(
        "Flatten",
        Flatten {}.into(),
        unions,
        single(MAIN_OUTPUT_TAG, flattened),
    )?;
    let grouped = derived(
        scope,
        "GroupByKey.output",
        &[flattened],
        ElementType::kv(key, ElementType::iterable(ElementType::Bytes)),
    )?;
    scope.apply_primitive(
        "GroupByKey",
        GroupByKey {}.into(),
        single(MAIN_INPUT_TAG, flattened),
        single(MAIN_OUTPUT_TAG, grouped),
    )?;
    scope.apply_primitive(
        "ConstructCoGbkResultFn",
        ParDo::of("ConstructCoGbkResultFn").into(),
        single(MAIN_INPUT_TAG, grouped),
        single(MAIN_OUTPUT_TAG, output),
    )?;
    Ok(())
}

fn expand_reshuffle(
    scope: &mut ExpansionScope<'_>,
    inputs: &BTreeMap<String, CollectionId>,
    outputs: &BTreeMap<String, CollectionId>,
) -> Result<(), PipelineGraphError> {
    let kind = TransformKind::Reshuffle;
    let input = required(kind, inputs, MAIN_INPUT_TAG)?;
    let output = required(kind, outputs, MAIN_OUTPUT_TAG)?;
    let element_type = scope.collection(input)?.element_type().clone();

    let keyed = derived(
        scope,
        "AddArbitraryKey.output",
        &[input],
        ElementType::kv(ElementType::Int64, element_type.clone()),
    )?;
    scope.apply_primitive(
        "AddArbitraryKey",
        ParDo::of("AddArbitraryKey").into(),
        single(MAIN_INPUT_TAG, input),
        single(MAIN_OUTPUT_TAG, keyed),
    )?;
    let grouped = derived(
        scope,
        "GroupByKey.output",
        &[keyed],
        ElementType::kv(ElementType::Int64, ElementType::iterable(element_type)),
    )?;
    scope.apply_primitive(
        "GroupByKey",
        GroupByKey {}.into(),
        single(MAIN_INPUT_TAG, keyed),
        single(MAIN_OUTPUT_TAG, grouped),
    )?;
    scope.apply_primitive(
        "ExpandIterable",
        ParDo::of("ExpandIterable").into(),
        single(MAIN_INPUT_TAG, grouped),
        single(MAIN_OUTPUT_TAG, output),
    )?;
    Ok(())
}

fn expand_write_files(
    scope: &mut ExpansionScope<'_>,
    write: &WriteFiles,
    inputs: &BTreeMap<String, CollectionId>,
    outputs: &BTreeMap<String, CollectionId>,
) -> Result<(), PipelineGraphError> {
    let kind = TransformKind::WriteFiles;
    let mut input = required(kind, inputs, MAIN_INPUT_TAG)?;
    let output = required(kind, outputs, MAIN_OUTPUT_TAG)?;
    let side_inputs = &write.side_inputs;

    let collection = scope.collection(input)?;
    let element_type = collection.element_type().clone();
    if !write.windowed_writes && *collection.windowing() != WindowingStrategy::Global {
        let rewindowed = derived(scope, "RewindowIntoGlobal.output", &[input], element_type.clone())?;
        scope.apply_primitive(
            "RewindowIntoGlobal",
            AssignWindows {
                windowing: WindowingStrategy::Global,
            }
            .into(),
            single(MAIN_INPUT_TAG, input),
            single(MAIN_OUTPUT_TAG, rewindowed),
        )?;
        input = rewindowed;
    }

    let temp_files = match write.fixed_num_shards() {
        Some(_) => {
            let keyed = derived(
                scope,
                "ApplyShardingKey.output",
                &[input],
                ElementType::kv(ElementType::Int64, element_type.clone()),
            )?;
            scope.apply_primitive(
                "ApplyShardingKey",
                ParDo::of("ApplyShardingKey").into(),
                single(MAIN_INPUT_TAG, input),
                single(MAIN_OUTPUT_TAG, keyed),
            )?;
            let shards = derived(
                scope,
                "GroupIntoShards.output",
                &[keyed],
                ElementType::kv(ElementType::Int64, ElementType::iterable(element_type)),
            )?;
            scope.apply_primitive(
                "GroupIntoShards",
                GroupByKey {}.into(),
                single(MAIN_INPUT_TAG, keyed),
                single(MAIN_OUTPUT_TAG, shards),
            )?;
            let temp_files = derived(
                scope,
                "WriteShardsIntoTempFiles.output",
                &[shards],
                ElementType::FileResult,
            )?;
            scope.apply_primitive(
                "WriteShardsIntoTempFiles",
                ParDo::of("WriteShardsIntoTempFiles")
                    .with_side_inputs(side_inputs.clone())
                    .into(),
                main_and_side_inputs(shards, side_inputs),
                single(MAIN_OUTPUT_TAG, temp_files),
            )?;
            temp_files
        }
        None => {
            let temp_files = derived(
                scope,
                "WriteUnshardedBundles.output",
                &[input],
                ElementType::FileResult,
            )?;
            scope.apply_primitive(
                "WriteUnshardedBundles",
                ParDo::of("WriteUnshardedBundles")
                    .with_side_inputs(side_inputs.clone())
                    .into(),
                main_and_side_inputs(input, side_inputs),
                single(MAIN_OUTPUT_TAG, temp_files),
            )?;
            temp_files
        }
    };

    scope.apply_primitive(
        "FinalizeTempFileBundles",
        ParDo::of("FinalizeTempFileBundles").into(),
        single(MAIN_INPUT_TAG, temp_files),
        single(MAIN_OUTPUT_TAG, output),
    )?;
    Ok(())
}
