//! Graph rewrites applied before the walk.

pub mod unconsumed_reads;

use crate::context::AppliedTransform;
use crate::translator::TranslationError;
use pipeline_graph::transform::{TransformKind, WriteFiles};
use pipeline_graph::{AnyTransform, CollectionId, Node, NodeId, Pipeline, TransformVariant, expansions};
use std::collections::BTreeMap;

/// Each engine worker writes to this many shards.
pub const SHARDS_PER_PARALLELISM: u32 = 2;

pub struct TransformReplacement {
    pub transform: AnyTransform,
}

/// What one substitution did to the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplacedTransform {
    pub node: String,
    /// Original output to replacement output, for outputs whose identity changed.
    pub output_mapping: BTreeMap<CollectionId, CollectionId>,
}

pub trait OverrideFactory {
    fn matches(&self, node: &Node) -> bool;

    fn replacement(
        &self,
        node: &AppliedTransform<'_>,
    ) -> Result<TransformReplacement, TranslationError>;
}

fn replacement_failure(node: &str, err: impl Into<anyhow::Error>) -> TranslationError {
    TranslationError::ReplacementBuildFailure {
        node: node.to_string(),
        source: err.into(),
    }
}

/// Outermost matches in pre-order. Nodes below a match are never offered.
fn find_matches(pipeline: &Pipeline, factory: &dyn OverrideFactory) -> Vec<NodeId> {
    let mut matched: Vec<NodeId> = vec![];
    for id in pipeline.pre_order() {
        if matched.iter().any(|x| pipeline.is_descendant(id, *x)) {
            continue;
        }
        if let Ok(node) = pipeline.node(id) {
            if factory.matches(node) {
                matched.push(id);
            }
        }
    }
    matched
}

/// Replaces every node `factory` matches. All matches are found before the first rewrite.
///
/// On error the pipeline is restored to its state before the call.
pub fn apply_override(
    pipeline: &mut Pipeline,
    factory: &dyn OverrideFactory,
) -> Result<Vec<ReplacedTransform>, TranslationError> {
    apply_overrides(pipeline, &[factory])
}

/// Applies `factories` in order. Either every rewrite lands or none does.
pub fn apply_overrides(
    pipeline: &mut Pipeline,
    factories: &[&dyn OverrideFactory],
) -> Result<Vec<ReplacedTransform>, TranslationError> {
    let snapshot = pipeline.clone();
    let res: Result<Vec<ReplacedTransform>, TranslationError> =
        factories.iter().try_fold(vec![], |mut replaced, factory| {
            replaced.extend(replace_matches(pipeline, *factory)?);
            Ok(replaced)
        });
    if let Err(e) = &res {
        log::debug!("Override pass failed, restoring the pipeline: {e}");
        *pipeline = snapshot;
    }
    res
}

fn replace_matches(
    pipeline: &mut Pipeline,
    factory: &dyn OverrideFactory,
) -> Result<Vec<ReplacedTransform>, TranslationError> {
    let mut replaced = vec![];
    for id in find_matches(pipeline, factory) {
        let (name, replacement, inputs, outputs) = {
            let Some(node) = AppliedTransform::new(pipeline, id)? else {
                continue;
            };
            (
                node.full_name().to_string(),
                factory.replacement(&node)?,
                node.inputs().clone(),
                node.outputs().clone(),
            )
        };
        let transform = replacement.transform;
        pipeline
            .replace_subgraph(id, transform.clone(), |scope| {
                expansions::expand(scope, &transform, &inputs, &outputs)
            })
            .map_err(|e| replacement_failure(&name, e))?;
        log::info!("Replaced \"{}\" with {}", name, transform.urn());
        // Outputs keep their identities across the rewrite.
        replaced.push(ReplacedTransform {
            node: name,
            output_mapping: BTreeMap::new(),
        });
    }
    Ok(replaced)
}

/// Fixes the shard count of runner-sharded file writes so streaming output is bounded
/// per worker.
pub struct StreamingShardedWriteFactory {
    parallelism: i32,
}

impl StreamingShardedWriteFactory {
    pub fn new(parallelism: i32) -> Result<Self, TranslationError> {
        if parallelism <= 0 {
            return Err(TranslationError::InvalidConfiguration(format!(
                "parallelism must be positive to shard streaming writes, got {parallelism}"
            )));
        }
        if parallelism
            .checked_mul(SHARDS_PER_PARALLELISM as i32)
            .is_none()
        {
            return Err(TranslationError::InvalidConfiguration(format!(
                "{SHARDS_PER_PARALLELISM} shards per worker at parallelism {parallelism} \
                 exceed the engine's parallelism range"
            )));
        }
        Ok(Self { parallelism })
    }

    pub fn num_shards(&self) -> u32 {
        self.parallelism.unsigned_abs() * SHARDS_PER_PARALLELISM
    }
}

impl OverrideFactory for StreamingShardedWriteFactory {
    fn matches(&self, node: &Node) -> bool {
        node.transform()
            .and_then(WriteFiles::from_any)
            .is_some_and(|x| x.has_runner_determined_sharding())
    }

    fn replacement(
        &self,
        node: &AppliedTransform<'_>,
    ) -> Result<TransformReplacement, TranslationError> {
        let original =
            WriteFiles::from_any(node.transform()).ok_or_else(|| TranslationError::KindMismatch {
                expected: TransformKind::WriteFiles,
                actual: node.transform().kind(),
                node: node.full_name().to_string(),
            })?;
        if original.sink.output_prefix.is_empty() {
            return Err(replacement_failure(
                node.full_name(),
                anyhow::anyhow!("file sink has no output prefix"),
            ));
        }
        let mut replacement = WriteFiles::to(original.sink.clone())
            .with_side_inputs(original.side_inputs.clone())
            .with_num_shards(self.num_shards());
        replacement.windowed_writes = original.windowed_writes;
        Ok(TransformReplacement {
            transform: replacement.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_graph::transform::{FileSink, ParDo, Read};
    use pipeline_graph::{ElementType, PipelineBuilder, WindowingStrategy};

    fn windowed_write(prefix: &str) -> Pipeline {
        let mut b = PipelineBuilder::new();
        let lines = b
            .read("Read", Read::unbounded("lines"), ElementType::String)
            .unwrap();
        let config = b
            .read("Config", Read::bounded("config"), ElementType::String)
            .unwrap();
        let windowed = b
            .window_into("Window", lines, WindowingStrategy::Fixed { size_ms: 60_000 })
            .unwrap();
        b.write_files(
            "Write",
            windowed,
            WriteFiles::to(FileSink::new(prefix, ".txt"))
                .with_windowed_writes()
                .with_side_inputs(vec![config]),
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn shards_are_twice_the_parallelism() {
        assert_eq!(StreamingShardedWriteFactory::new(3).unwrap().num_shards(), 6);
        assert!(matches!(
            StreamingShardedWriteFactory::new(0),
            Err(TranslationError::InvalidConfiguration(_))
        ));
        assert!(StreamingShardedWriteFactory::new(-2).is_err());
    }

    #[test]
    fn shard_counts_must_fit_the_engine() {
        assert!(matches!(
            StreamingShardedWriteFactory::new(1_500_000_000),
            Err(TranslationError::InvalidConfiguration(_))
        ));
        let largest = StreamingShardedWriteFactory::new(i32::MAX / 2).unwrap();
        assert!(i32::try_from(largest.num_shards()).is_ok());
    }

    #[test]
    fn replacement_keeps_sink_side_inputs_and_windowing() {
        let mut pipeline = windowed_write("/out/part");
        let before = pipeline.node_by_name("Write").unwrap().clone();
        let factory = StreamingShardedWriteFactory::new(3).unwrap();

        let replaced = apply_override(&mut pipeline, &factory).unwrap();
        assert_eq!(replaced.len(), 1);
        assert!(replaced[0].output_mapping.is_empty());

        let write = pipeline.node_by_name("Write").unwrap();
        let transform = WriteFiles::from_any(write.transform().unwrap()).unwrap();
        assert_eq!(transform.num_shards, Some(6));
        assert!(transform.windowed_writes);
        assert_eq!(transform.sink, FileSink::new("/out/part", ".txt"));
        assert_eq!(transform.side_inputs.len(), 1);
        assert_eq!(write.inputs(), before.inputs());
        assert_eq!(write.outputs(), before.outputs());
        assert!(pipeline.node_by_name("Write/GroupIntoShards").is_some());
        assert!(pipeline.node_by_name("Write/WriteUnshardedBundles").is_none());
    }

    #[test]
    fn sink_failures_are_wrapped_with_the_node_name() {
        let mut pipeline = windowed_write("");
        let factory = StreamingShardedWriteFactory::new(1).unwrap();
        let err = apply_override(&mut pipeline, &factory).unwrap_err();
        match err {
            TranslationError::ReplacementBuildFailure { node, source } => {
                assert_eq!(node, "Write");
                assert!(source.to_string().contains("output prefix"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn a_failed_pass_rolls_back_earlier_rewrites() {
        let mut b = PipelineBuilder::new();
        let lines = b
            .read("Read", Read::unbounded("lines"), ElementType::String)
            .unwrap();
        b.write_files("First", lines, WriteFiles::to(FileSink::new("/out/a", ".txt")))
            .unwrap();
        b.write_files("Second", lines, WriteFiles::to(FileSink::new("", ".txt")))
            .unwrap();
        let mut pipeline = b.build().unwrap();
        let before = pipeline.to_json().unwrap();
        let factory = StreamingShardedWriteFactory::new(2).unwrap();

        let err = apply_override(&mut pipeline, &factory).unwrap_err();
        assert!(matches!(err, TranslationError::ReplacementBuildFailure { .. }));
        assert_eq!(pipeline.to_json().unwrap(), before);
        let first = pipeline.node_by_name("First").unwrap();
        assert_eq!(
            WriteFiles::from_any(first.transform().unwrap()).unwrap().num_shards,
            None
        );
        assert!(pipeline.node_by_name("First/WriteUnshardedBundles").is_some());
        assert!(pipeline.node_by_name("First/GroupIntoShards").is_none());

        assert!(apply_overrides(&mut pipeline, &[&factory]).is_err());
        assert_eq!(pipeline.to_json().unwrap(), before);
    }

    struct EveryComposite;

    impl OverrideFactory for EveryComposite {
        fn matches(&self, node: &Node) -> bool {
            node.transform()
                .is_some_and(|x| x.kind() == TransformKind::Composite)
        }

        fn replacement(
            &self,
            node: &AppliedTransform<'_>,
        ) -> Result<TransformReplacement, TranslationError> {
            Err(replacement_failure(
                node.full_name(),
                anyhow::anyhow!("not replaceable"),
            ))
        }
    }

    #[test]
    fn outermost_match_wins() {
        let mut b = PipelineBuilder::new();
        let lines = b
            .read("Read", Read::bounded("lines"), ElementType::String)
            .unwrap();
        b.begin_composite("Outer", &[("input", lines)]).unwrap();
        b.begin_composite("Inner", &[("input", lines)]).unwrap();
        let parsed = b
            .par_do("Parse", ParDo::of("Parse"), lines, ElementType::String)
            .unwrap();
        b.end_composite(&[("output", parsed)]).unwrap();
        b.end_composite(&[("output", parsed)]).unwrap();
        b.begin_composite("Sibling", &[("input", lines)]).unwrap();
        let shouted = b
            .par_do("Shout", ParDo::of("Shout"), lines, ElementType::String)
            .unwrap();
        b.end_composite(&[("output", shouted)]).unwrap();
        let pipeline = b.build().unwrap();

        let names: Vec<&str> = find_matches(&pipeline, &EveryComposite)
            .into_iter()
            .map(|x| pipeline.node(x).unwrap().full_name())
            .collect();
        assert_eq!(names, ["Outer", "Sibling"]);
        assert!(pipeline.node_by_name("Outer/Inner").is_some());
    }
}
