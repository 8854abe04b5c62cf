use pipeline_graph::{Boundedness, WindowingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorId(pub(crate) usize);

impl OperatorId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One output stream of a native operator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamHandle {
    pub(crate) operator: OperatorId,
    pub(crate) tag: String,
}

impl StreamHandle {
    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum OperatorKind {
    Impulse,
    Source {
        name: String,
        boundedness: Boundedness,
    },
    EmptySource,
    ParDo {
        do_fn: String,
    },
    GroupByKeyAndWindow {
        windowing: WindowingStrategy,
    },
    Union,
    AssignWindows {
        windowing: WindowingStrategy,
    },
    CombinePerKey {
        combine_fn: String,
    },
    Rebalance,
    FileSink {
        output_prefix: String,
        suffix: String,
        num_shards: Option<u32>,
        windowed_writes: bool,
    },
}

impl OperatorKind {
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            OperatorKind::Impulse | OperatorKind::Source { .. } | OperatorKind::EmptySource
        )
    }

    /// Operators that partition their input by key.
    pub fn is_keyed(&self) -> bool {
        matches!(
            self,
            OperatorKind::GroupByKeyAndWindow { .. } | OperatorKind::CombinePerKey { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOperator {
    pub(crate) id: OperatorId,
    pub(crate) name: String,
    pub(crate) kind: OperatorKind,
    pub(crate) inputs: Vec<StreamHandle>,
    pub(crate) broadcast_inputs: Vec<StreamHandle>,
    pub(crate) output_tags: Vec<String>,
    pub(crate) parallelism: i32,
}

impl StreamOperator {
    pub fn id(&self) -> OperatorId {
        self.id
    }

    /// Full name of the pipeline node this operator was lowered from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[StreamHandle] {
        &self.inputs
    }

    pub fn broadcast_inputs(&self) -> &[StreamHandle] {
        &self.broadcast_inputs
    }

    pub fn output_tags(&self) -> &[String] {
        &self.output_tags
    }

    pub fn parallelism(&self) -> i32 {
        self.parallelism
    }
}

/// Operator description before it is added to a [`super::StreamEnvironment`].
#[derive(Clone, Debug)]
pub struct OperatorSpec {
    pub(crate) name: String,
    pub(crate) kind: OperatorKind,
    pub(crate) inputs: Vec<StreamHandle>,
    pub(crate) broadcast_inputs: Vec<StreamHandle>,
    pub(crate) output_tags: Vec<String>,
    pub(crate) parallelism: Option<i32>,
}

impl OperatorSpec {
    pub fn new(name: &str, kind: OperatorKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            inputs: vec![],
            broadcast_inputs: vec![],
            output_tags: vec![pipeline_graph::transform::MAIN_OUTPUT_TAG.to_string()],
            parallelism: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<StreamHandle>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_broadcast_inputs(mut self, inputs: Vec<StreamHandle>) -> Self {
        self.broadcast_inputs = inputs;
        self
    }

    pub fn with_output_tags(mut self, tags: Vec<String>) -> Self {
        self.output_tags = tags;
        self
    }

    /// Unset parallelism falls back to the environment default.
    pub fn with_parallelism(mut self, parallelism: i32) -> Self {
        self.parallelism = Some(parallelism);
        self
    }
}
