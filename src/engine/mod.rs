//! The native stream graph handlers lower into.
//!
//! Nothing here executes; the environment is an ordered list of operators wired by
//! [`StreamHandle`]s, serializable as a JSON execution plan.

mod operators;

pub use operators::{OperatorId, OperatorKind, OperatorSpec, StreamHandle, StreamOperator};

use crate::options::PipelineOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown operator {0:?}")]
    UnknownOperator(OperatorId),
    #[error("Operator \"{operator}\" has no output \"{tag}\"")]
    UnknownOutput { operator: String, tag: String },
    #[error("Operator \"{0}\" has non-positive parallelism {1}")]
    InvalidParallelism(String, i32),
    #[error(transparent)]
    SerdeJSONError(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamEnvironment {
    job_name: String,
    streaming: bool,
    parallelism: i32,
    max_parallelism: Option<i32>,
    operators: Vec<StreamOperator>,
    translated_nodes: Vec<String>,
}

impl StreamEnvironment {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            job_name: options.job_name.clone(),
            streaming: options.streaming,
            parallelism: options.parallelism,
            max_parallelism: options.max_parallelism,
            operators: vec![],
            translated_nodes: vec![],
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn parallelism(&self) -> i32 {
        self.parallelism
    }

    pub fn max_parallelism(&self) -> Option<i32> {
        self.max_parallelism
    }

    pub fn operators(&self) -> &[StreamOperator] {
        &self.operators
    }

    pub fn operator(&self, id: OperatorId) -> Result<&StreamOperator, EngineError> {
        self.operators
            .get(id.0)
            .ok_or(EngineError::UnknownOperator(id))
    }

    /// Operators lowered from the node with this full name.
    pub fn operators_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a StreamOperator> {
        self.operators.iter().filter(move |x| x.name == name)
    }

    /// Full names of translated nodes, in translation order.
    pub fn translated_nodes(&self) -> &[String] {
        &self.translated_nodes
    }

    pub(crate) fn mark_translated(&mut self, name: &str) {
        self.translated_nodes.push(name.to_string());
    }

    fn check_handle(&self, handle: &StreamHandle) -> Result<(), EngineError> {
        let operator = self.operator(handle.operator)?;
        if !operator.output_tags.iter().any(|x| *x == handle.tag) {
            return Err(EngineError::UnknownOutput {
                operator: operator.name.clone(),
                tag: handle.tag.clone(),
            });
        }
        Ok(())
    }

    pub fn add_operator(&mut self, spec: OperatorSpec) -> Result<OperatorId, EngineError> {
        for handle in spec.inputs.iter().chain(spec.broadcast_inputs.iter()) {
            self.check_handle(handle)?;
        }
        let parallelism = spec.parallelism.unwrap_or(self.parallelism);
        if parallelism <= 0 {
            return Err(EngineError::InvalidParallelism(spec.name, parallelism));
        }
        let id = OperatorId(self.operators.len());
        log::trace!(
            "Adding {} operator {:?} for \"{}\" at parallelism {}",
            spec.kind,
            id,
            spec.name,
            parallelism
        );
        self.operators.push(StreamOperator {
            id,
            name: spec.name,
            kind: spec.kind,
            inputs: spec.inputs,
            broadcast_inputs: spec.broadcast_inputs,
            output_tags: spec.output_tags,
            parallelism,
        });
        Ok(id)
    }

    pub fn output(&self, operator: OperatorId, tag: &str) -> Result<StreamHandle, EngineError> {
        let handle = StreamHandle {
            operator,
            tag: tag.to_string(),
        };
        self.check_handle(&handle)?;
        Ok(handle)
    }

    pub fn main_output(&self, operator: OperatorId) -> Result<StreamHandle, EngineError> {
        self.output(operator, pipeline_graph::transform::MAIN_OUTPUT_TAG)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_must_name_existing_outputs() {
        let mut env = StreamEnvironment::new(&PipelineOptions::default().with_parallelism(3));
        let source = env
            .add_operator(OperatorSpec::new("Impulse", OperatorKind::Impulse).with_parallelism(1))
            .unwrap();
        let bad = StreamHandle {
            operator: source,
            tag: "missing".to_string(),
        };
        let err = env
            .add_operator(OperatorSpec::new("ParDo", OperatorKind::Rebalance).with_inputs(vec![bad]))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownOutput { .. }));

        let main = env.main_output(source).unwrap();
        let id = env
            .add_operator(OperatorSpec::new("Rebalance", OperatorKind::Rebalance).with_inputs(vec![main]))
            .unwrap();
        assert_eq!(env.operator(id).unwrap().parallelism(), 3);
        assert_eq!(env.operator(source).unwrap().parallelism(), 1);
    }

    #[test]
    fn plan_serializes_operator_kinds() {
        let mut env = StreamEnvironment::new(&PipelineOptions::default());
        env.add_operator(OperatorSpec::new("Empty", OperatorKind::EmptySource))
            .unwrap();
        let json = env.to_json().unwrap();
        assert!(json.contains("EmptySource"));
        assert!(json.contains("pipeline-translator"));
    }
}
