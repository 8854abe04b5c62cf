use crate::PipelineGraphError;
use crate::collection::{Boundedness, Collection, CollectionId, ElementType, WindowingStrategy};
use crate::expansions::{self, main_and_side_inputs, single};
use crate::pipeline::{ExpansionScope, NodeId, Pipeline};
use crate::transform::{
    AnyTransform, AssignWindows, CoGroupByKey, CombinePerKey, Composite, Custom, Flatten,
    GroupByKey, Impulse, MAIN_INPUT_TAG, MAIN_OUTPUT_TAG, ParDo, Read, Reshuffle, WriteFiles,
};
use std::collections::BTreeMap;

/// Applies transforms to a [`Pipeline`] in program order.
///
/// Composites the model knows about are expanded immediately through
/// [`expansions::expand`]; user composites are opened and closed explicitly with
/// [`PipelineBuilder::begin_composite`] / [`PipelineBuilder::end_composite`].
pub struct PipelineBuilder {
    pipeline: Pipeline,
    scopes: Vec<NodeId>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        let pipeline = Pipeline::new();
        let root = pipeline.root();
        Self {
            pipeline,
            scopes: vec![root],
        }
    }

    fn scope(&self) -> NodeId {
        self.scopes.last().copied().unwrap_or(self.pipeline.root())
    }

    pub fn collection(&self, id: CollectionId) -> Result<&Collection, PipelineGraphError> {
        self.pipeline.collection(id)
    }

    fn output_name(&self, name: &str, tag: &str) -> Result<String, PipelineGraphError> {
        Ok(format!(
            "{}.{}",
            self.pipeline.child_full_name(self.scope(), name)?,
            tag
        ))
    }

    fn new_output(
        &mut self,
        name: &str,
        tag: &str,
        element_type: ElementType,
        from: &[CollectionId],
    ) -> Result<CollectionId, PipelineGraphError> {
        let mut boundedness = vec![];
        let mut windowing = None;
        for id in from {
            let collection = self.pipeline.collection(*id)?;
            boundedness.push(collection.boundedness());
            windowing.get_or_insert_with(|| collection.windowing().clone());
        }
        let full_name = self.output_name(name, tag)?;
        Ok(self.pipeline.new_collection(
            &full_name,
            element_type,
            Boundedness::combine(boundedness),
            windowing.unwrap_or_default(),
        ))
    }

    fn primitive(
        &mut self,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
        output: CollectionId,
    ) -> Result<CollectionId, PipelineGraphError> {
        let scope = self.scope();
        self.pipeline
            .add_primitive(scope, name, transform, inputs, single(MAIN_OUTPUT_TAG, output))?;
        Ok(output)
    }

    fn expanded(
        &mut self,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
        output: CollectionId,
    ) -> Result<CollectionId, PipelineGraphError> {
        let scope = self.scope();
        let outputs = single(MAIN_OUTPUT_TAG, output);
        let composite = self
            .pipeline
            .add_composite(scope, name, transform.clone(), inputs.clone())?;
        expansions::expand(
            &mut ExpansionScope::new(&mut self.pipeline, composite),
            &transform,
            &inputs,
            &outputs,
        )?;
        self.pipeline.set_composite_outputs(composite, outputs)?;
        Ok(output)
    }

    pub fn impulse(&mut self, name: &str) -> Result<CollectionId, PipelineGraphError> {
        let output = self.new_output(name, MAIN_OUTPUT_TAG, ElementType::Bytes, &[])?;
        self.primitive(name, Impulse {}.into(), BTreeMap::new(), output)
    }

    pub fn read(
        &mut self,
        name: &str,
        read: Read,
        element_type: ElementType,
    ) -> Result<CollectionId, PipelineGraphError> {
        let full_name = self.output_name(name, MAIN_OUTPUT_TAG)?;
        let output = self.pipeline.new_collection(
            &full_name,
            element_type,
            read.source.boundedness,
            WindowingStrategy::Global,
        );
        self.primitive(name, read.into(), BTreeMap::new(), output)
    }

    pub fn par_do(
        &mut self,
        name: &str,
        par_do: ParDo,
        input: CollectionId,
        output_type: ElementType,
    ) -> Result<CollectionId, PipelineGraphError> {
        let tag = par_do.main_output_tag.clone();
        let outputs = self.par_do_tagged(name, par_do, input, &[output_type])?;
        outputs
            .get(&tag)
            .copied()
            .ok_or_else(|| PipelineGraphError::InvalidInput(crate::TransformKind::ParDo, tag))
    }

    /// Multi-output ParDo. `output_types` lists one element type per output tag, main first.
    pub fn par_do_tagged(
        &mut self,
        name: &str,
        par_do: ParDo,
        input: CollectionId,
        output_types: &[ElementType],
    ) -> Result<BTreeMap<String, CollectionId>, PipelineGraphError> {
        let tags: Vec<String> = par_do.output_tags().map(|x| x.to_string()).collect();
        if tags.len() != output_types.len() {
            return Err(PipelineGraphError::InvalidInput(
                crate::TransformKind::ParDo,
                format!("{} output tags but {} output types", tags.len(), output_types.len()),
            ));
        }
        let mut outputs = BTreeMap::new();
        for (tag, element_type) in tags.iter().zip(output_types) {
            let id = self.new_output(name, tag, element_type.clone(), &[input])?;
            outputs.insert(tag.clone(), id);
        }
        let inputs = main_and_side_inputs(input, &par_do.side_inputs);
        let scope = self.scope();
        self.pipeline
            .add_primitive(scope, name, par_do.into(), inputs, outputs.clone())?;
        Ok(outputs)
    }

    /// Outputs `KV<K, Iterable<V>>` for a `KV<K, V>` input. Non-KV inputs are accepted here
    /// and rejected later by whoever consumes the pipeline.
    pub fn group_by_key(
        &mut self,
        name: &str,
        input: CollectionId,
    ) -> Result<CollectionId, PipelineGraphError> {
        let input_type = self.pipeline.collection(input)?.element_type().clone();
        let output_type = input_type
            .grouped()
            .unwrap_or_else(|| ElementType::iterable(input_type));
        let output = self.new_output(name, MAIN_OUTPUT_TAG, output_type, &[input])?;
        self.primitive(name, GroupByKey {}.into(), single(MAIN_INPUT_TAG, input), output)
    }

    pub fn flatten(
        &mut self,
        name: &str,
        inputs: &[CollectionId],
    ) -> Result<CollectionId, PipelineGraphError> {
        let element_type = match inputs.first() {
            Some(x) => self.pipeline.collection(*x)?.element_type().clone(),
            None => ElementType::Bytes,
        };
        let output = self.new_output(name, MAIN_OUTPUT_TAG, element_type, inputs)?;
        let tagged = inputs
            .iter()
            .enumerate()
            .map(|(i, x)| (format!("{MAIN_INPUT_TAG}{i}"), *x))
            .collect();
        self.primitive(name, Flatten {}.into(), tagged, output)
    }

    pub fn window_into(
        &mut self,
        name: &str,
        input: CollectionId,
        windowing: WindowingStrategy,
    ) -> Result<CollectionId, PipelineGraphError> {
        let collection = self.pipeline.collection(input)?;
        let element_type = collection.element_type().clone();
        let boundedness = collection.boundedness();
        let full_name = self.output_name(name, MAIN_OUTPUT_TAG)?;
        let output =
            self.pipeline
                .new_collection(&full_name, element_type, boundedness, windowing.clone());
        self.primitive(
            name,
            AssignWindows { windowing }.into(),
            single(MAIN_INPUT_TAG, input),
            output,
        )
    }

    pub fn combine_per_key(
        &mut self,
        name: &str,
        input: CollectionId,
        combine_fn: &str,
    ) -> Result<CollectionId, PipelineGraphError> {
        let input_type = self.pipeline.collection(input)?.element_type().clone();
        let output_type = match &input_type {
            ElementType::Kv(k, v) => ElementType::kv(k.as_ref().clone(), v.as_ref().clone()),
            other => other.clone(),
        };
        let output = self.new_output(name, MAIN_OUTPUT_TAG, output_type, &[input])?;
        self.expanded(
            name,
            CombinePerKey {
                combine_fn: combine_fn.to_string(),
            }
            .into(),
            single(MAIN_INPUT_TAG, input),
            output,
        )
    }

    /// Joins keyed inputs by key. Inputs are tagged so consumers can tell them apart.
    pub fn co_group_by_key(
        &mut self,
        name: &str,
        inputs: &[(&str, CollectionId)],
    ) -> Result<CollectionId, PipelineGraphError> {
        let key_type = match inputs.first() {
            Some((_, x)) => self
                .pipeline
                .collection(*x)?
                .element_type()
                .key_type()
                .cloned()
                .unwrap_or(ElementType::Bytes),
            None => ElementType::Bytes,
        };
        let ids: Vec<CollectionId> = inputs.iter().map(|(_, x)| *x).collect();
        let output = self.new_output(
            name,
            MAIN_OUTPUT_TAG,
            ElementType::kv(key_type, ElementType::CoGbkResult),
            &ids,
        )?;
        let tagged = inputs.iter().map(|(tag, x)| (tag.to_string(), *x)).collect();
        self.expanded(name, CoGroupByKey {}.into(), tagged, output)
    }

    pub fn reshuffle(
        &mut self,
        name: &str,
        input: CollectionId,
    ) -> Result<CollectionId, PipelineGraphError> {
        let element_type = self.pipeline.collection(input)?.element_type().clone();
        let output = self.new_output(name, MAIN_OUTPUT_TAG, element_type, &[input])?;
        self.expanded(name, Reshuffle {}.into(), single(MAIN_INPUT_TAG, input), output)
    }

    /// Writes `input` to files. The output lists the written file names.
    pub fn write_files(
        &mut self,
        name: &str,
        input: CollectionId,
        write: WriteFiles,
    ) -> Result<CollectionId, PipelineGraphError> {
        let output = self.new_output(name, MAIN_OUTPUT_TAG, ElementType::String, &[input])?;
        let inputs = main_and_side_inputs(input, &write.side_inputs);
        self.expanded(name, write.into(), inputs, output)
    }

    /// A primitive the model has no special knowledge of.
    pub fn custom(
        &mut self,
        name: &str,
        urn: &str,
        input: Option<CollectionId>,
        output_type: ElementType,
    ) -> Result<CollectionId, PipelineGraphError> {
        let from: Vec<CollectionId> = input.into_iter().collect();
        let output = self.new_output(name, MAIN_OUTPUT_TAG, output_type, &from)?;
        let inputs = match input {
            Some(x) => single(MAIN_INPUT_TAG, x),
            None => BTreeMap::new(),
        };
        self.primitive(
            name,
            Custom {
                urn: urn.to_string(),
            }
            .into(),
            inputs,
            output,
        )
    }

    pub fn begin_composite(
        &mut self,
        name: &str,
        inputs: &[(&str, CollectionId)],
    ) -> Result<NodeId, PipelineGraphError> {
        let scope = self.scope();
        let inputs = inputs.iter().map(|(tag, x)| (tag.to_string(), *x)).collect();
        let id = self
            .pipeline
            .add_composite(scope, name, Composite {}.into(), inputs)?;
        self.scopes.push(id);
        Ok(id)
    }

    pub fn end_composite(
        &mut self,
        outputs: &[(&str, CollectionId)],
    ) -> Result<NodeId, PipelineGraphError> {
        if self.scopes.len() <= 1 {
            return Err(PipelineGraphError::NoOpenComposite);
        }
        let id = self.scope();
        let outputs = outputs.iter().map(|(tag, x)| (tag.to_string(), *x)).collect();
        self.pipeline.set_composite_outputs(id, outputs)?;
        self.scopes.pop();
        Ok(id)
    }

    pub fn build(self) -> Result<Pipeline, PipelineGraphError> {
        if self.scopes.len() > 1 {
            let open = self.pipeline.node(self.scope())?.full_name().to_string();
            return Err(PipelineGraphError::UnclosedComposite(open));
        }
        Ok(self.pipeline)
    }
}
