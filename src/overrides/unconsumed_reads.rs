use crate::translator::TranslationError;
use pipeline_graph::transform::{MAIN_INPUT_TAG, ParDo, Read};
use pipeline_graph::{CollectionId, Pipeline, TransformVariant};
use std::collections::BTreeMap;

const DROP_INPUTS: &str = "DropInputs";

fn unused_name(pipeline: &Pipeline) -> String {
    let mut name = DROP_INPUTS.to_string();
    let mut i = 1;
    while pipeline.node_by_name(&name).is_some() {
        name = format!("{DROP_INPUTS}{i}");
        i += 1;
    }
    name
}

/// Gives every `Read` without a consumer a no-op consumer at the root, so the engine keeps
/// the source. Returns the number of consumers added.
pub fn ensure_all_reads_consumed(pipeline: &mut Pipeline) -> Result<usize, TranslationError> {
    let unconsumed: Vec<(String, CollectionId)> = pipeline
        .nodes()
        .filter(|x| x.is_primitive())
        .filter(|x| x.transform().and_then(Read::from_any).is_some())
        .flat_map(|x| {
            x.outputs()
                .values()
                .map(move |c| (x.full_name().to_string(), *c))
        })
        .filter(|(_, c)| pipeline.consumers(*c).is_empty())
        .collect();

    let root = pipeline.root();
    for (read, collection) in &unconsumed {
        let name = unused_name(pipeline);
        log::info!("Adding {} consumer for unconsumed read \"{}\"", name, read);
        pipeline.add_primitive(
            root,
            &name,
            ParDo::of(DROP_INPUTS).into(),
            BTreeMap::from([(MAIN_INPUT_TAG.to_string(), *collection)]),
            BTreeMap::new(),
        )?;
    }
    Ok(unconsumed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_graph::{ElementType, PipelineBuilder};

    #[test]
    fn only_dangling_reads_get_a_consumer() {
        let mut b = PipelineBuilder::new();
        let used = b
            .read("Used", Read::bounded("a"), ElementType::String)
            .unwrap();
        b.read("Dangling", Read::bounded("b"), ElementType::String)
            .unwrap();
        b.read("AlsoDangling", Read::unbounded("c"), ElementType::String)
            .unwrap();
        b.par_do("Parse", ParDo::of("Parse"), used, ElementType::String)
            .unwrap();
        let mut pipeline = b.build().unwrap();

        assert_eq!(ensure_all_reads_consumed(&mut pipeline).unwrap(), 2);
        assert!(pipeline.node_by_name("DropInputs").is_some());
        assert!(pipeline.node_by_name("DropInputs1").is_some());
        assert_eq!(ensure_all_reads_consumed(&mut pipeline).unwrap(), 0);
    }
}
