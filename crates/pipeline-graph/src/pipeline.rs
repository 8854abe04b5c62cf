use crate::PipelineGraphError;
use crate::collection::{Boundedness, Collection, CollectionId, ElementType, WindowingStrategy};
use crate::transform::{AnyTransform, MAIN_INPUT_TAG};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    full_name: String,
    transform: Option<AnyTransform>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    inputs: BTreeMap<String, CollectionId>,
    outputs: BTreeMap<String, CollectionId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn transform(&self) -> Option<&AnyTransform> {
        self.transform.as_ref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn inputs(&self) -> &BTreeMap<String, CollectionId> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, CollectionId> {
        &self.outputs
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_primitive(&self) -> bool {
        !self.is_root() && self.children.is_empty()
    }

    /// The input tagged as main input, or the only input.
    pub fn main_input(&self) -> Option<CollectionId> {
        if let Some(x) = self.inputs.get(MAIN_INPUT_TAG) {
            return Some(*x);
        }
        if self.inputs.len() == 1 {
            self.inputs.values().next().copied()
        } else {
            None
        }
    }

    pub fn single_output(&self) -> Option<CollectionId> {
        if self.outputs.len() == 1 {
            self.outputs.values().next().copied()
        } else {
            None
        }
    }
}

/// Hierarchy of applied transforms plus the collections flowing between them.
///
/// Nodes live in an arena indexed by [`NodeId`]; index 0 is the root, which carries no
/// transform. Children are kept in application order, which is also a valid topological
/// order for every collection produced inside the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    nodes: Vec<Option<Node>>,
    collections: Vec<Option<Collection>>,
    #[serde(skip)]
    producers: HashMap<CollectionId, NodeId>,
    #[serde(skip)]
    names: HashMap<String, NodeId>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        let root = Node {
            id: NodeId(0),
            full_name: String::new(),
            transform: None,
            parent: None,
            children: vec![],
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        };
        Self {
            nodes: vec![Some(root)],
            collections: vec![],
            producers: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, PipelineGraphError> {
        self.nodes
            .get(id.0)
            .and_then(|x| x.as_ref())
            .ok_or(PipelineGraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, PipelineGraphError> {
        self.nodes
            .get_mut(id.0)
            .and_then(|x| x.as_mut())
            .ok_or(PipelineGraphError::UnknownNode(id))
    }

    pub fn node_by_name(&self, full_name: &str) -> Option<&Node> {
        self.names.get(full_name).and_then(|x| self.node(*x).ok())
    }

    /// Live nodes, root included, in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    pub fn collection(&self, id: CollectionId) -> Result<&Collection, PipelineGraphError> {
        self.collections
            .get(id.0)
            .and_then(|x| x.as_ref())
            .ok_or(PipelineGraphError::UnknownCollection(id))
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter().flatten()
    }

    /// The primitive that produces `collection`, if any.
    pub fn producer(&self, collection: CollectionId) -> Option<NodeId> {
        self.producers.get(&collection).copied()
    }

    /// Primitives reading `collection`, in arena order.
    pub fn consumers(&self, collection: CollectionId) -> Vec<NodeId> {
        self.nodes()
            .filter(|x| x.is_primitive() && x.inputs.values().any(|c| *c == collection))
            .map(|x| x.id)
            .collect()
    }

    /// Every node below the root in pre-order (parents before children).
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack: Vec<NodeId> = vec![self.root()];
        while let Some(id) = stack.pop() {
            if let Ok(node) = self.node(id) {
                if !node.is_root() {
                    out.push(id);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.node(node).ok().and_then(|x| x.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).ok().and_then(|x| x.parent);
        }
        false
    }

    pub fn new_collection(
        &mut self,
        name: &str,
        element_type: ElementType,
        boundedness: Boundedness,
        windowing: WindowingStrategy,
    ) -> CollectionId {
        let id = CollectionId(self.collections.len());
        self.collections.push(Some(Collection {
            id,
            name: name.to_string(),
            element_type,
            boundedness,
            windowing,
        }));
        id
    }

    pub(crate) fn child_full_name(&self, parent: NodeId, name: &str) -> Result<String, PipelineGraphError> {
        let parent = self.node(parent)?;
        Ok(if parent.is_root() {
            name.to_string()
        } else {
            format!("{}/{}", parent.full_name, name)
        })
    }

    fn insert_node(
        &mut self,
        parent: NodeId,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
        outputs: BTreeMap<String, CollectionId>,
    ) -> Result<NodeId, PipelineGraphError> {
        let full_name = self.child_full_name(parent, name)?;
        if self.names.contains_key(&full_name) {
            return Err(PipelineGraphError::DuplicateName(full_name));
        }
        for collection in inputs.values() {
            self.collection(*collection)?;
            if !self.producers.contains_key(collection) {
                return Err(PipelineGraphError::InputNotProduced {
                    node: full_name,
                    collection: *collection,
                });
            }
        }
        for collection in outputs.values() {
            self.collection(*collection)?;
            if let Some(producer) = self.producers.get(collection) {
                return Err(PipelineGraphError::DuplicateProducer {
                    collection: *collection,
                    producer: self.node(*producer)?.full_name.clone(),
                });
            }
        }

        let id = NodeId(self.nodes.len());
        for collection in outputs.values() {
            self.producers.insert(*collection, id);
        }
        self.nodes.push(Some(Node {
            id,
            full_name: full_name.clone(),
            transform: Some(transform),
            parent: Some(parent),
            children: vec![],
            inputs,
            outputs,
        }));
        self.names.insert(full_name, id);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    pub fn add_primitive(
        &mut self,
        parent: NodeId,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
        outputs: BTreeMap<String, CollectionId>,
    ) -> Result<NodeId, PipelineGraphError> {
        self.insert_node(parent, name, transform, inputs, outputs)
    }

    /// Adds a composite with no outputs yet; close it with [`Pipeline::set_composite_outputs`].
    pub fn add_composite(
        &mut self,
        parent: NodeId,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
    ) -> Result<NodeId, PipelineGraphError> {
        self.insert_node(parent, name, transform, inputs, BTreeMap::new())
    }

    /// Declares the outputs of a composite. Each must be produced inside it.
    pub fn set_composite_outputs(
        &mut self,
        composite: NodeId,
        outputs: BTreeMap<String, CollectionId>,
    ) -> Result<(), PipelineGraphError> {
        let full_name = self.node(composite)?.full_name.clone();
        for collection in outputs.values() {
            match self.producer(*collection) {
                Some(producer) if self.is_descendant(producer, composite) => {}
                _ => {
                    return Err(PipelineGraphError::OutputNotProducedInside {
                        node: full_name,
                        collection: *collection,
                    });
                }
            }
        }
        self.node_mut(composite)?.outputs = outputs;
        Ok(())
    }

    fn remove_descendants(&mut self, node: NodeId) -> Result<(), PipelineGraphError> {
        let kept_outputs: Vec<CollectionId> = self.node(node)?.outputs.values().copied().collect();
        let children = std::mem::take(&mut self.node_mut(node)?.children);
        for child in children {
            self.remove_descendants(child)?;
            let removed = self.nodes[child.0]
                .take()
                .ok_or(PipelineGraphError::UnknownNode(child))?;
            self.names.remove(&removed.full_name);
            for collection in removed.outputs.values() {
                if self.producers.get(collection) == Some(&child) {
                    self.producers.remove(collection);
                }
                if !kept_outputs.contains(collection) {
                    self.collections[collection.0] = None;
                }
            }
        }
        Ok(())
    }

    /// Swaps the transform carried by `node` and rebuilds everything below it.
    ///
    /// The node keeps its name, its inputs and its output collections, so consumers elsewhere
    /// in the pipeline are untouched. `expand` must produce every declared output. On any
    /// error the pipeline is left exactly as it was.
    pub fn replace_subgraph(
        &mut self,
        node: NodeId,
        transform: AnyTransform,
        expand: impl FnOnce(&mut ExpansionScope<'_>) -> Result<(), PipelineGraphError>,
    ) -> Result<(), PipelineGraphError> {
        let snapshot = self.clone();
        let res = self.replace_subgraph_inner(node, transform, expand);
        match &res {
            Ok(()) => log::debug!(
                "Replaced subgraph at \"{}\"",
                self.node(node).map(|x| x.full_name()).unwrap_or_default()
            ),
            Err(err) => {
                log::debug!("Subgraph replacement at {:?} failed, restoring: {}", node, err);
                *self = snapshot;
            }
        }
        res
    }

    fn replace_subgraph_inner(
        &mut self,
        node: NodeId,
        transform: AnyTransform,
        expand: impl FnOnce(&mut ExpansionScope<'_>) -> Result<(), PipelineGraphError>,
    ) -> Result<(), PipelineGraphError> {
        if self.node(node)?.is_root() {
            return Err(PipelineGraphError::RootNotReplaceable);
        }
        self.remove_descendants(node)?;
        let outputs = self.node(node)?.outputs.clone();
        // A replaced primitive hands its outputs over to the new expansion.
        for collection in outputs.values() {
            if self.producers.get(collection) == Some(&node) {
                self.producers.remove(collection);
            }
        }
        self.node_mut(node)?.transform = Some(transform);

        expand(&mut ExpansionScope::new(&mut *self, node))?;

        if self.node(node)?.children.is_empty() {
            // Expanded to nothing: the node becomes a primitive again.
            for collection in outputs.values() {
                self.producers.insert(*collection, node);
            }
            return Ok(());
        }
        self.set_composite_outputs(node, outputs)
    }

    /// Checks the tree shape of a deserialized pipeline: one root at index 0 without a
    /// transform, matching parent and child links, and every node reachable exactly once.
    fn check_structure(&self) -> Result<(), PipelineGraphError> {
        let malformed = |msg: String| Err(PipelineGraphError::MalformedPipeline(msg));
        match self.nodes.first() {
            Some(Some(root)) if root.is_root() && root.transform.is_none() => {}
            _ => return malformed("node 0 must be a root without a transform".to_string()),
        }
        for (i, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            if node.id.0 != i {
                return malformed(format!("node at index {i} claims id {}", node.id.0));
            }
            if i != 0 {
                if node.transform.is_none() {
                    return malformed(format!("\"{}\" carries no transform", node.full_name));
                }
                let Some(parent) = node.parent else {
                    return malformed(format!("\"{}\" has no parent", node.full_name));
                };
                let listed = self
                    .node(parent)
                    .map(|x| x.children.contains(&node.id))
                    .unwrap_or(false);
                if !listed {
                    return malformed(format!(
                        "\"{}\" is missing from its parent's children",
                        node.full_name
                    ));
                }
            }
            for child in &node.children {
                if self.node(*child).ok().and_then(|x| x.parent) != Some(node.id) {
                    return malformed(format!(
                        "child {:?} of \"{}\" does not point back at it",
                        child, node.full_name
                    ));
                }
            }
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                return malformed(format!("node {:?} is reachable more than once", id));
            }
            stack.extend(self.node(id)?.children.iter().copied());
        }
        if let Some(node) = self
            .nodes()
            .find(|x| !seen.get(x.id.0).copied().unwrap_or(false))
        {
            return malformed(format!("\"{}\" is not reachable from the root", node.full_name));
        }
        Ok(())
    }

    /// Rebuilds the lookup indices that are not serialized.
    fn rebuild_indices(&mut self) -> Result<(), PipelineGraphError> {
        self.check_structure()?;
        self.producers.clear();
        self.names.clear();
        for node in self.nodes.iter().flatten() {
            for collection in node.inputs.values().chain(node.outputs.values()) {
                if self.collections.get(collection.0).and_then(|x| x.as_ref()).is_none() {
                    return Err(PipelineGraphError::UnknownCollection(*collection));
                }
            }
            if node.is_root() {
                continue;
            }
            if self.names.insert(node.full_name.clone(), node.id).is_some() {
                return Err(PipelineGraphError::DuplicateName(node.full_name.clone()));
            }
            if node.is_primitive() {
                for collection in node.outputs.values() {
                    if self.producers.insert(*collection, node.id).is_some() {
                        return Err(PipelineGraphError::DuplicateProducer {
                            collection: *collection,
                            producer: node.full_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, PipelineGraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PipelineGraphError> {
        let mut pipeline: Pipeline = serde_json::from_str(json)?;
        pipeline.rebuild_indices()?;
        Ok(pipeline)
    }
}

/// Write access to the inside of one composite while it is being expanded.
pub struct ExpansionScope<'a> {
    pipeline: &'a mut Pipeline,
    parent: NodeId,
}

impl<'a> ExpansionScope<'a> {
    pub(crate) fn new(pipeline: &'a mut Pipeline, parent: NodeId) -> Self {
        Self { pipeline, parent }
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn pipeline(&self) -> &Pipeline {
        self.pipeline
    }

    pub fn collection(&self, id: CollectionId) -> Result<&Collection, PipelineGraphError> {
        self.pipeline.collection(id)
    }

    pub fn new_collection(
        &mut self,
        name: &str,
        element_type: ElementType,
        boundedness: Boundedness,
        windowing: WindowingStrategy,
    ) -> CollectionId {
        let full_name = match self.pipeline.node(self.parent) {
            Ok(parent) if !parent.is_root() => format!("{}/{}", parent.full_name, name),
            _ => name.to_string(),
        };
        self.pipeline
            .new_collection(&full_name, element_type, boundedness, windowing)
    }

    pub fn apply_primitive(
        &mut self,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
        outputs: BTreeMap<String, CollectionId>,
    ) -> Result<NodeId, PipelineGraphError> {
        self.pipeline
            .add_primitive(self.parent, name, transform, inputs, outputs)
    }

    /// Nested composite whose outputs are allocated up front and filled by `expand`.
    pub fn apply_composite(
        &mut self,
        name: &str,
        transform: AnyTransform,
        inputs: BTreeMap<String, CollectionId>,
        outputs: BTreeMap<String, CollectionId>,
        expand: impl FnOnce(&mut ExpansionScope<'_>) -> Result<(), PipelineGraphError>,
    ) -> Result<NodeId, PipelineGraphError> {
        let id = self
            .pipeline
            .add_composite(self.parent, name, transform, inputs)?;
        expand(&mut ExpansionScope::new(&mut *self.pipeline, id))?;
        self.pipeline.set_composite_outputs(id, outputs)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Composite, Flatten, ParDo, Read};

    fn single(tag: &str, id: CollectionId) -> BTreeMap<String, CollectionId> {
        BTreeMap::from([(tag.to_string(), id)])
    }

    fn bytes(pipeline: &mut Pipeline, name: &str) -> CollectionId {
        pipeline.new_collection(
            name,
            ElementType::Bytes,
            Boundedness::Bounded,
            WindowingStrategy::Global,
        )
    }

    #[test]
    fn inputs_must_already_be_produced() {
        let mut pipeline = Pipeline::new();
        let orphan = bytes(&mut pipeline, "orphan");
        let out = bytes(&mut pipeline, "out");
        let root = pipeline.root();
        let err = pipeline
            .add_primitive(
                root,
                "Parse",
                ParDo::of("Parse").into(),
                single("input", orphan),
                single("output", out),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineGraphError::InputNotProduced { .. }));
    }

    #[test]
    fn names_are_hierarchical_and_unique() {
        let mut pipeline = Pipeline::new();
        let root = pipeline.root();
        let composite = pipeline
            .add_composite(root, "Outer", Composite {}.into(), BTreeMap::new())
            .unwrap();
        let out = bytes(&mut pipeline, "out");
        let inner = pipeline
            .add_primitive(
                composite,
                "Read",
                Read::bounded("numbers").into(),
                BTreeMap::new(),
                single("output", out),
            )
            .unwrap();
        assert_eq!(pipeline.node(inner).unwrap().full_name(), "Outer/Read");
        assert!(pipeline.node_by_name("Outer/Read").is_some());

        let again = bytes(&mut pipeline, "again");
        let err = pipeline
            .add_primitive(
                composite,
                "Read",
                Read::bounded("numbers").into(),
                BTreeMap::new(),
                single("output", again),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineGraphError::DuplicateName(_)));
    }

    #[test]
    fn failed_replacement_leaves_pipeline_untouched() {
        let mut pipeline = Pipeline::new();
        let root = pipeline.root();
        let read_out = bytes(&mut pipeline, "read");
        pipeline
            .add_primitive(
                root,
                "Read",
                Read::bounded("numbers").into(),
                BTreeMap::new(),
                single("output", read_out),
            )
            .unwrap();
        let flat_out = bytes(&mut pipeline, "flat");
        let flatten = pipeline
            .add_primitive(
                root,
                "Flatten",
                Flatten {}.into(),
                single("input", read_out),
                single("output", flat_out),
            )
            .unwrap();

        // The expansion never produces the declared output.
        let err = pipeline
            .replace_subgraph(flatten, Composite {}.into(), |scope| {
                let unrelated = scope.new_collection(
                    "unrelated",
                    ElementType::Bytes,
                    Boundedness::Bounded,
                    WindowingStrategy::Global,
                );
                scope.apply_primitive(
                    "Noop",
                    ParDo::of("Noop").into(),
                    single("input", read_out),
                    single("output", unrelated),
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineGraphError::OutputNotProducedInside { .. }
        ));
        let node = pipeline.node(flatten).unwrap();
        assert!(node.is_primitive());
        assert_eq!(pipeline.producer(flat_out), Some(flatten));
        assert!(pipeline.node_by_name("Flatten/Noop").is_none());
    }

    #[test]
    fn json_round_trip_restores_indices() {
        let mut pipeline = Pipeline::new();
        let root = pipeline.root();
        let out = bytes(&mut pipeline, "read");
        let read = pipeline
            .add_primitive(
                root,
                "Read",
                Read::bounded("numbers").into(),
                BTreeMap::new(),
                single("output", out),
            )
            .unwrap();
        let restored = Pipeline::from_json(&pipeline.to_json().unwrap()).unwrap();
        assert_eq!(restored.producer(out), Some(read));
        assert_eq!(restored.pre_order(), pipeline.pre_order());
    }

    #[test]
    fn loading_rejects_broken_links() {
        let mut pipeline = Pipeline::new();
        let root = pipeline.root();
        let out = bytes(&mut pipeline, "read");
        let read = pipeline
            .add_primitive(
                root,
                "Read",
                Read::bounded("numbers").into(),
                BTreeMap::new(),
                single("output", out),
            )
            .unwrap();

        let mut shuffled = pipeline.clone();
        shuffled.nodes[read.0].as_mut().unwrap().id = NodeId(7);
        let err = Pipeline::from_json(&shuffled.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, PipelineGraphError::MalformedPipeline(_)));

        let mut unlisted = pipeline.clone();
        unlisted.nodes[0].as_mut().unwrap().children.clear();
        let err = Pipeline::from_json(&unlisted.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, PipelineGraphError::MalformedPipeline(_)));
    }
}
