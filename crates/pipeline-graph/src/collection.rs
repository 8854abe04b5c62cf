use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub(crate) usize);

impl CollectionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Bytes,
    String,
    Int64,
    Kv(Box<ElementType>, Box<ElementType>),
    Iterable(Box<ElementType>),
    /// Tagged union of grouped values produced by a co-group.
    CoGbkResult,
    /// Temporary file descriptor handed from shard writers to finalization.
    FileResult,
}

impl ElementType {
    pub fn kv(key: ElementType, value: ElementType) -> Self {
        ElementType::Kv(Box::new(key), Box::new(value))
    }

    pub fn iterable(inner: ElementType) -> Self {
        ElementType::Iterable(Box::new(inner))
    }

    pub fn is_kv(&self) -> bool {
        matches!(self, ElementType::Kv(_, _))
    }

    pub fn key_type(&self) -> Option<&ElementType> {
        match self {
            ElementType::Kv(k, _) => Some(k),
            _ => None,
        }
    }

    /// `KV<K, V>` becomes `KV<K, Iterable<V>>`.
    pub fn grouped(&self) -> Option<ElementType> {
        match self {
            ElementType::Kv(k, v) => Some(ElementType::kv(
                k.as_ref().clone(),
                ElementType::iterable(v.as_ref().clone()),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Bytes => write!(f, "bytes"),
            ElementType::String => write!(f, "string"),
            ElementType::Int64 => write!(f, "int64"),
            ElementType::Kv(k, v) => write!(f, "KV<{k}, {v}>"),
            ElementType::Iterable(x) => write!(f, "Iterable<{x}>"),
            ElementType::CoGbkResult => write!(f, "CoGbkResult"),
            ElementType::FileResult => write!(f, "FileResult"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum Boundedness {
    Bounded,
    Unbounded,
}

impl Boundedness {
    /// A collection derived from several inputs is bounded only if all of them are.
    pub fn combine(inputs: impl IntoIterator<Item = Boundedness>) -> Self {
        if inputs.into_iter().any(|x| x == Boundedness::Unbounded) {
            Boundedness::Unbounded
        } else {
            Boundedness::Bounded
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WindowingStrategy {
    #[default]
    Global,
    Fixed {
        size_ms: u64,
    },
    Sliding {
        size_ms: u64,
        period_ms: u64,
    },
    Sessions {
        gap_ms: u64,
    },
}

impl WindowingStrategy {
    pub fn is_merging(&self) -> bool {
        matches!(self, WindowingStrategy::Sessions { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub(crate) id: CollectionId,
    pub(crate) name: String,
    pub(crate) element_type: ElementType,
    pub(crate) boundedness: Boundedness,
    pub(crate) windowing: WindowingStrategy,
}

impl Collection {
    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn boundedness(&self) -> Boundedness {
        self.boundedness
    }

    pub fn windowing(&self) -> &WindowingStrategy {
        &self.windowing
    }
}
