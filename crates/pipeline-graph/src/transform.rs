use crate::collection::{Boundedness, CollectionId, WindowingStrategy};
use serde::{Deserialize, Serialize};

/// Stable tag for every transform the model knows about.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
    strum_macros::VariantNames,
)]
pub enum TransformKind {
    Impulse,
    Read,
    ParDo,
    GroupByKey,
    Flatten,
    AssignWindows,
    CombinePerKey,
    CoGroupByKey,
    Reshuffle,
    WriteFiles,
    Composite,
    Custom,
}

impl TransformKind {
    pub fn urn(&self) -> &'static str {
        match self {
            TransformKind::Impulse => "beam:transform:impulse:v1",
            TransformKind::Read => "beam:transform:read:v1",
            TransformKind::ParDo => "beam:transform:pardo:v1",
            TransformKind::GroupByKey => "beam:transform:group_by_key:v1",
            TransformKind::Flatten => "beam:transform:flatten:v1",
            TransformKind::AssignWindows => "beam:transform:window_into:v1",
            TransformKind::CombinePerKey => "beam:transform:combine_per_key:v1",
            TransformKind::CoGroupByKey => "beam:transform:co_group_by_key:v1",
            TransformKind::Reshuffle => "beam:transform:reshuffle:v1",
            TransformKind::WriteFiles => "beam:transform:write_files:v1",
            TransformKind::Composite => "beam:transform:composite:v1",
            TransformKind::Custom => "beam:transform:custom:v1",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impulse {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub boundedness: Boundedness,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    pub source: SourceSpec,
}

impl Read {
    pub fn bounded(name: &str) -> Self {
        Self {
            source: SourceSpec {
                name: name.to_string(),
                boundedness: Boundedness::Bounded,
            },
        }
    }

    pub fn unbounded(name: &str) -> Self {
        Self {
            source: SourceSpec {
                name: name.to_string(),
                boundedness: Boundedness::Unbounded,
            },
        }
    }
}

pub const MAIN_OUTPUT_TAG: &str = "output";
pub const MAIN_INPUT_TAG: &str = "input";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParDo {
    pub do_fn: String,
    pub main_output_tag: String,
    pub additional_output_tags: Vec<String>,
    pub side_inputs: Vec<CollectionId>,
}

impl ParDo {
    pub fn of(do_fn: &str) -> Self {
        Self {
            do_fn: do_fn.to_string(),
            main_output_tag: MAIN_OUTPUT_TAG.to_string(),
            additional_output_tags: vec![],
            side_inputs: vec![],
        }
    }

    pub fn with_output_tags(mut self, main: &str, additional: &[&str]) -> Self {
        self.main_output_tag = main.to_string();
        self.additional_output_tags = additional.iter().map(|x| x.to_string()).collect();
        self
    }

    pub fn with_side_inputs(mut self, side_inputs: Vec<CollectionId>) -> Self {
        self.side_inputs = side_inputs;
        self
    }

    pub fn output_tags(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.main_output_tag.as_str())
            .chain(self.additional_output_tags.iter().map(|x| x.as_str()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByKey {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flatten {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignWindows {
    pub windowing: WindowingStrategy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinePerKey {
    pub combine_fn: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoGroupByKey {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reshuffle {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSink {
    pub output_prefix: String,
    pub suffix: String,
}

impl FileSink {
    pub fn new(output_prefix: &str, suffix: &str) -> Self {
        Self {
            output_prefix: output_prefix.to_string(),
            suffix: suffix.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFiles {
    pub sink: FileSink,
    /// `None` or `Some(0)` leaves sharding to the runner: one file per bundle.
    pub num_shards: Option<u32>,
    pub windowed_writes: bool,
    pub side_inputs: Vec<CollectionId>,
}

impl WriteFiles {
    pub fn to(sink: FileSink) -> Self {
        Self {
            sink,
            num_shards: None,
            windowed_writes: false,
            side_inputs: vec![],
        }
    }

    pub fn with_side_inputs(mut self, side_inputs: Vec<CollectionId>) -> Self {
        self.side_inputs = side_inputs;
        self
    }

    pub fn with_windowed_writes(mut self) -> Self {
        self.windowed_writes = true;
        self
    }

    pub fn with_num_shards(mut self, num_shards: u32) -> Self {
        self.num_shards = Some(num_shards);
        self
    }

    /// The explicit shard count, if any. Zero shards means the runner decides.
    pub fn fixed_num_shards(&self) -> Option<u32> {
        self.num_shards.filter(|x| *x > 0)
    }

    pub fn has_runner_determined_sharding(&self) -> bool {
        self.fixed_num_shards().is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composite {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Custom {
    pub urn: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyTransform {
    Impulse(Impulse),
    Read(Read),
    ParDo(ParDo),
    GroupByKey(GroupByKey),
    Flatten(Flatten),
    AssignWindows(AssignWindows),
    CombinePerKey(CombinePerKey),
    CoGroupByKey(CoGroupByKey),
    Reshuffle(Reshuffle),
    WriteFiles(WriteFiles),
    Composite(Composite),
    Custom(Custom),
}

impl AnyTransform {
    pub fn urn(&self) -> &str {
        match self {
            AnyTransform::Custom(x) => &x.urn,
            x => x.kind().urn(),
        }
    }

    pub fn side_inputs(&self) -> &[CollectionId] {
        match self {
            AnyTransform::ParDo(x) => &x.side_inputs,
            AnyTransform::WriteFiles(x) => &x.side_inputs,
            _ => &[],
        }
    }
}

/// Typed access to one variant of [`AnyTransform`], keyed by its [`TransformKind`].
pub trait TransformVariant: Sized + 'static {
    const KIND: TransformKind;
    fn from_any(transform: &AnyTransform) -> Option<&Self>;
    fn into_any(self) -> AnyTransform;
}

macro_rules! transform_variants {
    ($($variant:ident),* $(,)?) => {
        impl AnyTransform {
            pub fn kind(&self) -> TransformKind {
                match self {
                    $(AnyTransform::$variant(_) => TransformKind::$variant,)*
                }
            }
        }

        $(
            impl TransformVariant for $variant {
                const KIND: TransformKind = TransformKind::$variant;

                fn from_any(transform: &AnyTransform) -> Option<&Self> {
                    match transform {
                        AnyTransform::$variant(x) => Some(x),
                        _ => None,
                    }
                }

                fn into_any(self) -> AnyTransform {
                    AnyTransform::$variant(self)
                }
            }

            impl From<$variant> for AnyTransform {
                fn from(value: $variant) -> Self {
                    value.into_any()
                }
            }
        )*
    };
}

transform_variants!(
    Impulse,
    Read,
    ParDo,
    GroupByKey,
    Flatten,
    AssignWindows,
    CombinePerKey,
    CoGroupByKey,
    Reshuffle,
    WriteFiles,
    Composite,
    Custom,
);
