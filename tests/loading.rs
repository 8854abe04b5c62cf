use std::io::Write;

use pipeline_graph::transform::{FileSink, ParDo, Read, WriteFiles};
use pipeline_graph::{ElementType, Pipeline, PipelineBuilder, PipelineGraphError};
use pipeline_translator::{OptionsError, PipelineOptions, translate};

#[test]
fn options_load_from_a_file_with_defaults() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    write!(
        file,
        r#"{{ "parallelism": 6, "streaming": false, "job_name": "nightly" }}"#
    )
    .unwrap();

    let options = PipelineOptions::load(file.path()).unwrap();
    assert_eq!(options.parallelism, 6);
    assert!(!options.streaming);
    assert!(options.native_combine);
    assert_eq!(options.job_name, "nightly");
}

#[test]
fn missing_option_files_are_io_errors() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let err = PipelineOptions::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, OptionsError::IOError(_)));
}

#[test]
fn saved_pipelines_translate_like_the_original() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut b = PipelineBuilder::new();
    let counts = b
        .read(
            "Read",
            Read::unbounded("counts"),
            ElementType::kv(ElementType::String, ElementType::Int64),
        )
        .unwrap();
    let sums = b.combine_per_key("Sum", counts, "Sum.ofLongs").unwrap();
    let lines = b
        .par_do("Format", ParDo::of("Format"), sums, ElementType::String)
        .unwrap();
    b.write_files("Write", lines, WriteFiles::to(FileSink::new("/out/sums", ".txt")))
        .unwrap();
    let mut original = b.build().unwrap();

    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, original.to_json().unwrap()).unwrap();
    let mut loaded = Pipeline::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();

    let options = PipelineOptions::default().with_parallelism(2);
    let expected = translate(&mut original, options.clone()).unwrap();
    let actual = translate(&mut loaded, options).unwrap();
    assert_eq!(actual.translated_nodes(), expected.translated_nodes());
    assert_eq!(actual.operators(), expected.operators());
}

fn nested_custom_pipeline() -> Pipeline {
    let mut b = PipelineBuilder::new();
    let lines = b
        .read("Read", Read::bounded("lines"), ElementType::String)
        .unwrap();
    b.begin_composite("Outer", &[("input", lines)]).unwrap();
    let out = b
        .custom("Mystery", "urn:example:mystery", Some(lines), ElementType::String)
        .unwrap();
    b.end_composite(&[("output", out)]).unwrap();
    b.build().unwrap()
}

fn tamper(pipeline: &Pipeline, full_name: &str, edit: impl Fn(&mut serde_json::Value)) -> String {
    let mut json: serde_json::Value = serde_json::from_str(&pipeline.to_json().unwrap()).unwrap();
    let node = json["nodes"]
        .as_array_mut()
        .unwrap()
        .iter_mut()
        .find(|x| x["full_name"] == full_name)
        .unwrap();
    edit(node);
    json.to_string()
}

#[test]
fn loaded_pipelines_must_keep_their_tree_shape() {
    let pipeline = nested_custom_pipeline();

    let untransformed = tamper(&pipeline, "Outer", |x| x["transform"] = serde_json::Value::Null);
    assert!(matches!(
        Pipeline::from_json(&untransformed),
        Err(PipelineGraphError::MalformedPipeline(_))
    ));

    // The composite lists the root among its own children.
    let cyclic = tamper(&pipeline, "Outer", |x| {
        x["children"].as_array_mut().unwrap().push(serde_json::json!(0))
    });
    assert!(matches!(
        Pipeline::from_json(&cyclic),
        Err(PipelineGraphError::MalformedPipeline(_))
    ));

    let orphaned = tamper(&pipeline, "Outer/Mystery", |x| {
        x["parent"] = serde_json::Value::Null
    });
    assert!(matches!(
        Pipeline::from_json(&orphaned),
        Err(PipelineGraphError::MalformedPipeline(_))
    ));

    assert!(Pipeline::from_json(&pipeline.to_json().unwrap()).is_ok());
}
