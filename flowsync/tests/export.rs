use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flowsync::export::write_tree;
use flowsync::loader::YamlTreeLoader;
use flowsync_core::contract::{DefinitionLoader, RenderConfig};
use flowsync_core::definition::DocumentBody;
use flowsync_core::{Address, ResourceDefinition, ResourceDocument};
use serde_json::json;
use std::fs;
use std::path::PathBuf;

fn pipeline_document() -> ResourceDocument {
    serde_json::from_value(json!({
        "version": 7,
        "id": "p",
        "name": "Pipeline",
        "pipeline": {
            "components": [
                {"id": "source", "groupId": "g",
                 "readConnector": {"container": {"s3": {"bucket": "in"}}}},
                {"id": "clean",
                 "transform": {"inputIds": ["source"], "operator": {"sqlQuery": {"sql": "SELECT 1"}}}}
            ],
            "groups": [{"id": "g", "name": "G"}],
            "feeds": [{"id": "out", "inputId": "clean", "sharing": {"all": true}}]
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn exported_pipeline_directory_loads_back_to_the_same_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("p");
    let written = write_tree(&target, &pipeline_document()).unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "__metadata__.yaml",
            "source.yaml",
            "clean.sql",
            "clean.yaml",
            "g.yaml",
            "out.yaml"
        ]
    );

    let pipeline = Address::pipeline("ds", "p");
    let loaded = YamlTreeLoader::new()
        .unwrap()
        .load_tree(
            &pipeline,
            &RenderConfig {
                input: target,
                recursive: true,
                values: json!({}),
            },
        )
        .await
        .unwrap();

    let mut from_files: Vec<Address> = loaded
        .into_iter()
        .map(|d| ResourceDefinition::from_document(&d.document, &d.address).unwrap().address)
        .collect();
    from_files.sort();

    let original = ResourceDefinition::from_document(&pipeline_document(), &pipeline).unwrap();
    let mut expected: Vec<Address> = flowsync_core::definition::flatten(original)
        .unwrap()
        .into_iter()
        .map(|d| d.address)
        .collect();
    expected.sort();

    assert_eq!(from_files, expected);
}

const QUERY: &str = "SELECT id, \"name\"\nFROM source\nWHERE note <> '{{ x }}'\n";
const PARSER: &str = "def parse(line):\n    return line.split(',')\n";
const WRITER: &str = "def write(rows):\n    pass\n";

fn code_pipeline() -> ResourceDocument {
    serde_json::from_value(json!({
        "version": 7,
        "id": "p",
        "pipeline": {
            "components": [
                {"id": "source", "readConnector": {
                    "container": {"immediate": {
                        "object": [{"name": "a.csv", "length": "4"}, {"name": "b.csv", "length": "2"}],
                        "contentSome": BASE64.encode("a,1\nb\n")
                    }},
                    "bytes": {"parser": {"lambdaParser": {"code": {"inline": BASE64.encode(PARSER)}}}}
                }},
                {"id": "clean", "transform": {
                    "inputIds": ["source"],
                    "operator": {"sqlQuery": {"sql": QUERY}}
                }},
                {"id": "sink", "writeConnector": {
                    "inputId": "clean",
                    "container": {"byteFunction": {"container": {"executable": {"code": {"source": {
                        "inline": BASE64.encode(WRITER)
                    }}}}}}
                }}
            ]
        }
    }))
    .unwrap()
}

async fn load(input: PathBuf) -> Vec<ResourceDocument> {
    YamlTreeLoader::new()
        .unwrap()
        .load_tree(
            &Address::pipeline("ds", "p"),
            &RenderConfig {
                input,
                recursive: true,
                values: json!({}),
            },
        )
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.document)
        .collect()
}

#[tokio::test]
async fn embedded_code_moves_to_side_files_and_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("p");
    write_tree(&target, &code_pipeline()).unwrap();

    assert_eq!(fs::read_to_string(target.join("clean.sql")).unwrap(), QUERY);
    assert_eq!(
        fs::read_to_string(target.join("source_lambda_parser.py")).unwrap(),
        PARSER
    );
    assert_eq!(
        fs::read_to_string(target.join("sink_byte_function.py")).unwrap(),
        WRITER
    );
    assert_eq!(fs::read_to_string(target.join("source/a.csv")).unwrap(), "a,1\n");
    assert_eq!(fs::read_to_string(target.join("source/b.csv")).unwrap(), "b\n");

    let clean = fs::read_to_string(target.join("clean.yaml")).unwrap();
    assert!(clean.contains(r#"{{ include "clean.sql" }}"#), "got: {clean}");
    assert!(!clean.contains("SELECT"));
    let source = fs::read_to_string(target.join("source.yaml")).unwrap();
    assert!(source.contains(r#"{{ include "source_lambda_parser.py" | b64 }}"#));
    assert!(source.contains(r#"{{ immediate "source" "a.csv" "b.csv" }}"#));

    let DocumentBody::Pipeline(original) = code_pipeline().body else {
        panic!("expected a pipeline document");
    };
    let loaded = load(target).await;
    for component in &original.components {
        let document = loaded
            .iter()
            .find(|d| d.id.as_deref() == Some(component.id.as_str()))
            .unwrap_or_else(|| panic!("{} was not loaded", component.id));
        assert_eq!(document.body, DocumentBody::Component(component.spec.clone()));
    }
}

#[tokio::test]
async fn single_component_export_writes_its_code_next_to_it() {
    let dir = tempfile::tempdir().unwrap();
    let document: ResourceDocument = serde_json::from_value(json!({
        "version": 7,
        "id": "clean",
        "component": {"transform": {"inputIds": ["source"], "operator": {"sqlQuery": {"sql": QUERY}}}}
    }))
    .unwrap();

    let written = write_tree(dir.path(), &document).unwrap();

    assert_eq!(
        written,
        vec![dir.path().join("clean.sql"), dir.path().join("clean.yaml")]
    );
    let loaded = YamlTreeLoader::new()
        .unwrap()
        .load_tree(
            &Address::resource("ds", "p", "clean"),
            &RenderConfig {
                input: dir.path().join("clean.yaml"),
                recursive: false,
                values: json!({}),
            },
        )
        .await
        .unwrap();
    assert_eq!(loaded[0].document.body, document.body);
}
