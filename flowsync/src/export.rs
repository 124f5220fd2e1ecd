//! Writes an exported document as a directory tree the loader reads back:
//! organizations and pipelines become directories holding
//! `__metadata__.yaml`, everything else becomes `<id>.yaml`.
//!
//! Code embedded in a component moves into files next to its YAML, which
//! refers back to them with include directives:
//!
//! | field                                      | file                      |
//! |--------------------------------------------|---------------------------|
//! | SQL query                                  | `<id>.sql`                |
//! | PySpark function                           | `<id>_pyspark.py`         |
//! | byte function (base64 in the API)          | `<id>_byte_function.py`   |
//! | lambda parser (base64 in the API)          | `<id>_lambda_parser.py`   |
//! | immediate container                        | `<id>/<name>` per object  |

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use flowsync_core::definition::{
    ComponentDetails, ComponentSpec, DocumentBody, Named, OrganizationSpec, PipelineSpec,
};
use flowsync_core::{ResourceDocument, SUPPORTED_VERSION};

use crate::loader::{immediate_directive, include_directive, Encoding, METADATA_FILE};

/// A code field in a component's configuration.
struct CodeField {
    key: &'static str,
    pointer: &'static str,
    suffix: &'static str,
    encoding: Encoding,
}

const SQL_QUERY: CodeField = CodeField {
    key: "operator",
    pointer: "/sqlQuery/sql",
    suffix: ".sql",
    encoding: Encoding::Text,
};
const PYSPARK: CodeField = CodeField {
    key: "operator",
    pointer: "/sparkFunction/executable/code/source/inline",
    suffix: "_pyspark.py",
    encoding: Encoding::Text,
};
const BYTE_FUNCTION: CodeField = CodeField {
    key: "container",
    pointer: "/byteFunction/container/executable/code/source/inline",
    suffix: "_byte_function.py",
    encoding: Encoding::Base64,
};
const LAMBDA_PARSER: CodeField = CodeField {
    key: "bytes",
    pointer: "/parser/lambdaParser/code/inline",
    suffix: "_lambda_parser.py",
    encoding: Encoding::Base64,
};

const READ_CONNECTOR_CODE: &[CodeField] = &[BYTE_FUNCTION, LAMBDA_PARSER];
const TRANSFORM_CODE: &[CodeField] = &[SQL_QUERY, PYSPARK];
const WRITE_CONNECTOR_CODE: &[CodeField] = &[BYTE_FUNCTION];

fn code_fields(details: &mut ComponentDetails) -> (&mut Map<String, Value>, &'static [CodeField]) {
    match details {
        ComponentDetails::ReadConnector(spec) => (&mut spec.config, READ_CONNECTOR_CODE),
        ComponentDetails::Transform(spec) => (&mut spec.config, TRANSFORM_CODE),
        ComponentDetails::WriteConnector(spec) => (&mut spec.config, WRITE_CONNECTOR_CODE),
    }
}

/// Directives standing in for placeholder scalars until the document is
/// serialized; the directives themselves are not valid YAML.
struct Deferred {
    replacements: Vec<(String, String)>,
}

impl Deferred {
    fn token(&mut self, directive: String) -> Value {
        let token = format!("flowsync_side_file_{}", self.replacements.len());
        self.replacements.push((token.clone(), directive));
        Value::String(token)
    }

    fn apply(&self, mut yaml: String) -> String {
        for (token, directive) in &self.replacements {
            yaml = yaml.replacen(token.as_str(), directive, 1);
        }
        yaml
    }
}

fn standalone<T>(named: &Named<T>, body: DocumentBody) -> ResourceDocument {
    ResourceDocument {
        version: SUPPORTED_VERSION,
        id: Some(named.id.clone()),
        name: named.name.clone(),
        description: named.description.clone(),
        body,
    }
}

fn write_yaml<T: Serialize>(path: &Path, value: &T, written: &mut Vec<PathBuf>) -> Result<()> {
    let yaml = serde_yaml::to_string(value)?;
    fs::write(path, yaml).with_context(|| format!("Failed to write {path:?}"))?;
    written.push(path.to_path_buf());
    Ok(())
}

/// Writes `<id>.yaml` for a component, moving embedded code to side files.
fn write_component(
    dir: &Path,
    component: &Named<ComponentSpec>,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut spec = component.spec.clone();
    let mut deferred = Deferred {
        replacements: Vec::new(),
    };
    let (config, fields) = code_fields(&mut spec.details);

    for field in fields {
        let Some(slot) = config
            .get_mut(field.key)
            .and_then(|v| v.pointer_mut(field.pointer))
        else {
            continue;
        };
        let Some(code) = slot.as_str() else {
            continue;
        };
        let contents = match field.encoding {
            Encoding::Text => code.as_bytes().to_vec(),
            Encoding::Base64 => match BASE64.decode(code) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(component = %component.id, error = %e, "Leaving undecodable code inline");
                    continue;
                }
            },
        };
        let file = format!("{}{}", component.id, field.suffix);
        write_bytes(&dir.join(&file), &contents, written)?;
        *slot = deferred.token(include_directive(&file, field.encoding));
    }

    if let Some(slot) = config
        .get_mut("container")
        .and_then(|v| v.get_mut("immediate"))
    {
        if let Some(files) = write_immediate(&dir.join(&component.id), slot, written)? {
            *slot = deferred.token(immediate_directive(&component.id, &files));
        }
    }

    let doc = standalone(component, DocumentBody::Component(spec));
    let path = dir.join(format!("{}.yaml", component.id));
    let yaml = deferred.apply(serde_yaml::to_string(&doc)?);
    fs::write(&path, yaml).with_context(|| format!("Failed to write {path:?}"))?;
    written.push(path);
    Ok(())
}

/// Splits an immediate container's content into its named objects under
/// `dir`. Returns the file names in order, or `None` when the container is
/// not in the expected shape.
fn write_immediate(
    dir: &Path,
    container: &Value,
    written: &mut Vec<PathBuf>,
) -> Result<Option<Vec<String>>> {
    let (Some(objects), Some(encoded)) = (
        container.get("object").and_then(Value::as_array),
        container.get("contentSome").and_then(Value::as_str),
    ) else {
        return Ok(None);
    };
    let Ok(content) = BASE64.decode(encoded) else {
        warn!(dir = ?dir, "Leaving undecodable immediate container inline");
        return Ok(None);
    };

    let mut parts = Vec::new();
    let mut offset = 0usize;
    for object in objects {
        let name = object.get("name").and_then(Value::as_str);
        let length = match object.get("length") {
            Some(Value::String(s)) => s.parse::<usize>().ok(),
            Some(Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
            _ => None,
        };
        let (Some(name), Some(length)) = (name, length) else {
            return Ok(None);
        };
        let Some(bytes) = offset
            .checked_add(length)
            .and_then(|end| content.get(offset..end))
        else {
            return Ok(None);
        };
        offset += length;
        parts.push((name.to_string(), bytes));
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {dir:?}"))?;
    let mut files = Vec::with_capacity(parts.len());
    for (name, bytes) in parts {
        write_bytes(&dir.join(&name), bytes, written)?;
        files.push(name);
    }
    debug!(dir = ?dir, files = files.len(), "Wrote immediate container");
    Ok(Some(files))
}

fn write_bytes(path: &Path, contents: &[u8], written: &mut Vec<PathBuf>) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("Failed to write {path:?}"))?;
    written.push(path.to_path_buf());
    Ok(())
}

fn write_pipeline(
    dir: &Path,
    header: ResourceDocument,
    spec: &PipelineSpec,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {dir:?}"))?;
    write_yaml(&dir.join(METADATA_FILE), &header, written)?;
    for component in &spec.components {
        write_component(dir, component, written)?;
    }
    for group in &spec.groups {
        let doc = standalone(group, DocumentBody::Group(group.spec.clone()));
        write_yaml(&dir.join(format!("{}.yaml", group.id)), &doc, written)?;
    }
    for feed in &spec.feeds {
        let doc = standalone(feed, DocumentBody::Feed(feed.spec.clone()));
        write_yaml(&dir.join(format!("{}.yaml", feed.id)), &doc, written)?;
    }
    Ok(())
}

/// Returns the files written. For an organization or pipeline `target` is
/// the resource's directory; other kinds are written into `target`.
pub fn write_tree(target: &Path, document: &ResourceDocument) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let header = |body| ResourceDocument {
        body,
        ..document.clone()
    };
    match &document.body {
        DocumentBody::Organization(org) => {
            fs::create_dir_all(target).with_context(|| format!("Failed to create {target:?}"))?;
            let meta = header(DocumentBody::Organization(OrganizationSpec::default()));
            write_yaml(&target.join(METADATA_FILE), &meta, &mut written)?;
            for pipeline in &org.pipelines {
                let pipeline_header =
                    standalone(pipeline, DocumentBody::Pipeline(PipelineSpec::default()));
                write_pipeline(
                    &target.join(&pipeline.id),
                    pipeline_header,
                    &pipeline.spec,
                    &mut written,
                )?;
            }
        }
        DocumentBody::Pipeline(spec) => {
            let meta = header(DocumentBody::Pipeline(PipelineSpec::default()));
            write_pipeline(target, meta, spec, &mut written)?;
        }
        body => {
            let id = document
                .id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("exported document has no id"))?;
            fs::create_dir_all(target).with_context(|| format!("Failed to create {target:?}"))?;
            match body {
                DocumentBody::Component(spec) => {
                    let component = Named {
                        id,
                        name: document.name.clone(),
                        description: document.description.clone(),
                        spec: spec.clone(),
                    };
                    write_component(target, &component, &mut written)?;
                }
                _ => write_yaml(&target.join(format!("{id}.yaml")), document, &mut written)?,
            }
        }
    }
    info!(target = ?target, files = written.len(), "Exported definitions");
    Ok(written)
}
