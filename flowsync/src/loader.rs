//! YAML definition tree loader.
//!
//! [`YamlTreeLoader`] turns a file or directory of authored YAML into
//! [`LoadedDocument`]s for the reconciler:
//!
//! - A file is one document, found at the address being applied.
//! - A directory contributes its `__metadata__.yaml`. When recursive, each
//!   child `.yaml` file or child directory is loaded at the parent address
//!   extended with the child's stem.
//! - Nested directories without `__metadata__.yaml` and non-YAML files are
//!   skipped; at the top level either is an error.
//! - `{{ config.some.key }}` placeholders are replaced from the render
//!   values before the YAML is parsed.
//! - `{{ include "file" }}` is replaced by the content of `file`, read
//!   relative to the document's directory, as a quoted string. With
//!   `| b64` the bytes are base64 encoded first.
//! - `{{ immediate "dir" "a.csv" "b.csv" }}` rebuilds an immediate
//!   container from the listed files of `dir`, in order.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::{Captures, Regex};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use flowsync_core::contract::{DefinitionLoader, LoadError, LoadedDocument, RenderConfig};
use flowsync_core::{Address, ResourceDocument};

pub const METADATA_FILE: &str = "__metadata__.yaml";

/// How an included file is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Base64,
}

pub fn include_directive(file: &str, encoding: Encoding) -> String {
    match encoding {
        Encoding::Text => format!("{{{{ include \"{file}\" }}}}"),
        Encoding::Base64 => format!("{{{{ include \"{file}\" | b64 }}}}"),
    }
}

pub fn immediate_directive(dir: &str, files: &[String]) -> String {
    let mut directive = format!("{{{{ immediate \"{dir}\"");
    for file in files {
        directive.push_str(&format!(" \"{file}\""));
    }
    directive.push_str(" }}");
    directive
}

pub struct YamlTreeLoader {
    placeholder: Regex,
    directive: Regex,
    argument: Regex,
}

impl YamlTreeLoader {
    pub fn new() -> Result<Self> {
        Ok(YamlTreeLoader {
            placeholder: Regex::new(r"\{\{\s*config\.([A-Za-z0-9_.\-]+)\s*\}\}")?,
            directive: Regex::new(
                r#"\{\{\s*(include|immediate)((?:\s+"[^"]+")+)\s*(\|\s*b64\s*)?\}\}"#,
            )?,
            argument: Regex::new(r#""([^"]+)""#)?,
        })
    }

    /// Substitutes `{{ config.key }}` placeholders. Strings are inserted as
    /// is, other values as JSON (which YAML reads back unchanged).
    pub fn render(&self, template: &str, values: &Value) -> Result<String> {
        let mut missing = None;
        let rendered = self.placeholder.replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match lookup(values, key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });
        if let Some(key) = missing {
            error!(key = %key, "Undefined template value");
            return Err(anyhow::anyhow!("undefined template value config.{key}"));
        }
        Ok(rendered.into_owned())
    }

    /// Replaces include and immediate directives with the referenced file
    /// content below `base`. Runs after `render`, so included text is never
    /// treated as a template.
    pub fn expand_includes(&self, text: &str, base: &Path) -> Result<String> {
        let mut failure = None;
        let expanded = self.directive.replace_all(text, |caps: &Captures| {
            let args: Vec<&str> = self
                .argument
                .captures_iter(&caps[2])
                .filter_map(|a| a.get(1).map(|m| m.as_str()))
                .collect();
            let encoding = if caps.get(3).is_some() {
                Encoding::Base64
            } else {
                Encoding::Text
            };
            let embedded = match &caps[1] {
                "include" => include_file(base, &args, encoding),
                _ => immediate_container(base, &args),
            };
            match embedded.and_then(|value| Ok(serde_json::to_string(&value)?)) {
                Ok(literal) => literal,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });
        if let Some(e) = failure {
            error!(error = ?e, base = ?base, "Unable to expand include");
            return Err(e);
        }
        Ok(expanded.into_owned())
    }

    fn load_file(&self, path: &Path, at: &Address, values: &Value) -> Result<LoadedDocument> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Unable to read resource definition {path:?}"))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let rendered = self
            .render(&raw, values)
            .and_then(|text| self.expand_includes(&text, base))
            .with_context(|| format!("Unable to render resource definition {path:?}"))?;
        let document: ResourceDocument = serde_yaml::from_str(&rendered)
            .with_context(|| format!("Unable to load resource definition from {path:?}"))?;
        debug!(path = ?path, address = %at, "Loaded resource definition");
        Ok(LoadedDocument {
            address: at.clone(),
            document,
        })
    }

    fn load_recursive(
        &self,
        path: &Path,
        at: &Address,
        render: &RenderConfig,
        top_level: bool,
        out: &mut Vec<LoadedDocument>,
    ) -> Result<()> {
        let file = if path.is_dir() {
            let metadata = path.join(METADATA_FILE);
            if !metadata.exists() {
                if top_level {
                    return Err(anyhow::anyhow!("Path {metadata:?} does not exist"));
                }
                debug!(path = ?path, "Skipping directory without metadata");
                return Ok(());
            }
            metadata
        } else {
            path.to_path_buf()
        };
        if !is_yaml(&file) {
            if top_level {
                return Err(anyhow::anyhow!(
                    "Resource definitions must be yaml files (found {file:?})"
                ));
            }
            return Ok(());
        }
        out.push(self.load_file(&file, at, &render.values)?);

        if !(render.recursive && path.is_dir()) {
            return Ok(());
        }
        let mut children: Vec<_> = fs::read_dir(path)
            .with_context(|| format!("Unable to list directory {path:?}"))?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|child| child.file_name().and_then(|n| n.to_str()) != Some(METADATA_FILE))
            .collect();
        children.sort();
        for child in children {
            if !child.is_dir() && !is_yaml(&child) {
                continue;
            }
            let Some(stem) = child.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let child_at = at.extend(stem)?;
            self.load_recursive(&child, &child_at, render, false, out)?;
        }
        Ok(())
    }
}

fn include_file(base: &Path, args: &[&str], encoding: Encoding) -> Result<Value> {
    let [file] = args else {
        return Err(anyhow::anyhow!("include takes one file, got {}", args.len()));
    };
    let path = base.join(file);
    let bytes = fs::read(&path).with_context(|| format!("Unable to include {path:?}"))?;
    debug!(path = ?path, bytes = bytes.len(), "Included file");
    Ok(match encoding {
        Encoding::Text => Value::String(
            String::from_utf8(bytes).with_context(|| format!("{path:?} is not valid UTF-8"))?,
        ),
        Encoding::Base64 => Value::String(BASE64.encode(bytes)),
    })
}

/// Concatenates the files and records each name and length.
fn immediate_container(base: &Path, args: &[&str]) -> Result<Value> {
    let Some((dir, files)) = args.split_first() else {
        return Err(anyhow::anyhow!("immediate needs a directory"));
    };
    let dir = base.join(dir);
    let mut content = Vec::new();
    let mut objects = Vec::new();
    for file in files {
        let path = dir.join(file);
        let bytes = fs::read(&path).with_context(|| format!("Unable to include {path:?}"))?;
        objects.push(json!({"name": file, "length": bytes.len().to_string()}));
        content.extend(bytes);
    }
    Ok(json!({"object": objects, "contentSome": BASE64.encode(content)}))
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Walks a dotted key through nested objects.
fn lookup<'v>(values: &'v Value, key: &str) -> Option<&'v Value> {
    key.split('.')
        .try_fold(values, |current, part| current.as_object()?.get(part))
}

#[async_trait]
impl DefinitionLoader for YamlTreeLoader {
    async fn load_tree(
        &self,
        root: &Address,
        render: &RenderConfig,
    ) -> std::result::Result<Vec<LoadedDocument>, LoadError> {
        info!(input = ?render.input, address = %root, recursive = render.recursive, "Loading definitions");
        let mut out = Vec::new();
        match self.load_recursive(&render.input, root, render, true, &mut out) {
            Ok(()) => {
                info!(count = out.len(), "Loaded definitions");
                Ok(out)
            }
            Err(e) => {
                error!(error = ?e, input = ?render.input, "Failed to load definitions");
                Err(format!("{e:#}").into())
            }
        }
    }
}
