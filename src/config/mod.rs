//! Build description loading.
//!
//! The orchestrator core never consumes TOML types directly. A build
//! description is loaded into a [`Section`] tree exposing only generic
//! accessors (title, typed scalar lookups, named sub-sections), so the
//! concrete file syntax stays at this boundary.
//!
//! # Layout convention
//!
//! Titled collections are tables of tables; the entry key becomes the
//! section title:
//!
//! ```toml
//! [config]
//! rootpath = "root"
//!
//! [flash."nand-64M"]
//! pebsize = "16k"
//!
//! [image."flash.img"]
//! flashtype = "nand-64M"
//!
//! [image."flash.img".flash]
//!
//! [image."flash.img".partition.kernel]
//! image = "kernel.img"
//! size = "4M"
//! ```
//!
//! A top-level `include = ["more.toml"]` entry merges further files into the
//! description before the tree is built.

pub mod size;

use anyhow::{bail, Context, Result};
use std::path::Path;

pub use size::parse_size;

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// One node of the parsed configuration tree.
///
/// Scalar entries and sub-sections keep file declaration order; catalog and
/// partition ordering downstream depends on it.
#[derive(Debug, Clone)]
pub struct Section {
    title: String,
    values: Vec<(String, Value)>,
    children: Vec<(String, Section)>,
}

impl Section {
    /// An empty section with the given title.
    pub fn empty(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    /// The section title (the config entry key for titled collections,
    /// empty for plain sub-sections).
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.iter().find_map(|(k, v)| match v {
            Value::Str(s) if k == key => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.iter().find_map(|(k, v)| match v {
            Value::Int(i) if k == key => Some(*i),
            _ => None,
        })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.iter().find_map(|(k, v)| match v {
            Value::Bool(b) if k == key => Some(*b),
            _ => None,
        })
    }

    /// Byte-count accessor: accepts a size-with-suffix string or a bare
    /// integer. Returns `Ok(None)` when the key is absent.
    pub fn get_size(&self, key: &str) -> Result<Option<u64>> {
        match self.values.iter().find(|(k, _)| k == key) {
            None => Ok(None),
            Some((_, Value::Str(s))) => {
                let parsed = parse_size(s)
                    .with_context(|| format!("section '{}': field '{}'", self.title, key))?;
                Ok(Some(parsed))
            }
            Some((_, Value::Int(i))) if *i >= 0 => Ok(Some(*i as u64)),
            Some((_, value)) => bail!(
                "section '{}': field '{}' is not a valid size ({:?})",
                self.title,
                key,
                value
            ),
        }
    }

    /// All sub-sections of the given kind, in declaration order.
    pub fn sections<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Section> {
        self.children
            .iter()
            .filter(move |(k, _)| k == kind)
            .map(|(_, s)| s)
    }

    pub fn section_count(&self, kind: &str) -> usize {
        self.sections(kind).count()
    }

    pub fn first_section(&self, kind: &str) -> Option<&Section> {
        self.sections(kind).next()
    }

    #[cfg(test)]
    pub(crate) fn push_child(&mut self, kind: impl Into<String>, child: Section) {
        self.children.push((kind.into(), child));
    }

    #[cfg(test)]
    pub(crate) fn push_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.push((key.into(), Value::Str(value.into())));
    }
}

/// Load a build description file into a [`Section`] tree.
///
/// Top-level `include` entries are resolved relative to the including file
/// and merged in order after the file's own entries.
pub fn load_config(path: &Path) -> Result<Section> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading build description '{}'", path.display()))?;
    let table: toml::Table = text
        .parse()
        .with_context(|| format!("parsing build description '{}'", path.display()))?;

    let mut root = Section::empty("");
    convert_table(&table, &mut root, true)
        .with_context(|| format!("in build description '{}'", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for include in includes(&table)? {
        let include_path = base.join(&include);
        let included = load_config(&include_path)
            .with_context(|| format!("included from '{}'", path.display()))?;
        root.values.extend(included.values);
        root.children.extend(included.children);
    }

    Ok(root)
}

fn includes(table: &toml::Table) -> Result<Vec<String>> {
    let Some(value) = table.get("include") else {
        return Ok(Vec::new());
    };
    let Some(entries) = value.as_array() else {
        bail!("'include' must be an array of file paths");
    };
    entries
        .iter()
        .map(|entry| match entry.as_str() {
            Some(s) => Ok(s.to_string()),
            None => bail!("'include' entries must be strings"),
        })
        .collect()
}

fn convert_table(table: &toml::Table, section: &mut Section, top_level: bool) -> Result<()> {
    for (key, value) in table {
        if top_level && key == "include" {
            continue;
        }
        match value {
            toml::Value::String(s) => section
                .values
                .push((key.clone(), Value::Str(s.clone()))),
            toml::Value::Integer(i) => section.values.push((key.clone(), Value::Int(*i))),
            toml::Value::Boolean(b) => section.values.push((key.clone(), Value::Bool(*b))),
            toml::Value::Table(inner) => {
                if !inner.is_empty() && inner.values().all(|v| v.is_table()) {
                    // A table of tables is a titled collection.
                    for (title, entry) in inner {
                        let toml::Value::Table(entry_table) = entry else {
                            continue;
                        };
                        let mut child = Section::empty(title.clone());
                        convert_table(entry_table, &mut child, false)?;
                        section.children.push((key.clone(), child));
                    }
                } else {
                    let mut child = Section::empty("");
                    convert_table(inner, &mut child, false)?;
                    section.children.push((key.clone(), child));
                }
            }
            toml::Value::Array(entries) => {
                for entry in entries {
                    let Some(inner) = entry.as_table() else {
                        bail!("unsupported array value for '{}'", key);
                    };
                    let mut child = Section::empty("");
                    convert_table(inner, &mut child, false)?;
                    section.children.push((key.clone(), child));
                }
            }
            other => bail!("unsupported value type for '{}': {}", key, other.type_str()),
        }
    }
    Ok(())
}
