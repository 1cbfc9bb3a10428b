//! Binding schemas: discovery, parsing and include resolution.
//!
//! A binding describes the properties a device of one compatible type accepts:
//!
//! ```yaml
//! description: ESP32 I2C controller
//! include: ["i2c-controller.yaml"]
//! properties:
//!   port:
//!     type: int
//!     required: true
//!   pin-sda:
//!     type: int
//! ```
//!
//! The compatible identifier is the file name without its extension.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::{model::COMPATIBLE_PROPERTY, yaml};

const SCHEMA_EXTENSIONS: &[&str] = &["yaml", "yml"];

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read binding {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse binding {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("binding {}: malformed declaration of property `{property}`", path.display())]
    Malformed {
        path: PathBuf,
        property: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("binding {}: property names must be strings, found `{name:?}`", path.display())]
    InvalidPropertyName { path: PathBuf, name: Value },
    #[error("binding {}: include `{include}` not found in any binding directory", path.display())]
    MissingInclude { path: PathBuf, include: String },
    #[error("binding {} includes itself", path.display())]
    IncludeCycle { path: PathBuf },
    #[error("failed to scan binding directory {}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The declared type of a binding property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyType {
    Boolean,
    Int,
    String,
    Array,
    StringArray,
    Uint8Array,
    Phandle,
    Phandles,
    Value,
    #[default]
    Unknown,
}

impl PropertyType {
    fn from_name(name: &str) -> Self {
        match name {
            "boolean" => PropertyType::Boolean,
            "int" => PropertyType::Int,
            "string" => PropertyType::String,
            "array" => PropertyType::Array,
            "string-array" => PropertyType::StringArray,
            "uint8-array" => PropertyType::Uint8Array,
            "phandle" => PropertyType::Phandle,
            "phandles" => PropertyType::Phandles,
            "value" => PropertyType::Value,
            _ => PropertyType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingProperty {
    pub name: String,
    pub ty: PropertyType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: String,
}

/// The resolved schema of one compatible device type.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// The schema's file name, e.g. `espressif,esp32-i2c.yaml`.
    pub filename: String,
    pub compatible: String,
    pub description: String,
    /// Declared properties, included ones first, never containing `compatible`.
    pub properties: Vec<BindingProperty>,
    /// Every file included directly or transitively.
    pub includes: Vec<String>,
    pub bus: Option<String>,
}

impl Binding {
    pub fn property(&self, name: &str) -> Option<&BindingProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Insert a property, replacing any previous declaration in place.
    fn upsert(&mut self, property: BindingProperty) {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }
}

/// The contents of a schema file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BindingFile {
    description: Option<String>,
    bus: Option<String>,
    include: Vec<String>,
    properties: Option<Mapping>,
}

/// The declaration of one property inside a schema file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PropertyDecl {
    #[serde(rename = "type")]
    ty: Option<String>,
    required: bool,
    default: Option<Value>,
    description: Option<String>,
}

/// Every binding found in a set of directories, keyed by compatible identifier.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    bindings: Vec<Binding>,
    index: HashMap<String, usize>,
}

impl Bindings {
    /// Discover and resolve every schema file beneath `dirs`.
    ///
    /// Includes are searched for in the same directories, first match wins. With
    /// `allow_missing_includes` an include that cannot be found is skipped with a warning.
    pub fn load(dirs: &[PathBuf], allow_missing_includes: bool) -> Result<Self, SchemaError> {
        let mut loader = Loader::new(dirs, allow_missing_includes);

        let mut bindings = Vec::new();
        for file in find_all_bindings(dirs)? {
            bindings.push(loader.load(&file)?);
        }

        let bindings: Bindings = bindings.into_iter().collect();
        debug!("Loaded {} bindings", bindings.len());

        Ok(bindings)
    }

    pub fn find(&self, compatible: &str) -> Option<&Binding> {
        self.index.get(compatible).map(|&i| &self.bindings[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FromIterator<Binding> for Bindings {
    fn from_iter<I: IntoIterator<Item = Binding>>(iter: I) -> Self {
        let mut set = Bindings::default();

        for binding in iter {
            if let Some(&first) = set.index.get(&binding.compatible) {
                warn!(
                    "Binding {} redefines `{}` already defined by {}, ignoring it",
                    binding.filename, binding.compatible, set.bindings[first].filename
                );
                continue;
            }

            set.index.insert(binding.compatible.clone(), set.bindings.len());
            set.bindings.push(binding);
        }

        set
    }
}

/// Parse a single schema file, resolving its includes against `dirs`.
pub fn parse_binding(
    path: &Path,
    dirs: &[PathBuf],
    allow_missing_includes: bool,
) -> Result<Binding, SchemaError> {
    Loader::new(dirs, allow_missing_includes).load(path)
}

/// Resolves schema files and their includes, each file at most once.
struct Loader<'a> {
    dirs: &'a [PathBuf],
    allow_missing_includes: bool,
    cache: HashMap<PathBuf, Binding>,
    /// Files whose includes are being resolved.
    stack: Vec<PathBuf>,
}

impl<'a> Loader<'a> {
    fn new(dirs: &'a [PathBuf], allow_missing_includes: bool) -> Self {
        Self {
            dirs,
            allow_missing_includes,
            cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    fn load(&mut self, path: &Path) -> Result<Binding, SchemaError> {
        let path = fs::canonicalize(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(binding) = self.cache.get(&path) {
            return Ok(binding.clone());
        }
        if self.stack.contains(&path) {
            return Err(SchemaError::IncludeCycle { path });
        }

        self.stack.push(path.clone());
        let binding = self.resolve(&path);
        self.stack.pop();

        let binding = binding?;
        self.cache.insert(path, binding.clone());

        Ok(binding)
    }

    fn resolve(&mut self, path: &Path) -> Result<Binding, SchemaError> {
        debug!("Parsing binding {}", path.display());
        let file = read_binding_file(path)?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut binding = Binding {
            compatible: compatible_of(&filename).to_string(),
            filename,
            description: file.description.unwrap_or_default().trim().to_string(),
            properties: Vec::new(),
            includes: Vec::new(),
            bus: file.bus,
        };

        for include in &file.include {
            let parent = match self.find_include(include) {
                Some(include_path) => self.load(&include_path)?,
                None if self.allow_missing_includes => {
                    warn!(
                        "{}: include `{}` not found, continuing without it",
                        path.display(),
                        include
                    );
                    continue;
                }
                None => {
                    return Err(SchemaError::MissingInclude {
                        path: path.to_path_buf(),
                        include: include.clone(),
                    })
                }
            };

            if binding.description.is_empty() {
                binding.description = parent.description;
            }
            if binding.bus.is_none() {
                binding.bus = parent.bus;
            }
            for property in parent.properties {
                binding.upsert(property);
            }
            for name in std::iter::once(include).chain(&parent.includes) {
                if !binding.includes.contains(name) {
                    binding.includes.push(name.clone());
                }
            }
        }

        for (name, decl) in file.properties.unwrap_or_default() {
            let name = match name {
                Value::String(name) => name,
                other => {
                    return Err(SchemaError::InvalidPropertyName {
                        path: path.to_path_buf(),
                        name: other,
                    })
                }
            };

            let decl: PropertyDecl = match decl {
                Value::Null => PropertyDecl::default(),
                decl => {
                    serde_yaml::from_value(decl).map_err(|source| SchemaError::Malformed {
                        path: path.to_path_buf(),
                        property: name.clone(),
                        source,
                    })?
                }
            };

            binding.upsert(BindingProperty {
                name,
                ty: decl
                    .ty
                    .as_deref()
                    .map_or(PropertyType::Unknown, PropertyType::from_name),
                required: decl.required,
                default: decl.default,
                description: decl.description.unwrap_or_default().trim().to_string(),
            });
        }

        binding.properties.retain(|p| p.name != COMPATIBLE_PROPERTY);

        Ok(binding)
    }

    fn find_include(&self, include: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(include))
            .find(|candidate| candidate.is_file())
    }
}

fn read_binding_file(path: &Path) -> Result<BindingFile, SchemaError> {
    let text = fs::read_to_string(path).map_err(|source| SchemaError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    yaml::from_str(&text).map_err(|source| SchemaError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The compatible identifier of a schema file name.
fn compatible_of(filename: &str) -> &str {
    SCHEMA_EXTENSIONS
        .iter()
        .find_map(|ext| {
            filename
                .strip_suffix(ext)
                .and_then(|stem| stem.strip_suffix('.'))
        })
        .unwrap_or(filename)
}

fn is_schema_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| SCHEMA_EXTENSIONS.contains(&ext))
}

/// Every schema file beneath `dirs`, each directory's files sorted by path.
fn find_all_bindings(dirs: &[PathBuf]) -> Result<Vec<PathBuf>, SchemaError> {
    let mut files = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            warn!("Binding directory {} does not exist, skipping", dir.display());
            continue;
        }

        let mut found = Vec::new();
        find_bindings(dir, &mut found).map_err(|source| SchemaError::Walk {
            path: dir.clone(),
            source,
        })?;
        found.sort();

        debug!("Found {} bindings in {}", found.len(), dir.display());
        files.extend(found);
    }

    Ok(files)
}

fn find_bindings(dir: &Path, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_bindings(&path, found)?;
        } else if is_schema_file(&path) {
            found.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn schema(dir: &Path, name: &str, yaml: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, yaml).unwrap();
        path
    }

    fn names(binding: &Binding) -> Vec<&str> {
        binding.properties.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn compatible_from_filename() {
        for (filename, expected) in [
            ("espressif,esp32-i2c.yaml", "espressif,esp32-i2c"),
            ("root.yml", "root"),
            ("odd.yaml.yaml", "odd.yaml"),
            ("plain", "plain"),
        ] {
            assert_eq!(compatible_of(filename), expected);
        }
    }

    #[test]
    fn property_types() {
        for (name, expected) in [
            ("boolean", PropertyType::Boolean),
            ("int", PropertyType::Int),
            ("string", PropertyType::String),
            ("string-array", PropertyType::StringArray),
            ("uint8-array", PropertyType::Uint8Array),
            ("phandle", PropertyType::Phandle),
            ("phandles", PropertyType::Phandles),
            ("value", PropertyType::Value),
            ("float", PropertyType::Unknown),
        ] {
            assert_eq!(PropertyType::from_name(name), expected);
        }
    }

    #[test]
    fn parse_properties() {
        let dir = TempDir::new().unwrap();
        let path = schema(
            dir.path(),
            "vendor,widget.yaml",
            r#"
description: "  A widget  "
bus: i2c
properties:
  compatible:
    type: string
  port:
    type: int
    required: true
    description: The port
  speed:
    type: int
    default: 400000
  enabled:
"#,
        );

        let binding = parse_binding(&path, &[], false).unwrap();

        assert_eq!(binding.filename, "vendor,widget.yaml");
        assert_eq!(binding.compatible, "vendor,widget");
        assert_eq!(binding.description, "A widget");
        assert_eq!(binding.bus.as_deref(), Some("i2c"));
        assert_eq!(names(&binding), ["port", "speed", "enabled"]);

        let port = binding.property("port").unwrap();
        assert_eq!(port.ty, PropertyType::Int);
        assert!(port.required);
        assert_eq!(port.description, "The port");

        let speed = binding.property("speed").unwrap();
        assert_eq!(speed.default, Some(Value::from(400000)));

        let enabled = binding.property("enabled").unwrap();
        assert_eq!(enabled.ty, PropertyType::Unknown);
        assert!(!enabled.required);
    }

    #[test]
    fn local_declarations_override_included_ones() {
        let dir = TempDir::new().unwrap();
        schema(
            dir.path(),
            "base/controller.yaml",
            r#"
description: A controller
bus: spi
properties:
  clock:
    type: int
  mode:
    type: string
    required: true
"#,
        );
        schema(
            dir.path(),
            "base/peripheral.yaml",
            "include: [controller.yaml]\nproperties:\n  cs:\n    type: int\n",
        );
        let path = schema(
            dir.path(),
            "device.yaml",
            r#"
include: [peripheral.yaml]
properties:
  mode:
    type: int
    default: 3
  extra:
    type: boolean
"#,
        );

        let dirs = [dir.path().join("base")];
        let binding = parse_binding(&path, &dirs, false).unwrap();

        assert_eq!(names(&binding), ["clock", "mode", "cs", "extra"]);
        assert_eq!(binding.includes, ["peripheral.yaml", "controller.yaml"]);
        assert_eq!(binding.description, "A controller");
        assert_eq!(binding.bus.as_deref(), Some("spi"));
        assert_eq!(binding.compatible, "device");

        let mode = binding.property("mode").unwrap();
        assert_eq!(mode.ty, PropertyType::Int);
        assert!(!mode.required);
        assert_eq!(mode.default, Some(Value::from(3)));
    }

    #[test]
    fn missing_include() {
        let dir = TempDir::new().unwrap();
        let path = schema(
            dir.path(),
            "device.yaml",
            "include: [absent.yaml]\nproperties:\n  a:\n    type: int\n",
        );
        let dirs = [dir.path().to_path_buf()];

        assert!(matches!(
            parse_binding(&path, &dirs, false),
            Err(SchemaError::MissingInclude { include, .. }) if include == "absent.yaml"
        ));

        let binding = parse_binding(&path, &dirs, true).unwrap();
        assert_eq!(names(&binding), ["a"]);
        assert!(binding.includes.is_empty());
    }

    #[test]
    fn include_cycle() {
        let dir = TempDir::new().unwrap();
        schema(dir.path(), "a.yaml", "include: [b.yaml]\n");
        let b = schema(dir.path(), "b.yaml", "include: [a.yaml]\n");

        assert!(matches!(
            parse_binding(&b, &[dir.path().to_path_buf()], false),
            Err(SchemaError::IncludeCycle { .. })
        ));
    }

    #[test]
    fn malformed_property() {
        let dir = TempDir::new().unwrap();
        let path = schema(
            dir.path(),
            "device.yaml",
            "properties:\n  port:\n    required: maybe\n",
        );

        assert!(matches!(
            parse_binding(&path, &[], false),
            Err(SchemaError::Malformed { property, .. }) if property == "port"
        ));
    }

    #[test]
    fn discover_bindings() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        schema(first.path(), "nested/deeper/vendor,b.yaml", "description: b\n");
        schema(first.path(), "vendor,a.yml", "description: a\n");
        schema(first.path(), "README.md", "not a binding");
        schema(first.path(), "vendor,empty.yaml", "---\n");
        schema(second.path(), "vendor,a.yaml", "description: shadowed\n");

        let dirs = [
            first.path().to_path_buf(),
            first.path().join("absent"),
            second.path().to_path_buf(),
        ];
        let bindings = Bindings::load(&dirs, false).unwrap();

        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings.find("vendor,a").unwrap().description, "a");
        assert!(bindings.find("vendor,empty").unwrap().properties.is_empty());
        assert_eq!(bindings.find("vendor,b").unwrap().description, "b");
        assert!(bindings.find("vendor,c").is_none());
    }
}
