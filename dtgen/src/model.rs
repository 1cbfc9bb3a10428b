//! The canonical in-memory model of a devicetree.
//!
//! Devices live in an arena owned by [`DeviceTree`] and refer to each other through
//! [`DeviceId`]s, both for the parent/child structure and for cross-references.

use std::collections::HashMap;

/// The name of the root node.
pub const ROOT_NODE_NAME: &str = "/";

/// The generated identifier of the root node.
pub const ROOT_IDENTIFIER: &str = "root";

/// The only source format version accepted.
pub const SUPPORTED_VERSION: &str = "dts-v1";

/// The name of the property linking a device to its binding.
pub const COMPATIBLE_PROPERTY: &str = "compatible";

/// Index of a device in its [`DeviceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtsVersion(pub String);

/// A preprocessor statement copied verbatim into the generated source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Passthrough {
    Include(String),
    Define(String),
}

impl Passthrough {
    pub fn statement(&self) -> &str {
        match self {
            Passthrough::Include(s) | Passthrough::Define(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// The node name as written, e.g. `i2c@0` or `/`.
    pub name: String,
    /// The label attached to the node, if any.
    pub alias: Option<String>,
    /// The full path from the root, e.g. `/soc/i2c@0`.
    pub path: String,
    pub properties: Vec<DeviceProperty>,
    pub parent: Option<DeviceId>,
    pub children: Vec<DeviceId>,
}

impl Device {
    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&DeviceProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_NODE_NAME
    }

    /// The C identifier generated for this device.
    ///
    /// The root maps to `root`, other nodes use their name with every character that is
    /// not valid in an identifier replaced by `_`.
    pub fn identifier(&self) -> String {
        if self.is_root() {
            return ROOT_IDENTIFIER.to_string();
        }

        let mut ident: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        if ident.starts_with(|c: char| c.is_ascii_digit()) {
            ident.insert(0, '_');
        }

        ident
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperty {
    pub name: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Boolean(bool),
    /// A numeric literal, identifier or expression, emitted verbatim.
    Token(String),
    /// The contents of a string literal, escapes untouched.
    Text(String),
    Array(Vec<PropertyValue>),
    Reference(Reference),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Either a label or a node name.
    Name(String),
    /// A full node path.
    Path(String),
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Name(name) => write!(f, "&{name}"),
            Reference::Path(path) => write!(f, "&{{{path}}}"),
        }
    }
}

/// A devicetree: the version, the passthrough statements and a forest of devices.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    pub version: DtsVersion,
    pub passthrough: Vec<Passthrough>,
    devices: Vec<Device>,
    roots: Vec<DeviceId>,
    labels: HashMap<String, DeviceId>,
    names: HashMap<String, DeviceId>,
    paths: HashMap<String, DeviceId>,
}

impl DeviceTree {
    /// Build a tree from devices stored in pre-order, with `roots` the top-level devices.
    pub(crate) fn new(
        version: DtsVersion,
        passthrough: Vec<Passthrough>,
        devices: Vec<Device>,
        roots: Vec<DeviceId>,
    ) -> Self {
        let mut labels = HashMap::new();
        let mut names = HashMap::new();
        let mut paths = HashMap::new();

        // The first device in pre-order wins when names collide
        for (index, device) in devices.iter().enumerate() {
            let id = DeviceId(index);
            if let Some(alias) = &device.alias {
                labels.entry(alias.clone()).or_insert(id);
            }
            names.entry(device.name.clone()).or_insert(id);
            paths.entry(device.path.clone()).or_insert(id);
        }

        Self {
            version,
            passthrough,
            devices,
            roots,
            labels,
            names,
            paths,
        }
    }

    pub fn device(&self, id: DeviceId) -> &Device {
        &self.devices[id.0]
    }

    pub fn roots(&self) -> &[DeviceId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// The parent of a device, `None` for top-level devices.
    pub fn parent(&self, id: DeviceId) -> Option<&Device> {
        self.device(id).parent.map(|p| self.device(p))
    }

    /// Iterate over every device, parents before their children and siblings in source order.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    /// Find the device a reference points to, anywhere in the forest.
    ///
    /// Names are matched against labels first, then node names.
    pub fn resolve(&self, reference: &Reference) -> Option<DeviceId> {
        match reference {
            Reference::Name(name) => self
                .labels
                .get(name)
                .or_else(|| self.names.get(name))
                .copied(),
            Reference::Path(path) => self.paths.get(path).copied(),
        }
    }
}

/// Pre-order iterator over the devices of a [`DeviceTree`].
pub struct Preorder<'a> {
    tree: &'a DeviceTree,
    stack: Vec<DeviceId>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (DeviceId, &'a Device);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let device = self.tree.device(id);
        self.stack.extend(device.children.iter().rev());
        Some((id, device))
    }
}
