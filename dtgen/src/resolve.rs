//! Matching devices to their bindings and turning property values into C initializers.

use std::collections::HashMap;

use serde_yaml::Value;

use crate::{
    bindings::{Binding, BindingProperty, Bindings, PropertyType},
    codegen::DEVICE_TABLE,
    model::*,
};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("device `{device}` has no `compatible` property")]
    MissingCompatible { device: String },
    #[error("device `{device}`: `compatible` must be a string")]
    InvalidCompatible { device: String },
    #[error("device `{device}`: no binding found for compatible `{compatible}`")]
    BindingNotFound { device: String, compatible: String },
    #[error("device `{device}`: property `{property}` is not declared by binding `{compatible}`")]
    InvalidProperty {
        device: String,
        property: String,
        compatible: String,
    },
    #[error("device `{device}` is missing required property `{property}`")]
    MissingRequired { device: String, property: String },
    #[error("device `{device}`: property `{property}` has no value and no default")]
    NoValue { device: String, property: String },
    #[error("device `{device}`: property `{property}` references unknown device `{reference}`")]
    UnresolvedReference {
        device: String,
        property: String,
        reference: String,
    },
    #[error("binding `{compatible}`: cannot render default of property `{property}`")]
    UnsupportedDefault { compatible: String, property: String },
    #[error("`{second}` defines C identifier `{identifier}`, already defined by `{first}`")]
    DuplicateIdentifier {
        identifier: String,
        first: String,
        second: String,
    },
}

/// Resolves devices of one tree against a set of bindings.
pub struct Resolver<'a> {
    tree: &'a DeviceTree,
    bindings: &'a Bindings,
    /// Generated identifiers, indexed by device.
    identifiers: Vec<String>,
}

impl<'a> Resolver<'a> {
    /// Fails if two C identifiers of the generated source would collide.
    pub fn new(tree: &'a DeviceTree, bindings: &'a Bindings) -> Result<Self, ResolveError> {
        let mut identifiers = vec![String::new(); tree.len()];
        // Identifier -> owner, either a device path or the device table.
        let mut seen: HashMap<String, String> = HashMap::new();
        seen.insert(DEVICE_TABLE.to_string(), DEVICE_TABLE.to_string());

        for (id, device) in tree.preorder() {
            let identifier = device.identifier();

            for symbol in [identifier.clone(), config_symbol(&identifier)] {
                if let Some(first) = seen.get(&symbol) {
                    return Err(ResolveError::DuplicateIdentifier {
                        identifier: symbol,
                        first: first.clone(),
                        second: device.path.clone(),
                    });
                }
                seen.insert(symbol, device.path.clone());
            }

            identifiers[id.0] = identifier;
        }

        Ok(Self {
            tree,
            bindings,
            identifiers,
        })
    }

    pub fn tree(&self) -> &'a DeviceTree {
        self.tree
    }

    pub fn identifier(&self, id: DeviceId) -> &str {
        &self.identifiers[id.0]
    }

    /// The value of the device's `compatible` property.
    pub fn compatible(&self, id: DeviceId) -> Result<&'a str, ResolveError> {
        let device = self.tree.device(id);

        match device.property(COMPATIBLE_PROPERTY).map(|p| &p.value) {
            Some(PropertyValue::Text(compatible)) => Ok(compatible),
            Some(_) => Err(ResolveError::InvalidCompatible {
                device: device.path.clone(),
            }),
            None => Err(ResolveError::MissingCompatible {
                device: device.path.clone(),
            }),
        }
    }

    pub fn binding(&self, id: DeviceId) -> Result<&'a Binding, ResolveError> {
        let compatible = self.compatible(id)?;

        self.bindings
            .find(compatible)
            .ok_or_else(|| ResolveError::BindingNotFound {
                device: self.tree.device(id).path.clone(),
                compatible: compatible.to_string(),
            })
    }

    /// The initializer expressions of a device's configuration, in binding order.
    pub fn parameters(&self, id: DeviceId) -> Result<Vec<String>, ResolveError> {
        let device = self.tree.device(id);
        let binding = self.binding(id)?;

        // The schema is closed: every property must be declared
        if let Some(undeclared) = device
            .properties
            .iter()
            .find(|p| p.name != COMPATIBLE_PROPERTY && binding.property(&p.name).is_none())
        {
            return Err(ResolveError::InvalidProperty {
                device: device.path.clone(),
                property: undeclared.name.clone(),
                compatible: binding.compatible.clone(),
            });
        }

        binding
            .properties
            .iter()
            .map(|declared| self.parameter(device, binding, declared))
            .collect()
    }

    fn parameter(
        &self,
        device: &Device,
        binding: &Binding,
        declared: &BindingProperty,
    ) -> Result<String, ResolveError> {
        if let Some(property) = device.property(&declared.name) {
            return self.value_to_string(&property.value).map_err(|reference| {
                ResolveError::UnresolvedReference {
                    device: device.path.clone(),
                    property: property.name.clone(),
                    reference: reference.to_string(),
                }
            });
        }

        match &declared.default {
            Some(default) => render_default(declared.ty, default).ok_or_else(|| {
                ResolveError::UnsupportedDefault {
                    compatible: binding.compatible.clone(),
                    property: declared.name.clone(),
                }
            }),
            None if declared.required => Err(ResolveError::MissingRequired {
                device: device.path.clone(),
                property: declared.name.clone(),
            }),
            None if declared.ty == PropertyType::Boolean => Ok(false.to_string()),
            None => Err(ResolveError::NoValue {
                device: device.path.clone(),
                property: declared.name.clone(),
            }),
        }
    }

    /// Render a device value, returning the first reference that matches no device.
    fn value_to_string<'v>(&self, value: &'v PropertyValue) -> Result<String, &'v Reference> {
        Ok(match value {
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Token(token) => token.clone(),
            PropertyValue::Text(text) => format!("\"{}\"", text),
            PropertyValue::Array(values) => braced(
                values
                    .iter()
                    .map(|v| self.value_to_string(v))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            PropertyValue::Reference(reference) => {
                let target = self.tree.resolve(reference).ok_or(reference)?;
                format!("&{}", self.identifier(target))
            }
        })
    }
}

/// The name of a device's config instance.
pub fn config_symbol(identifier: &str) -> String {
    format!("{}_config", identifier)
}

fn braced(items: Vec<String>) -> String {
    if items.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", items.join(", "))
    }
}

/// Render a binding default as a C initializer.
fn render_default(ty: PropertyType, value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => match ty {
            PropertyType::String | PropertyType::StringArray => Some(c_string(s)),
            _ => Some(s.clone()),
        },
        Value::Sequence(items) => {
            let element = match ty {
                PropertyType::StringArray => PropertyType::String,
                other => other,
            };
            let items = items
                .iter()
                .map(|item| render_default(element, item))
                .collect::<Option<Vec<_>>>()?;
            Some(braced(items))
        }
        Value::Null | Value::Mapping(_) => None,
    }
}

/// Quote and escape text as a C string literal.
fn c_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
