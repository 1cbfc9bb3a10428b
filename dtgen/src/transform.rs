//! Lowering of the parse tree into the canonical [`DeviceTree`] model.

use dts_parser as ast;
use log::debug;

use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported devicetree version `{0}`, expected `dts-v1`")]
    UnsupportedVersion(String),
    #[error("device `{device}` declares property `{property}` more than once")]
    DuplicateProperty { device: String, property: String },
    #[error("device `{device}`: cannot classify value `{value}` of property `{property}`")]
    Unclassified {
        device: String,
        property: String,
        value: String,
    },
}

/// Lower a parsed source file into a [`DeviceTree`].
///
/// Devices are stored in pre-order. Properties and children keep their source order.
pub fn transform(dts: &ast::Dts) -> Result<DeviceTree, TransformError> {
    if dts.version.0 != SUPPORTED_VERSION {
        return Err(TransformError::UnsupportedVersion(dts.version.0.to_string()));
    }

    let passthrough = dts
        .directives()
        .map(|d| match d {
            ast::Directive::Include(s) => Passthrough::Include(s.to_string()),
            ast::Directive::Define(s) => Passthrough::Define(s.to_string()),
        })
        .collect();

    let mut lowering = Lowering::default();
    let roots = dts
        .nodes()
        .map(|node| lowering.node(node, None))
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Lowered {} devices", lowering.devices.len());

    Ok(DeviceTree::new(
        DtsVersion(dts.version.0.to_string()),
        passthrough,
        lowering.devices,
        roots,
    ))
}

#[derive(Default)]
struct Lowering {
    devices: Vec<Device>,
}

impl Lowering {
    fn node(
        &mut self,
        node: &ast::Node,
        parent: Option<DeviceId>,
    ) -> Result<DeviceId, TransformError> {
        let path = match parent {
            None if node.name == ROOT_NODE_NAME => ROOT_NODE_NAME.to_string(),
            None => format!("/{}", node.name),
            Some(p) => {
                let parent_path = &self.devices[p.0].path;
                if parent_path == ROOT_NODE_NAME {
                    format!("/{}", node.name)
                } else {
                    format!("{}/{}", parent_path, node.name)
                }
            }
        };

        let mut properties: Vec<DeviceProperty> = Vec::with_capacity(node.props.len());
        for prop in &node.props {
            if properties.iter().any(|p| p.name == prop.name) {
                return Err(TransformError::DuplicateProperty {
                    device: node.name.to_string(),
                    property: prop.name.to_string(),
                });
            }

            let value = match &prop.value {
                None => PropertyValue::Boolean(true),
                Some(value) => {
                    lower_value(value).map_err(|value| TransformError::Unclassified {
                        device: node.name.to_string(),
                        property: prop.name.to_string(),
                        value,
                    })?
                }
            };

            properties.push(DeviceProperty {
                name: prop.name.to_string(),
                value,
            });
        }

        // Reserve the slot first so the device precedes its children
        let id = DeviceId(self.devices.len());
        self.devices.push(Device {
            name: node.name.to_string(),
            alias: node.label.map(str::to_string),
            path,
            properties,
            parent,
            children: Vec::with_capacity(node.children.len()),
        });

        for child in &node.children {
            let child_id = self.node(child, Some(id))?;
            self.devices[id.0].children.push(child_id);
        }

        Ok(id)
    }
}

/// Lower a single value, returning the offending literal if it cannot be classified.
fn lower_value(value: &ast::PropertyValue) -> Result<PropertyValue, String> {
    Ok(match value {
        ast::PropertyValue::Literal(lit) => {
            classify_literal(lit).ok_or_else(|| lit.to_string())?
        }
        ast::PropertyValue::Expr(expr) => PropertyValue::Token(expr.to_string()),
        ast::PropertyValue::Str(s) => PropertyValue::Text(s.to_string()),
        ast::PropertyValue::Ref(ast::Reference::Name(name)) => {
            PropertyValue::Reference(Reference::Name(name.to_string()))
        }
        ast::PropertyValue::Ref(ast::Reference::Path(path)) => {
            PropertyValue::Reference(Reference::Path(path.to_string()))
        }
        ast::PropertyValue::Array(values) => PropertyValue::Array(
            values.iter().map(lower_value).collect::<Result<_, _>>()?,
        ),
    })
}

fn classify_literal(lit: &str) -> Option<PropertyValue> {
    match lit {
        "true" => Some(PropertyValue::Boolean(true)),
        "false" => Some(PropertyValue::Boolean(false)),
        _ if is_number(lit) || is_identifier(lit) => Some(PropertyValue::Token(lit.to_string())),
        _ => None,
    }
}

/// Decimal, octal, hexadecimal or floating point literal, with an optional sign and
/// C integer/float suffix.
fn is_number(lit: &str) -> bool {
    const INT_SUFFIX: &[char] = &['u', 'U', 'l', 'L'];
    const FLOAT_SUFFIX: &[char] = &['f', 'F'];

    let unsigned = lit.strip_prefix(&['-', '+'][..]).unwrap_or(lit);
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        let hex = hex.trim_end_matches(INT_SUFFIX);
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }

    match unsigned.split_once('.') {
        None => {
            let int = unsigned.trim_end_matches(INT_SUFFIX);
            !int.is_empty() && all_digits(int)
        }
        Some((int, frac)) => {
            let frac = frac.strip_suffix(FLOAT_SUFFIX).unwrap_or(frac);
            (!int.is_empty() || !frac.is_empty()) && all_digits(int) && all_digits(frac)
        }
    }
}

fn is_identifier(lit: &str) -> bool {
    let mut chars = lit.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(source: &str) -> Result<DeviceTree, TransformError> {
        transform(&dts_parser::from_str(source).unwrap())
    }

    #[test]
    fn classify_literals() {
        use PropertyValue::*;

        for (input, expected) in [
            ("true", Some(Boolean(true))),
            ("false", Some(Boolean(false))),
            ("0", Some(Token("0".into()))),
            ("400000", Some(Token("400000".into()))),
            ("-1", Some(Token("-1".into()))),
            ("0x1F", Some(Token("0x1F".into()))),
            ("10u", Some(Token("10u".into()))),
            ("1.5", Some(Token("1.5".into()))),
            ("2.0f", Some(Token("2.0f".into()))),
            ("I2C_NUM_0", Some(Token("I2C_NUM_0".into()))),
            ("_private", Some(Token("_private".into()))),
            ("0x", None),
            ("1-2", None),
            ("a.b", None),
            ("12abc", None),
            ("-", None),
        ] {
            assert_eq!(classify_literal(input), expected, "{}", input);
        }
    }

    #[test]
    fn lower_tree() {
        let tree = lower(
            r#"
            /dts-v1/;
            #include <tactility/bindings/root.h>
            / {
                compatible = "root";
                gpio0: gpio {
                    compatible = "espressif,esp32-gpio";
                    swap-xy;
                    pins = <1 &gpio0 "x" (A | B)>;
                };
                i2c@0 {
                    sensor {
                        compatible = "bosch,bme280";
                    };
                };
            };
            "#,
        )
        .unwrap();

        assert_eq!(
            tree.passthrough,
            [Passthrough::Include(
                "#include <tactility/bindings/root.h>".into()
            )]
        );

        let devices = tree.preorder().map(|(_, d)| d).collect::<Vec<_>>();
        assert_eq!(
            devices.iter().map(|d| d.path.as_str()).collect::<Vec<_>>(),
            ["/", "/gpio", "/i2c@0", "/i2c@0/sensor"]
        );

        let gpio = devices[1];
        assert_eq!(gpio.alias.as_deref(), Some("gpio0"));
        assert_eq!(gpio.parent, Some(tree.roots()[0]));
        assert_eq!(
            gpio.property("swap-xy").map(|p| &p.value),
            Some(&PropertyValue::Boolean(true))
        );
        assert_eq!(
            gpio.property("pins").map(|p| &p.value),
            Some(&PropertyValue::Array(vec![
                PropertyValue::Token("1".into()),
                PropertyValue::Reference(Reference::Name("gpio0".into())),
                PropertyValue::Text("x".into()),
                PropertyValue::Token("(A | B)".into()),
            ]))
        );

        assert_eq!(tree.device(tree.roots()[0]).children.len(), 2);
        assert_eq!(devices[3].parent.map(|p| tree.device(p).name.as_str()), Some("i2c@0"));
    }

    #[test]
    fn reject_unsupported_version() {
        assert!(matches!(
            lower("/dts-v2/; / { };"),
            Err(TransformError::UnsupportedVersion(v)) if v == "dts-v2"
        ));
    }

    #[test]
    fn reject_duplicate_property() {
        assert!(matches!(
            lower("/dts-v1/; / { a = 1; a = 2; };"),
            Err(TransformError::DuplicateProperty { device, property }) if device == "/" && property == "a"
        ));
    }

    #[test]
    fn reject_unclassified_literal() {
        assert!(matches!(
            lower("/dts-v1/; / { led { pin = <1 2-3>; }; };"),
            Err(TransformError::Unclassified { device, value, .. }) if device == "led" && value == "2-3"
        ));
    }
}
