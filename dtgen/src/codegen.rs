//! Emission of `devicetree.c` and `devicetree.h`.

use std::{
    fmt::Write as _,
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    bindings::Bindings,
    model::DeviceTree,
    resolve::{config_symbol, Resolver},
    Result,
};

pub const SOURCE_FILE_NAME: &str = "devicetree.c";
pub const HEADER_FILE_NAME: &str = "devicetree.h";

/// The null-terminated table of every device, declared in the header.
pub const DEVICE_TABLE: &str = "devicetree_devices";

const SOURCE_PREAMBLE: &str = "\
// Default headers
#include <tactility/device.h>
// DTS headers
";

const HEADER: &str = "\
#pragma once
#include <tactility/error.h>

#ifdef __cplusplus
extern \"C\" {
#endif

extern struct CompatibleDevice devicetree_devices[];

#ifdef __cplusplus
}
#endif
";

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("failed to format generated code")]
    Format(#[from] std::fmt::Error),
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The contents of the generated files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub source: String,
    pub header: String,
}

/// Render the source and header for a tree.
///
/// Devices are emitted in pre-order so a device struct only ever refers to its parent after the
/// parent has been defined.
pub fn generate(tree: &DeviceTree, bindings: &Bindings) -> Result<Generated> {
    let resolver = Resolver::new(tree, bindings)?;
    let mut source = String::from(SOURCE_PREAMBLE);

    for passthrough in &tree.passthrough {
        writeln!(source, "{}", passthrough.statement())?;
    }
    writeln!(source)?;

    let mut table = Vec::with_capacity(tree.len());
    for (id, device) in tree.preorder() {
        debug!("Writing device struct for '{}'", device.name);

        let identifier = resolver.identifier(id);
        let binding = resolver.binding(id)?;
        let parameters = resolver.parameters(id)?;

        writeln!(
            source,
            "static const {} {} = {{",
            config_type_name(&binding.compatible),
            config_symbol(identifier)
        )?;
        if !parameters.is_empty() {
            writeln!(source, "\t{}", parameters.join(",\n\t"))?;
        }
        writeln!(source, "}};\n")?;

        let parent = match device.parent {
            Some(parent) => format!("&{}", resolver.identifier(parent)),
            None => "NULL".to_string(),
        };

        writeln!(source, "static struct Device {} = {{", identifier)?;
        writeln!(source, "\t.name = \"{}\",", device.name)?;
        writeln!(source, "\t.config = &{},", config_symbol(identifier))?;
        writeln!(source, "\t.parent = {},", parent)?;
        writeln!(source, "}};\n")?;

        table.push((identifier, resolver.compatible(id)?));
    }

    writeln!(source, "struct CompatibleDevice {}[] = {{", DEVICE_TABLE)?;
    for (identifier, compatible) in table {
        writeln!(source, "\t{{ &{}, \"{}\" }},", identifier, compatible)?;
    }
    writeln!(source, "\t{{ NULL, NULL }},")?;
    writeln!(source, "}};")?;

    Ok(Generated {
        source,
        header: HEADER.to_string(),
    })
}

/// The C type of a device's configuration, e.g. `esp32_i2c_config_dt` for
/// `espressif,esp32-i2c`.
pub fn config_type_name(compatible: &str) -> String {
    let name = compatible.rsplit(',').next().unwrap_or(compatible);
    format!("{}_config_dt", name.replace('-', "_"))
}

/// Write both files into `output_dir`, creating it if needed.
///
/// Each file is written to a temporary file next to its destination and then renamed over it.
pub fn write(output_dir: &Path, generated: &Generated) -> Result<(), CodegenError> {
    fs::create_dir_all(output_dir).map_err(|source| CodegenError::Write {
        path: output_dir.to_path_buf(),
        source,
    })?;

    for (name, contents) in [
        (SOURCE_FILE_NAME, &generated.source),
        (HEADER_FILE_NAME, &generated.header),
    ] {
        let path = output_dir.join(name);
        let write_error = |source| CodegenError::Write {
            path: path.clone(),
            source,
        };

        let mut file = tempfile::Builder::new()
            .prefix(".dtgen")
            .tempfile_in(output_dir)
            .map_err(write_error)?;
        file.write_all(contents.as_bytes()).map_err(write_error)?;
        file.persist(&path).map_err(|err| write_error(err.error))?;

        debug!("Wrote {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_yaml::Value;
    use tempfile::TempDir;

    use crate::{
        bindings::{Binding, BindingProperty, PropertyType},
        transform::transform,
    };

    fn binding(compatible: &str, properties: &[(&str, PropertyType)]) -> Binding {
        Binding {
            filename: format!("{}.yaml", compatible),
            compatible: compatible.into(),
            description: String::new(),
            properties: properties
                .iter()
                .map(|&(name, ty)| BindingProperty {
                    name: name.into(),
                    ty,
                    required: false,
                    default: Some(Value::from(0)),
                    description: String::new(),
                })
                .collect(),
            includes: vec![],
            bus: None,
        }
    }

    fn bindings() -> Bindings {
        [
            binding("root", &[("model", PropertyType::String)]),
            binding(
                "espressif,esp32-i2c",
                &[("port", PropertyType::Int), ("clock", PropertyType::Int)],
            ),
            binding("lilygo,tdeck-keyboard", &[("bus", PropertyType::Phandle)]),
        ]
        .into_iter()
        .collect()
    }

    fn generate_str(source: &str) -> Result<Generated> {
        generate(&transform(&dts_parser::from_str(source).unwrap())?, &bindings())
    }

    #[test]
    fn config_type_names() {
        for (compatible, expected) in [
            ("root", "root_config_dt"),
            ("espressif,esp32-i2c", "esp32_i2c_config_dt"),
            ("a,b,c-d-e", "c_d_e_config_dt"),
        ] {
            assert_eq!(config_type_name(compatible), expected);
        }
    }

    #[test]
    fn generate_source() {
        let generated = generate_str(
            r#"/dts-v1/;
            #include <drivers/i2c.h>
            / {
                compatible = "root";
                model = "T-Deck";
                i2c0: i2c@0 {
                    compatible = "espressif,esp32-i2c";
                    port = I2C_NUM_0;
                    keyboard {
                        compatible = "lilygo,tdeck-keyboard";
                        bus = &i2c0;
                    };
                };
            };"#,
        )
        .unwrap();

        let expected = "\
// Default headers
#include <tactility/device.h>
// DTS headers
#include <drivers/i2c.h>

static const root_config_dt root_config = {
\t\"T-Deck\"
};

static struct Device root = {
\t.name = \"/\",
\t.config = &root_config,
\t.parent = NULL,
};

static const esp32_i2c_config_dt i2c_0_config = {
\tI2C_NUM_0,
\t0
};

static struct Device i2c_0 = {
\t.name = \"i2c@0\",
\t.config = &i2c_0_config,
\t.parent = &root,
};

static const tdeck_keyboard_config_dt keyboard_config = {
\t&i2c_0
};

static struct Device keyboard = {
\t.name = \"keyboard\",
\t.config = &keyboard_config,
\t.parent = &i2c_0,
};

struct CompatibleDevice devicetree_devices[] = {
\t{ &root, \"root\" },
\t{ &i2c_0, \"espressif,esp32-i2c\" },
\t{ &keyboard, \"lilygo,tdeck-keyboard\" },
\t{ NULL, NULL },
};
";

        assert_eq!(generated.source, expected);
        assert!(generated.header.contains("extern struct CompatibleDevice devicetree_devices[];"));
    }

    #[test]
    fn reject_unknown_binding() {
        let generated = generate_str(
            r#"/dts-v1/; / { compatible = "root"; led { compatible = "vendor,led"; }; };"#,
        );

        assert!(matches!(
            generated,
            Err(crate::Error::Resolve(crate::resolve::ResolveError::BindingNotFound { .. }))
        ));
    }

    #[test]
    fn empty_config() {
        let tree = transform(&dts_parser::from_str(r#"/dts-v1/; / { compatible = "x"; };"#).unwrap())
            .unwrap();
        let bindings = [binding("x", &[])].into_iter().collect::<Bindings>();

        let generated = generate(&tree, &bindings).unwrap();

        assert!(generated
            .source
            .contains("static const x_config_dt root_config = {\n};\n"));
    }

    #[test]
    fn write_files() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("generated/nested");
        let generated = Generated {
            source: "source".into(),
            header: "header".into(),
        };

        write(&output, &generated).unwrap();
        fs::write(output.join(SOURCE_FILE_NAME), "stale").unwrap();
        write(&output, &generated).unwrap();

        assert_eq!(fs::read_to_string(output.join(SOURCE_FILE_NAME)).unwrap(), "source");
        assert_eq!(fs::read_to_string(output.join(HEADER_FILE_NAME)).unwrap(), "header");
        assert_eq!(fs::read_dir(&output).unwrap().count(), 2);
    }
}
