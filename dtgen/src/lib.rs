//! Compiles a devicetree source and the bindings of its module graph into C code.
//!
//! The pipeline runs in a fixed order: module configuration, parsing, lowering into a
//! [`DeviceTree`], binding resolution and finally code generation. The first error aborts the
//! run and no output is written.

pub mod bindings;
pub mod codegen;
pub mod config;
mod error;
pub mod model;
pub mod resolve;
pub mod transform;
mod yaml;

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};

pub use bindings::{Binding, BindingProperty, Bindings, PropertyType};
pub use codegen::{Generated, HEADER_FILE_NAME, SOURCE_FILE_NAME};
pub use config::{parse_config, DeviceTreeConfig};
pub use error::{Error, Result};
pub use model::DeviceTree;

/// Settings of a compilation run.
#[derive(Debug, Clone)]
pub struct Options {
    /// The directory module dependencies are relative to.
    pub project_root: PathBuf,
    /// Skip binding includes that cannot be found instead of failing.
    pub allow_missing_includes: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            allow_missing_includes: false,
        }
    }
}

/// Parse and lower a devicetree source file.
pub fn load_tree(path: &Path) -> Result<DeviceTree> {
    let text = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let dts = dts_parser::from_str(&text).map_err(|source| Error::Syntax {
        path: path.to_path_buf(),
        text: text.clone(),
        source,
    })?;

    Ok(transform::transform(&dts)?)
}

/// Run the whole pipeline for `module` and return the generated files without writing them.
pub fn build(module: &Path, options: &Options) -> Result<Generated> {
    let config = parse_config(module, &options.project_root)?;
    debug!("{:#?}", config);

    let tree = load_tree(&config.dts)?;
    let bindings = Bindings::load(&config.bindings, options.allow_missing_includes)?;
    for binding in bindings.iter() {
        debug!("Binding {} ({})", binding.compatible, binding.filename);
    }

    let generated = codegen::generate(&tree, &bindings)?;

    info!(
        "Compiled {} devices from {} against {} bindings",
        tree.len(),
        config.dts.display(),
        bindings.len()
    );

    Ok(generated)
}

/// Compile `module` and write `devicetree.c` and `devicetree.h` into `output_dir`.
pub fn compile(module: &Path, output_dir: &Path, options: &Options) -> Result<()> {
    info!(
        "Generating devicetree code for {} into {}",
        module.display(),
        output_dir.display()
    );

    let generated = build(module, options)?;
    codegen::write(output_dir, &generated)?;

    Ok(())
}

/// The names of the direct dependencies of `module`.
pub fn dependencies(module: &Path, project_root: &Path) -> Result<Vec<String>> {
    let config = parse_config(module, project_root)?;

    Ok(config.dependency_names().map(str::to_string).collect())
}
