//! Module configuration and dependency resolution.
//!
//! Every module carries a `devicetree.yaml` file:
//!
//! ```yaml
//! dependencies:
//!   - Drivers/esp32
//! bindings: bindings
//! dts: lilygo,tdeck.dts
//! ```
//!
//! `dependencies` are relative to the project root, `bindings` and `dts` to the module itself.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::Deserialize;

use crate::yaml;

/// The file read when a module is given as a directory.
pub const CONFIG_FILE_NAME: &str = "devicetree.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("module not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{}: missing required key `{key}`", path.display())]
    MissingKey { path: PathBuf, key: &'static str },
}

/// The merged configuration of a root module and all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTreeConfig {
    /// The dependencies declared by the root module, as written.
    pub dependencies: Vec<String>,
    /// Binding directories of every visited module, dependencies first.
    pub bindings: Vec<PathBuf>,
    /// The devicetree source of the root module.
    pub dts: PathBuf,
}

impl DeviceTreeConfig {
    /// The names of the root module's direct dependencies, i.e. the last component of each path.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|dep| {
            Path::new(dep)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(dep)
        })
    }
}

/// The contents of a single `devicetree.yaml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModuleConfig {
    dependencies: Vec<String>,
    bindings: Option<String>,
    dts: Option<String>,
}

/// Modules seen during one resolution.
#[derive(Default)]
struct Visits {
    done: HashSet<PathBuf>,
    active: HashSet<PathBuf>,
}

/// Resolve the configuration of the module at `module`, which is either a directory holding a
/// `devicetree.yaml` or the configuration file itself.
///
/// Dependencies are visited depth-first before the module that declares them. A module reached
/// more than once only contributes its bindings the first time.
pub fn parse_config(module: &Path, project_root: &Path) -> Result<DeviceTreeConfig, ConfigError> {
    let mut config = DeviceTreeConfig::default();
    let mut visits = Visits::default();

    visit(module, project_root, true, &mut visits, &mut config)?;

    debug!(
        "Resolved {} binding directories from {} modules",
        config.bindings.len(),
        visits.done.len()
    );

    Ok(config)
}

fn visit(
    module: &Path,
    project_root: &Path,
    is_root: bool,
    visits: &mut Visits,
    config: &mut DeviceTreeConfig,
) -> Result<(), ConfigError> {
    let file = config_file(module)?;

    if visits.active.contains(&file) {
        warn!("Dependency cycle through {}, skipping", file.display());
        return Ok(());
    }
    if visits.done.contains(&file) {
        debug!("Already visited {}", file.display());
        return Ok(());
    }

    debug!("Visiting module {}", file.display());
    let module_config = read_module_config(&file)?;
    let module_dir = file.parent().unwrap_or(project_root).to_path_buf();

    visits.active.insert(file.clone());
    for dep in &module_config.dependencies {
        visit(&project_root.join(dep), project_root, false, visits, config)?;
    }
    visits.active.remove(&file);
    visits.done.insert(file.clone());

    if is_root {
        let dts = module_config.dts.ok_or_else(|| ConfigError::MissingKey {
            path: file.clone(),
            key: "dts",
        })?;

        config.dependencies.extend(module_config.dependencies);
        config.dts = module_dir.join(dts);
    }

    match module_config.bindings {
        Some(bindings) => config.bindings.push(module_dir.join(bindings)),
        None => debug!("{} declares no bindings", file.display()),
    }

    Ok(())
}

/// Locate the configuration file of a module and return its canonical path.
fn config_file(module: &Path) -> Result<PathBuf, ConfigError> {
    let file = if module.is_dir() {
        module.join(CONFIG_FILE_NAME)
    } else {
        module.to_path_buf()
    };

    if !file.is_file() {
        return Err(ConfigError::NotFound(module.to_path_buf()));
    }

    fs::canonicalize(&file).map_err(|source| ConfigError::Read { path: file, source })
}

fn read_module_config(path: &Path) -> Result<ModuleConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn module(root: &Path, name: &str, yaml: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE_NAME), yaml).unwrap();
        fs::canonicalize(dir).unwrap()
    }

    #[test]
    fn transitive_dependencies() {
        let root = TempDir::new().unwrap();
        let z = module(root.path(), "z", "bindings: bindings\n");
        let y = module(
            root.path(),
            "y",
            "dependencies: [z]\nbindings: schemas\n",
        );
        let x = module(
            root.path(),
            "x",
            "dependencies: [y]\nbindings: bindings\ndts: board.dts\n",
        );

        let config = parse_config(&x, root.path()).unwrap();

        assert_eq!(config.dependencies, ["y"]);
        assert_eq!(
            config.bindings,
            [z.join("bindings"), y.join("schemas"), x.join("bindings")]
        );
        assert_eq!(config.dts, x.join("board.dts"));
    }

    #[test]
    fn diamond_dependencies_are_visited_once() {
        let root = TempDir::new().unwrap();
        let base = module(root.path(), "base", "bindings: b\n");
        module(root.path(), "left", "dependencies: [base]\n");
        let right = module(root.path(), "right", "dependencies: [base]\nbindings: r\n");
        let top = module(
            root.path(),
            "top",
            "dependencies: [left, right]\nbindings: t\ndts: top.dts\n",
        );

        let config = parse_config(&top, root.path()).unwrap();

        assert_eq!(config.dependencies, ["left", "right"]);
        assert_eq!(
            config.bindings,
            [base.join("b"), right.join("r"), top.join("t")]
        );
    }

    #[test]
    fn cycles_terminate() {
        let root = TempDir::new().unwrap();
        let a = module(
            root.path(),
            "a",
            "dependencies: [b]\nbindings: a\ndts: a.dts\n",
        );
        let b = module(root.path(), "b", "dependencies: [a]\nbindings: b\n");

        let config = parse_config(&a, root.path()).unwrap();

        assert_eq!(config.bindings, [b.join("b"), a.join("a")]);
    }

    #[test]
    fn config_file_can_be_given_directly() {
        let root = TempDir::new().unwrap();
        let dir = module(root.path(), "board", "dts: board.dts\n");

        let config = parse_config(&dir.join(CONFIG_FILE_NAME), root.path()).unwrap();

        assert_eq!(config.dts, dir.join("board.dts"));
        assert!(config.bindings.is_empty());
    }

    #[test]
    fn missing_module() {
        let root = TempDir::new().unwrap();
        let x = module(
            root.path(),
            "x",
            "dependencies: [nowhere]\ndts: board.dts\n",
        );

        assert!(matches!(
            parse_config(&x, root.path()),
            Err(ConfigError::NotFound(path)) if path == root.path().join("nowhere")
        ));
        assert!(matches!(
            parse_config(&root.path().join("absent"), root.path()),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn root_requires_dts() {
        for yaml in ["# nothing here\n", "---\n", "bindings: b\n"] {
            let root = TempDir::new().unwrap();
            let x = module(root.path(), "x", yaml);

            assert!(
                matches!(
                    parse_config(&x, root.path()),
                    Err(ConfigError::MissingKey { key: "dts", .. })
                ),
                "{:?}",
                yaml
            );
        }
    }

    #[test]
    fn empty_dependency_config() {
        let root = TempDir::new().unwrap();
        module(root.path(), "core", "---\n...\n");
        let x = module(root.path(), "x", "dependencies: [core]\ndts: x.dts\n");

        let config = parse_config(&x, root.path()).unwrap();

        assert_eq!(config.dependencies, ["core"]);
        assert!(config.bindings.is_empty());
    }

    #[test]
    fn malformed_config() {
        let root = TempDir::new().unwrap();
        let x = module(root.path(), "x", "dts: a.dts\ndependencies: core\n");

        assert!(matches!(
            parse_config(&x, root.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn dependency_names() {
        let config = DeviceTreeConfig {
            dependencies: vec![
                "Platforms/platform-esp32".into(),
                "Drivers/st7789/".into(),
                "core".into(),
            ],
            ..Default::default()
        };

        assert_eq!(
            config.dependency_names().collect::<Vec<_>>(),
            ["platform-esp32", "st7789", "core"]
        );
    }
}
