//! Plugin class loading.
//!
//! Plugins are *declared* by a [`PluginManifest`] and *provided* by a
//! [`PluginLibrary`] registered under the library name the manifest refers
//! to. A class can therefore be declared without being loadable, either
//! because its library was never registered or because its factory fails.
//!
//! A manifest is usually written in YAML:
//!
//! ```yaml
//! plugins:
//!   - name: raw_pub
//!     library: point_cloud_transport
//!     base_class: point_cloud_transport::PublisherPlugin
//!     description: Publishes the point cloud unchanged.
//! ```

use eyre::WrapErr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, sync::Arc};
use tracing::debug;

/// Errors raised while instantiating a plugin class.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    #[error("class '{class}' is not declared for base class '{base_class}'")]
    ClassNotDeclared { class: String, base_class: String },

    #[error("failed to load library '{library}' providing class '{class}'")]
    LibraryLoad { class: String, library: String },

    #[error("failed to create an instance of class '{class}': {reason}")]
    CreateClass { class: String, reason: String },
}

/// One declared plugin class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescription {
    /// Lookup name of the class, e.g. `raw_pub`.
    pub name: String,

    /// Name of the library providing the class.
    pub library: String,

    /// Base class the plugin implements.
    pub base_class: String,

    #[serde(default)]
    pub description: String,
}

/// A list of plugin declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub plugins: Vec<PluginDescription>,
}

impl PluginManifest {
    pub fn from_yaml(yaml: &str) -> eyre::Result<Self> {
        serde_yaml::from_str(yaml).wrap_err("Failed to parse plugin manifest")
    }

    /// Load a manifest from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read plugin manifest: {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse plugin manifest: {}", path.display()))
    }

    pub fn extend(&mut self, other: PluginManifest) {
        self.plugins.extend(other.plugins);
    }
}

/// Constructor for a plugin instance.
pub type Factory<B> = Arc<dyn Fn() -> eyre::Result<Box<B>> + Send + Sync>;

/// A named set of plugin factories.
pub struct PluginLibrary<B: ?Sized> {
    name: String,
    factories: IndexMap<String, Factory<B>>,
}

impl<B: ?Sized> Clone for PluginLibrary<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            factories: self.factories.clone(),
        }
    }
}

impl<B: ?Sized> fmt::Debug for PluginLibrary<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLibrary")
            .field("name", &self.name)
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<B: ?Sized> PluginLibrary<B> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factories: IndexMap::new(),
        }
    }

    /// Export `class` from the library. A later export of the same class
    /// replaces the earlier one.
    pub fn with_class<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> eyre::Result<Box<B>> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Loads plugin classes deriving from one base class.
pub struct ClassLoader<B: ?Sized> {
    package: String,
    base_class: String,
    declared: IndexMap<String, PluginDescription>,
    libraries: IndexMap<String, PluginLibrary<B>>,
}

impl<B: ?Sized> fmt::Debug for ClassLoader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLoader")
            .field("package", &self.package)
            .field("base_class", &self.base_class)
            .field("declared", &self.declared.keys().collect::<Vec<_>>())
            .field("libraries", &self.libraries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<B: ?Sized> ClassLoader<B> {
    pub fn new(package: impl Into<String>, base_class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            base_class: base_class.into(),
            declared: IndexMap::new(),
            libraries: IndexMap::new(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn base_class(&self) -> &str {
        &self.base_class
    }

    /// Declare every class of `manifest` deriving from this loader's base
    /// class. The first declaration of a name wins.
    pub fn add_manifest(&mut self, manifest: &PluginManifest) {
        for plugin in &manifest.plugins {
            if plugin.base_class != self.base_class {
                continue;
            }
            if self.declared.contains_key(&plugin.name) {
                debug!(
                    class = %plugin.name,
                    library = %plugin.library,
                    "Ignoring duplicate plugin declaration"
                );
                continue;
            }
            self.declared.insert(plugin.name.clone(), plugin.clone());
        }
    }

    pub fn register_library(&mut self, library: PluginLibrary<B>) {
        debug!(
            package = %self.package,
            library = %library.name,
            "Registered plugin library"
        );
        self.libraries.insert(library.name.clone(), library);
    }

    /// Names of the declared classes in declaration order.
    pub fn declared_classes(&self) -> Vec<String> {
        self.declared.keys().cloned().collect()
    }

    pub fn class_description(&self, class: &str) -> Option<&PluginDescription> {
        self.declared.get(class)
    }

    pub fn is_class_declared(&self, class: &str) -> bool {
        self.declared.contains_key(class)
    }

    /// Whether the library declared for `class` is registered and exports it.
    /// The factory is not run.
    pub fn is_class_available(&self, class: &str) -> bool {
        self.declared
            .get(class)
            .and_then(|plugin| self.libraries.get(&plugin.library))
            .is_some_and(|library| library.factories.contains_key(class))
    }

    /// Instantiate a declared class.
    pub fn create_instance(&self, class: &str) -> Result<Box<B>, LoaderError> {
        let plugin = self
            .declared
            .get(class)
            .ok_or_else(|| LoaderError::ClassNotDeclared {
                class: class.to_string(),
                base_class: self.base_class.clone(),
            })?;

        let library =
            self.libraries
                .get(&plugin.library)
                .ok_or_else(|| LoaderError::LibraryLoad {
                    class: class.to_string(),
                    library: plugin.library.clone(),
                })?;

        let factory = library
            .factories
            .get(class)
            .ok_or_else(|| LoaderError::CreateClass {
                class: class.to_string(),
                reason: format!("library '{}' does not export the class", library.name),
            })?;

        factory().map_err(|err| LoaderError::CreateClass {
            class: class.to_string(),
            reason: format!("{err:#}"),
        })
    }
}
