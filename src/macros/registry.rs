//! Macro Registry
//!
//! Named, parameterized lists of jump code templates. Expansion turns a macro
//! plus parameter values into concrete commands; running them is the
//! engine's job.
//!
//! Macro documents map macro name to definition:
//!
//! ```yaml
//! onboard:
//!   templates:
//!     - "@create_agent:role=${role}"
//!     - "@assign:agent=${role},task=${task}"
//!   description: Create and assign an agent
//!   parameters: [role, task]
//! ```
//!
//! `.yaml`/`.yml` files are YAML; everything else is JSON. `sequence` is
//! accepted as an older spelling of `templates`, and a missing `parameters`
//! list is inferred from the placeholders.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use jump_types::Params;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::expander::{infer_parameters, missing_parameters, substitute};
use crate::error::{DefinitionError, DispatchError};
use crate::parser::is_identifier;

// ============================================================================
// Types
// ============================================================================

/// A stored macro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub name: String,
    pub templates: Vec<String>,
    pub description: String,
    /// Declared or inferred placeholder names
    pub parameters: Vec<String>,
    /// Successful expansions since definition; never persisted
    #[serde(skip)]
    pub usage_count: u64,
}

/// Persisted form of one macro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroEntry {
    #[serde(alias = "sequence")]
    pub templates: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Option<Vec<String>>,
}

/// Macro name -> entry
pub type MacroDocument = BTreeMap<String, MacroEntry>;

/// One line of a macro listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroSummary {
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
    pub steps: usize,
    pub usage_count: u64,
}

impl fmt::Display for MacroSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.name)?;
        if !self.parameters.is_empty() {
            write!(f, "({})", self.parameters.join(", "))?;
        }
        write!(f, " - {} ({} steps)", self.description, self.steps)
    }
}

impl From<&MacroDefinition> for MacroSummary {
    fn from(def: &MacroDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
            steps: def.templates.len(),
            usage_count: def.usage_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
pub struct MacroRegistry {
    macros: RwLock<BTreeMap<String, MacroDefinition>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or overwrite) a macro.
    ///
    /// With `parameters` omitted, the union of `${...}` placeholders across
    /// the templates is used.
    pub fn define(
        &self,
        name: impl Into<String>,
        templates: Vec<String>,
        description: impl Into<String>,
        parameters: Option<Vec<String>>,
    ) -> Result<MacroDefinition, DefinitionError> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(DefinitionError::InvalidName { what: "macro", name });
        }

        let parameters = parameters.unwrap_or_else(|| infer_parameters(&templates));
        let definition = MacroDefinition {
            name: name.clone(),
            templates,
            description: description.into(),
            parameters,
            usage_count: 0,
        };

        if self.write().insert(name.clone(), definition.clone()).is_some() {
            info!("Redefined macro '{}'", name);
        } else {
            info!(
                "Defined macro '{}' ({} steps, parameters: {:?})",
                name,
                definition.templates.len(),
                definition.parameters
            );
        }
        Ok(definition)
    }

    pub fn undefine(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            debug!("Removed macro '{}'", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<MacroDefinition> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Summaries sorted by name
    pub fn list(&self) -> Vec<MacroSummary> {
        self.read().values().map(MacroSummary::from).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Expand a macro into concrete jump codes.
    ///
    /// Every declared parameter must be present in `values`; the check runs
    /// before any substitution. Placeholders with no value stay as written.
    pub fn expand(&self, name: &str, values: &Params) -> Result<Vec<String>, DispatchError> {
        let mut macros = self.write();
        let definition = macros
            .get_mut(name)
            .ok_or_else(|| DispatchError::UnknownMacro {
                name: name.to_string(),
            })?;

        let missing = missing_parameters(&definition.parameters, values);
        if !missing.is_empty() {
            return Err(DispatchError::MissingParameter {
                macro_name: name.to_string(),
                params: missing,
            });
        }

        let commands: Vec<String> = definition
            .templates
            .iter()
            .map(|t| substitute(t, values))
            .collect();
        definition.usage_count += 1;

        debug!(
            "Expanded macro '{}' into {} commands (use #{})",
            name,
            commands.len(),
            definition.usage_count
        );
        Ok(commands)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn to_document(&self) -> MacroDocument {
        self.read()
            .values()
            .map(|def| {
                (
                    def.name.clone(),
                    MacroEntry {
                        templates: def.templates.clone(),
                        description: def.description.clone(),
                        parameters: Some(def.parameters.clone()),
                    },
                )
            })
            .collect()
    }

    /// Define every macro in `document`; returns how many were loaded.
    ///
    /// All names are checked first, so a rejected document defines nothing.
    pub fn load_document(&self, document: MacroDocument) -> Result<usize, DefinitionError> {
        if let Some(bad) = document.keys().find(|name| !is_identifier(name)) {
            return Err(DefinitionError::InvalidName {
                what: "macro",
                name: bad.clone(),
            });
        }
        let count = document.len();
        for (name, entry) in document {
            self.define(name, entry.templates, entry.description, entry.parameters)?;
        }
        Ok(count)
    }

    pub fn save(&self, path: &Path) -> Result<(), DefinitionError> {
        let document = self.to_document();
        let content = match DocumentFormat::from_path(path) {
            DocumentFormat::Yaml => serde_yaml::to_string(&document)?,
            DocumentFormat::Json => serde_json::to_string_pretty(&document)?,
        };
        std::fs::write(path, content)?;
        info!("Saved {} macros to {:?}", document.len(), path);
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<usize, DefinitionError> {
        let content = std::fs::read_to_string(path)?;
        let document: MacroDocument = match DocumentFormat::from_path(path) {
            DocumentFormat::Yaml => serde_yaml::from_str(&content)?,
            DocumentFormat::Json => serde_json::from_str(&content)?,
        };
        let count = self.load_document(document)?;
        info!("Loaded {} macros from {:?}", count, path);
        Ok(count)
    }

    /// Load every `.json`, `.yaml` and `.yml` file in `dir`.
    ///
    /// Unreadable files are skipped with a warning. A missing directory
    /// loads nothing.
    pub fn load_from_dir(&self, dir: &Path) -> Result<usize, DefinitionError> {
        if !dir.exists() {
            warn!("Macro directory does not exist: {:?}", dir);
            return Ok(0);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|e| e == "json" || e == "yaml" || e == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut total = 0;
        for path in paths {
            match self.load(&path) {
                Ok(count) => total += count,
                Err(e) => warn!("Failed to load macros from {:?}: {}", path, e),
            }
        }
        Ok(total)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, MacroDefinition>> {
        self.macros.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, MacroDefinition>> {
        self.macros.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Tests
// ============================================================================
