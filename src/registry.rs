//! Handler Registry
//!
//! Holds canonical handler descriptors and their aliases in one flat
//! namespace. A registry is an explicit object shared through
//! `Arc<Registry>`; there is no process-wide instance.
//!
//! ```text
//! "@s" ──► aliases["s"] = "status" ──► handlers["status"] ──► HandlerDescriptor
//! "@status" ─────────────────────────► handlers["status"]
//! ```
//!
//! Canonical names and aliases never overlap: registering a name that is
//! already bound (as either) replaces the earlier binding, logs a warning and
//! reports it in [`Registration::overridden`]. When an alias takes over
//! another command's canonical name, that command goes away with all of its
//! aliases, and every one of them is reported.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use jump_types::{CommandInvocation, ParamValue, Params};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{DefinitionError, DispatchError};
use crate::parser::is_identifier;

// ============================================================================
// Handler capability
// ============================================================================

/// The work behind a jump code.
///
/// Closures of the form `Fn(&Params, &Context) -> anyhow::Result<Value>`
/// implement this trait directly.
pub trait CommandHandler: Send + Sync {
    fn invoke(&self, params: &Params, context: &Context) -> anyhow::Result<Value>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Params, &Context) -> anyhow::Result<Value> + Send + Sync,
{
    fn invoke(&self, params: &Params, context: &Context) -> anyhow::Result<Value> {
        self(params, context)
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// A handler plus its name, aliases and parameter/context schema
pub struct HandlerDescriptor {
    name: String,
    aliases: BTreeSet<String>,
    description: String,
    default_params: Params,
    required_context: Vec<String>,
    handler: Arc<dyn CommandHandler>,
}

impl HandlerDescriptor {
    pub fn new(name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            name: name.into(),
            aliases: BTreeSet::new(),
            description: String::new(),
            default_params: Params::new(),
            required_context: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.default_params.insert(key, value);
        self
    }

    pub fn with_required_context(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.required_context.contains(&key) {
            self.required_context.push(key);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aliases requested at registration
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(|a| a.as_str())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn default_params(&self) -> &Params {
        &self.default_params
    }

    pub fn required_context(&self) -> &[String] {
        &self.required_context
    }

    /// Run the handler; errors and panics both come back as `Handler`.
    ///
    /// A handler that fails with a non-critical [`DispatchError`] (for
    /// example a nested macro hitting the nesting limit) keeps that kind.
    pub fn invoke(&self, params: &Params, context: &Context) -> Result<Value, DispatchError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.handler.invoke(params, context))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => match err.downcast::<DispatchError>() {
                Ok(inner) if !inner.is_critical() => Err(inner),
                Ok(inner) => Err(DispatchError::Handler {
                    command: self.name.clone(),
                    message: inner.to_string(),
                }),
                Err(err) => Err(DispatchError::Handler {
                    command: self.name.clone(),
                    message: format!("{:#}", err),
                }),
            },
            Err(payload) => Err(DispatchError::Handler {
                command: self.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("description", &self.description)
            .field("default_params", &self.default_params)
            .field("required_context", &self.required_context)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Outcome of [`Registry::register`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    /// Names (canonical or alias) whose earlier binding was replaced
    pub overridden: Vec<String>,
}

impl Registration {
    pub fn has_overrides(&self) -> bool {
        !self.overridden.is_empty()
    }
}

/// Read-only view of one registered command, for help and listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSummary {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub parameters: Vec<String>,
    pub context_required: Vec<String>,
}

#[derive(Default)]
struct RegistryInner {
    handlers: HashMap<String, Arc<HandlerDescriptor>>,
    /// alias -> canonical name
    aliases: HashMap<String, String>,
}

impl RegistryInner {
    fn aliases_of(&self, name: &str) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, target)| target.as_str() == name)
            .map(|(alias, _)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }

    /// Remove a canonical entry and every alias pointing at it.
    ///
    /// Returns the dropped bindings, canonical name first; empty if absent.
    fn evict(&mut self, name: &str) -> Vec<String> {
        if self.handlers.remove(name).is_none() {
            return Vec::new();
        }
        let mut dropped = vec![name.to_string()];
        dropped.extend(self.aliases_of(name));
        self.aliases.retain(|_, target| target != name);
        dropped
    }
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its canonical name and aliases.
    ///
    /// Collisions are resolved in favor of the new descriptor. Each replaced
    /// binding is logged at warn level and returned in the [`Registration`].
    pub fn register(&self, descriptor: HandlerDescriptor) -> Result<Registration, DefinitionError> {
        if !is_identifier(&descriptor.name) {
            return Err(DefinitionError::InvalidName {
                what: "command",
                name: descriptor.name,
            });
        }
        if let Some(bad) = descriptor.aliases.iter().find(|a| !is_identifier(a)) {
            return Err(DefinitionError::InvalidName {
                what: "alias",
                name: bad.clone(),
            });
        }

        let mut descriptor = descriptor;
        let name = descriptor.name.clone();
        descriptor.aliases.remove(&name);

        let mut inner = self.write();
        let mut overridden = Vec::new();

        overridden.extend(inner.evict(&name));
        if inner.aliases.remove(&name).is_some() {
            overridden.push(name.clone());
        }

        for alias in &descriptor.aliases {
            // taking another command's canonical name drops that whole command
            overridden.extend(inner.evict(alias));
            if let Some(previous) = inner.aliases.insert(alias.clone(), name.clone()) {
                if previous != name {
                    overridden.push(alias.clone());
                }
            }
        }
        let mut seen = BTreeSet::new();
        overridden.retain(|n| seen.insert(n.clone()));

        for replaced in &overridden {
            warn!("Jump code '{}' overridden by registration of '{}'", replaced, name);
        }
        debug!(
            "Registered jump code '{}' (aliases: {:?})",
            name, descriptor.aliases
        );

        inner.handlers.insert(name.clone(), Arc::new(descriptor));
        Ok(Registration { name, overridden })
    }

    /// Remove a canonical entry and all of its aliases. False if absent.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = !self.write().evict(name).is_empty();
        if removed {
            debug!("Unregistered jump code '{}'", name);
        }
        removed
    }

    /// Alias lookup first, then canonical
    pub fn resolve(&self, name: &str) -> Result<Arc<HandlerDescriptor>, DispatchError> {
        let inner = self.read();
        let canonical = inner.aliases.get(name).map(String::as_str).unwrap_or(name);
        inner
            .handlers
            .get(canonical)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownCommand {
                name: name.to_string(),
            })
    }

    /// Resolve, validate required context, merge defaults and invoke.
    ///
    /// The registry lock is released before the handler runs, so handlers
    /// may call back into the registry.
    pub fn execute(
        &self,
        invocation: &CommandInvocation,
        context: &Context,
    ) -> Result<Value, DispatchError> {
        let descriptor = self.resolve(invocation.name())?;

        let missing = context.missing_keys(descriptor.required_context());
        if !missing.is_empty() {
            return Err(DispatchError::MissingContext {
                command: descriptor.name().to_string(),
                keys: missing,
            });
        }

        let params = invocation.params().merged_over(descriptor.default_params());
        descriptor.invoke(&params, context)
    }

    /// Canonical names and aliases, sorted
    pub fn list_commands(&self) -> Vec<String> {
        let inner = self.read();
        let mut names: Vec<String> = inner
            .handlers
            .keys()
            .chain(inner.aliases.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Summaries of every canonical command, sorted by name
    pub fn descriptors(&self) -> Vec<CommandSummary> {
        let inner = self.read();
        let mut summaries: Vec<CommandSummary> = inner
            .handlers
            .values()
            .map(|d| CommandSummary {
                name: d.name.clone(),
                aliases: inner.aliases_of(&d.name),
                description: d.description.clone(),
                parameters: d.default_params.keys().map(str::to_string).collect(),
                context_required: d.required_context.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Live aliases of a canonical command
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        self.read().aliases_of(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Number of canonical commands
    pub fn len(&self) -> usize {
        self.read().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().handlers.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.read().aliases.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("commands", &self.list_commands())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
