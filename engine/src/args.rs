//! Build arguments.
//!
//! Values supplied on the command line (or in the builder config) become
//! visible to instructions only once an `ARG` declares them. The proxy
//! arguments are predefined and visible whenever they are supplied.

use std::collections::HashMap;

/// Build arguments usable without an `ARG` declaration.
pub const PREDEFINED_ARGS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "FTP_PROXY",
    "ftp_proxy",
    "NO_PROXY",
    "no_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// Supplied and declared build arguments for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Values from `--build-arg` / config
    supplied: HashMap<String, String>,
    /// `ARG` declarations in order, with their effective value
    declared: Vec<(String, Option<String>)>,
    /// Values declared before `FROM`, inherited by a redeclaration
    inherited: HashMap<String, String>,
}

impl BuildArgs {
    pub fn new(supplied: HashMap<String, String>) -> Self {
        Self {
            supplied,
            declared: Vec::new(),
            inherited: HashMap::new(),
        }
    }

    /// Record an `ARG name[=default]` declaration.
    ///
    /// A supplied value wins over the default, which wins over a value
    /// inherited from before `FROM`. Redeclaring a name replaces its
    /// previous entry in place.
    pub fn declare(&mut self, name: &str, default: Option<String>) {
        let value = self
            .supplied
            .get(name)
            .cloned()
            .or(default)
            .or_else(|| self.inherited.get(name).cloned());
        match self.declared.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.declared.push((name.to_string(), value)),
        }
    }

    /// Value visible to variable references, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some((_, value)) = self.declared.iter().find(|(n, _)| n == name) {
            return value.as_deref();
        }
        if PREDEFINED_ARGS.contains(&name) {
            return self.supplied.get(name).map(String::as_str);
        }
        None
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.iter().any(|(n, _)| n == name)
    }

    /// Declared arguments in declaration order.
    pub fn declared(&self) -> &[(String, Option<String>)] {
        &self.declared
    }

    /// Supplied arguments that no `ARG` consumed, sorted by name.
    pub fn unconsumed(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .supplied
            .keys()
            .map(String::as_str)
            .filter(|name| {
                !self.is_declared(name)
                    && !self.inherited.contains_key(*name)
                    && !PREDEFINED_ARGS.contains(name)
            })
            .collect();
        names.sort_unstable();
        names
    }

    /// Arguments scoped to the build stage that follows `FROM`: same
    /// supplied values, no declarations. Current declarations become
    /// inherited values for `ARG` redeclarations.
    pub fn fresh_scope(&self) -> Self {
        let inherited = self
            .declared
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), value.clone()?)))
            .collect();
        Self {
            supplied: self.supplied.clone(),
            declared: Vec::new(),
            inherited,
        }
    }
}
