//! Variable resolution for Dockerfile instruction text.
//!
//! Expands `$NAME` and `${NAME}` references (with the `:-`, `-`, `:+`, `+`,
//! `:?` and `?` modifiers) against a layered environment: the image
//! configuration's `Env` first, then the declared build arguments.
//!
//! Substituted values are inserted verbatim and never rescanned, so a build
//! argument whose value contains `$` cannot inject further references.
//!
//! Two modes are supported:
//!
//! - **substitution only** (the default): quotes are preserved, only the
//!   escape form `\$` is collapsed, and a string without `$` is returned
//!   unchanged;
//! - **word processing** ([`Resolver::strip_quotes`]): quotes are removed and
//!   every escape is processed in the same pass, matching how Dockerfile
//!   instructions treat their arguments.

use std::collections::HashMap;

use a3s_build_core::error::{BuildError, Result};

use crate::args::BuildArgs;

/// Default Dockerfile escape character.
pub const DEFAULT_ESCAPE: char = '\\';

/// What to do when a reference names an undefined variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Fail with [`BuildError::UndefinedVariable`].
    Error,
    /// Substitute the empty string.
    Empty,
    /// Keep the reference text exactly as written.
    Literal,
}

/// A source of variable values.
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<&str>;
}

impl VariableLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl VariableLookup for [(String, String)] {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Image environment layered over build arguments.
#[derive(Debug, Clone, Copy)]
pub struct ReplacementEnv<'a> {
    env: &'a [(String, String)],
    args: &'a BuildArgs,
}

impl<'a> ReplacementEnv<'a> {
    pub fn new(env: &'a [(String, String)], args: &'a BuildArgs) -> Self {
        Self { env, args }
    }
}

impl VariableLookup for ReplacementEnv<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.env.lookup(name).or_else(|| self.args.get(name))
    }
}

/// Resolve a list of strings, substitution only, with the default escape.
///
/// The output has exactly one entry per input entry.
pub fn resolve_list(
    raw: &[String],
    env: &dyn VariableLookup,
    policy: MissingPolicy,
) -> Result<Vec<String>> {
    Resolver::new(env, policy).resolve_all(raw)
}

/// Resolve a single string, substitution only, with the default escape.
pub fn resolve(raw: &str, env: &dyn VariableLookup, policy: MissingPolicy) -> Result<String> {
    Resolver::new(env, policy).resolve(raw)
}

/// Configurable resolver bound to one environment snapshot.
pub struct Resolver<'a> {
    env: &'a dyn VariableLookup,
    policy: MissingPolicy,
    escape: char,
    strip_quotes: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(env: &'a dyn VariableLookup, policy: MissingPolicy) -> Self {
        Self {
            env,
            policy,
            escape: DEFAULT_ESCAPE,
            strip_quotes: false,
        }
    }

    /// Use a different escape character (`` ` `` on Windows-style Dockerfiles).
    pub fn escape(mut self, escape: char) -> Self {
        self.escape = escape;
        self
    }

    /// Remove quotes and process all escapes while substituting.
    pub fn strip_quotes(mut self, strip: bool) -> Self {
        self.strip_quotes = strip;
        self
    }

    pub fn resolve_all(&self, raw: &[String]) -> Result<Vec<String>> {
        raw.iter().map(|s| self.resolve(s)).collect()
    }

    pub fn resolve(&self, raw: &str) -> Result<String> {
        if !self.strip_quotes && !raw.contains('$') {
            return Ok(raw.to_string());
        }
        let chars: Vec<char> = raw.chars().collect();
        let mut out = String::with_capacity(raw.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == self.escape {
                i = self.process_escape(&chars, i, &mut out);
            } else if c == '\'' {
                i = self.process_single_quote(&chars, i, &mut out)?;
            } else if c == '"' {
                i = self.process_double_quote(&chars, i, &mut out)?;
            } else if c == '$' {
                i = self.process_dollar(&chars, i, &mut out)?;
            } else {
                out.push(c);
                i += 1;
            }
        }

        Ok(out)
    }

    /// Escape outside quotes. Returns the next index.
    fn process_escape(&self, chars: &[char], i: usize, out: &mut String) -> usize {
        match chars.get(i + 1) {
            Some('$') => {
                out.push('$');
                i + 2
            }
            Some(&next) if self.strip_quotes => {
                out.push(next);
                i + 2
            }
            Some(&next) => {
                // Kept as a pair so an escaped quote never opens a quoted run
                out.push(chars[i]);
                out.push(next);
                i + 2
            }
            None => {
                if !self.strip_quotes {
                    out.push(chars[i]);
                }
                i + 1
            }
        }
    }

    fn process_single_quote(&self, chars: &[char], i: usize, out: &mut String) -> Result<usize> {
        let close = chars[i + 1..]
            .iter()
            .position(|&c| c == '\'')
            .map(|p| p + i + 1)
            .ok_or_else(|| {
                BuildError::BadSubstitution(
                    "unexpected end of statement while looking for matching single-quote"
                        .to_string(),
                )
            })?;

        if self.strip_quotes {
            out.extend(&chars[i + 1..close]);
        } else {
            out.extend(&chars[i..=close]);
        }
        Ok(close + 1)
    }

    fn process_double_quote(&self, chars: &[char], i: usize, out: &mut String) -> Result<usize> {
        if !self.strip_quotes {
            out.push('"');
        }
        let mut i = i + 1;

        while i < chars.len() {
            let c = chars[i];
            if c == '"' {
                if !self.strip_quotes {
                    out.push('"');
                }
                return Ok(i + 1);
            } else if c == self.escape {
                match chars.get(i + 1) {
                    Some('$') => {
                        out.push('$');
                        i += 2;
                    }
                    Some(&next) if next == '"' || next == self.escape => {
                        if !self.strip_quotes {
                            out.push(c);
                        }
                        out.push(next);
                        i += 2;
                    }
                    _ => {
                        out.push(c);
                        i += 1;
                    }
                }
            } else if c == '$' {
                i = self.process_dollar(chars, i, out)?;
            } else {
                out.push(c);
                i += 1;
            }
        }

        Err(BuildError::BadSubstitution(
            "unexpected end of statement while looking for matching double-quote".to_string(),
        ))
    }

    /// Expand a reference starting at `chars[i] == '$'`. Returns the next index.
    fn process_dollar(&self, chars: &[char], i: usize, out: &mut String) -> Result<usize> {
        match chars.get(i + 1) {
            Some('{') => self.process_braced(chars, i, out),
            Some(&c) if c.is_ascii_digit() => {
                let name = c.to_string();
                self.substitute(&name, &chars[i..i + 2], out)?;
                Ok(i + 2)
            }
            Some(&c) if is_name_start(c) => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| !is_name_char(c))
                    .map(|p| p + i + 1)
                    .unwrap_or(chars.len());
                let name: String = chars[i + 1..end].iter().collect();
                self.substitute(&name, &chars[i..end], out)?;
                Ok(end)
            }
            _ => {
                out.push('$');
                Ok(i + 1)
            }
        }
    }

    fn process_braced(&self, chars: &[char], i: usize, out: &mut String) -> Result<usize> {
        let start = i + 2;
        let name_end = chars[start..]
            .iter()
            .position(|&c| !is_name_char(c))
            .map(|p| p + start)
            .unwrap_or(chars.len());
        let name: String = chars[start..name_end].iter().collect();
        let source: String = chars[i..].iter().collect();

        if name.is_empty() {
            return Err(BuildError::BadSubstitution(source));
        }

        match chars.get(name_end) {
            Some('}') => {
                self.substitute(&name, &chars[i..=name_end], out)?;
                Ok(name_end + 1)
            }
            Some(':') | Some('-') | Some('+') | Some('?') => {
                let colon = chars[name_end] == ':';
                let op_at = if colon { name_end + 1 } else { name_end };
                let op = match chars.get(op_at) {
                    Some(&op) if matches!(op, '-' | '+' | '?') => op,
                    _ => return Err(BuildError::BadSubstitution(source)),
                };
                let word_start = op_at + 1;
                let close = self
                    .matching_brace(chars, word_start)
                    .ok_or_else(|| BuildError::BadSubstitution(source.clone()))?;
                let word_raw: String = chars[word_start..close].iter().collect();

                let value = self.env.lookup(&name);
                let unset = match value {
                    None => true,
                    Some(v) => colon && v.is_empty(),
                };
                match op {
                    '-' => {
                        if unset {
                            out.push_str(&self.resolve(&word_raw)?);
                        } else if let Some(v) = value {
                            out.push_str(v);
                        }
                    }
                    '+' => {
                        if !unset {
                            out.push_str(&self.resolve(&word_raw)?);
                        }
                    }
                    _ => {
                        if unset {
                            return Err(BuildError::UndefinedVariable { name });
                        }
                        if let Some(v) = value {
                            out.push_str(v);
                        }
                    }
                }
                Ok(close + 1)
            }
            _ => Err(BuildError::BadSubstitution(source)),
        }
    }

    /// Index of the `}` closing a modifier word starting at `from`.
    fn matching_brace(&self, chars: &[char], from: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = from;
        while i < chars.len() {
            let c = chars[i];
            if c == self.escape {
                i += 2;
                continue;
            }
            if c == '$' && chars.get(i + 1) == Some(&'{') {
                depth += 1;
                i += 2;
                continue;
            }
            if c == '}' {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            i += 1;
        }
        None
    }

    fn substitute(&self, name: &str, source: &[char], out: &mut String) -> Result<()> {
        match self.env.lookup(name) {
            Some(value) => out.push_str(value),
            None => match self.policy {
                MissingPolicy::Error => {
                    return Err(BuildError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
                MissingPolicy::Empty => {}
                MissingPolicy::Literal => out.extend(source),
            },
        }
        Ok(())
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
