//! Placeholder interpolation over the merged tree.
//!
//! String values of the shape `{{...}}` reference either another value in
//! the same document (dotted path, e.g. `{{env.name}}`) or an external
//! secret (e.g. `{{ssm.path(/app/password).aws_profile(dev)}}`).
//!
//! Resolution runs exactly three full-tree passes: same-document lookup,
//! secret resolution, same-document lookup again. The first pass makes
//! document values available as secret-call parameters; the third lets
//! secret-derived values be referenced by other keys. This is a deliberate
//! contract, not a convergence loop; two-hop chains resolve, longer chains
//! surface through the validator.

use crate::error::{GenerateError, Result};
use crate::secrets::{SecretParams, SecretResolverRegistry};
use crate::tree::flatten_leaves;
use regex_lite::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// The well-formed placeholder shape. `{{` without a matching `}}` on the
/// same scalar is not a placeholder; nesting is impossible by construction
/// (the inner text cannot contain braces).
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder regex"))
}

/// Whether the text contains at least one well-formed placeholder.
pub fn contains_placeholder(text: &str) -> bool {
    placeholder_regex().is_match(text)
}

/// Parsed form of a single placeholder: a leading type token plus the
/// parameters collected from every dot-delimited segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderExpr {
    /// The first token, which selects the secret backend.
    pub secret_type: String,
    /// `name(arg)` segments map to `name -> Some(arg)`; bare segments to
    /// `name -> None`.
    pub params: SecretParams,
}

impl PlaceholderExpr {
    /// Parse the inner text of a placeholder as a secret expression.
    ///
    /// Returns `None` for chains of fewer than two tokens; those are plain
    /// dotted-path references, not secret calls. Dots inside `name(arg)`
    /// argument text do not split tokens.
    pub fn parse(inner: &str) -> Option<Self> {
        let tokens = split_tokens(inner);
        if tokens.len() <= 1 {
            return None;
        }

        let secret_type = tokens[0]
            .split_once('(')
            .map(|(name, _)| name)
            .unwrap_or(&tokens[0])
            .to_string();

        let mut params = SecretParams::new();
        for token in &tokens {
            match token.split_once('(') {
                Some((name, rest)) => {
                    let arg = rest.rsplit_once(')').map(|(a, _)| a).unwrap_or(rest);
                    params.insert(name.to_string(), Some(arg.to_string()));
                }
                None => {
                    params.insert(token.clone(), None);
                }
            }
        }
        Some(Self {
            secret_type,
            params,
        })
    }
}

/// Split a placeholder's inner text on dots at paren depth zero.
fn split_tokens(inner: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in inner.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '.' if depth == 0 => tokens.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    tokens.push(current);
    tokens
}

/// Runs the three-pass resolution over a tree.
pub struct InterpolationEngine<'a> {
    registry: &'a SecretResolverRegistry,
}

impl<'a> InterpolationEngine<'a> {
    pub fn new(registry: &'a SecretResolverRegistry) -> Self {
        Self { registry }
    }

    /// The full resolution contract: document pass, secret pass, document
    /// pass. Exactly three, in this order.
    pub fn resolve(&self, tree: &mut Value) -> Result<()> {
        Self::resolve_document_pass(tree);
        self.resolve_secret_pass(tree)?;
        Self::resolve_document_pass(tree);
        Ok(())
    }

    /// One same-document pass: every placeholder whose dotted path names a
    /// scalar leaf of the tree is substituted. Unresolvable placeholders
    /// are left for a later pass or the validator.
    pub fn resolve_document_pass(tree: &mut Value) {
        let leaves = flatten_leaves(tree);
        rewrite_strings(tree, &mut |text| resolve_from_document(text, &leaves));
    }

    /// One secret pass: placeholders whose leading token names a registered
    /// backend are resolved through the registry. Backend failures are
    /// fatal; unsupported types and malformed expressions are left alone.
    pub fn resolve_secret_pass(&self, tree: &mut Value) -> Result<()> {
        visit_strings(tree, &mut |text| self.resolve_secrets_in(text))
    }

    fn resolve_secrets_in(&self, text: &str) -> Result<Option<Value>> {
        if !contains_placeholder(text) {
            return Ok(None);
        }

        let mut resolved = text.to_string();
        let mut changed = false;
        for caps in placeholder_regex().captures_iter(text) {
            let literal = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let Some(expr) = PlaceholderExpr::parse(inner) else {
                continue;
            };
            if !self.registry.supports(&expr.secret_type) {
                continue;
            }
            let secret = self.registry.resolve(&expr.secret_type, &expr.params)?;
            debug!(secret_type = %expr.secret_type, "resolved secret placeholder");
            resolved = resolved.replace(literal, &secret);
            changed = true;
        }
        Ok(changed.then_some(Value::String(resolved)))
    }
}

/// Resolve same-document references inside one string value.
///
/// A value that is exactly one placeholder is replaced type-preservingly;
/// placeholders embedded in longer text are substituted textually, with
/// numbers and booleans stringified. Referenced values that still contain a
/// placeholder themselves are never substituted, which keeps circular
/// references unresolved through every pass.
fn resolve_from_document(text: &str, leaves: &BTreeMap<String, Value>) -> Option<Value> {
    let re = placeholder_regex();

    // Whole-string placeholder: type-preserving replacement
    if let Some(m) = re.find(text)
        && m.start() == 0
        && m.end() == text.len()
    {
        let inner = &text[2..text.len() - 2];
        let target = leaves.get(inner)?;
        if still_unresolved(target) {
            return None;
        }
        return Some(target.clone());
    }

    // Embedded placeholders: textual substitution
    let mut resolved = text.to_string();
    let mut changed = false;
    for caps in re.captures_iter(text) {
        let literal = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let Some(target) = leaves.get(inner) else {
            continue;
        };
        if still_unresolved(target) {
            continue;
        }
        let Some(replacement) = scalar_text(target) else {
            continue;
        };
        resolved = resolved.replace(literal, &replacement);
        changed = true;
    }
    changed.then_some(Value::String(resolved))
}

fn still_unresolved(value: &Value) -> bool {
    matches!(value, Value::String(s) if contains_placeholder(s))
}

/// Inline text form of a scalar. Mappings, sequences and nulls have no
/// inline form and are left for the validator.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Depth-first rewrite of every string value; the callback may return a
/// replacement node. Mapping keys are never touched.
fn rewrite_strings<F>(value: &mut Value, rewrite: &mut F)
where
    F: FnMut(&str) -> Option<Value>,
{
    match value {
        Value::String(text) => {
            if let Some(replacement) = rewrite(text) {
                *value = replacement;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                rewrite_strings(item, rewrite);
            }
        }
        Value::Mapping(mapping) => {
            for (_, child) in mapping.iter_mut() {
                rewrite_strings(child, rewrite);
            }
        }
        _ => {}
    }
}

/// Fallible variant of [`rewrite_strings`] for the secret pass, where a
/// backend failure aborts the walk.
fn visit_strings<F>(value: &mut Value, visit: &mut F) -> Result<()>
where
    F: FnMut(&str) -> Result<Option<Value>>,
{
    match value {
        Value::String(text) => {
            if let Some(replacement) = visit(text)? {
                *value = replacement;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                visit_strings(item, visit)?;
            }
        }
        Value::Mapping(mapping) => {
            for (_, child) in mapping.iter_mut() {
                visit_strings(child, visit)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Strict post-resolution check: no well-formed placeholder may remain.
pub struct InterpolationValidator;

impl InterpolationValidator {
    /// Walk the final tree and fail with every remaining placeholder and
    /// its dotted location.
    pub fn check(tree: &Value) -> Result<()> {
        let mut failures: Vec<(String, String)> = Vec::new();
        collect_unresolved(tree, String::new(), &mut failures);
        if failures.is_empty() {
            return Ok(());
        }
        let listing: Vec<String> = failures
            .iter()
            .map(|(path, literal)| format!("  {}: {}", path, literal))
            .collect();
        Err(GenerateError::Validation(listing.join("\n")))
    }
}

fn collect_unresolved(value: &Value, path: String, failures: &mut Vec<(String, String)>) {
    match value {
        Value::String(text) => {
            if contains_placeholder(text) {
                failures.push((path, text.clone()));
            }
        }
        Value::Sequence(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_unresolved(item, format!("{}[{}]", path, index), failures);
            }
        }
        Value::Mapping(mapping) => {
            for (k, child) in mapping {
                let key = crate::merge::key_text(k);
                let child_path = if path.is_empty() {
                    key
                } else {
                    format!("{}.{}", path, key)
                };
                collect_unresolved(child, child_path, failures);
            }
        }
        _ => {}
    }
}
