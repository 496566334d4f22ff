//! Template rendering.
//!
//! Deliberately stringly-typed: the only operations are `{{.name}}`
//! placeholder substitution and Cartesian range enumeration, which is
//! enough for the workloads this engine drives and keeps validation
//! tractable.
//!
//! Three reserved bindings are injected by callers:
//! - `_ENUM_` — per-instance counter when one task produces `count` objects
//! - `_NAME_` — the rendered parent object name, bound while rendering its
//!   expected pod names and its manifest
//! - `_INDEX_` — iteration variable for range expansions; the k-th
//!   `{{._INDEX_}}` occurrence in a pattern takes the k-th range dimension

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENUM_BINDING: &str = "_ENUM_";
pub const NAME_BINDING: &str = "_NAME_";
pub const INDEX_BINDING: &str = "_INDEX_";

/// Flat substitution map for a single render call.
pub type Bindings = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unresolved placeholder '{{{{.{0}}}}}'")]
    MissingBinding(String),

    #[error("malformed placeholder '{{{{{0}}}}}'")]
    BadPlaceholder(String),

    #[error("unterminated placeholder")]
    Unterminated,

    #[error("malformed range '{0}'")]
    BadRange(String),

    #[error("duplicate rendered name '{0}'")]
    DuplicateName(String),
}

/// Substitute every `{{.name}}` placeholder in `template` from `bindings`.
pub fn render(template: &str, bindings: &Bindings) -> Result<String, RenderError> {
    render_with(template, &mut |key| bindings.get(key).cloned().map(Ok))
}

fn render_with(
    template: &str,
    resolve: &mut dyn FnMut(&str) -> Option<Result<String, RenderError>>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(RenderError::Unterminated)?;
        let token = after[..end].trim();
        let key = token
            .strip_prefix('.')
            .ok_or_else(|| RenderError::BadPlaceholder(token.to_string()))?;

        match resolve(key) {
            Some(value) => out.push_str(&value?),
            None => return Err(RenderError::MissingBinding(key.to_string())),
        }

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Produce `count` object names by rendering `nameformat` with
/// `_ENUM_ = 0..count-1` in order. Colliding names are rejected rather than
/// silently creating colliding objects.
pub fn expand_names(
    nameformat: &str,
    count: usize,
    bindings: &Bindings,
) -> Result<Vec<String>, RenderError> {
    let mut names = Vec::with_capacity(count);
    let mut seen = HashSet::with_capacity(count);

    for i in 0..count {
        let mut scoped = bindings.clone();
        scoped.insert(ENUM_BINDING.to_string(), i.to_string());
        let name = render(nameformat, &scoped)?;
        if !seen.insert(name.clone()) {
            return Err(RenderError::DuplicateName(name));
        }
        names.push(name);
    }

    Ok(names)
}

/// Expected-pod enumeration block of a SubmitObj task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodsSpec {
    pub range: RangeSpec,
}

/// A pod-name pattern plus one inclusive integer interval per dimension,
/// each written as `"a-b"` with `a <= b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSpec {
    pub pattern: String,
    #[serde(default)]
    pub ranges: Vec<String>,
}

fn parse_range(raw: &str) -> Result<(i64, i64), RenderError> {
    let bad = || RenderError::BadRange(raw.to_string());
    let (lo, hi) = raw.split_once('-').ok_or_else(bad)?;
    let lo: i64 = lo.trim().parse().map_err(|_| bad())?;
    let hi: i64 = hi.trim().parse().map_err(|_| bad())?;
    if lo > hi {
        return Err(bad());
    }
    Ok((lo, hi))
}

fn combinations(dims: &[(i64, i64)]) -> Vec<Vec<i64>> {
    let mut combos: Vec<Vec<i64>> = vec![Vec::new()];
    for &(lo, hi) in dims {
        let mut next = Vec::with_capacity(combos.len() * (hi - lo + 1) as usize);
        for combo in &combos {
            for value in lo..=hi {
                let mut grown = combo.clone();
                grown.push(value);
                next.push(grown);
            }
        }
        combos = next;
    }
    combos
}

/// Enumerate the expected pod names for a set of parent object names.
///
/// For each parent, `_NAME_` is bound to the parent name and the pattern is
/// rendered once per element of the Cartesian product over the parsed
/// ranges. The result is deterministic and duplicate-free, preserving first
/// occurrence order.
pub fn expand_pod_names(
    spec: &PodsSpec,
    parents: &[String],
    bindings: &Bindings,
) -> Result<Vec<String>, RenderError> {
    let dims = spec
        .range
        .ranges
        .iter()
        .map(|raw| parse_range(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let combos = combinations(&dims);

    let mut pods = Vec::with_capacity(parents.len() * combos.len());
    let mut seen = HashSet::new();

    for parent in parents {
        let mut scoped = bindings.clone();
        scoped.insert(NAME_BINDING.to_string(), parent.clone());

        for combo in &combos {
            let mut next_index = 0usize;
            let name = render_with(&spec.range.pattern, &mut |key| {
                if key == INDEX_BINDING {
                    let value = combo.get(next_index).copied();
                    next_index += 1;
                    return Some(
                        value
                            .map(|v| v.to_string())
                            .ok_or_else(|| RenderError::MissingBinding(INDEX_BINDING.to_string())),
                    );
                }
                scoped.get(key).cloned().map(Ok)
            })?;

            if seen.insert(name.clone()) {
                pods.push(name);
            }
        }
    }

    Ok(pods)
}
