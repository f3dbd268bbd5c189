//! Environment variable inheritance and self-referencing substitution.
//!
//! A step's environment is its parent's resolved environment with the step's
//! declared entries layered on top. A declared value may reference *its own
//! name* with the literal token `$NAME`, which expands to the parent's
//! current value for that variable (the classic `PATH=$PATH:/extra`
//! pattern). This is deliberately narrow: there is no general variable
//! interpolation, and `$OTHER` inside a value for `NAME` is left untouched.

use std::collections::HashMap;

use crate::error::{DirectorError, Result};

/// Environment variable mapping, name to value.
pub type EnvMap = HashMap<String, String>;

/// Snapshot of the ambient process environment, the root of all inheritance.
pub fn ambient() -> EnvMap {
    std::env::vars().collect()
}

/// Combine a parent's resolved environment with a step's declared overrides.
///
/// Every occurrence of `$NAME` inside the declared value for `NAME` is
/// replaced by the parent's value for `NAME` (empty string when the parent
/// has none). If the substituted value re-introduces the token, that is a
/// configuration error rather than a reason to iterate.
pub fn combine(parent: &EnvMap, declared: &EnvMap) -> Result<EnvMap> {
    let mut resolved = parent.clone();
    for (name, value) in declared {
        let token = format!("${}", name);
        let expanded = if value.contains(&token) {
            let current = resolved.get(name).map(String::as_str).unwrap_or("");
            let replaced = value.replace(&token, current);
            if replaced.contains(&token) {
                return Err(DirectorError::EnvSelfReference { name: name.clone() });
            }
            replaced
        } else {
            value.clone()
        };
        resolved.insert(name.clone(), expanded);
    }
    Ok(resolved)
}
