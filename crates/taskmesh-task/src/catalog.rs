use std::collections::{HashMap, HashSet};

use taskmesh_config::ExecutorCatalogDef;

use crate::error::TaskError;

/// Resolves executor tags to concrete executor ids.
#[derive(Debug, Clone, Default)]
pub struct ExecutorCatalog {
  groups: HashMap<String, Vec<String>>,
  function_calling: HashSet<String>,
}

impl ExecutorCatalog {
  pub fn new(def: &ExecutorCatalogDef) -> Self {
    Self {
      groups: def.groups.clone(),
      function_calling: def.function_calling.iter().cloned().collect(),
    }
  }

  /// Expand group names, drop duplicates while keeping first-seen order, and
  /// optionally keep only executors capable of function calling.
  pub fn resolve(&self, tags: &[String], function_calling: bool) -> Result<Vec<String>, TaskError> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for tag in tags {
      let members = match self.groups.get(tag) {
        Some(members) => members.as_slice(),
        None => std::slice::from_ref(tag),
      };
      for member in members {
        if seen.insert(member.as_str()) {
          resolved.push(member.clone());
        }
      }
    }

    if function_calling {
      resolved.retain(|executor| self.function_calling.contains(executor));
    }

    if resolved.is_empty() {
      let reason = if function_calling {
        format!("none of {:?} support function calling", tags)
      } else {
        "no executor tags given".to_string()
      };
      return Err(TaskError::NoExecutors { reason });
    }

    Ok(resolved)
  }
}
