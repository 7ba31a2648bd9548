// Profile inheritance resolution
//
// Iterative fixed-point: a profile whose parent still has a pending inherit
// reference is skipped this pass and picked up on a later one. A full pass
// with pending references but no progress means the references form a cycle.

use super::profile::Profile;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("profile '{child}' inherits non-existing parent '{parent}'")]
    UnknownParent { child: String, parent: String },

    #[error("profile '{0}' cannot inherit from itself")]
    SelfInherit(String),

    #[error("circular inheritance between profiles: {0}")]
    CircularInheritance(String),
}

/// Resolve all pending inherit references in place.
///
/// Child-defined values always take precedence; everything else is copied
/// from the parent chain. Unknown parents and self-references are fatal, as
/// is any cycle (detected as a pass that makes no progress).
pub fn resolve_inheritance(profiles: &mut BTreeMap<String, Profile>) -> Result<(), ResolveError> {
    loop {
        let pending: Vec<String> = profiles
            .values()
            .filter(|p| p.pending_parent().is_some())
            .map(|p| p.name.clone())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut progressed = false;
        for name in &pending {
            let parent_name = match profiles[name].pending_parent() {
                Some(parent) => parent.to_string(),
                None => continue,
            };

            if parent_name == *name {
                return Err(ResolveError::SelfInherit(name.clone()));
            }
            let parent = match profiles.get(&parent_name) {
                Some(parent) => parent,
                None => {
                    return Err(ResolveError::UnknownParent {
                        child: name.clone(),
                        parent: parent_name,
                    })
                }
            };
            // Parent not flattened yet; retry on a later pass
            if parent.pending_parent().is_some() {
                continue;
            }

            let parent = parent.clone();
            let child = profiles.get_mut(name).expect("pending profile exists");
            child.inherit_from(&parent);
            child.clear_parent();
            progressed = true;
        }

        if !progressed {
            return Err(ResolveError::CircularInheritance(pending.join(", ")));
        }
    }
}
