//! Plugin dependency resolution using topological sort.
//!
//! Ensures plugins are activated in the correct order based on their
//! dependencies. Uses Kahn's algorithm for topological sorting with cycle
//! detection. Ties between plugins that become ready at the same time are
//! broken by discovery order, so the same input always yields the same order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use marketplace_sdk::PluginDescriptor;

use super::discovery::DiscoveredPlugins;
use super::error::PluginError;

/// Resolve plugin activation order based on dependencies.
///
/// Returns slugs sorted so that dependencies come before dependents.
///
/// # Errors
/// Returns error if:
/// - A plugin declares a dependency that was not discovered
/// - There is a circular dependency
pub fn resolve_load_order(plugins: &DiscoveredPlugins) -> Result<Vec<String>, PluginError> {
    let count = plugins.len();
    let handles: Vec<_> = plugins.iter().collect();

    // in_degree[i] = number of plugins that plugin i depends on
    let mut in_degree = vec![0usize; count];
    // dependents[d] = plugins that depend on plugin d
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (i, handle) in handles.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &handle.descriptor().dependencies {
            let Some(d) = plugins.position(dep) else {
                return Err(PluginError::MissingDependency {
                    plugin: handle.slug().to_string(),
                    dependency: dep.clone(),
                });
            };
            if seen.insert(d) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    // Kahn's algorithm, always taking the earliest-discovered ready plugin
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != count {
        let ordered: HashSet<usize> = order.iter().copied().collect();
        let mut unresolved: Vec<String> = (0..count)
            .filter(|i| !ordered.contains(i))
            .map(|i| handles[i].slug().to_string())
            .collect();
        unresolved.sort();

        return Err(PluginError::CircularDependency {
            plugins: unresolved,
        });
    }

    Ok(order
        .into_iter()
        .map(|i| handles[i].slug().to_string())
        .collect())
}

/// Check that every dependency of a plugin is in the `active` set.
///
/// Returns the first missing dependency, in declaration order.
pub fn check_dependencies(
    plugin: &PluginDescriptor,
    active: &HashSet<String>,
) -> Result<(), PluginError> {
    match plugin.dependencies.iter().find(|dep| !active.contains(*dep)) {
        Some(dep) => Err(PluginError::DependencyInactive {
            plugin: plugin.slug.clone(),
            dependency: dep.clone(),
        }),
        None => Ok(()),
    }
}
