//! Enhancer ordering.
//!
//! # Algorithm
//!
//! Ordering is a topological sort over the enhancer list:
//!
//! 1. For every declared dependency, find the enhancers in the list that
//!    provide it (by name or by a `provides` entry) and add an edge from
//!    each provider to the dependent.
//! 2. A dependency no enhancer in the list provides must already be
//!    available on the tree; otherwise resolution fails naming it.
//! 3. `after` hints add edges only when the named enhancer is in the list.
//! 4. Kahn's algorithm, always taking the ready enhancer declared earliest,
//!    yields the order. Enhancers left over sit on a cycle.
//!
//! Taking the earliest ready enhancer makes the sort stable: a list that
//! already satisfies its constraints comes back unchanged.

use std::collections::BTreeSet;

use crate::error::{Result, TreeError};

use super::{Enhancer, EnhancerMetadata};

/// Order enhancer metadata, returning indices into `metadata`.
pub fn resolve_order<A: AsRef<str>>(
    metadata: &[EnhancerMetadata],
    available: &[A],
) -> Result<Vec<usize>> {
    let count = metadata.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut in_degree = vec![0usize; count];

    let mut add_edge = |from: usize, to: usize| {
        if from != to && !dependents[from].contains(&to) {
            dependents[from].push(to);
            in_degree[to] += 1;
        }
    };

    for (index, meta) in metadata.iter().enumerate() {
        for capability in &meta.depends_on {
            let providers: Vec<usize> = metadata
                .iter()
                .enumerate()
                .filter(|(other, m)| *other != index && m.satisfies(capability))
                .map(|(other, _)| other)
                .collect();

            if providers.is_empty() {
                if !available.iter().any(|a| a.as_ref() == capability) {
                    return Err(TreeError::MissingDependency {
                        enhancer: meta.name.clone(),
                        capability: capability.clone(),
                    });
                }
                continue;
            }
            for provider in providers {
                add_edge(provider, index);
            }
        }

        for hint in &meta.after {
            for (other, m) in metadata.iter().enumerate() {
                if other != index && &m.name == hint {
                    add_edge(other, index);
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < count {
        let enhancers = (0..count)
            .filter(|i| in_degree[*i] > 0)
            .map(|i| metadata[i].name.clone())
            .collect();
        return Err(TreeError::DependencyCycle { enhancers });
    }

    Ok(order)
}

/// Order enhancers so each one's dependencies are applied before it.
///
/// Nothing is applied here; a failure leaves every enhancer unrun.
pub fn resolve_enhancer_order<A: AsRef<str>>(
    enhancers: Vec<Box<dyn Enhancer>>,
    available: &[A],
) -> Result<Vec<Box<dyn Enhancer>>> {
    let metadata: Vec<EnhancerMetadata> = enhancers.iter().map(|e| e.metadata()).collect();
    let order = resolve_order(&metadata, available)?;

    tracing::debug!(
        order = ?order.iter().map(|&i| metadata[i].name.as_str()).collect::<Vec<_>>(),
        "resolved enhancer order"
    );

    let mut slots: Vec<Option<Box<dyn Enhancer>>> = enhancers.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, depends_on: &[&str]) -> EnhancerMetadata {
        EnhancerMetadata::new(name).depends_on(depends_on.iter().copied())
    }

    fn names(metadata: &[EnhancerMetadata], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| metadata[i].name.clone()).collect()
    }

    #[test]
    fn satisfied_list_keeps_declaration_order() {
        let list = vec![meta("a", &[]), meta("b", &["a"]), meta("c", &[])];
        let order = resolve_order(&list, &["core"]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn dependencies_move_ahead() {
        let list = vec![meta("timeTravel", &["batching"]), meta("batching", &[])];
        let order = resolve_order(&list, &["core"]).unwrap();
        assert_eq!(names(&list, &order), vec!["batching", "timeTravel"]);
    }

    #[test]
    fn provides_satisfies_dependency() {
        let list = vec![
            meta("needsStore", &["store"]),
            EnhancerMetadata::new("memory").provides(["store"]),
        ];
        let order = resolve_order(&list, &["core"]).unwrap();
        assert_eq!(names(&list, &order), vec!["memory", "needsStore"]);
    }

    #[test]
    fn available_capability_needs_no_provider() {
        let list = vec![meta("entities", &["core"])];
        assert_eq!(resolve_order(&list, &["core"]).unwrap(), vec![0]);
    }

    #[test]
    fn missing_capability_is_named() {
        let list = vec![meta("a", &[]), meta("b", &["ghost"])];
        let err = resolve_order(&list, &["core"]).unwrap_err();
        assert_eq!(
            err,
            TreeError::MissingDependency {
                enhancer: "b".into(),
                capability: "ghost".into(),
            }
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let list = vec![meta("a", &["b"]), meta("b", &["a"]), meta("c", &[])];
        match resolve_order(&list, &["core"]) {
            Err(TreeError::DependencyCycle { enhancers }) => {
                assert_eq!(enhancers, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn after_hint_only_applies_when_present() {
        let list = vec![
            EnhancerMetadata::new("devtools").after(["batching"]),
            meta("batching", &[]),
        ];
        let order = resolve_order(&list, &["core"]).unwrap();
        assert_eq!(names(&list, &order), vec!["batching", "devtools"]);

        let alone = vec![EnhancerMetadata::new("devtools").after(["batching"])];
        assert_eq!(resolve_order(&alone, &["core"]).unwrap(), vec![0]);
    }
}
