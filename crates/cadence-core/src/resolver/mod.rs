//! Dependency resolution: id repair, implicit sequential edges and a
//! deterministic, cycle-tolerant linearization.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DependencyWarning;
use crate::types::{ExecutionMode, ToolInvocation};

/// Ordered batch plus everything learned while ordering it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Invocations in execution order.
    pub invocations: Vec<ToolInvocation>,
    /// Repaired ids in declaration order.
    pub declared: Vec<String>,
    /// Readiness waves (ids); every id of a wave depends only on earlier waves.
    /// Cycle members form the final wave.
    pub waves: Vec<Vec<String>>,
    /// Ids that could not be ordered because of a cycle.
    pub cyclic: Vec<String>,
    pub warnings: Vec<DependencyWarning>,
}

impl Resolution {
    pub fn ids(&self) -> Vec<&str> {
        self.invocations.iter().map(|inv| inv.id.as_str()).collect()
    }
}

/// Repair and order a batch for `mode`.
///
/// Never fails: duplicates are renamed, dangling and self edges dropped, and
/// cycle members appended in declaration order.
pub fn resolve(mut invocations: Vec<ToolInvocation>, mode: ExecutionMode) -> Resolution {
    let mut warnings = repair(&mut invocations);
    if mode == ExecutionMode::Sequential {
        chain_sequential(invocations.iter_mut());
    }
    let declared = invocations.iter().map(|inv| inv.id.clone()).collect();

    let (order, waves, cyclic) = linearize(&invocations);
    if !cyclic.is_empty() {
        tracing::warn!(ids = ?cyclic, "dependency cycle; scheduling in declaration order");
        warnings.push(DependencyWarning::Cycle { ids: cyclic.clone() });
    }

    let mut slots: Vec<Option<ToolInvocation>> = invocations.into_iter().map(Some).collect();
    let invocations = order.into_iter().filter_map(|idx| slots[idx].take()).collect();

    Resolution {
        invocations,
        declared,
        waves,
        cyclic,
        warnings,
    }
}

/// Report what [`repair`] and [`resolve`] would change, without changing it.
pub fn validate(invocations: &[ToolInvocation]) -> Vec<DependencyWarning> {
    let mut copy = invocations.to_vec();
    let mut warnings = repair(&mut copy);
    let (_, _, cyclic) = linearize(&copy);
    if !cyclic.is_empty() {
        warnings.push(DependencyWarning::Cycle { ids: cyclic });
    }
    warnings
}

/// Make ids unique and drop self and dangling `depends_on` edges.
pub fn repair(invocations: &mut [ToolInvocation]) -> Vec<DependencyWarning> {
    let mut warnings = Vec::new();
    let declared: HashSet<String> = invocations.iter().map(|inv| inv.id.clone()).collect();
    let mut taken: HashSet<String> = HashSet::new();

    for (idx, invocation) in invocations.iter_mut().enumerate() {
        if invocation.id.trim().is_empty() {
            invocation.id = free_id(&format!("tool-{}", idx + 1), &declared, &taken);
        }
        if taken.contains(&invocation.id) {
            let replacement = free_id(&invocation.id, &declared, &taken);
            tracing::warn!(original = %invocation.id, %replacement, "duplicate invocation id");
            warnings.push(DependencyWarning::DuplicateId {
                original: std::mem::replace(&mut invocation.id, replacement.clone()),
                replacement,
            });
        }
        taken.insert(invocation.id.clone());
    }

    for invocation in invocations.iter_mut() {
        let Some(dep) = invocation.depends_on.as_deref() else {
            continue;
        };
        if dep == invocation.id {
            tracing::warn!(id = %invocation.id, "self dependency dropped");
            warnings.push(DependencyWarning::SelfDependency {
                id: invocation.id.clone(),
            });
            invocation.depends_on = None;
        } else if !taken.contains(dep) {
            tracing::warn!(id = %invocation.id, depends_on = %dep, "dangling dependency dropped");
            warnings.push(DependencyWarning::DanglingDependency {
                id: invocation.id.clone(),
                depends_on: dep.to_string(),
            });
            invocation.depends_on = None;
        }
    }

    warnings
}

/// Give every invocation without an explicit `depends_on` an edge to the one
/// declared right before it.
pub fn chain_sequential<'a>(invocations: impl IntoIterator<Item = &'a mut ToolInvocation>) {
    let mut previous: Option<String> = None;
    for invocation in invocations {
        if invocation.depends_on.is_none() {
            invocation.depends_on = previous.clone();
        }
        previous = Some(invocation.id.clone());
    }
}

/// The id an invocation waits for: its explicit edge, or else the source of
/// its condition.
pub fn scheduling_dependency(invocation: &ToolInvocation) -> Option<&str> {
    invocation
        .depends_on
        .as_deref()
        .or_else(|| invocation.condition.as_ref().map(|c| c.source_id.as_str()))
        .filter(|dep| *dep != invocation.id)
}

type Linearized = (Vec<usize>, Vec<Vec<String>>, Vec<String>);

fn linearize(invocations: &[ToolInvocation]) -> Linearized {
    let known: HashSet<&str> = invocations.iter().map(|inv| inv.id.as_str()).collect();
    let mut scheduled: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..invocations.len()).collect();
    let mut order = Vec::with_capacity(invocations.len());
    let mut waves = Vec::new();

    loop {
        let ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|idx| {
                scheduling_dependency(&invocations[*idx])
                    .map_or(true, |dep| !known.contains(dep) || scheduled.contains(dep))
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for idx in &ready {
            scheduled.insert(invocations[*idx].id.as_str());
        }
        remaining.retain(|idx| !ready.contains(idx));
        waves.push(ready.iter().map(|idx| invocations[*idx].id.clone()).collect());
        order.extend(ready);
    }

    let cyclic: Vec<String> = remaining
        .iter()
        .map(|idx| invocations[*idx].id.clone())
        .collect();
    if !cyclic.is_empty() {
        waves.push(cyclic.clone());
        order.extend(remaining);
    }
    (order, waves, cyclic)
}

fn free_id(base: &str, declared: &HashSet<String>, taken: &HashSet<String>) -> String {
    if !declared.contains(base) && !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|k| format!("{base}-{k}"))
        .find(|candidate| !declared.contains(candidate) && !taken.contains(candidate))
        .unwrap_or_else(|| format!("{base}-{}", taken.len() + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, ConditionKind};
    use pretty_assertions::assert_eq;

    fn inv(id: &str) -> ToolInvocation {
        ToolInvocation::new(id, "read_file").with_param("path", format!("{id}.rs"))
    }

    #[test]
    fn sequential_mode_chains_declaration_order() {
        let resolution = resolve(vec![inv("1"), inv("2"), inv("3")], ExecutionMode::Sequential);

        assert_eq!(resolution.ids(), vec!["1", "2", "3"]);
        let deps: Vec<_> = resolution
            .invocations
            .iter()
            .map(|inv| inv.depends_on.as_deref())
            .collect();
        assert_eq!(deps, vec![None, Some("1"), Some("2")]);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn parallel_mode_adds_no_edges_but_honors_explicit_ones() {
        let resolution = resolve(
            vec![inv("a").with_depends_on("c"), inv("b"), inv("c")],
            ExecutionMode::Parallel,
        );

        assert_eq!(resolution.ids(), vec!["b", "c", "a"]);
        assert_eq!(
            resolution.waves,
            vec![vec!["b".to_string(), "c".to_string()], vec!["a".to_string()]]
        );
        assert_eq!(resolution.invocations[0].depends_on, None);
    }

    #[test]
    fn two_node_cycle_keeps_declaration_order() {
        let resolution = resolve(
            vec![inv("A").with_depends_on("B"), inv("B").with_depends_on("A")],
            ExecutionMode::Parallel,
        );

        assert_eq!(resolution.ids(), vec!["A", "B"]);
        assert_eq!(resolution.cyclic, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            resolution.warnings,
            vec![DependencyWarning::Cycle {
                ids: vec!["A".into(), "B".into()]
            }]
        );
    }

    #[test]
    fn cycle_does_not_block_independent_invocations() {
        let resolution = resolve(
            vec![
                inv("x").with_depends_on("y"),
                inv("free"),
                inv("y").with_depends_on("x"),
            ],
            ExecutionMode::Parallel,
        );

        assert_eq!(resolution.ids(), vec!["free", "x", "y"]);
        assert_eq!(resolution.cyclic.len(), 2);
    }

    #[test]
    fn duplicate_ids_are_renamed() {
        let mut batch = vec![inv("a"), inv("a"), inv("a-2"), inv("a")];
        let warnings = repair(&mut batch);

        let ids: Vec<_> = batch.iter().map(|inv| inv.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a-3", "a-2", "a-4"]);
        assert_eq!(
            warnings[0],
            DependencyWarning::DuplicateId {
                original: "a".into(),
                replacement: "a-3".into()
            }
        );
    }

    #[test]
    fn self_and_dangling_edges_are_dropped() {
        let mut batch = vec![inv("a").with_depends_on("a"), inv("b").with_depends_on("ghost")];
        let warnings = repair(&mut batch);

        assert!(batch.iter().all(|inv| inv.depends_on.is_none()));
        assert_eq!(
            warnings,
            vec![
                DependencyWarning::SelfDependency { id: "a".into() },
                DependencyWarning::DanglingDependency {
                    id: "b".into(),
                    depends_on: "ghost".into()
                },
            ]
        );
    }

    #[test]
    fn empty_ids_get_positional_ones() {
        let mut batch = vec![ToolInvocation::new("", "read_file"), ToolInvocation::new("", "read_file")];
        repair(&mut batch);
        assert_eq!(batch[0].id, "tool-1");
        assert_eq!(batch[1].id, "tool-2");
    }

    #[test]
    fn condition_source_orders_like_a_dependency() {
        let gated = inv("gated").with_condition(Condition::new(ConditionKind::Error, "probe", ""));
        let resolution = resolve(vec![gated, inv("probe")], ExecutionMode::Parallel);

        assert_eq!(resolution.ids(), vec!["probe", "gated"]);
    }

    #[test]
    fn validate_reports_without_mutating() {
        let batch = vec![inv("a").with_depends_on("b"), inv("b").with_depends_on("a"), inv("a")];
        let warnings = validate(&batch);

        assert_eq!(batch[2].id, "a");
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], DependencyWarning::DuplicateId { .. }));
        assert!(matches!(warnings[1], DependencyWarning::Cycle { .. }));
    }
}
