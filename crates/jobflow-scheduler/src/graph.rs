//! Dependency graph over job names, built once from `depends_on` edges.

use std::collections::HashMap;

use crate::{
    error::{Result, SchedulerError},
    types::JobSpec,
};

/// Read-only adjacency: for each job, the jobs that list it as a dependency.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    downstream: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph, rejecting unknown dependencies and cycles.
    pub fn build(specs: &[JobSpec]) -> Result<Self> {
        let mut downstream: HashMap<String, Vec<String>> = specs
            .iter()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();

        for spec in specs {
            for dep in &spec.depends_on {
                let edges = downstream.get_mut(dep).ok_or_else(|| {
                    SchedulerError::UnknownDependency {
                        job: spec.name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                if !edges.contains(&spec.name) {
                    edges.push(spec.name.clone());
                }
            }
        }

        let graph = Self { downstream };
        graph.check_acyclic(specs)?;
        Ok(graph)
    }

    /// Jobs that depend directly on `name`, in definition order.
    pub fn downstream(&self, name: &str) -> &[String] {
        self.downstream.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn check_acyclic(&self, specs: &[JobSpec]) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        for spec in specs {
            if marks.contains_key(spec.name.as_str()) {
                continue;
            }
            // Iterative DFS: (node, index of next child to visit).
            let mut stack: Vec<(&str, usize)> = vec![(spec.name.as_str(), 0)];
            marks.insert(spec.name.as_str(), Mark::Visiting);

            while let Some((node, idx)) = stack.pop() {
                let children = self.downstream(node);
                if let Some(child) = children.get(idx) {
                    stack.push((node, idx + 1));
                    match marks.get(child.as_str()) {
                        Some(Mark::Visiting) => {
                            return Err(SchedulerError::DependencyCycle { job: child.clone() })
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child.as_str(), Mark::Visiting);
                            stack.push((child.as_str(), 0));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, deps: &[&str]) -> JobSpec {
        JobSpec::new(name, "true").depends_on(deps.iter().copied())
    }

    #[test]
    fn downstream_lists_dependents() {
        let specs = vec![spec("a", &[]), spec("b", &[]), spec("c", &["a", "b"]), spec("d", &["a"])];
        let graph = DependencyGraph::build(&specs).unwrap();
        assert_eq!(graph.downstream("a"), ["c".to_string(), "d".to_string()]);
        assert_eq!(graph.downstream("b"), ["c".to_string()]);
        assert!(graph.downstream("c").is_empty());
        assert!(graph.downstream("missing").is_empty());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = DependencyGraph::build(&[spec("a", &["ghost"])]).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::UnknownDependency { ref job, ref dependency }
                if job == "a" && dependency == "ghost"
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let specs = vec![spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"])];
        assert!(matches!(
            DependencyGraph::build(&specs),
            Err(SchedulerError::DependencyCycle { .. })
        ));
        assert!(matches!(
            DependencyGraph::build(&[spec("self", &["self"])]),
            Err(SchedulerError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let specs = vec![
            spec("root", &[]),
            spec("left", &["root"]),
            spec("right", &["root"]),
            spec("join", &["left", "right"]),
        ];
        assert!(DependencyGraph::build(&specs).is_ok());
    }
}
