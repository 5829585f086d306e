//! 流程依赖图
//!
//! 依赖 = depends_on ∪ 模板引用；使用邻接表和入度表做 Kahn 拓扑排序，
//! 有环时用 DFS 找出一条具体的环用于报错。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::core::ProcessStructureError;
use crate::workflow::template::{is_referenceable, malformed_references, references};
use crate::workflow::types::*;

/// 依赖边的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// 模板引用了上游输出
    Output,
    /// 仅在 depends_on 中声明，只要求上游结束
    Completion,
}

/// 一条上游依赖
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub step: usize,
    pub kind: EdgeKind,
}

/// 流程依赖图（步骤以声明顺序下标表示）
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<StepId>,
    /// 邻接表：步骤 -> 依赖该步骤的步骤列表
    adjacency: Vec<Vec<usize>>,
    /// 步骤 -> 上游依赖
    upstream: Vec<Vec<Dependency>>,
    /// 入度表
    in_degree: Vec<usize>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// 校验结构并构建依赖图
    pub fn build(def: &ProcessDefinition) -> Result<Self, ProcessStructureError> {
        if def.steps.is_empty() {
            return Err(ProcessStructureError::EmptyProcess(def.id.clone()));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, step) in def.steps.iter().enumerate() {
            if step.id == INPUT_REF {
                return Err(ProcessStructureError::ReservedStepId(step.id.clone()));
            }
            if !is_referenceable(&step.id) {
                return Err(ProcessStructureError::InvalidStepId(step.id.clone()));
            }
            if index.insert(step.id.as_str(), i).is_some() {
                return Err(ProcessStructureError::DuplicateStepId(step.id.clone()));
            }
        }

        let n = def.steps.len();
        let mut adjacency = vec![Vec::new(); n];
        let mut upstream = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];

        for (i, step) in def.steps.iter().enumerate() {
            let explicit: HashSet<&str> = step.depends_on.iter().map(String::as_str).collect();
            let mut output_deps = BTreeSet::new();
            let mut completion_deps = BTreeSet::new();

            for dep in &step.depends_on {
                let j = resolve_ref(&index, &step.id, dep)?;
                completion_deps.insert(j);
            }

            if let Some(reference) = malformed_references(&step.context).into_iter().next() {
                return Err(ProcessStructureError::UnknownStepReference {
                    step: step.id.clone(),
                    reference,
                });
            }

            for reference in references(&step.context) {
                if reference.step == INPUT_REF {
                    continue;
                }
                let j = resolve_ref(&index, &step.id, &reference.step)?;
                if j > i && !explicit.contains(reference.step.as_str()) {
                    return Err(ProcessStructureError::ForwardReference {
                        step: step.id.clone(),
                        reference: reference.step,
                    });
                }
                output_deps.insert(j);
            }

            for j in completion_deps.union(&output_deps) {
                let kind = if output_deps.contains(j) {
                    EdgeKind::Output
                } else {
                    EdgeKind::Completion
                };
                upstream[i].push(Dependency { step: *j, kind });
                adjacency[*j].push(i);
                in_degree[i] += 1;
            }
        }

        let mut graph = Self {
            ids: def.steps.iter().map(|s| s.id.clone()).collect(),
            adjacency,
            upstream,
            in_degree,
            order: Vec::new(),
        };
        graph.order = graph.sort()?;
        Ok(graph)
    }

    /// Kahn 拓扑排序；同层按声明顺序
    fn sort(&self) -> Result<Vec<usize>, ProcessStructureError> {
        let n = self.ids.len();
        let mut degree = self.in_degree.clone();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &next in &self.adjacency[node] {
                degree[next] -= 1;
                if degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < n {
            let mut remaining = vec![true; n];
            for &i in &order {
                remaining[i] = false;
            }
            return Err(ProcessStructureError::CyclicDependency {
                steps: self.find_cycle(&remaining),
            });
        }
        Ok(order)
    }

    fn find_cycle(&self, remaining: &[bool]) -> Vec<StepId> {
        let mut state = vec![Visit::New; self.ids.len()];
        let mut stack = Vec::new();
        for start in 0..self.ids.len() {
            if remaining[start] && state[start] == Visit::New {
                if let Some(cycle) = self.dfs_cycle(start, remaining, &mut state, &mut stack) {
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    fn dfs_cycle(
        &self,
        node: usize,
        remaining: &[bool],
        state: &mut [Visit],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<StepId>> {
        state[node] = Visit::OnStack;
        stack.push(node);
        for &next in &self.adjacency[node] {
            if !remaining[next] {
                continue;
            }
            match state[next] {
                Visit::OnStack => {
                    let pos = stack.iter().position(|&s| s == next)?;
                    let mut cycle: Vec<StepId> =
                        stack[pos..].iter().map(|&i| self.ids[i].clone()).collect();
                    cycle.push(self.ids[next].clone());
                    return Some(cycle);
                }
                Visit::New => {
                    if let Some(cycle) = self.dfs_cycle(next, remaining, state, stack) {
                        return Some(cycle);
                    }
                }
                Visit::Done => {}
            }
        }
        stack.pop();
        state[node] = Visit::Done;
        None
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|s| s == id)
    }

    /// 上游依赖（含边种类）
    pub fn dependencies(&self, index: usize) -> &[Dependency] {
        &self.upstream[index]
    }

    /// 直接下游
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.adjacency[index]
    }

    pub fn in_degree(&self, index: usize) -> usize {
        self.in_degree[index]
    }

    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// 所有传递下游，按声明顺序
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.adjacency[index].iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node) {
                queue.extend(self.adjacency[node].iter().copied());
            }
        }
        seen.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

fn resolve_ref(
    index: &HashMap<&str, usize>,
    step: &str,
    reference: &str,
) -> Result<usize, ProcessStructureError> {
    if reference == step {
        return Err(ProcessStructureError::CyclicDependency {
            steps: vec![step.to_string(), step.to_string()],
        });
    }
    index
        .get(reference)
        .copied()
        .ok_or_else(|| ProcessStructureError::UnknownStepReference {
            step: step.to_string(),
            reference: reference.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TaskRequest;
    use serde_json::json;

    fn step(id: &str, context: serde_json::Value, deps: &[&str]) -> StepSpec {
        let mut s = StepSpec::new(id, TaskRequest::handler("h"));
        s.context = context;
        s.depends_on = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    fn process(steps: Vec<StepSpec>) -> ProcessDefinition {
        ProcessDefinition {
            id: "p".into(),
            name: "p".into(),
            description: None,
            steps,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_graph_construction_sequential() {
        let graph = DependencyGraph::build(&process(vec![
            step("a", json!({"value": "${input.value}"}), &[]),
            step("b", json!({"value": "${a.value}"}), &[]),
            step("c", json!({}), &["b"]),
        ]))
        .unwrap();

        assert_eq!(graph.in_degree(0), 0);
        assert_eq!(graph.in_degree(1), 1);
        assert_eq!(graph.dependencies(1)[0].kind, EdgeKind::Output);
        assert_eq!(graph.dependencies(2)[0].kind, EdgeKind::Completion);
        assert_eq!(graph.topological_order(), &[0, 1, 2]);
        assert_eq!(graph.descendants(0), vec![1, 2]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let err = DependencyGraph::build(&process(vec![
            step("a", json!({}), &["b"]),
            step("b", json!({"x": "${a}"}), &[]),
        ]))
        .unwrap_err();
        match err {
            ProcessStructureError::CyclicDependency { steps } => {
                assert_eq!(steps.first(), steps.last());
                assert!(steps.contains(&"a".to_string()));
                assert!(steps.contains(&"b".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = DependencyGraph::build(&process(vec![step("a", json!({"x": "${a.x}"}), &[])]))
            .unwrap_err();
        assert_eq!(
            err,
            ProcessStructureError::CyclicDependency {
                steps: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_structural_errors() {
        let err = DependencyGraph::build(&process(vec![step("a", json!({"x": "${ghost}"}), &[])]))
            .unwrap_err();
        assert!(matches!(err, ProcessStructureError::UnknownStepReference { .. }));

        let err = DependencyGraph::build(&process(vec![
            step("a", json!({"x": "${b}"}), &[]),
            step("b", json!({}), &[]),
        ]))
        .unwrap_err();
        assert!(matches!(err, ProcessStructureError::ForwardReference { .. }));

        let err = DependencyGraph::build(&process(vec![
            step("a", json!({}), &[]),
            step("a", json!({}), &[]),
        ]))
        .unwrap_err();
        assert_eq!(err, ProcessStructureError::DuplicateStepId("a".into()));

        let err = DependencyGraph::build(&process(vec![step("input", json!({}), &[])])).unwrap_err();
        assert_eq!(err, ProcessStructureError::ReservedStepId("input".into()));

        let err = DependencyGraph::build(&process(vec![])).unwrap_err();
        assert_eq!(err, ProcessStructureError::EmptyProcess("p".into()));
    }

    #[test]
    fn test_step_ids_outside_reference_grammar() {
        let err = DependencyGraph::build(&process(vec![
            step("first step", json!({}), &[]),
            step("second", json!({"v": "${first step.v}"}), &[]),
        ]))
        .unwrap_err();
        assert_eq!(err, ProcessStructureError::InvalidStepId("first step".into()));

        let err = DependencyGraph::build(&process(vec![
            step("first", json!({}), &[]),
            step("second", json!({"v": "${ghost step.v}"}), &[]),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ProcessStructureError::UnknownStepReference {
                step: "second".into(),
                reference: "ghost step.v".into(),
            }
        );

        // 只是包含 `${` 的字符串仍是字面量
        let graph = DependencyGraph::build(&process(vec![
            step("first", json!({}), &[]),
            step("second", json!({"note": "costs ${price} today"}), &[]),
        ]))
        .unwrap();
        assert!(graph.dependencies(1).is_empty());
    }

    #[test]
    fn test_explicit_forward_dependency_is_allowed() {
        let graph = DependencyGraph::build(&process(vec![
            step("report", json!({"data": "${fetch}"}), &["fetch"]),
            step("fetch", json!({}), &[]),
        ]))
        .unwrap();
        assert_eq!(graph.topological_order(), &[1, 0]);
        assert_eq!(graph.dependencies(0)[0].kind, EdgeKind::Output);
    }
}
