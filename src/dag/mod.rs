//! DAG construction and readiness computation.
//!
//! Validates edges against declared stage names, detects cycles via a
//! three-color DFS, and computes ready sets over a general multi-predecessor
//! dependency graph.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// A stage's position in the DAG: its name and declared dependencies.
#[derive(Debug, Clone)]
pub struct StageNode {
    pub name: String,
    pub depends_on: HashSet<String>,
}

/// A validated (or about-to-be-validated) set of stages and their edges.
#[derive(Debug, Clone)]
pub struct Dag {
    order: Vec<String>,
    nodes: HashMap<String, StageNode>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("dag has no stages")]
    Empty,
    #[error("cycle detected involving stage {0}")]
    Cycle(String),
    #[error("stage {stage} depends on unknown stage {missing}")]
    MissingDep { stage: String, missing: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl Dag {
    /// Builds a `Dag` from a stage list, preserving declaration order for
    /// stable ready-set tie-breaking. Does not validate; call `validate`.
    pub fn build(stages: &[StageNode]) -> Dag {
        let mut nodes = HashMap::with_capacity(stages.len());
        let mut order = Vec::with_capacity(stages.len());
        for s in stages {
            order.push(s.name.clone());
            nodes.insert(s.name.clone(), s.clone());
        }
        Dag { order, nodes }
    }

    pub fn stage_names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn depends_on(&self, name: &str) -> Option<&HashSet<String>> {
        self.nodes.get(name).map(|n| &n.depends_on)
    }

    /// Validates the DAG: non-empty, every declared dependency exists, no
    /// cycles. Cycle detection is a three-color DFS.
    pub fn validate(&self) -> Result<(), DagError> {
        if self.order.is_empty() {
            return Err(DagError::Empty);
        }
        for node in self.nodes.values() {
            for dep in &node.depends_on {
                if !self.nodes.contains_key(dep) {
                    return Err(DagError::MissingDep {
                        stage: node.name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }
        let mut colors: HashMap<&str, Color> = self
            .order
            .iter()
            .map(|n| (n.as_str(), Color::White))
            .collect();
        for name in &self.order {
            if colors[name.as_str()] == Color::White {
                self.visit(name, &mut colors)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<(), DagError> {
        colors.insert(name, Color::Gray);
        if let Some(node) = self.nodes.get(name) {
            for dep in &node.depends_on {
                match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
                    Color::White => self.visit(dep.as_str(), colors)?,
                    Color::Gray => return Err(DagError::Cycle(dep.clone())),
                    Color::Black => {}
                }
            }
        }
        colors.insert(name, Color::Black);
        Ok(())
    }

    /// Stages whose `depends_on` is a subset of `completed` and which are
    /// themselves not already in `completed`. Returned in declaration order.
    pub fn find_ready(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| !completed.contains(*name))
            .filter(|name| {
                self.nodes
                    .get(*name)
                    .map(|n| n.depends_on.is_subset(completed))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// A full topological ordering of the stage set, built from the same
    /// three-color DFS used by `validate`. Panics is never reached in
    /// practice: callers are expected to `validate` first.
    pub fn topological_order(&self) -> Result<Vec<String>, DagError> {
        let mut colors: HashMap<&str, Color> = self
            .order
            .iter()
            .map(|n| (n.as_str(), Color::White))
            .collect();
        let mut out = Vec::with_capacity(self.order.len());
        for name in &self.order {
            if colors[name.as_str()] == Color::White {
                self.topo_visit(name, &mut colors, &mut out)?;
            }
        }
        Ok(out)
    }

    fn topo_visit<'a>(
        &'a self,
        name: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        out: &mut Vec<String>,
    ) -> Result<(), DagError> {
        colors.insert(name, Color::Gray);
        if let Some(node) = self.nodes.get(name) {
            for dep in &node.depends_on {
                match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
                    Color::White => self.topo_visit(dep.as_str(), colors, out)?,
                    Color::Gray => return Err(DagError::Cycle(dep.clone())),
                    Color::Black => {}
                }
            }
        }
        colors.insert(name, Color::Black);
        out.push(name.to_string());
        Ok(())
    }
}
