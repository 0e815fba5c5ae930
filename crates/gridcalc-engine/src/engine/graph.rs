//! Dependency graph construction with cycle detection.
//!
//! Only computed cells (`=` formulas) become nodes. Each node tracks the
//! dependencies it is still waiting on and the nodes waiting on it; the
//! scheduler drains the first set as dependencies finish.
//!
//! Ranges, columns, rows and named headers are not enumerated. Each is
//! intersected with the worksheet's computed cells, so a formula summing a
//! whole column waits on exactly the formulas in that column.
//!
//! Cycles are found depth-first. Every cell on a cycle gets the cycle error
//! recorded once, the first time the cycle is discovered, and becomes a
//! dependency-free node that the scheduler never evaluates. Cells that merely
//! depend on a cycle drop that edge and fail at evaluation time instead, when
//! their lookup rethrows the cycle error.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::cell_ref::{Bounds, CellRef};
use super::worksheet::Worksheet;
use crate::error::CycleError;
use crate::formula::DependencyArea;

/// A computed cell and its links.
#[derive(Debug)]
pub struct GraphNode {
    location: CellRef,
    pending: Mutex<HashSet<CellRef>>,
    parents: HashSet<CellRef>,
    cycle: bool,
}

impl GraphNode {
    pub fn location(&self) -> CellRef {
        self.location
    }

    /// Dependencies not yet evaluated.
    pub fn dependencies(&self) -> HashSet<CellRef> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Nodes that depend on this one.
    pub fn parents(&self) -> &HashSet<CellRef> {
        &self.parents
    }

    /// True for cells on a dependency cycle. They keep their cycle error and
    /// are never evaluated.
    pub fn is_cycle(&self) -> bool {
        self.cycle
    }

    /// Mark `dependency` as evaluated. Returns true when that was the last
    /// one outstanding.
    pub(crate) fn resolve(&self, dependency: &CellRef) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(dependency) && pending.is_empty()
    }
}

/// The computed cells of a worksheet and the edges between them.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<CellRef, GraphNode>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, location: &CellRef) -> Option<&GraphNode> {
        self.nodes.get(location)
    }

    pub fn contains(&self, location: &CellRef) -> bool {
        self.nodes.contains_key(location)
    }

    pub fn locations(&self) -> impl Iterator<Item = &CellRef> + '_ {
        self.nodes.keys()
    }

    /// Nodes with nothing outstanding, sorted row-major.
    pub fn leaves(&self) -> Vec<CellRef> {
        let mut leaves: Vec<CellRef> = self
            .nodes
            .values()
            .filter(|node| node.pending.lock().unwrap_or_else(|e| e.into_inner()).is_empty())
            .map(|node| node.location)
            .collect();
        leaves.sort_by_key(|loc| (loc.row, loc.col));
        leaves
    }
}

#[derive(Default)]
struct NodeBuilder {
    children: HashSet<CellRef>,
    parents: HashSet<CellRef>,
    cycle: bool,
}

struct GraphBuilder<'w> {
    worksheet: &'w Worksheet,
    /// Computed cells, row-major, as of the start of the build.
    formula_cells: Vec<CellRef>,
    nodes: HashMap<CellRef, NodeBuilder>,
    completed: HashSet<CellRef>,
    cycle_errors: HashMap<CellRef, CycleError>,
}

impl GraphBuilder<'_> {
    /// Computed cells inside any of `areas`.
    fn area_cells(&self, areas: &[DependencyArea]) -> Vec<CellRef> {
        let spans: Vec<Bounds> = areas
            .iter()
            .filter_map(|area| self.worksheet.area_bounds(area))
            .collect();
        if spans.is_empty() {
            return Vec::new();
        }
        self.formula_cells
            .iter()
            .filter(|location| spans.iter().any(|span| span.contains(location)))
            .copied()
            .collect()
    }

    fn visit(&mut self, location: CellRef, path: &mut Vec<CellRef>) -> Result<(), CycleError> {
        let Some((is_formula, mut dependencies, areas)) = self.worksheet.get(&location).map(|cell| {
            (
                cell.is_formula(),
                cell.dependencies().to_vec(),
                cell.dependency_areas().to_vec(),
            )
        }) else {
            return Ok(());
        };

        if self.completed.contains(&location) {
            return match self.cycle_errors.get(&location) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            };
        }

        if let Some(start) = path.iter().position(|loc| *loc == location) {
            let mut cycle = path[start..].to_vec();
            cycle.push(location);
            let error = CycleError::new(cycle);
            tracing::debug!(cycle = %error, "dependency cycle");
            self.record_cycle(location, &error);
            self.completed.insert(location);
            return Err(error);
        }

        if is_formula {
            let listed: HashSet<CellRef> = dependencies.iter().copied().collect();
            dependencies.extend(
                self.area_cells(&areas)
                    .into_iter()
                    .filter(|covered| !listed.contains(covered)),
            );
            let mut valid = HashSet::new();
            path.push(location);
            for dependency in dependencies {
                // Materialize the cell so the lookup below sees it.
                drop(self.worksheet.cell(dependency));
                match self.visit(dependency, path) {
                    Ok(()) => {
                        let usable = self
                            .worksheet
                            .get(&dependency)
                            .is_some_and(|cell| cell.error.is_none() && cell.is_formula());
                        if usable {
                            valid.insert(dependency);
                        }
                    }
                    Err(error) => {
                        if !self.completed.contains(&location) {
                            self.record_cycle(location, &error);
                        }
                        if error.contains(&location) {
                            self.completed.insert(location);
                            path.pop();
                            return Err(error);
                        }
                    }
                }
            }
            path.pop();
            self.add_dependencies(location, valid);
        }
        self.completed.insert(location);
        Ok(())
    }

    /// Record a cycle on a cell that sits on it. Cells that only lead into
    /// the cycle are left to fail when evaluated.
    fn record_cycle(&mut self, location: CellRef, error: &CycleError) {
        if !error.contains(&location) || self.cycle_errors.contains_key(&location) {
            return;
        }
        self.cycle_errors.insert(location, error.clone());
        self.worksheet
            .report_cell_error(location, error.cell_error_text());
        let node = self.nodes.entry(location).or_default();
        node.children.clear();
        node.cycle = true;
    }

    fn add_dependencies(&mut self, location: CellRef, dependencies: HashSet<CellRef>) {
        for dependency in &dependencies {
            self.nodes
                .entry(*dependency)
                .or_default()
                .parents
                .insert(location);
        }
        self.nodes
            .entry(location)
            .or_default()
            .children
            .extend(dependencies);
    }

    fn finish(self) -> DependencyGraph {
        let nodes = self
            .nodes
            .into_iter()
            .map(|(location, node)| {
                let graph_node = GraphNode {
                    location,
                    pending: Mutex::new(node.children),
                    parents: node.parents,
                    cycle: node.cycle,
                };
                (location, graph_node)
            })
            .collect();
        DependencyGraph { nodes }
    }
}

/// Build the dependency graph of a worksheet's computed cells.
///
/// Returns the graph and its leaves: the nodes that can be evaluated
/// straight away. Cycles never escape as errors; they are recorded on the
/// cells involved.
pub fn build_dependency_graph(worksheet: &Worksheet) -> (DependencyGraph, Vec<CellRef>) {
    let formula_cells = worksheet
        .locations()
        .into_iter()
        .filter(|location| worksheet.get(location).is_some_and(|cell| cell.is_formula()))
        .collect();
    let mut builder = GraphBuilder {
        worksheet,
        formula_cells,
        nodes: HashMap::new(),
        completed: HashSet::new(),
        cycle_errors: HashMap::new(),
    };
    for location in worksheet.locations() {
        // Escaping cycle errors are already recorded on their cells.
        let _ = builder.visit(location, &mut Vec::new());
    }
    let graph = builder.finish();
    let leaves = graph.leaves();
    tracing::debug!(nodes = graph.len(), leaves = leaves.len(), "built dependency graph");
    (graph, leaves)
}
