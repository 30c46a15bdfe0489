//! Topology route generation.
//!
//! From a topology kind and the expanded cell list, computes each cell's
//! allow-list of peer inboxes. Pure: the same spec always produces the same
//! table, byte-for-byte (sorted maps and sets throughout).

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::models::formation::{FormationSpec, TopologyKind};

/// Per-cell allow-list of peer cells it may publish to.
pub type RouteTable = BTreeMap<String, BTreeSet<String>>;

/// Compute the route table for a formation spec.
pub fn generate_routes(spec: &FormationSpec) -> RouteTable {
    let cells = spec.expanded_cell_names();
    let mut routes: RouteTable = cells.iter().map(|c| (c.clone(), BTreeSet::new())).collect();

    match spec.topology.kind {
        TopologyKind::FullMesh => {
            for from in &cells {
                for to in &cells {
                    if from != to {
                        routes.entry(from.clone()).or_default().insert(to.clone());
                    }
                }
            }
        }
        TopologyKind::Hierarchy => {
            // Validation guarantees root names a declared template.
            let roots = expand_template_name(
                spec,
                spec.topology.root.as_deref().unwrap_or_default(),
            );
            let root_set: BTreeSet<&String> = roots.iter().collect();
            for root in &roots {
                for cell in &cells {
                    if !root_set.contains(cell) {
                        routes.entry(root.clone()).or_default().insert(cell.clone());
                        routes.entry(cell.clone()).or_default().insert(root.clone());
                    }
                }
            }
        }
        TopologyKind::Star => {
            let hubs =
                expand_template_name(spec, spec.topology.hub.as_deref().unwrap_or_default());
            let hub_set: BTreeSet<&String> = hubs.iter().collect();
            for hub in &hubs {
                for spoke in &cells {
                    if !hub_set.contains(spoke) {
                        routes.entry(hub.clone()).or_default().insert(spoke.clone());
                        routes.entry(spoke.clone()).or_default().insert(hub.clone());
                    }
                }
            }
        }
        TopologyKind::Ring => {
            let n = cells.len();
            if n > 1 {
                for (i, cell) in cells.iter().enumerate() {
                    let next = &cells[(i + 1) % n];
                    let prev = &cells[(i + n - 1) % n];
                    let entry = routes.entry(cell.clone()).or_default();
                    if next != cell {
                        entry.insert(next.clone());
                    }
                    if prev != cell {
                        entry.insert(prev.clone());
                    }
                }
            }
        }
        TopologyKind::Custom => {
            for route in spec.topology.routes.as_deref().unwrap_or_default() {
                let from_cells = expand_template_name(spec, &route.from);
                let to_cells = expand_template_name(spec, &route.to);
                for from in &from_cells {
                    for to in &to_cells {
                        if from == to {
                            continue;
                        }
                        // Unresolved names pass through: routes may point at
                        // cells outside this formation.
                        routes.entry(from.clone()).or_default().insert(to.clone());
                    }
                }
            }
        }
        // Stigmergy cells communicate through the shared blackboard only;
        // direct routes stay empty.
        TopologyKind::Stigmergy => {}
    }

    routes
}

/// Expand a template name to its replicas; unknown names pass through
/// unchanged.
fn expand_template_name(spec: &FormationSpec, name: &str) -> Vec<String> {
    spec.cells
        .iter()
        .find(|t| t.name == name)
        .map_or_else(|| vec![name.to_string()], |t| t.expanded_names())
}

/// Serialise the route table for the mounted file. Stable key ordering makes
/// this reproducible byte-for-byte.
pub fn route_table_json(routes: &RouteTable) -> String {
    serde_json::to_string_pretty(routes).unwrap_or_else(|_| "{}".to_string())
}

/// Peers a given cell may publish to, per the table.
pub fn peers_of<'a>(routes: &'a RouteTable, cell: &str) -> Vec<&'a str> {
    routes
        .get(cell)
        .map(|set| set.iter().map(String::as_str).collect())
        .unwrap_or_default()
}
