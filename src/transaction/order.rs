// src/transaction/order.rs

//! Transaction ordering
//!
//! Produces a total order over the admitted elements such that every
//! in-transaction dependency is installed before its dependents and erased
//! after them. The dependency graph is built once per call from the
//! elements' dependency sets, restricted to in-transaction relations;
//! external dependencies never constrain ordering.
//!
//! Cycles among Requires edges are broken by discarding the weakest edge
//! and retrying: among the cycle's edges not reinforced by a Conflicts
//! relation, the one with the smallest lexical (source, target) name pair
//! goes first. Reinforced edges are never dropped; a cycle made only of
//! those leaves its members unordered, reported rather than looped on.
//!
//! Final placement: installs in dependency order, each upgrade's erase
//! pinned immediately after its install, remaining erases afterwards in
//! reverse dependency order.

use crate::transaction::element::Element;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

/// A Requires relation between two in-transaction elements
#[derive(Debug, Clone)]
struct DepEdge {
    /// The requirement that created the edge, for diagnostics
    requirement: String,
    /// Also connected by a Conflicts relation; such edges are never
    /// dropped during cycle breaking
    reinforced: bool,
}

/// Everything `order()` computes
#[derive(Debug)]
pub(crate) struct OrderOutcome {
    /// Element slots in execution order
    pub order: Vec<usize>,
    /// Added slots that could not be placed (unbreakable cycles)
    pub unplaced: Vec<usize>,
    /// Index where trailing, order-insensitive elements begin
    pub unordered_successors: usize,
    /// Number of independent dependency trees
    pub ntrees: usize,
    /// Longest dependency chain
    pub max_depth: usize,
    /// Edges dropped to break cycles, as (source, target) names
    pub dropped: Vec<(String, String)>,
}

/// Compute the execution order for the given element arena
///
/// `added` and `removed` hold arena slots in admission order.
pub(crate) fn order_elements(
    elements: &[Element],
    added: &[usize],
    removed: &[usize],
) -> OrderOutcome {
    let mut dropped = Vec::new();

    // Install half: dependency edges point provider -> dependent
    let (mut install_graph, install_nodes) =
        build_graph(elements, added, |from, to| (from, to));
    let unplaced = break_cycles(elements, &mut install_graph, &mut dropped);
    let install_sort = knuth_sort(&install_graph);

    // Erase half: only erases not pinned to an upgrade participate;
    // edges point dependent -> provider so dependents are removed first
    let free_removes: Vec<usize> = removed
        .iter()
        .copied()
        .filter(|slot| elements[*slot].parent_install.is_none())
        .collect();
    let (mut erase_graph, erase_nodes) =
        build_graph(elements, &free_removes, |from, to| (to, from));
    break_cycles_all_droppable(elements, &mut erase_graph, &mut dropped);
    let erase_sort = knuth_sort(&erase_graph);

    // Pinned erases, grouped by the install slot they accompany
    let mut pinned: HashMap<usize, Vec<usize>> = HashMap::new();
    for slot in removed {
        if let Some(parent) = elements[*slot].parent_install {
            pinned.entry(parent).or_default().push(*slot);
        }
    }

    // Which slots carried any ordering constraint at all
    let constrained = constrained_slots(&install_graph, &erase_graph, &install_nodes, &erase_nodes);

    let mut order = Vec::with_capacity(added.len() + removed.len());
    let place_install = |order: &mut Vec<usize>, slot: usize| {
        order.push(slot);
        if let Some(erases) = pinned.get(&slot) {
            order.extend(erases.iter().copied());
        }
    };

    for node in &install_sort.order {
        place_install(&mut order, install_graph[*node]);
    }
    // Unplaced elements stay in the sequence so counts remain consistent,
    // trailing the ordered installs
    for slot in &unplaced {
        place_install(&mut order, *slot);
    }
    for node in &erase_sort.order {
        order.push(erase_graph[*node]);
    }

    let unordered_successors = order
        .iter()
        .rposition(|slot| {
            constrained.contains(slot) || elements[*slot].parent_install.is_some()
        })
        .map_or(0, |ix| ix + 1);

    if !unplaced.is_empty() {
        warn!(
            "{} element(s) left unordered: {}",
            unplaced.len(),
            unplaced
                .iter()
                .map(|s| elements[*s].nevra())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    debug!(
        "ordered {} elements in {} tree(s), depth {}, {} edge(s) dropped",
        order.len(),
        install_sort.ntrees,
        install_sort.max_depth,
        dropped.len()
    );

    OrderOutcome {
        order,
        unplaced,
        unordered_successors,
        ntrees: install_sort.ntrees,
        max_depth: install_sort.max_depth,
        dropped,
    }
}

/// Build the dependency graph over the given slots
///
/// `direction` maps a (provider, dependent) pair to the (source, target)
/// of the stored edge, so install and erase halves can share the builder.
fn build_graph(
    elements: &[Element],
    slots: &[usize],
    direction: impl Fn(NodeIndex, NodeIndex) -> (NodeIndex, NodeIndex),
) -> (StableDiGraph<usize, DepEdge>, HashMap<usize, NodeIndex>) {
    let mut graph = StableDiGraph::new();
    let mut nodes = HashMap::new();
    for slot in slots {
        nodes.insert(*slot, graph.add_node(*slot));
    }

    // Provider index over every provide of every participating element
    let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
    for slot in slots {
        for provide in &elements[*slot].provides {
            providers.entry(provide.name.as_str()).or_default().push(*slot);
        }
    }

    let mut seen: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    for slot in slots {
        let dependent = &elements[*slot];
        for requirement in &dependent.requires {
            let Some(candidates) = providers.get(requirement.name.as_str()) else {
                continue;
            };
            for provider_slot in candidates {
                if provider_slot == slot {
                    continue;
                }
                let provider = &elements[*provider_slot];
                if !provider
                    .provides
                    .iter()
                    .any(|p| requirement.satisfied_by(p))
                {
                    continue;
                }

                let (src, dst) = direction(nodes[provider_slot], nodes[slot]);
                if seen.insert((src, dst)) {
                    graph.add_edge(
                        src,
                        dst,
                        DepEdge {
                            requirement: requirement.name.clone(),
                            reinforced: conflicts_link(dependent, provider),
                        },
                    );
                }
            }
        }
    }

    (graph, nodes)
}

/// Does the dependent also declare a Conflicts relation on its provider?
/// Such co-location constraints reinforce the dependency edge.
fn conflicts_link(dependent: &Element, provider: &Element) -> bool {
    dependent
        .conflicts
        .iter()
        .any(|c| provider.provides.iter().any(|p| c.overlaps(p)))
}

/// Cycle breaking where every edge is fair game (the erase half)
fn break_cycles_all_droppable(
    elements: &[Element],
    graph: &mut StableDiGraph<usize, DepEdge>,
    dropped: &mut Vec<(String, String)>,
) {
    while let Some(scc) = first_cycle(graph) {
        if !drop_weakest(elements, graph, &scc, true, dropped) {
            return;
        }
    }
}

/// The first strongly connected component with more than one member
fn first_cycle(graph: &StableDiGraph<usize, DepEdge>) -> Option<Vec<NodeIndex>> {
    tarjan_scc(&*graph).into_iter().find(|scc| scc.len() > 1)
}

/// Remove the weakest edge inside the given cycle; false if none qualifies
fn drop_weakest(
    elements: &[Element],
    graph: &mut StableDiGraph<usize, DepEdge>,
    scc: &[NodeIndex],
    force: bool,
    dropped: &mut Vec<(String, String)>,
) -> bool {
    let members: HashSet<NodeIndex> = scc.iter().copied().collect();

    let weakest = graph
        .edge_indices()
        .filter_map(|edge| {
            let (src, dst) = graph.edge_endpoints(edge)?;
            if !members.contains(&src) || !members.contains(&dst) {
                return None;
            }
            if !force && graph[edge].reinforced {
                return None;
            }
            let key = (
                elements[graph[src]].name().to_string(),
                elements[graph[dst]].name().to_string(),
            );
            Some((key, edge))
        })
        .min_by(|a, b| a.0.cmp(&b.0));

    match weakest {
        Some(((src_name, dst_name), edge)) => {
            debug!(
                "breaking cycle: dropping {} -> {} ({})",
                src_name, dst_name, graph[edge].requirement
            );
            graph.remove_edge(edge);
            dropped.push((src_name, dst_name));
            true
        }
        None => false,
    }
}

/// Drop weakest edges until no breakable cycle remains; members of
/// unbreakable cycles leave the graph and are returned, in admission
/// order, as unorderable
fn break_cycles(
    elements: &[Element],
    graph: &mut StableDiGraph<usize, DepEdge>,
    dropped: &mut Vec<(String, String)>,
) -> Vec<usize> {
    let mut unplaced = Vec::new();
    while let Some(scc) = first_cycle(graph) {
        if drop_weakest(elements, graph, &scc, false, dropped) {
            continue;
        }
        let mut slots: Vec<usize> = scc.iter().map(|n| graph[*n]).collect();
        slots.sort_unstable();
        unplaced.extend(slots);
        for node in scc {
            graph.remove_node(node);
        }
    }
    unplaced.sort_unstable();
    unplaced
}

struct SortOutcome {
    order: Vec<NodeIndex>,
    ntrees: usize,
    max_depth: usize,
}

/// Topological sort (Knuth vol. 1, p. 262) over a DAG
///
/// Ties resolve by admission order, which keeps the result deterministic
/// for a given admission sequence.
fn knuth_sort(graph: &StableDiGraph<usize, DepEdge>) -> SortOutcome {
    let mut indegree: HashMap<NodeIndex, usize> = HashMap::new();
    let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
    for node in graph.node_indices() {
        indegree.insert(
            node,
            graph.neighbors_directed(node, Direction::Incoming).count(),
        );
        depth.insert(node, 1);
    }

    // Min-heap keyed by admission slot
    let mut ready: BinaryHeap<std::cmp::Reverse<(usize, NodeIndex)>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| std::cmp::Reverse((graph[*n], *n)))
        .collect();

    let ntrees = ready.len();
    let mut max_depth = if graph.node_count() > 0 { 1 } else { 0 };
    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(std::cmp::Reverse((_, node))) = ready.pop() {
        order.push(node);
        let node_depth = depth[&node];
        for succ in graph.neighbors_directed(node, Direction::Outgoing) {
            let d = depth.get_mut(&succ).expect("successor tracked");
            *d = (*d).max(node_depth + 1);
            max_depth = max_depth.max(*d);

            let remaining = indegree.get_mut(&succ).expect("successor tracked");
            *remaining -= 1;
            if *remaining == 0 {
                ready.push(std::cmp::Reverse((graph[succ], succ)));
            }
        }
    }

    SortOutcome {
        order,
        ntrees,
        max_depth,
    }
}

/// Slots that participated in at least one dependency edge
fn constrained_slots(
    install_graph: &StableDiGraph<usize, DepEdge>,
    erase_graph: &StableDiGraph<usize, DepEdge>,
    install_nodes: &HashMap<usize, NodeIndex>,
    erase_nodes: &HashMap<usize, NodeIndex>,
) -> HashSet<usize> {
    let mut constrained = HashSet::new();
    for (slot, node) in install_nodes {
        if install_graph.contains_node(*node)
            && install_graph.neighbors_undirected(*node).next().is_some()
        {
            constrained.insert(*slot);
        }
    }
    for (slot, node) in erase_nodes {
        if erase_graph.contains_node(*node)
            && erase_graph.neighbors_undirected(*node).next().is_some()
        {
            constrained.insert(*slot);
        }
    }
    constrained
}
