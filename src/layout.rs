// Layout planner: flattens the constructed graph into the evaluation
// order both back-ends share.
//
// Inputs come first with contiguous offsets, then every node reachable
// backward from an observer, in creation order so layouts reproduce
// exactly. Observer copies slot in at height zero. Simulation
// sub-graphs are carved out of the main layout and given their own
// point slots at the end of the array.

use std::collections::HashSet;

use crate::graph::{Graph, GraphError, NodeId, NodeKind};
use crate::ops;
use crate::parser::Span;


#[derive(Debug)]
pub struct Layout {
    // Point array order: inputs, then interior nodes, then copies.
    pub nodes: Vec<NodeId>,
    pub n_inputs: usize,
    pub n_observers: usize,
    // Total point slots including simulation-private nodes.
    pub n_points: usize,
    pub sims: Vec<SimLayout>,
}


// One carved-out simulation step: the compute nodes the main layout
// does not own, the input slots it writes back to, and the node whose
// value reports completion. The target name is the label of the input
// (or input list) the step overwrites.
#[derive(Debug)]
pub struct SimLayout {
    pub nodes: Vec<NodeId>,
    pub writes: Vec<SimWrite>,
    pub done: NodeId,
    pub target: String,
}

#[derive(Debug)]
pub struct SimWrite {
    pub input_slot: usize,
    pub source: NodeId,
}


pub fn plan(graph: &mut Graph) -> Result<Layout, GraphError> {
    let mut layout = Vec::new();

    // Step 1: flatten every input in declaration order; offsets from 0.
    let mut inputs = Vec::new();
    for id in 0..graph.nodes.len() {
        if graph.nodes[id].is_input {
            graph.list_members(id, &mut inputs);
        }
    }
    for (offset, id) in inputs.iter().enumerate() {
        graph.nodes[*id].is_input = true;
        graph.nodes[*id].input_offset = Some(offset);
        layout.push(*id);
    }

    // Step 2: backward traversal from every observer leaf. Heights
    // start at one so later-inserted copies sit strictly below.
    let groups = graph.observers.clone();
    for group in &groups {
        for (leaf, _) in &group.labels {
            traverse(graph, *leaf, 1);
        }
    }

    // Steps 3 and 4: necessary interior nodes, creation order. Lists
    // are structural only and never reach the point array.
    for id in 0..graph.nodes.len() {
        if graph.nodes[id].necessary
            && graph.nodes[id].input_offset.is_none()
            && graph.nodes[id].kind != NodeKind::List
        {
            layout.push(id);
        }
    }

    // Step 5: observer offsets. The first observer of a leaf reads it
    // directly; a leaf observed again under another label gets a copy
    // node per duplicate.
    let mut n_observers = 0;
    let mut claimed = HashSet::new();
    for group in &groups {
        let mut first = true;
        for (leaf, label) in &group.labels {
            let target = if claimed.insert(*leaf) {
                *leaf
            } else {
                let copy = add_copy(graph, *leaf);
                layout.push(copy);
                copy
            };
            graph.nodes[target].observer_labels.push(label.clone());
            if first {
                if group.labels.len() > 1 {
                    graph.nodes[target]
                        .observer_labels
                        .push(group.label.clone());
                }
                graph.nodes[target].length =
                    graph.nodes[target].length.max(group.length);
            }
            graph.nodes[target].is_observer = true;
            graph.nodes[target].observer_offset = Some(n_observers);
            n_observers += 1;
            first = false;
        }
    }

    // Step 6: carve out one sub-graph per sim-apply.
    let mut sims = Vec::new();
    for id in 0..graph.nodes.len() {
        if graph.nodes[id].kind == NodeKind::Proc && graph.nodes[id].token == "sim-apply" {
            sims.push(plan_sim(graph, id)?);
        }
    }

    // Point slots: the main layout first, then each sim's private
    // nodes.
    for (slot, id) in layout.iter().enumerate() {
        graph.nodes[*id].slot = Some(slot);
    }
    let mut n_points = layout.len();
    for sim in &sims {
        for id in &sim.nodes {
            graph.nodes[*id].slot = Some(n_points);
            n_points += 1;
        }
    }

    Ok(Layout {
        nodes: layout,
        n_inputs: inputs.len(),
        n_observers,
        n_points,
        sims,
    })
}


fn traverse(graph: &mut Graph, node: NodeId, height: u64) {
    let raised = height > graph.nodes[node].height;
    if raised {
        graph.nodes[node].height = height;
    }
    let first = !graph.nodes[node].necessary;
    graph.nodes[node].necessary = true;
    if !first && !raised {
        return;
    }
    for parent in graph.nodes[node].parents.clone() {
        traverse(graph, parent, height + 1);
    }
}


fn add_copy(graph: &mut Graph, source: NodeId) -> NodeId {
    let id = graph.add_node(NodeKind::Proc);
    graph.nodes[id].token = "copy".to_string();
    graph.nodes[id].op = ops::lookup("copy");
    graph.nodes[id].parents.push(source);
    graph.nodes[id].height = 0;
    graph.nodes[id].necessary = true;
    id
}


fn plan_sim(graph: &mut Graph, sim: NodeId) -> Result<SimLayout, GraphError> {
    let span = Span::default();
    let args = graph.nodes[sim].parents.clone();
    let target = args[0];
    let overwrite = args[1];
    let done = args[2];

    let mut targets = Vec::new();
    graph.list_members(target, &mut targets);
    let mut sources = Vec::new();
    graph.list_members(overwrite, &mut sources);
    if targets.len() != sources.len() {
        return Err(GraphError::Layout {
            message: format!(
                "sim-apply target and overwrite lengths differ. Expected {} Got {}",
                targets.len(),
                sources.len()
            ),
            span,
        });
    }

    let mut writes = Vec::new();
    for (t, s) in targets.iter().zip(&sources) {
        match graph.nodes[*t].input_offset {
            Some(input_slot) => writes.push(SimWrite {
                input_slot,
                source: *s,
            }),
            None => {
                return Err(GraphError::Layout {
                    message: "sim-apply target must be an input".to_string(),
                    span,
                })
            }
        }
    }

    // The private cone: everything reachable from the done flag and
    // the overwrite sources that neither the input band nor the main
    // layout already owns.
    let mut nodes = Vec::new();
    collect_sim(graph, done, 1, &mut nodes);
    for source in &sources {
        collect_sim(graph, *source, 1, &mut nodes);
    }
    nodes.sort();

    Ok(SimLayout {
        nodes,
        writes,
        done,
        target: graph.nodes[target].token.clone(),
    })
}


fn collect_sim(graph: &mut Graph, node: NodeId, height: u64, nodes: &mut Vec<NodeId>) {
    if graph.nodes[node].input_offset.is_some() || graph.nodes[node].necessary {
        return;
    }
    let raised = height > graph.nodes[node].height;
    if raised {
        graph.nodes[node].height = height;
    }
    if nodes.contains(&node) {
        if !raised {
            return;
        }
    } else {
        nodes.push(node);
    }
    for parent in graph.nodes[node].parents.clone() {
        collect_sim(graph, parent, height + 1, nodes);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::parser::parse;

    fn planned(text: &str) -> (Graph, Layout) {
        let root = parse(text).unwrap();
        let mut graph = Graph::new();
        graph.construct(&root).unwrap();
        let layout = plan(&mut graph).unwrap();
        (graph, layout)
    }

    fn plan_err(text: &str) -> GraphError {
        let root = parse(text).unwrap();
        let mut graph = Graph::new();
        graph.construct(&root).unwrap();
        plan(&mut graph).unwrap_err()
    }

    #[test]
    fn test_inputs_first() {
        let (graph, layout) = planned(
            "(begin (input a) (input list x 2) (observe \"s\" (+ a (fold + 0 x))))",
        );
        assert_eq!(layout.n_inputs, 3);
        for (i, id) in layout.nodes.iter().take(3).enumerate() {
            assert_eq!(graph.nodes[*id].input_offset, Some(i));
            assert_eq!(graph.nodes[*id].slot, Some(i));
        }
        assert_eq!(graph.nodes[layout.nodes[0]].token, "a");
        assert_eq!(graph.nodes[layout.nodes[1]].token, "x[0]");
        assert_eq!(graph.nodes[layout.nodes[2]].token, "x[1]");
    }

    #[test]
    fn test_no_lists_in_layout() {
        let (graph, layout) = planned(
            "(begin (input list x 2 2) (observe \"s\" (fold + 0 x)))",
        );
        for id in &layout.nodes {
            assert_ne!(graph.nodes[*id].kind, NodeKind::List);
        }
        assert_eq!(layout.n_inputs, 4);
    }

    #[test]
    fn test_heights_and_slots_monotonic() {
        let (graph, layout) = planned(
            "(begin (input a) (input b) (observe \"s\" (+ (* a b) (not b))))",
        );
        for id in &layout.nodes {
            let node = &graph.nodes[*id];
            if node.token == "copy" {
                continue;
            }
            for parent in &node.parents {
                let p = &graph.nodes[*parent];
                assert!(
                    p.height > node.height,
                    "{} above {}",
                    p.token,
                    node.token
                );
                assert!(p.slot.unwrap() <= node.slot.unwrap());
            }
        }
    }

    #[test]
    fn test_unobserved_branches_dropped() {
        let (graph, layout) = planned(
            "(begin (input a) (input b) (define waste (* b 100)) (observe \"o\" (+ a 1)))",
        );
        // b is still laid out (all inputs are) but the waste product
        // is not necessary.
        assert_eq!(layout.n_inputs, 2);
        for id in &layout.nodes {
            assert_ne!(graph.nodes[*id].token, "*");
        }
    }

    #[test]
    fn test_observer_offsets() {
        let (graph, layout) = planned(
            "(begin (input a) (observe \"x\" (+ a 1)) (observe \"y\" (* a 2)))",
        );
        assert_eq!(layout.n_observers, 2);
        let (x, _) = observer(&graph, "x");
        let (y, _) = observer(&graph, "y");
        assert_eq!(graph.nodes[x].observer_offset, Some(0));
        assert_eq!(graph.nodes[y].observer_offset, Some(1));
    }

    fn observer(graph: &Graph, label: &str) -> (NodeId, usize) {
        for (id, node) in graph.nodes.iter().enumerate() {
            if node.observer_labels.iter().any(|l| l == label) {
                return (id, node.slot.unwrap());
            }
        }
        panic!("no observer {}", label);
    }

    #[test]
    fn test_copy_for_reobserved_leaf() {
        let (graph, layout) = planned(
            "(begin (input a) (define s (+ a 1)) (observe \"x\" s) (observe \"y\" s))",
        );
        let (x, _) = observer(&graph, "x");
        let (y, _) = observer(&graph, "y");
        assert_ne!(x, y);
        assert_eq!(graph.nodes[y].token, "copy");
        assert_eq!(graph.nodes[y].height, 0);
        assert_eq!(graph.nodes[y].parents, vec![x]);
        // The copy is evaluated, so it is part of the layout.
        assert!(layout.nodes.contains(&y));
    }

    #[test]
    fn test_single_observer_reads_leaf_directly() {
        let (graph, _) = planned("(begin (input a) (observe \"o\" (+ a 1)))");
        let (o, _) = observer(&graph, "o");
        assert_eq!(graph.nodes[o].token, "+");
    }

    #[test]
    fn test_list_observer_labels() {
        let (graph, layout) = planned(
            "(begin (input list x 2) (observe \"y\" (map exp x)))",
        );
        assert_eq!(layout.n_observers, 2);
        let (y0, _) = observer(&graph, "y[0]");
        // The first leaf carries the aggregate label and length.
        assert!(graph.nodes[y0].observer_labels.iter().any(|l| l == "y"));
        assert_eq!(graph.nodes[y0].length, 2);
    }

    #[test]
    fn test_sim_split() {
        let (graph, layout) = planned(
            "(begin (input a) (observe \"out\" (* a 2)) (sim-apply a (+ a 1) (>= a 3)))",
        );
        assert_eq!(layout.sims.len(), 1);
        let sim = &layout.sims[0];
        assert_eq!(sim.target, "a");
        assert_eq!(sim.writes.len(), 1);
        assert_eq!(sim.writes[0].input_slot, 0);
        // The sim cone (+ and >=) stays out of the main layout.
        for id in &layout.nodes {
            let token = &graph.nodes[*id].token;
            assert!(token != "+" && token != ">=", "sim node {} leaked", token);
        }
        assert_eq!(sim.nodes.len(), 4); // +, >=, and the consts 1 and 3
        for id in &sim.nodes {
            assert!(graph.nodes[*id].slot.unwrap() >= layout.nodes.len());
        }
        assert_eq!(layout.n_points, layout.nodes.len() + 4);
    }

    #[test]
    fn test_sim_shares_main_nodes() {
        // The doubled value feeds both the observer and the sim; the
        // sim must not recompute it.
        let (graph, layout) = planned(
            "(begin (input a) (define d (* a 2)) (observe \"out\" d) (sim-apply a d (>= a 3)))",
        );
        let sim = &layout.sims[0];
        for id in &sim.nodes {
            assert_ne!(graph.nodes[*id].token, "*");
        }
        // The write reads the main node's slot.
        let (out, slot) = observer(&graph, "out");
        assert_eq!(sim.writes[0].source, out);
        assert!(slot < layout.nodes.len());
    }

    #[test]
    fn test_two_sims_split_separately() {
        let (graph, layout) = planned(
            "(begin (input a) (input b) (observe \"o\" (+ a b)) \
             (sim-apply a (* a 2) 1) (sim-apply b (* b 3) 1))",
        );
        assert_eq!(layout.sims.len(), 2);
        assert_eq!(layout.sims[0].target, "a");
        assert_eq!(layout.sims[1].target, "b");
        // Each sim owns its private cone; slots never collide.
        let mut slots: Vec<usize> = layout
            .sims
            .iter()
            .flat_map(|s| s.nodes.iter().map(|id| graph.nodes[*id].slot.unwrap()))
            .collect();
        slots.sort();
        slots.dedup();
        assert_eq!(
            slots.len(),
            layout.sims[0].nodes.len() + layout.sims[1].nodes.len()
        );
    }

    #[test]
    fn test_store_reaches_through_to_inputs() {
        // The store's target is its first parent, so the input sits
        // above the whole chain.
        let (graph, _) = planned("(begin (input a) (observe \"n\" (store a (+ a 1))))");
        let (store, _) = {
            let mut found = None;
            for (id, node) in graph.nodes.iter().enumerate() {
                if node.token == "store" && node.kind == NodeKind::Proc {
                    found = Some((id, node.slot.unwrap()));
                }
            }
            found.unwrap()
        };
        let input = graph.nodes[store].parents[0];
        assert!(graph.nodes[input].is_input);
        assert!(graph.nodes[input].height > graph.nodes[store].height);
    }

    #[test]
    fn test_sim_length_mismatch() {
        match plan_err(
            "(begin (input list x 2) (observe \"s\" (fold + 0 x)) (sim-apply x (list 1) 1))",
        ) {
            GraphError::Layout { message, .. } => {
                assert!(message.contains("lengths differ"), "{}", message)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sim_target_must_be_input() {
        match plan_err(
            "(begin (input a) (define d (+ a 1)) (observe \"o\" d) (sim-apply d 1 1))",
        ) {
            GraphError::Layout { message, .. } => {
                assert!(message.contains("must be an input"), "{}", message)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_layout_deterministic() {
        let text = "(begin (input list x 3) (input a) \
                    (observe \"s\" (+ a (fold + 0 x))) (observe \"m\" (apply max x)))";
        let (graph_a, layout_a) = planned(text);
        let (graph_b, layout_b) = planned(text);
        assert_eq!(layout_a.nodes, layout_b.nodes);
        let tokens_a: Vec<&String> =
            layout_a.nodes.iter().map(|id| &graph_a.nodes[*id].token).collect();
        let tokens_b: Vec<&String> =
            layout_b.nodes.iter().map(|id| &graph_b.nodes[*id].token).collect();
        assert_eq!(tokens_a, tokens_b);
    }
}
