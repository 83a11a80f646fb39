// Straight-line code generation over the planned layout.
//
// This is the compiled back-end's middle half: every laid-out compute
// node becomes one instruction addressing fixed point slots, ordered
// the same way the interpreter drains its recompute heap (height
// descending, then slot descending), so a single pass over the
// instruction list is one full stabilisation. Simulation sub-graphs
// compile to their own instruction lists with write-back directives.

use std::collections::BTreeMap;

use crate::graph::{Graph, NodeId, NodeKind};
use crate::layout::Layout;
use crate::ops::Opcode;


#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub opcode: Opcode,
    // Point slot this instruction writes.
    pub out: usize,
    // Point slots of the operands. For Store: [target, source].
    pub args: Vec<usize>,
    // Counter slot in the state vector, for Tick.
    pub state: Option<usize>,
}


#[derive(Clone, Debug, PartialEq)]
pub struct SimProgram {
    pub instrs: Vec<Instr>,
    // (input slot, source slot) pairs applied after the run.
    pub writes: Vec<(usize, usize)>,
    // Slot holding the done flag.
    pub done: usize,
    // Label of the input this step overwrites.
    pub target: String,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub instrs: Vec<Instr>,
    pub n_points: usize,
    pub state_size: usize,
    // Whether any instruction carries engine state across passes; a
    // stateful program is re-run on every stabilisation.
    pub stateful: bool,
    // Initial point values (consts and var initials).
    pub inits: Vec<(usize, f64)>,
    // Point lengths for aggregate-labelled slots.
    pub lengths: Vec<(usize, u32)>,
    pub inputs: BTreeMap<String, usize>,
    pub observers: BTreeMap<String, usize>,
    pub sims: Vec<SimProgram>,
}


pub fn compile(graph: &Graph, layout: &Layout) -> Program {
    let mut state_size = 0;
    let mut instrs = emit(graph, &layout.nodes, &mut state_size);

    let mut inits = Vec::new();
    let mut lengths = Vec::new();
    let mut inputs = BTreeMap::new();
    let mut observers = BTreeMap::new();

    let mut sims = Vec::new();
    for sim in &layout.sims {
        let sim_instrs = emit(graph, &sim.nodes, &mut state_size);
        let writes = sim
            .writes
            .iter()
            .map(|w| (w.input_slot, slot(graph, w.source)))
            .collect();
        sims.push(SimProgram {
            instrs: sim_instrs,
            writes,
            done: slot(graph, sim.done),
            target: sim.target.clone(),
        });
    }

    for node in graph.nodes.iter() {
        let s = match node.slot {
            Some(s) => s,
            None => continue,
        };
        if node.init_value != 0.0 {
            inits.push((s, node.init_value));
        }
        if node.length > 1 {
            lengths.push((s, node.length));
        }
        if node.input_offset.is_some() {
            for label in &node.input_labels {
                inputs.insert(label.clone(), s);
            }
        }
        if node.observer_offset.is_some() {
            for label in &node.observer_labels {
                observers.insert(label.clone(), s);
            }
        }
    }

    let stateful = instrs
        .iter()
        .any(|i| i.opcode == Opcode::Tick || i.opcode == Opcode::Store);

    Program {
        instrs,
        n_points: layout.n_points,
        state_size,
        stateful,
        inits,
        lengths,
        inputs,
        observers,
        sims,
    }
}


impl Program {
    // Human-readable listing, one instruction per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (i, instr) in self.instrs.iter().enumerate() {
            out.push_str(&format!(
                "{:04} {:?} {:?} -> p{}\n",
                i, instr.opcode, instr.args, instr.out
            ));
        }
        for (id, sim) in self.sims.iter().enumerate() {
            out.push_str(&format!("sim {} -> {}\n", id, sim.target));
            for (i, instr) in sim.instrs.iter().enumerate() {
                out.push_str(&format!(
                    "{:04} {:?} {:?} -> p{}\n",
                    i, instr.opcode, instr.args, instr.out
                ));
            }
        }
        out
    }
}


fn slot(graph: &Graph, id: NodeId) -> usize {
    graph.node(id).slot.expect("node not laid out")
}


// Emit one instruction per compute node, height descending with slot
// descending as the tie break - the drain order of the interpreter's
// recompute heap, so stateful programs behave identically on both
// back-ends.
fn emit(graph: &Graph, nodes: &[NodeId], state_size: &mut usize) -> Vec<Instr> {
    let mut order: Vec<NodeId> = nodes.to_vec();
    order.sort_by(|a, b| {
        let (na, nb) = (graph.node(*a), graph.node(*b));
        nb.height
            .cmp(&na.height)
            .then(nb.slot.cmp(&na.slot))
    });

    let mut instrs = Vec::new();
    for id in order {
        let node = graph.node(id);
        let opcode = match node.kind {
            NodeKind::Proc => match node.op {
                Some(op) => op.opcode,
                None => continue,
            },
            _ => continue,
        };
        let state = if let Opcode::Tick = opcode {
            *state_size += 1;
            Some(*state_size - 1)
        } else {
            None
        };
        instrs.push(Instr {
            opcode,
            out: slot(graph, id),
            args: node.parents.iter().map(|p| slot(graph, *p)).collect(),
            state,
        });
    }
    instrs
}
