// (C) 2020 Brandon Lewis
//
// The tree-walking back-end: incremental evaluation over the planned
// layout.
//
// Every laid-out node becomes a Point (the value cell) plus an
// InterPoint (the dependency scaffolding around it). Stabilisation
// drains a height-keyed recompute heap, highest first, so producers
// always run before their consumers; a node that recomputes to the
// same 64-bit payload stops the wave.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::engine::{compile_graph, BuildError, Engine, Point};
use crate::graph::{Graph, NodeKind};
use crate::ops::Opcode;


struct InterPoint {
    height: u64,
    parents: Vec<usize>,
    children: Vec<usize>,
    opcode: Opcode,
    // Counter slot in the state vector, for tick.
    state: Option<usize>,
}


// Recompute ordering: highest height drains first, ties break toward
// the highest slot so equal-height fan-outs stay producer-first.
#[derive(Copy, Clone, PartialEq, Eq)]
struct HeightSlot {
    height: u64,
    slot: usize,
}

impl Ord for HeightSlot {
    fn cmp(&self, other: &HeightSlot) -> Ordering {
        other
            .height
            .cmp(&self.height)
            .then(other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for HeightSlot {
    fn partial_cmp(&self, other: &HeightSlot) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}


pub struct Interpreter {
    graph: Graph,
    inter: Vec<InterPoint>,
    points: Vec<Point>,
    state: Vec<f64>,
    ticks: Vec<usize>,
    inputs: BTreeMap<String, usize>,
    observers: BTreeMap<String, usize>,
    heap: BTreeSet<HeightSlot>,
    dirty_stores: Vec<usize>,
    captured: Option<(Vec<Point>, Vec<f64>)>,
    primed: bool,
}


impl Interpreter {
    pub fn build(text: &str) -> Result<Interpreter, BuildError> {
        let (graph, layout) = compile_graph(text)?;

        let mut inter = Vec::with_capacity(layout.nodes.len());
        let mut points = vec![Point::default(); layout.nodes.len()];
        let mut state = Vec::new();
        let mut ticks = Vec::new();
        let mut inputs = BTreeMap::new();
        let mut observers = BTreeMap::new();

        for (slot, id) in layout.nodes.iter().enumerate() {
            let node = graph.node(*id);
            let opcode = match node.kind {
                NodeKind::Proc => node.op.map(|op| op.opcode).unwrap_or(Opcode::Nop),
                _ => Opcode::Nop,
            };
            let parents: Vec<usize> = node
                .parents
                .iter()
                .map(|p| graph.node(*p).slot.expect("parent not laid out"))
                .collect();
            let tick_state = if let Opcode::Tick = opcode {
                state.push(0.0);
                ticks.push(slot);
                Some(state.len() - 1)
            } else {
                None
            };

            points[slot].value = node.init_value;
            points[slot].length = node.length;
            if node.input_offset.is_some() {
                for label in &node.input_labels {
                    inputs.insert(label.clone(), slot);
                }
            }
            if node.observer_offset.is_some() {
                for label in &node.observer_labels {
                    observers.insert(label.clone(), slot);
                }
            }

            inter.push(InterPoint {
                height: node.height,
                parents,
                children: Vec::new(),
                opcode,
                state: tick_state,
            });
        }
        for slot in 0..inter.len() {
            for parent in inter[slot].parents.clone() {
                inter[parent].children.push(slot);
            }
        }

        Ok(Interpreter {
            graph,
            inter,
            points,
            state,
            ticks,
            inputs,
            observers,
            heap: BTreeSet::new(),
            dirty_stores: Vec::new(),
            captured: None,
            primed: false,
        })
    }

    fn enqueue(&mut self, slot: usize) {
        self.heap.insert(HeightSlot {
            height: self.inter[slot].height,
            slot,
        });
    }

    fn enqueue_children(&mut self, slot: usize) {
        for child in self.inter[slot].children.clone() {
            self.enqueue(child);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let top = self.heap.iter().next().copied()?;
        self.heap.remove(&top);
        Some(top.slot)
    }

    fn compute(&mut self, slot: usize) {
        match self.inter[slot].opcode {
            Opcode::Nop => {}
            Opcode::Tick => {
                let counter = self.inter[slot].state.expect("tick without state");
                self.state[counter] += 1.0;
                let value = self.state[counter];
                self.points[slot].set(value);
            }
            Opcode::Store => {
                // Write through to the target now; its own wave runs
                // next cycle. The store itself yields the source.
                let target = self.inter[slot].parents[0];
                let source = self.inter[slot].parents[1];
                let value = self.points[source].value;
                self.points[target].set(value);
                self.points[slot].set(value);
                self.dirty_stores.push(target);
            }
            opcode => {
                let args: Vec<f64> = self.inter[slot]
                    .parents
                    .iter()
                    .map(|p| self.points[*p].value)
                    .collect();
                let value = opcode.apply(&args);
                self.points[slot].set(value);
            }
        }
    }
}


impl Engine for Interpreter {
    fn stabilize(&mut self, force: bool) {
        if force || !self.primed {
            // First pass (or a forced one) computes everything.
            for slot in 0..self.inter.len() {
                self.enqueue(slot);
            }
            self.dirty_stores.clear();
            self.primed = true;
        } else {
            let input_slots: Vec<usize> = self.inputs.values().cloned().collect();
            for slot in input_slots {
                if self.points[slot].dirty {
                    self.enqueue_children(slot);
                    self.points[slot].clean();
                }
            }
            let stores: Vec<usize> = self.dirty_stores.drain(..).collect();
            for slot in stores {
                self.enqueue_children(slot);
            }
            // Ticks advance once per stabilisation.
            for slot in self.ticks.clone() {
                self.enqueue(slot);
            }
        }

        while let Some(slot) = self.pop() {
            self.compute(slot);
            if self.points[slot].dirty {
                self.enqueue_children(slot);
                self.points[slot].clean();
            }
        }
    }

    fn is_dirty(&self) -> bool {
        if !self.primed {
            return true;
        }
        self.inputs.values().any(|slot| self.points[*slot].dirty)
    }

    fn has_input(&self, label: &str) -> bool {
        self.inputs.contains_key(label)
    }

    fn input(&mut self, label: &str) -> Option<&mut Point> {
        let slot = *self.inputs.get(label)?;
        self.points.get_mut(slot)
    }

    fn input_labels(&self) -> Vec<String> {
        self.inputs.keys().cloned().collect()
    }

    fn dump_inputs(&self) -> Vec<(String, f64)> {
        self.inputs
            .iter()
            .map(|(label, slot)| (label.clone(), self.points[*slot].value))
            .collect()
    }

    fn has_observer(&self, label: &str) -> bool {
        self.observers.contains_key(label)
    }

    fn observer(&self, label: &str) -> Option<&Point> {
        let slot = *self.observers.get(label)?;
        self.points.get(slot)
    }

    fn observer_labels(&self) -> Vec<String> {
        self.observers.keys().cloned().collect()
    }

    fn dump_observers(&self) -> Vec<(String, f64)> {
        self.observers
            .iter()
            .map(|(label, slot)| (label.clone(), self.points[*slot].value))
            .collect()
    }

    fn supports_simulation(&self) -> bool {
        false
    }

    fn num_simulations(&self) -> u32 {
        0
    }

    fn simulation_target(&self, _id: u32) -> Option<String> {
        None
    }

    fn capture_state(&mut self) {
        self.captured = Some((self.points.clone(), self.state.clone()));
    }

    fn reset_state(&mut self) {
        if let Some((points, state)) = self.captured.clone() {
            self.points = points;
            self.state = state;
        }
    }

    fn run_simulation(&mut self, _id: u32) -> bool {
        true
    }

    fn dot_graph(&self) -> String {
        self.graph.dot()
    }
}
