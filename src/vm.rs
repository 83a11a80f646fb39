// (C) 2020 Brandon Lewis
//
// The compiled back-end: executes the straight-line program emitted
// by bytecode::compile over the flattened point array.
//
// This engine plays the role a native code generator would: one run of
// the instruction list is one full stabilisation pass with fixed slot
// accesses, no queue and no dependency bookkeeping. It only runs at
// all when something can have changed - a dirty input, a forced pass,
// or a stateful program (tick or store carry values between passes).
//
// Simulations are separate instruction lists over the same point
// array. Running one computes its private cone from the current input
// values, writes the results back into input slots, and reports its
// done flag.

use std::collections::BTreeMap;

use crate::bytecode::{compile, Instr, Program};
use crate::engine::{compile_graph, BuildError, Engine, Point};
use crate::graph::Graph;
use crate::ops::Opcode;


pub struct Vm {
    graph: Graph,
    program: Program,
    points: Vec<Point>,
    state: Vec<f64>,
    captured: Option<(Vec<Point>, Vec<f64>)>,
    primed: bool,
}


impl Vm {
    pub fn build(text: &str) -> Result<Vm, BuildError> {
        let (graph, layout) = compile_graph(text)?;
        let program = compile(&graph, &layout);

        let mut points = vec![Point::default(); program.n_points];
        for (slot, value) in &program.inits {
            points[*slot].value = *value;
        }
        for (slot, length) in &program.lengths {
            points[*slot].length = *length;
        }
        let state = vec![0.0; program.state_size];

        Ok(Vm {
            graph,
            program,
            points,
            state,
            captured: None,
            primed: false,
        })
    }

    // Execute one instruction list. Returns the slots that store
    // instructions actually changed, so their dirtiness survives the
    // end-of-pass cleanup and propagates next cycle.
    fn run(&mut self, instrs: &[Instr]) -> Vec<usize> {
        let mut stored = Vec::new();
        for instr in instrs {
            match instr.opcode {
                Opcode::Tick => {
                    let counter = instr.state.expect("tick without state");
                    self.state[counter] += 1.0;
                    let value = self.state[counter];
                    self.points[instr.out].set(value);
                }
                Opcode::Store => {
                    let value = self.points[instr.args[1]].value;
                    let target = instr.args[0];
                    let changed =
                        value.to_bits() != self.points[target].value.to_bits();
                    self.points[target].set(value);
                    if changed {
                        stored.push(target);
                    }
                    self.points[instr.out].set(value);
                }
                opcode => {
                    let args: Vec<f64> = instr
                        .args
                        .iter()
                        .map(|a| self.points[*a].value)
                        .collect();
                    let value = opcode.apply(&args);
                    self.points[instr.out].set(value);
                }
            }
        }
        stored
    }
}


impl Engine for Vm {
    fn stabilize(&mut self, force: bool) {
        if !(force || !self.primed || self.program.stateful || self.is_dirty()) {
            return;
        }
        let instrs = std::mem::replace(&mut self.program.instrs, Vec::new());
        let stored = self.run(&instrs);
        self.program.instrs = instrs;
        self.primed = true;
        for point in &mut self.points {
            point.clean();
        }
        for slot in stored {
            self.points[slot].dirty = true;
        }
    }

    fn is_dirty(&self) -> bool {
        if !self.primed {
            return true;
        }
        self.program
            .inputs
            .values()
            .any(|slot| self.points[*slot].dirty)
    }

    fn has_input(&self, label: &str) -> bool {
        self.program.inputs.contains_key(label)
    }

    fn input(&mut self, label: &str) -> Option<&mut Point> {
        let slot = *self.program.inputs.get(label)?;
        self.points.get_mut(slot)
    }

    fn input_labels(&self) -> Vec<String> {
        self.program.inputs.keys().cloned().collect()
    }

    fn dump_inputs(&self) -> Vec<(String, f64)> {
        dump(&self.program.inputs, &self.points)
    }

    fn has_observer(&self, label: &str) -> bool {
        self.program.observers.contains_key(label)
    }

    fn observer(&self, label: &str) -> Option<&Point> {
        let slot = *self.program.observers.get(label)?;
        self.points.get(slot)
    }

    fn observer_labels(&self) -> Vec<String> {
        self.program.observers.keys().cloned().collect()
    }

    fn dump_observers(&self) -> Vec<(String, f64)> {
        dump(&self.program.observers, &self.points)
    }

    fn supports_simulation(&self) -> bool {
        true
    }

    fn num_simulations(&self) -> u32 {
        self.program.sims.len() as u32
    }

    fn simulation_target(&self, id: u32) -> Option<String> {
        self.program
            .sims
            .get(id as usize)
            .map(|sim| sim.target.clone())
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

    fn run_simulation(&mut self, id: u32) -> bool {
        let sim = match self.program.sims.get(id as usize) {
            Some(sim) => sim.clone(),
            None => return false,
        };
        self.run(&sim.instrs);
        for (input, source) in &sim.writes {
            let value = self.points[*source].value;
            self.points[*input].set(value);
        }
        self.points[sim.done].value != 0.0
    }

    fn dot_graph(&self) -> String {
        self.graph.dot()
    }
}


fn dump(labels: &BTreeMap<String, usize>, points: &[Point]) -> Vec<(String, f64)> {
    labels
        .iter()
        .map(|(label, slot)| (label.clone(), points[*slot].value))
        .collect()
}
