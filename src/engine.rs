// The engine surface shared by both back-ends.
//
// An engine owns a contiguous array of points, one per laid-out node.
// External code writes input points between stabilisations, calls
// stabilize, and reads observer points. The interpreter and the
// compiled back-end implement exactly this trait, which is what lets
// the executioner (and every behavioural test) drive either one.

use std::fmt;

use serde::Serialize;

use crate::graph::{Graph, GraphError};
use crate::layout::{self, Layout};
use crate::parser::{self, ParseError};


// One evaluation cell. The length field carries the flattened list
// length for aggregate-labelled points; everything else is 1.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct Point {
    pub value: f64,
    pub length: u32,
    pub dirty: bool,
}

impl Point {
    // Write a value, marking the point dirty if the 64-bit payload
    // actually changed. Dirtiness only ever decides propagation.
    pub fn set(&mut self, value: f64) {
        if value.to_bits() != self.value.to_bits() {
            self.dirty = true;
        }
        self.value = value;
    }

    pub fn clean(&mut self) {
        self.dirty = false;
    }
}


pub trait Engine {
    // Propagate dirty inputs until the graph is quiescent. With
    // force, recompute everything.
    fn stabilize(&mut self, force: bool);
    fn is_dirty(&self) -> bool;

    fn has_input(&self, label: &str) -> bool;
    fn input(&mut self, label: &str) -> Option<&mut Point>;
    fn input_labels(&self) -> Vec<String>;
    fn dump_inputs(&self) -> Vec<(String, f64)>;

    fn has_observer(&self, label: &str) -> bool;
    fn observer(&self, label: &str) -> Option<&Point>;
    fn observer_labels(&self) -> Vec<String>;
    fn dump_observers(&self) -> Vec<(String, f64)>;

    fn supports_simulation(&self) -> bool;
    fn num_simulations(&self) -> u32;
    // Label of the input a simulation step overwrites.
    fn simulation_target(&self, id: u32) -> Option<String>;
    fn capture_state(&mut self);
    fn reset_state(&mut self);
    // Run one carved-out simulation step, possibly writing back to
    // input points. Returns whether its done flag is nonzero.
    fn run_simulation(&mut self, id: u32) -> bool;

    fn dot_graph(&self) -> String;
}


#[derive(Clone, Debug, PartialEq)]
pub enum BuildError {
    Parse(ParseError),
    Graph(GraphError),
}

impl BuildError {
    pub fn error_message(&self, text: &str) -> String {
        match self {
            BuildError::Parse(e) => e.error_message(text),
            BuildError::Graph(e) => e.error_message(text),
        }
    }
}

impl From<ParseError> for BuildError {
    fn from(e: ParseError) -> BuildError {
        BuildError::Parse(e)
    }
}

impl From<GraphError> for BuildError {
    fn from(e: GraphError) -> BuildError {
        BuildError::Graph(e)
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuildError::Parse(e) => e.fmt(f),
            BuildError::Graph(e) => e.fmt(f),
        }
    }
}


// The shared front half of both build paths: text to planned graph.
pub(crate) fn compile_graph(text: &str) -> Result<(Graph, Layout), BuildError> {
    let root = parser::parse(text)?;
    let mut graph = Graph::new();
    graph.construct(&root)?;
    let layout = layout::plan(&mut graph)?;
    Ok((graph, layout))
}
