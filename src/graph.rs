// Graph constructor: walks the cell tree from the reader and produces
// the typed node arena that the layout planner and both back-ends
// consume.
//
// Nodes live in an arena addressed by NodeId; edges run from child to
// parent (producer) as index lists, so the finished graph is a plain
// DAG with no shared ownership. Procedure factories are first class:
// the scalar operator table, the higher-order list builtins and user
// lambdas all sit in scopes as ProcFactory nodes and are invoked
// through the single apply path.

use std::collections::HashMap;
use std::fmt;

use enumflags2::BitFlags;

use crate::ops::{self, OpDef, Opcode};
use crate::parser::{Cell, Span};
use crate::util::pointer_message;


#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum NodeKind {
    Const = 0b000001,
    Var = 0b000010,
    List = 0b000100,
    Proc = 0b001000,
    ProcFactory = 0b010000,
    Graph = 0b100000,
}

pub type KindSet = BitFlags<NodeKind>;


// Value types. Only Double is produced today; the others are reserved
// for a typed front end.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ValueType {
    Bool,
    Int,
    Uint,
    Double,
}


pub type NodeId = usize;
pub type ScopeId = usize;


// What a ProcFactory node does when applied.
#[derive(Clone, Debug)]
pub enum Factory {
    // A scalar operator from the registry: validates and emits a Proc.
    Op(&'static OpDef),
    // A higher-order list builtin, expanded at construction time.
    Builtin(ListOp),
    // A user lambda: applying builds the body in a fresh child scope.
    Lambda {
        params: Vec<String>,
        body: Cell,
        scope: ScopeId,
    },
}


#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ListOp {
    Map,
    ForEach,
    Fold,
    List,
    Zip,
    Car,
    Cdr,
    Iota,
    Apply,
    Append,
    Nth,
}

const LIST_OPS: &[(&str, ListOp)] = &[
    ("for-each", ListOp::ForEach),
    ("map", ListOp::Map),
    ("fold", ListOp::Fold),
    ("list", ListOp::List),
    ("zip", ListOp::Zip),
    ("car", ListOp::Car),
    ("cdr", ListOp::Cdr),
    ("head", ListOp::Car),
    ("rest", ListOp::Cdr),
    ("iota", ListOp::Iota),
    ("apply", ListOp::Apply),
    ("append", ListOp::Append),
    ("nth", ListOp::Nth),
];


#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: ValueType,
    pub token: String,
    pub parents: Vec<NodeId>,
    pub height: u64,
    pub necessary: bool,
    pub is_input: bool,
    pub is_observer: bool,
    pub input_labels: Vec<String>,
    pub observer_labels: Vec<String>,
    pub length: u32,
    pub input_offset: Option<usize>,
    pub observer_offset: Option<usize>,
    // Point array index, assigned by the layout planner.
    pub slot: Option<usize>,
    pub init_value: f64,
    pub op: Option<&'static OpDef>,
    pub factory: Option<Factory>,
}

impl Node {
    fn new(kind: NodeKind) -> Node {
        Node {
            kind,
            ty: ValueType::Double,
            token: String::new(),
            parents: Vec::new(),
            height: 0,
            necessary: false,
            is_input: false,
            is_observer: false,
            input_labels: Vec::new(),
            observer_labels: Vec::new(),
            length: 1,
            input_offset: None,
            observer_offset: None,
            slot: None,
            init_value: 0.0,
            op: None,
            factory: None,
        }
    }
}


// One (observe "label" expr) declaration: the flattened leaves with
// their component labels, plus the aggregate label carried by the
// first leaf.
#[derive(Clone, Debug)]
pub struct ObserverGroup {
    pub node: NodeId,
    pub labels: Vec<(NodeId, String)>,
    pub label: String,
    pub length: u32,
}


#[derive(Debug)]
struct Scope {
    bindings: HashMap<String, NodeId>,
    parent: Option<ScopeId>,
}


#[derive(Clone, Debug, PartialEq)]
pub enum GraphError {
    UnboundSymbol { name: String, span: Span },
    NotAProcedure { name: String, span: Span },
    Arity { message: String, span: Span },
    Kind { message: String, span: Span },
    Layout { message: String, span: Span },
}

impl GraphError {
    pub fn span(&self) -> Span {
        match self {
            GraphError::UnboundSymbol { span, .. } => *span,
            GraphError::NotAProcedure { span, .. } => *span,
            GraphError::Arity { span, .. } => *span,
            GraphError::Kind { span, .. } => *span,
            GraphError::Layout { span, .. } => *span,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GraphError::UnboundSymbol { name, .. } => {
                format!("Could not find symbol - {}", name)
            }
            GraphError::NotAProcedure { name, .. } => {
                format!("Not a valid procedure - {}", name)
            }
            GraphError::Arity { message, .. } => message.clone(),
            GraphError::Kind { message, .. } => message.clone(),
            GraphError::Layout { message, .. } => message.clone(),
        }
    }

    pub fn error_message(&self, text: &str) -> String {
        pointer_message(text, self.span(), &self.message())
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Line {}: Error: {}",
            self.span().first_line + 1,
            self.message()
        )
    }
}


pub type BuildResult = Result<Option<NodeId>, GraphError>;


#[derive(Debug)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub observers: Vec<ObserverGroup>,
    scopes: Vec<Scope>,
}

impl Graph {
    pub fn new() -> Graph {
        let mut graph = Graph {
            nodes: Vec::new(),
            observers: Vec::new(),
            scopes: vec![Scope {
                bindings: HashMap::new(),
                parent: None,
            }],
        };
        for def in ops::OPS {
            let id = graph.add_node(NodeKind::ProcFactory);
            graph.nodes[id].token = def.name.to_string();
            graph.nodes[id].factory = Some(Factory::Op(def));
            graph.define(0, def.name, id);
        }
        for (name, op) in LIST_OPS {
            let id = graph.add_node(NodeKind::ProcFactory);
            graph.nodes[id].token = name.to_string();
            graph.nodes[id].factory = Some(Factory::Builtin(*op));
            graph.define(0, name, id);
        }
        graph
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind));
        self.nodes.len() - 1
    }

    // Flatten a (possibly nested) list node into its scalar members.
    pub fn list_members(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if self.nodes[id].kind != NodeKind::List {
            out.push(id);
            return;
        }
        for parent in self.nodes[id].parents.clone() {
            self.list_members(parent, out);
        }
    }

    // Scope handling. Lookups walk the parent chain outward; define
    // always writes the innermost scope; rebind writes the nearest
    // scope that already holds the name.

    fn define(&mut self, scope: ScopeId, name: &str, node: NodeId) {
        self.scopes[scope].bindings.insert(name.to_string(), node);
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> Option<NodeId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(&id) = self.scopes[s].bindings.get(name) {
                return Some(id);
            }
            current = self.scopes[s].parent;
        }
        None
    }

    fn rebind(&mut self, scope: ScopeId, name: &str, node: NodeId) -> bool {
        let mut current = Some(scope);
        while let Some(s) = current {
            if self.scopes[s].bindings.contains_key(name) {
                self.scopes[s].bindings.insert(name.to_string(), node);
                return true;
            }
            current = self.scopes[s].parent;
        }
        false
    }

    fn child_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            bindings: HashMap::new(),
            parent: Some(parent),
        });
        self.scopes.len() - 1
    }

    // Entry point: the first top level (begin ...) subform is the
    // program body.
    pub fn construct(&mut self, root: &Cell) -> Result<(), GraphError> {
        if let Cell::Root { cells } = root {
            for cell in cells {
                if let Cell::List { cells: inner, .. } = cell {
                    if inner.len() > 1 && inner[0].text() == "begin" {
                        self.build(cell, 0)?;
                        return Ok(());
                    }
                }
            }
        }
        Err(GraphError::Layout {
            message: "Program requires a top level (begin ...) form".to_string(),
            span: root.span(),
        })
    }

    pub fn build(&mut self, cell: &Cell, scope: ScopeId) -> BuildResult {
        match cell {
            Cell::Symbol { text, span } => {
                match self.lookup(scope, text) {
                    Some(id) => Ok(Some(id)),
                    None => Err(GraphError::UnboundSymbol {
                        name: text.clone(),
                        span: *span,
                    }),
                }
            }
            Cell::Number { text, .. } => {
                let id = self.add_node(NodeKind::Const);
                self.nodes[id].token = text.clone();
                self.nodes[id].init_value = parse_number(text);
                Ok(Some(id))
            }
            Cell::List { cells, span } => self.build_list(cells, *span, scope),
            Cell::Root { .. } => Ok(None),
        }
    }

    fn build_list(&mut self, cells: &[Cell], span: Span, scope: ScopeId) -> BuildResult {
        if cells.is_empty() {
            return Ok(None);
        }
        let head = cells[0].text().to_string();
        match head.as_str() {
            "begin" => {
                expect_form(cells, 2, ops::MANY, span)?;
                let mut last = None;
                for cell in &cells[1..] {
                    last = self.build(cell, scope)?;
                }
                Ok(last)
            }
            "define" => {
                expect_form(cells, 3, 3, span)?;
                let name = symbol_text(&cells[1], "define requires a symbol name")?;
                let node = self.build_value(&cells[2], scope)?;
                self.define(scope, &name, node);
                Ok(None)
            }
            "set!" => {
                expect_form(cells, 3, 3, span)?;
                let name = symbol_text(&cells[1], "set! requires a symbol name")?;
                let node = self.build_value(&cells[2], scope)?;
                if !self.rebind(scope, &name, node) {
                    return Err(GraphError::UnboundSymbol {
                        name,
                        span: cells[1].span(),
                    });
                }
                Ok(None)
            }
            "lambda" => {
                expect_form(cells, 3, 3, span)?;
                let params = match &cells[1] {
                    Cell::List { cells: params, .. } => {
                        let mut names = Vec::new();
                        for param in params {
                            names.push(symbol_text(
                                param,
                                "lambda parameters must be symbols",
                            )?);
                        }
                        names
                    }
                    other => {
                        return Err(GraphError::Kind {
                            message: "lambda requires a parameter list".to_string(),
                            span: other.span(),
                        })
                    }
                };
                let id = self.add_node(NodeKind::ProcFactory);
                self.nodes[id].token = "lambda".to_string();
                self.nodes[id].factory = Some(Factory::Lambda {
                    params,
                    body: cells[2].clone(),
                    scope,
                });
                Ok(Some(id))
            }
            "input" => {
                self.build_input(cells, span, scope)?;
                Ok(None)
            }
            "observe" => self.build_observe(cells, span, scope),
            _ => {
                let factory = match self.lookup(scope, &head) {
                    Some(id) => id,
                    None => {
                        return Err(GraphError::UnboundSymbol {
                            name: head,
                            span: cells[0].span(),
                        })
                    }
                };
                if self.nodes[factory].kind != NodeKind::ProcFactory {
                    return Err(GraphError::NotAProcedure {
                        name: head,
                        span: cells[0].span(),
                    });
                }
                let mut args = Vec::new();
                for cell in &cells[1..] {
                    args.push(self.build_value(cell, scope)?);
                }
                self.apply(factory, args, span)
            }
        }
    }

    // Build a cell that must produce a node.
    fn build_value(&mut self, cell: &Cell, scope: ScopeId) -> Result<NodeId, GraphError> {
        match self.build(cell, scope)? {
            Some(id) => Ok(id),
            None => Err(GraphError::Kind {
                message: "Expression produces no value".to_string(),
                span: cell.span(),
            }),
        }
    }

    // The one factory invocation path: scalar operators, list builtins
    // and lambdas all come through here.
    pub fn apply(&mut self, factory: NodeId, args: Vec<NodeId>, span: Span) -> BuildResult {
        let fac = match self.nodes[factory].factory.clone() {
            Some(fac) => fac,
            None => {
                return Err(GraphError::NotAProcedure {
                    name: self.nodes[factory].token.clone(),
                    span,
                })
            }
        };
        match fac {
            Factory::Op(def) => {
                self.expect_args(def.name, args.len(), def.min_args, def.max_args, span)?;
                for (i, arg) in args.iter().enumerate() {
                    let mask = op_arg_mask(def, i);
                    let kind = self.nodes[*arg].kind;
                    if !mask.is_empty() && !mask.contains(kind) {
                        return Err(GraphError::Kind {
                            message: format!(
                                "Incorrect argument {} kind for function '{}'. Got {:?}. Expected {:?}",
                                i, def.name, kind, mask
                            ),
                            span,
                        });
                    }
                }
                let id = self.add_node(NodeKind::Proc);
                self.nodes[id].token = def.name.to_string();
                self.nodes[id].op = Some(def);
                self.nodes[id].parents = args;
                Ok(Some(id))
            }
            Factory::Lambda {
                params,
                body,
                scope,
            } => {
                if params.len() != args.len() {
                    return Err(GraphError::Arity {
                        message: format!(
                            "Incorrect number of params. Expected {} Got {}",
                            params.len(),
                            args.len()
                        ),
                        span,
                    });
                }
                let child = self.child_scope(scope);
                for (param, arg) in params.iter().zip(&args) {
                    self.define(child, param, *arg);
                }
                self.build(&body, child)
            }
            Factory::Builtin(op) => self.apply_builtin(op, args, span),
        }
    }

    fn apply_builtin(&mut self, op: ListOp, args: Vec<NodeId>, span: Span) -> BuildResult {
        match op {
            ListOp::Map => {
                self.expect_kinds("map", &args, &[factory_mask(), list_mask()], span)?;
                let elements = self.nodes[args[1]].parents.clone();
                let mapped = self.add_node(NodeKind::List);
                for element in elements {
                    let result = self.apply_value(args[0], vec![element], span)?;
                    self.nodes[mapped].parents.push(result);
                }
                Ok(Some(mapped))
            }
            ListOp::ForEach => {
                self.expect_kinds("for-each", &args, &[factory_mask(), list_mask()], span)?;
                let elements = self.nodes[args[1]].parents.clone();
                for element in elements {
                    self.apply(args[0], vec![element], span)?;
                }
                Ok(None)
            }
            ListOp::Fold => {
                self.expect_kinds(
                    "fold",
                    &args,
                    &[factory_mask(), BitFlags::empty(), list_mask()],
                    span,
                )?;
                let elements = self.nodes[args[2]].parents.clone();
                let mut accumulator = args[1];
                for element in elements {
                    accumulator = self.apply_value(args[0], vec![accumulator, element], span)?;
                }
                Ok(Some(accumulator))
            }
            ListOp::List => {
                let id = self.add_node(NodeKind::List);
                self.nodes[id].parents = args;
                Ok(Some(id))
            }
            ListOp::Zip => {
                if args.len() < 2 {
                    return Err(self.arity_error("zip", 2, args.len(), span));
                }
                let length = self.nodes[args[0]].parents.len();
                for arg in &args {
                    if self.nodes[*arg].kind != NodeKind::List {
                        return Err(GraphError::Kind {
                            message: "zip requires list arguments".to_string(),
                            span,
                        });
                    }
                    if self.nodes[*arg].parents.len() != length {
                        return Err(GraphError::Kind {
                            message: "zip requires lists of equal length".to_string(),
                            span,
                        });
                    }
                }
                let zipped = self.add_node(NodeKind::List);
                for i in 0..length {
                    let row = self.add_node(NodeKind::List);
                    for arg in &args {
                        let element = self.nodes[*arg].parents[i];
                        self.nodes[row].parents.push(element);
                    }
                    self.nodes[zipped].parents.push(row);
                }
                Ok(Some(zipped))
            }
            ListOp::Car => {
                self.expect_kinds("car", &args, &[list_mask()], span)?;
                match self.nodes[args[0]].parents.first() {
                    Some(&first) => Ok(Some(first)),
                    None => Err(self.arity_error("car", 1, 0, span)),
                }
            }
            ListOp::Cdr => {
                self.expect_kinds("cdr", &args, &[list_mask()], span)?;
                let rest: Vec<NodeId> =
                    self.nodes[args[0]].parents.iter().skip(1).cloned().collect();
                let id = self.add_node(NodeKind::List);
                self.nodes[id].parents = rest;
                Ok(Some(id))
            }
            ListOp::Iota => {
                self.expect_kinds(
                    "iota",
                    &args,
                    &[const_mask(), const_mask(), const_mask()],
                    span,
                )?;
                let count = self.nodes[args[0]].init_value as i64;
                let start = self.nodes[args[1]].init_value;
                let step = self.nodes[args[2]].init_value;
                let range = self.add_node(NodeKind::List);
                for i in 0..count.max(0) {
                    let value = start + i as f64 * step;
                    let item = self.add_node(NodeKind::Const);
                    self.nodes[item].token = format!("{}", value);
                    self.nodes[item].init_value = value;
                    self.nodes[range].parents.push(item);
                }
                Ok(Some(range))
            }
            ListOp::Apply => {
                if args.is_empty() {
                    return Err(self.arity_error("apply", 1, 0, span));
                }
                if self.nodes[args[0]].kind != NodeKind::ProcFactory {
                    return Err(GraphError::Kind {
                        message: "apply requires a procedure as its first argument"
                            .to_string(),
                        span,
                    });
                }
                let mut flattened = Vec::new();
                for arg in &args[1..] {
                    self.list_members(*arg, &mut flattened);
                }
                self.apply(args[0], flattened, span)
            }
            ListOp::Append => {
                let mut flattened = Vec::new();
                for arg in &args {
                    self.list_members(*arg, &mut flattened);
                }
                let id = self.add_node(NodeKind::List);
                self.nodes[id].parents = flattened;
                Ok(Some(id))
            }
            ListOp::Nth => {
                self.expect_kinds("nth", &args, &[const_mask(), list_mask()], span)?;
                let n = self.nodes[args[0]].init_value as i64;
                let elements = &self.nodes[args[1]].parents;
                if n < 0 || n as usize >= elements.len() {
                    return Err(GraphError::Arity {
                        message: format!(
                            "Not enough items in list. Expected at least {} Got {}",
                            n + 1,
                            elements.len()
                        ),
                        span,
                    });
                }
                Ok(Some(elements[n as usize]))
            }
        }
    }

    fn apply_value(
        &mut self,
        factory: NodeId,
        args: Vec<NodeId>,
        span: Span,
    ) -> Result<NodeId, GraphError> {
        match self.apply(factory, args, span)? {
            Some(id) => Ok(id),
            None => Err(GraphError::Kind {
                message: "Procedure produces no value".to_string(),
                span,
            }),
        }
    }

    fn build_input(&mut self, cells: &[Cell], span: Span, scope: ScopeId) -> Result<(), GraphError> {
        expect_form(cells, 2, ops::MANY, span)?;
        if cells[1].text() == "list" {
            // (input list name d1 d2 ...)
            expect_form(cells, 4, ops::MANY, span)?;
            let name = symbol_text(&cells[2], "input requires a symbol name")?;
            let mut dims = Vec::new();
            let mut length: u32 = 1;
            for cell in &cells[3..] {
                let dim: usize = cell.text().parse().map_err(|_| GraphError::Kind {
                    message: format!(
                        "Input dimension must be a positive integer, got '{}'",
                        cell.text()
                    ),
                    span: cell.span(),
                })?;
                dims.push(dim);
                length *= dim as u32;
            }
            let root = self.add_node(NodeKind::List);
            self.nodes[root].token = name.clone();
            self.nodes[root].is_input = true;
            self.define(scope, &name, root);
            self.build_input_list(root, &name, &dims, scope);
            self.label_list_root(root, &name, length, true);
        } else {
            // (input name ...) with an optional leading type token,
            // accepted and ignored: the value type is always double.
            let names = match cells[1].text() {
                "double" | "bool" | "int" | "uint" => &cells[2..],
                _ => &cells[1..],
            };
            if names.is_empty() {
                return Err(self.arity_error("input", 2, cells.len() - 1, span));
            }
            for cell in names {
                let name = symbol_text(cell, "input requires symbol names")?;
                let id = self.add_node(NodeKind::Var);
                self.nodes[id].token = name.clone();
                self.nodes[id].input_labels.push(name.clone());
                self.nodes[id].is_input = true;
                self.define(scope, &name, id);
            }
        }
        Ok(())
    }

    // Expand one dimension of a list input: the leaves are settable
    // vars, the interior levels are lists, and every level is
    // addressable by its bracketed name.
    fn build_input_list(&mut self, parent: NodeId, token: &str, dims: &[usize], scope: ScopeId) {
        if dims.is_empty() {
            return;
        }
        let kind = if dims.len() == 1 {
            NodeKind::Var
        } else {
            NodeKind::List
        };
        for i in 0..dims[0] {
            let label = format!("{}[{}]", token, i);
            let id = self.add_node(kind);
            self.nodes[id].token = label.clone();
            self.nodes[id].input_labels.push(label.clone());
            self.nodes[parent].parents.push(id);
            self.define(scope, &label, id);
            self.build_input_list(id, &label, &dims[1..], scope);
        }
    }

    // Attach an aggregate label (and the flattened length) to the
    // first leaf of a list, so the whole list is addressable through
    // one point.
    fn label_list_root(&mut self, node: NodeId, label: &str, length: u32, input: bool) {
        if self.nodes[node].kind != NodeKind::List {
            if input {
                self.nodes[node].input_labels.push(label.to_string());
            } else {
                self.nodes[node].observer_labels.push(label.to_string());
            }
            self.nodes[node].length = self.nodes[node].length.max(length);
            return;
        }
        if let Some(&first) = self.nodes[node].parents.first() {
            self.label_list_root(first, label, length, input);
        }
    }

    fn build_observe(&mut self, cells: &[Cell], span: Span, scope: ScopeId) -> BuildResult {
        expect_form(cells, 3, 3, span)?;
        let label = strip_quotes(cells[1].text()).to_string();
        let node = match self.build(&cells[2], scope)? {
            Some(id) => id,
            None => {
                return Err(GraphError::Kind {
                    message: "Node isn't observable".to_string(),
                    span: cells[2].span(),
                })
            }
        };
        let mut labels = Vec::new();
        self.collect_observer_labels(node, &label, &mut labels);
        let length = self.list_length(node);
        self.nodes[node].is_observer = true;
        self.observers.push(ObserverGroup {
            node,
            labels,
            label,
            length,
        });
        Ok(Some(node))
    }

    fn collect_observer_labels(
        &self,
        node: NodeId,
        label: &str,
        out: &mut Vec<(NodeId, String)>,
    ) {
        if self.nodes[node].kind != NodeKind::List {
            out.push((node, label.to_string()));
            return;
        }
        for (i, parent) in self.nodes[node].parents.clone().iter().enumerate() {
            self.collect_observer_labels(*parent, &format!("{}[{}]", label, i), out);
        }
    }

    pub fn list_length(&self, node: NodeId) -> u32 {
        if self.nodes[node].kind != NodeKind::List {
            return 1;
        }
        self.nodes[node]
            .parents
            .iter()
            .map(|p| self.list_length(*p))
            .sum()
    }

    // Plain DOT rendering of the value graph for external visualisers.
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph {\n");
        for (id, node) in self.nodes.iter().enumerate() {
            match node.kind {
                NodeKind::Const | NodeKind::Var | NodeKind::Proc => {
                    for parent in &node.parents {
                        out.push_str(&format!("n{} -> n{}\n", parent, id));
                    }
                    let label = if node.token.is_empty() {
                        format!("n{}", id)
                    } else {
                        node.token.clone()
                    };
                    out.push_str(&format!("n{} [label=\"{}\"];\n", id, label));
                }
                _ => {}
            }
            for label in &node.observer_labels {
                out.push_str(&format!("n{} -> \"{}\"\n", id, label));
            }
        }
        out.push('}');
        out
    }

    fn arity_error(&self, name: &str, min: usize, got: usize, span: Span) -> GraphError {
        GraphError::Arity {
            message: format!(
                "Not enough items in list for function '{}'. Expected at least {} Got {}",
                name, min, got
            ),
            span,
        }
    }

    fn expect_args(
        &self,
        name: &str,
        got: usize,
        min: usize,
        max: usize,
        span: Span,
    ) -> Result<(), GraphError> {
        if got < min {
            return Err(self.arity_error(name, min, got, span));
        }
        if got > max {
            return Err(GraphError::Arity {
                message: format!(
                    "Too many items in list for function '{}'. Expected at most {} Got {}",
                    name, max, got
                ),
                span,
            });
        }
        Ok(())
    }

    fn expect_kinds(
        &self,
        name: &str,
        args: &[NodeId],
        expected: &[KindSet],
        span: Span,
    ) -> Result<(), GraphError> {
        self.expect_args(name, args.len(), expected.len(), expected.len(), span)?;
        for (i, mask) in expected.iter().enumerate() {
            let kind = self.nodes[args[i]].kind;
            if !mask.is_empty() && !mask.contains(kind) {
                return Err(GraphError::Kind {
                    message: format!(
                        "Incorrect argument {} kind for function '{}'. Got {:?}. Expected {:?}",
                        i, name, kind, mask
                    ),
                    span,
                });
            }
        }
        Ok(())
    }
}


fn factory_mask() -> KindSet {
    BitFlags::from_flag(NodeKind::ProcFactory)
}

fn list_mask() -> KindSet {
    BitFlags::from_flag(NodeKind::List)
}

fn const_mask() -> KindSet {
    BitFlags::from_flag(NodeKind::Const)
}

// Per-argument kind masks for scalar operators: operands must be value
// nodes so no list ever reaches the evaluated point array. Load and
// store address a settable var; sim-apply is validated structurally by
// the layout planner.
fn op_arg_mask(def: &OpDef, index: usize) -> KindSet {
    match def.opcode {
        Opcode::SimApply => BitFlags::empty(),
        Opcode::Load => BitFlags::from_flag(NodeKind::Var),
        Opcode::Store if index == 0 => BitFlags::from_flag(NodeKind::Var),
        _ => NodeKind::Const | NodeKind::Var | NodeKind::Proc,
    }
}

fn expect_form(cells: &[Cell], min: usize, max: usize, span: Span) -> Result<(), GraphError> {
    if cells.len() < min {
        return Err(GraphError::Arity {
            message: format!(
                "Not enough items in list for function. Expected at least {} Got {}",
                min,
                cells.len()
            ),
            span,
        });
    }
    if cells.len() > max {
        return Err(GraphError::Arity {
            message: format!(
                "Too many items in list for function. Expected at most {} Got {}",
                max,
                cells.len()
            ),
            span,
        });
    }
    Ok(())
}

fn symbol_text(cell: &Cell, context: &str) -> Result<String, GraphError> {
    match cell {
        Cell::Symbol { text, .. } => Ok(text.clone()),
        other => Err(GraphError::Kind {
            message: context.to_string(),
            span: other.span(),
        }),
    }
}

fn strip_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

fn parse_number(text: &str) -> f64 {
    match text {
        "INF" => f64::INFINITY,
        "NAN" => f64::NAN,
        _ => text.parse().unwrap_or(0.0),
    }
}
