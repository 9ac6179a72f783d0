//! Textual IR dumps.
//!
//! One dump per pass and phase:
//!
//! ```text
//! == void Main.fill(int[]) BCE (after)
//! B1 pred:[B0] succ:[B2] dom:B0
//!   0 v6 SuspendCheck env:[[l0,i3]] loop:none
//!   2 i7 ArrayLength [l5] loop:B2 outer_loop:none irreducible:false
//! ```
//!
//! Blocks appear in reverse postorder, phis before instructions. Each
//! instruction line is the use count, the type letter and id, the kind, the
//! inputs, the attributes, the environment and the loop tag.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use crate::ir::cfg::BlockId;
use crate::ir::graph::Graph;
use crate::ir::instruction::InstId;
use crate::ir::operators::{ComparisonBias, Operator};
use crate::opt::pipeline::PassObserver;

/// Whether a dump was taken before or after its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpPhase {
    Before,
    After,
}

impl DumpPhase {
    pub const fn name(self) -> &'static str {
        match self {
            DumpPhase::Before => "before",
            DumpPhase::After => "after",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "before" => Some(DumpPhase::Before),
            "after" => Some(DumpPhase::After),
            _ => None,
        }
    }
}

/// `<method> <pass> (<phase>)`, the key dumps are looked up by.
pub fn dump_key(method: &str, pass: &str, phase: DumpPhase) -> String {
    format!("{method} {pass} ({})", phase.name())
}

#[inline]
fn value_name(graph: &Graph, id: InstId) -> String {
    format!("{}{}", graph.ty(id).short_name(), id.as_usize())
}

fn block_list(blocks: &[BlockId]) -> String {
    let names: Vec<String> = blocks.iter().map(|b| format!("B{}", b.as_usize())).collect();
    format!("[{}]", names.join(","))
}

fn attributes(graph: &Graph, id: InstId) -> Option<String> {
    let text = match graph.op(id) {
        Operator::IntConstant(v) => v.to_string(),
        Operator::LongConstant(v) => v.to_string(),
        Operator::FloatConstant(bits) => f32::from_bits(*bits).to_string(),
        Operator::DoubleConstant(bits) => f64::from_bits(*bits).to_string(),
        Operator::Deoptimize(kind) => format!("kind:{}", kind.name()),
        Operator::DataProcWithShifterOp(op) => {
            if op.op_kind.is_shift() {
                format!("kind:{}+{} shift:{}", op.kind.name(), op.op_kind.name(), op.shift)
            } else {
                format!("kind:{}+{}", op.kind.name(), op.op_kind.name())
            }
        }
        Operator::Condition(_, bias) | Operator::Compare(bias) => match bias {
            ComparisonBias::GtBias => "bias:gt".to_string(),
            ComparisonBias::LtBias => "bias:lt".to_string(),
            ComparisonBias::NoBias => return None,
        },
        Operator::InvokeStaticOrDirect(target) => {
            let mut text = format!("method_name:{}.{}", target.class, target.method);
            if let Some(intrinsic) = target.intrinsic {
                let _ = write!(text, " intrinsic:{}", intrinsic.name());
            }
            text
        }
        _ => return None,
    };
    Some(text)
}

fn instruction_line(graph: &Graph, id: InstId) -> String {
    let inst = graph.inst(id);
    let uses = graph.uses(id).len() + graph.env_uses(id).len();
    let mut line = format!("  {} {} {}", uses, value_name(graph, id), inst.op.name());
    if !inst.inputs.is_empty() {
        let inputs: Vec<String> = inst.inputs.iter().map(|i| value_name(graph, i)).collect();
        let _ = write!(line, " [{}]", inputs.join(","));
    }
    if let Some(attrs) = attributes(graph, id) {
        let _ = write!(line, " {attrs}");
    }
    if let Some(env) = &inst.env {
        let slots: Vec<String> = env
            .vregs
            .iter()
            .map(|slot| slot.map_or_else(|| "_".to_string(), |v| value_name(graph, v)))
            .collect();
        let _ = write!(line, " env:[[{}]]", slots.join(","));
    }
    match graph.loop_of(graph.block_of(id)) {
        Some(info) => {
            let outer = info
                .outer
                .map_or_else(|| "none".to_string(), |b| format!("B{}", b.as_usize()));
            let _ = write!(
                line,
                " loop:B{} outer_loop:{} irreducible:{}",
                info.header.as_usize(),
                outer,
                info.irreducible
            );
        }
        None => line.push_str(" loop:none"),
    }
    line
}

/// Body of a dump: one line per block and instruction, no header.
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();
    for &block in graph.reverse_post_order() {
        let bb = graph.block(block);
        let dom = bb
            .dominator
            .map_or_else(|| "none".to_string(), |d| format!("B{}", d.as_usize()));
        let _ = writeln!(
            out,
            "B{} pred:{} succ:{} dom:{}",
            block.as_usize(),
            block_list(&bb.predecessors),
            block_list(&bb.successors),
            dom
        );
        for &id in bb.phis.iter().chain(&bb.instructions) {
            out.push_str(&instruction_line(graph, id));
            out.push('\n');
        }
    }
    out
}

/// A full dump with its `==` header line.
pub fn dump_pass(graph: &Graph, pass: &str, phase: DumpPhase) -> String {
    let key = dump_key(&graph.signature().to_string(), pass, phase);
    format!("== {key}\n{}", dump_graph(graph))
}

// =============================================================================
// Recorder
// =============================================================================

/// Pipeline observer collecting dumps by key.
///
/// A pass that runs more than once keeps its first "before" dump and its
/// last "after" dump.
#[derive(Debug, Default)]
pub struct DumpRecorder {
    dumps: FxHashMap<String, String>,
    /// Keys in the order they were first recorded.
    order: Vec<String>,
    /// Only record passes with this name.
    pass_filter: Option<String>,
}

impl DumpRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record only the dumps of `pass`.
    pub fn for_pass(pass: impl Into<String>) -> Self {
        Self {
            pass_filter: Some(pass.into()),
            ..Self::default()
        }
    }

    fn record(&mut self, graph: &Graph, pass: &'static str, phase: DumpPhase) {
        if self.pass_filter.as_deref().is_some_and(|p| p != pass) {
            return;
        }
        let key = dump_key(&graph.signature().to_string(), pass, phase);
        if phase == DumpPhase::Before && self.dumps.contains_key(&key) {
            return;
        }
        if !self.dumps.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.dumps.insert(key, dump_pass(graph, pass, phase));
    }

    /// Dump for a key, header included.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.dumps.get(key).map(String::as_str)
    }

    /// All dumps in recording order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .filter_map(|k| self.dumps.get(k).map(|d| (k.as_str(), d.as_str())))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }
}

impl PassObserver for DumpRecorder {
    fn before_pass(&mut self, pass: &'static str, graph: &Graph) {
        self.record(graph, pass, DumpPhase::Before);
    }

    fn after_pass(&mut self, pass: &'static str, graph: &Graph, _changed: bool) {
        self.record(graph, pass, DumpPhase::After);
    }
}

// =============================================================================
// Tests
// =============================================================================
