/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

// This is the top level interface for the postsched library.

use std::fmt;

// Sets and maps of things, and the typed index vectors, so that the
// interface can speak about collections of blocks and instructions.

pub use crate::data_structures::Map;
pub use crate::data_structures::Set;
pub use crate::data_structures::TypedIxVec;
pub use crate::data_structures::{BlockIx, InstIx, MyRange, UnitIx};

// Register classes, registers and the real-register universe.

pub use crate::data_structures::{
  RealReg, RealRegUniverse, RegClass, RegClassInfo, NUM_REG_CLASSES,
};

// The scheduling graph, which the client builds and the scheduler consumes.

pub use crate::sched_graph::{DepEdge, DepKind, SchedGraph, SchedUnit};

// Hazard recognizers.

pub use crate::hazard::{
  HazardRecognizer, HazardType, SimpleHazardRecognizer,
  TrivialHazardRecognizer,
};

// Liveness classes appear in the interface only for clients that want to
// inspect tracker state in their own diagnostics.

pub use crate::liveness::{LiveClass, LiveRegTracker, OperandRef};

/// Whether an operand reads or writes its register.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OperandKind {
  Use,
  Def,
}

/// One register mention within an instruction, in the order reported by
/// `Function::reg_operands`.  That order is the operand numbering used by
/// `operand_reg_class` and `set_operand_reg`.
#[derive(Copy, Clone, Debug)]
pub struct RegOperand {
  pub reg: RealReg,
  pub kind: OperandKind,
  /// A def constrained to the same register as one of the instruction's
  /// uses (a two-address operand).  Such a def does not end the register's
  /// live range.
  pub tied_to_use: bool,
}

/// A trait defined by the scheduler's client to provide access to its
/// machine-instruction / CFG representation.  All instructions hold only
/// physical registers; this pass runs after register allocation.
pub trait Function {
  /// The scheduler is parameterized on F: Function and so can use the
  /// projected type F::Inst.
  type Inst: Clone;

  /// Allow access to the underlying vector of instructions.
  fn insns(&self) -> &[Self::Inst];

  /// Allow iteration over basic blocks (in instruction order).
  fn blocks(&self) -> MyRange<BlockIx>;

  /// Provide the range of instruction indices contained in each block.
  fn block_insns(&self, block: BlockIx) -> MyRange<InstIx>;

  /// Get CFG successors for a given block.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx>;

  /// Physical registers live into a given block, from the client's
  /// liveness analysis.
  fn block_liveins(&self, block: BlockIx) -> Vec<RealReg>;

  /// Physical registers live out of the function (consulted for return
  /// blocks).
  fn func_liveouts(&self) -> Vec<RealReg>;

  /// Is this instruction a return?
  fn is_return(&self, iix: InstIx) -> bool;

  /// Is this instruction a scheduling boundary?  True for labels,
  /// terminators, and anything that writes a stack-oriented pointer:
  /// instructions cannot be moved across such a point.
  fn is_scheduling_boundary(&self, iix: InstIx) -> bool;

  /// Is this instruction a placeholder that marks a register live without
  /// really defining it?  Such instructions are not safe anchors for
  /// dependence breaking and are skipped entirely.
  fn is_implicit_def(&self, iix: InstIx) -> bool;

  /// The register operands of an instruction, defs and uses both.
  fn reg_operands(&self, iix: InstIx) -> Vec<RegOperand>;

  /// The register class required by operand `op` of the instruction, if
  /// the target constrains it to one.
  fn operand_reg_class(&self, iix: InstIx, op: usize) -> Option<RegClass>;

  /// Rewrite operand `op` of the instruction to name `new_reg`.  This is
  /// how the anti-dependency breaker applies a rename.
  fn set_operand_reg(&mut self, iix: InstIx, op: usize, new_reg: RealReg);

  /// Generate a noop for insertion into the instruction sequence.
  fn gen_noop(&self) -> Self::Inst;
}

/// Builds the dependency graph for a region `[begin, end)` of the current
/// instruction stream.  Must be a pure function of the current instruction
/// order: after the anti-dependency breaker renames a register the graph
/// is discarded and this is invoked again.
pub trait GraphBuilder<F: Function> {
  fn build_graph(&self, func: &F, begin: InstIx, end: InstIx) -> SchedGraph;
}

/// Per-run options.  No global state: construct one and pass it in.
#[derive(Clone, Copy, Debug)]
pub struct SchedOptions {
  /// Break anti-dependencies along the critical path by renaming.
  pub break_anti_dependencies: bool,
  /// Use the windowed hazard recognizer rather than the trivial one.
  pub avoid_hazards: bool,
}

impl Default for SchedOptions {
  fn default() -> Self {
    Self { break_anti_dependencies: true, avoid_hazards: true }
  }
}

/// The result of scheduling a function.
pub struct SchedResult<F: Function> {
  /// A new sequence of instructions: each block's code reordered, with
  /// noops inserted where the hazard recognizer demanded them.  Register
  /// renames have already been applied to the client's instructions in
  /// place.
  pub insns: Vec<F::Inst>,

  /// Basic-block start indices for the new instruction list, indexed by
  /// the original basic block indices.
  pub target_map: TypedIxVec<BlockIx, InstIx>,

  /// How many noops were inserted.
  pub noops_inserted: u32,

  /// How many cycles were lost to pipeline stalls.
  pub stall_cycles: u32,
}

/// Scheduling can fail: a corrupt dependency graph is reported rather than
/// scheduled wrongly.
#[derive(Clone, Debug)]
pub enum SchedError {
  /// A unit was released more times than it has predecessors.  The
  /// supplied dependency graph is internally inconsistent; the function's
  /// schedule must be abandoned.
  UnitOverReleased { unit: UnitIx },
}

impl fmt::Display for SchedError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      SchedError::UnitOverReleased { unit } => write!(
        fmt,
        "scheduling failed: {:?} has been released too many times",
        unit
      ),
    }
  }
}

/// Schedule a function's code.  Each basic block is split into regions at
/// scheduling boundaries; each region's instructions are reordered to hide
/// latency, after first renaming registers to break anti-dependencies on
/// the critical path (when enabled).  On success the new instruction
/// sequence is returned; renames have also been applied to `func` itself.
pub fn schedule_function<F: Function, B: GraphBuilder<F>>(
  func: &mut F, builder: &B, universe: &RealRegUniverse, opts: &SchedOptions,
) -> Result<SchedResult<F>, SchedError> {
  crate::post_ra::run_scheduler(func, builder, universe, opts)
}
