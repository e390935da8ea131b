//! The per-region scheduling dependency graph.
//!
//! The graph is built by the client (see `GraphBuilder` in `interface.rs`)
//! as a pure function of the current instruction order, so that it can be
//! discarded and rebuilt after the anti-dependency breaker renames a
//! register.  The scheduler and breaker only consume it.

use smallvec::SmallVec;
use std::fmt;

use crate::data_structures::{InstIx, RealReg, TypedIxVec, UnitIx};

/// The kind of a dependency edge.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DepKind {
  /// True data dependency: a def feeding a later use.
  Data,
  /// Write-after-read on a register.  Carries the register; breakable by
  /// renaming.
  Anti,
  /// Write-after-write on a register.  Carries the register.
  Output,
  /// Any other ordering requirement (memory, control).
  Order,
}

/// One edge of the graph.  Stored twice: on the source's `succs` and the
/// target's `preds`, with `unit` naming the node at the far end in each
/// case.
#[derive(Copy, Clone, Debug)]
pub struct DepEdge {
  pub unit: UnitIx,
  pub kind: DepKind,
  pub latency: u32,
  pub reg: Option<RealReg>,
}

/// One schedulable node: a single instruction, or one of the two sentinels
/// bounding the region.
#[derive(Clone)]
pub struct SchedUnit {
  /// The instruction this unit schedules, or `None` for a sentinel.
  pub inst: Option<InstIx>,
  pub preds: SmallVec<[DepEdge; 4]>,
  pub succs: SmallVec<[DepEdge; 4]>,
  /// Cycles until this unit's results are available to consumers.  Zero
  /// means a pseudo-op that does not occupy an issue cycle.
  pub latency: u32,
  /// Scheduling priority, supplied by the graph builder.  Higher is
  /// scheduled first among ready units.
  pub priority: u32,
  /// Earliest cycle this unit can issue: max over predecessors of
  /// `pred.depth + edge.latency`.  Raised as predecessors are scheduled.
  pub depth: u32,
  /// Predecessors not yet scheduled.
  pub num_preds_left: u32,
  pub is_scheduled: bool,
  pub is_available: bool,
  /// Memory-access properties, used by hazard recognizers.
  pub may_load: bool,
  pub may_store: bool,
  /// Cycle at which the unit was issued; meaningful once `is_scheduled`.
  pub sched_cycle: u32,
}

impl SchedUnit {
  fn new(inst: Option<InstIx>, latency: u32) -> Self {
    Self {
      inst,
      preds: SmallVec::new(),
      succs: SmallVec::new(),
      latency,
      priority: 0,
      depth: 0,
      num_preds_left: 0,
      is_scheduled: false,
      is_available: false,
      may_load: false,
      may_store: false,
      sched_cycle: 0,
    }
  }
}

impl fmt::Debug for SchedUnit {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self.inst {
      Some(iix) => write!(
        fmt,
        "unit({:?} lat={} prio={} depth={} preds_left={})",
        iix, self.latency, self.priority, self.depth, self.num_preds_left
      ),
      None => write!(fmt, "unit(sentinel)"),
    }
  }
}

/// A region's dependency DAG.  The two sentinel units are created up front
/// at fixed indices; real units follow in the order the builder adds them
/// (normally the region's program order).
pub struct SchedGraph {
  pub units: TypedIxVec<UnitIx, SchedUnit>,
  pub entry: UnitIx,
  pub exit: UnitIx,
}

impl SchedGraph {
  pub fn new() -> Self {
    let mut units = TypedIxVec::new();
    let entry = UnitIx::new(0);
    let exit = UnitIx::new(1);
    units.push(SchedUnit::new(None, 0));
    units.push(SchedUnit::new(None, 0));
    Self { units, entry, exit }
  }

  pub fn is_sentinel(&self, ix: UnitIx) -> bool {
    ix == self.entry || ix == self.exit
  }

  pub fn num_real_units(&self) -> u32 {
    self.units.len() - 2
  }

  /// Indices of the non-sentinel units.
  pub fn real_units(&self) -> impl Iterator<Item = UnitIx> {
    (2..self.units.len()).map(UnitIx::new)
  }

  pub fn unit(&self, ix: UnitIx) -> &SchedUnit {
    &self.units[ix]
  }

  pub fn unit_mut(&mut self, ix: UnitIx) -> &mut SchedUnit {
    &mut self.units[ix]
  }

  /// Add a unit for `inst` and return its index.
  pub fn add_unit(&mut self, inst: InstIx, latency: u32) -> UnitIx {
    let ix = UnitIx::new(self.units.len());
    self.units.push(SchedUnit::new(Some(inst), latency));
    ix
  }

  /// Add an edge `from -> to`.  Recorded on both endpoints.
  pub fn add_edge(
    &mut self, from: UnitIx, to: UnitIx, kind: DepKind, latency: u32,
    reg: Option<RealReg>,
  ) {
    debug_assert!(from != to, "self-edge in scheduling graph");
    self.units[from].succs.push(DepEdge { unit: to, kind, latency, reg });
    self.units[to].preds.push(DepEdge { unit: from, kind, latency, reg });
  }

  /// Finish construction: set `num_preds_left` and compute every unit's
  /// initial depth as the longest latency-weighted path from a root.  Must
  /// be called exactly once, after all units and edges are in place.
  pub fn finish(&mut self) {
    let n = self.units.len();
    let mut preds_left = vec![0u32; n as usize];
    for ix in 0..n {
      let u = &mut self.units[UnitIx::new(ix)];
      let np = u.preds.len() as u32;
      u.num_preds_left = np;
      u.depth = 0;
      preds_left[ix as usize] = np;
    }
    // Kahn-style worklist; the graph is required to be acyclic.
    let mut worklist: Vec<UnitIx> = (0..n)
      .map(UnitIx::new)
      .filter(|&ix| self.units[ix].preds.is_empty())
      .collect();
    let mut processed = 0u32;
    while let Some(ix) = worklist.pop() {
      processed += 1;
      let depth = self.units[ix].depth;
      let succs = self.units[ix].succs.clone();
      for edge in succs {
        let succ = &mut self.units[edge.unit];
        if succ.depth < depth + edge.latency {
          succ.depth = depth + edge.latency;
        }
        preds_left[edge.unit.get_usize()] -= 1;
        if preds_left[edge.unit.get_usize()] == 0 {
          worklist.push(edge.unit);
        }
      }
    }
    assert!(processed == n, "cycle in scheduling graph");
  }
}
