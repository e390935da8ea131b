/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Critical-path anti-dependency breaking.
//!
//! Anti-dependencies are false dependencies introduced purely by register
//! reuse: a def forced to wait for an earlier use of the same register.
//! Walking a region bottom-up along the critical path, this renames the
//! live range hanging off such a def to a currently-dead register of the
//! same class, so that the scheduler can overlap the two computations.

use log::debug;

use crate::data_structures::{InstIx, RealReg, RealRegUniverse, UnitIx};
use crate::interface::{Function, OperandKind};
use crate::liveness::{LiveClass, LiveRegTracker};
use crate::sched_graph::{DepEdge, DepKind, SchedGraph};

/// Return the predecessor edge to follow from `ix` to continue along the
/// bottom-up critical path: the one with the greatest `depth + latency`.
/// In the case of a latency tie, prefer an anti-dependency edge over other
/// kinds of edges.
fn critical_path_step(graph: &SchedGraph, ix: UnitIx) -> Option<DepEdge> {
  let mut next: Option<DepEdge> = None;
  let mut next_depth = 0u32;
  for edge in &graph.unit(ix).preds {
    let pred_total = graph.unit(edge.unit).depth + edge.latency;
    if next_depth < pred_total
      || (next_depth == pred_total && edge.kind == DepKind::Anti)
    {
      next_depth = pred_total;
      next = Some(*edge);
    }
  }
  next
}

/// Identify anti-dependencies along the region's critical path and break
/// them by renaming registers.  `[begin, insert_pos)` are the region's
/// block-relative bounds and `block_first` the block's first instruction,
/// so the instruction at block-relative position `count` is
/// `block_first.plus(count)`.
///
/// Returns whether anything was renamed; if so the caller must discard the
/// graph and rebuild it, since renaming invalidates its register-carried
/// edges.
pub fn break_anti_dependencies<F: Function>(
  func: &mut F, universe: &RealRegUniverse, graph: &SchedGraph,
  tracker: &mut LiveRegTracker, begin: u32, insert_pos: u32,
  block_first: InstIx,
) -> bool {
  // The code below assumes that there is at least one instruction, so just
  // duck out immediately if the region is empty.
  if graph.num_real_units() == 0 {
    return false;
  }

  // Find the unit at the bottom of the critical path.
  let mut max: Option<UnitIx> = None;
  for ix in graph.real_units() {
    let total = graph.unit(ix).depth + graph.unit(ix).latency;
    match max {
      Some(m) if graph.unit(m).depth + graph.unit(m).latency >= total => {}
      _ => max = Some(ix),
    }
  }
  let max = match max {
    Some(m) => m,
    None => return false,
  };
  debug!(
    "critical path has total latency {}",
    graph.unit(max).depth + graph.unit(max).latency
  );

  // Track progress along the critical path through the unit graph as we
  // walk the instructions.
  let mut critical_path_unit = max;
  let mut critical_path_inst = graph.unit(max).inst;

  // Consider this pattern:
  //   A = ...
  //   ... = A
  //   A = ...
  //   ... = A
  //   A = ...
  //   ... = A
  // There are anti-dependencies here at every redefinition, and without
  // special care we'd break all of them using the same register, because
  // at each one, B is the first register that isn't A which is free.
  // That re-introduces an anti-dependency at all but one of the places we
  // just repaired.  To avoid this, keep track of the most recent register
  // each register was replaced with, and don't use it to repair an
  // anti-dependence on the same register.  The result still has an
  // anti-dependency on the reused replacement, but at least it isn't on
  // the original critical path.
  let mut last_new_reg: Vec<Option<RealReg>> =
    vec![None; universe.num_regs()];

  // Attempt to break anti-dependence edges on the critical path.  Walk the
  // instructions from the bottom up, tracking information about liveness
  // as we go to help determine which registers are available.
  let mut changed = false;
  for count in (begin..insert_pos).rev() {
    let iix = block_first.plus(count);

    // Placeholder implicit defs exist to mark a register live without
    // clobbering it, so treating one as a dependence-breaking anchor would
    // be wrong.  Just ignore them.
    if func.is_implicit_def(iix) {
      continue;
    }

    // Check if this instruction has a dependence on the critical path that
    // is an anti-dependence we may be able to break.  If it is, set
    // `antidep_reg` to the register associated with the anti-dependence.
    //
    // We limit our attention to the critical path as a heuristic to avoid
    // breaking anti-dependence edges that aren't going to significantly
    // impact the overall schedule.  There are a limited number of
    // registers and we want to save them for the important edges.
    //
    // TODO: Instructions with multiple defs could have multiple
    // anti-dependencies.  The code here only knows how to break one edge
    // per instruction.
    let mut antidep_reg: Option<RealReg> = None;
    if critical_path_inst == Some(iix) {
      match critical_path_step(graph, critical_path_unit) {
        Some(edge) => {
          let next_unit = edge.unit;
          // Only consider anti-dependence edges.
          if edge.kind == DepKind::Anti {
            let reg = match edge.reg {
              Some(reg) => reg,
              None => panic!("anti-dependence edge carries no register"),
            };
            // Don't break anti-dependencies on non-allocatable registers.
            if universe.is_allocable(reg) {
              antidep_reg = Some(reg);
              // If the unit has other dependencies on the unit that it
              // anti-depends on, the anti-dependency isn't worth breaking:
              // those edges keep the two apart regardless.  Likewise if
              // there is a data dependency on some other unit carried by
              // the same register.
              for p in &graph.unit(critical_path_unit).preds {
                let disqualifies = if p.unit == next_unit {
                  p.kind != DepKind::Anti || p.reg != Some(reg)
                } else {
                  p.kind == DepKind::Data && p.reg == Some(reg)
                };
                if disqualifies {
                  antidep_reg = None;
                  break;
                }
              }
            }
          }
          critical_path_unit = next_unit;
          critical_path_inst = graph.unit(next_unit).inst;
        }
        None => {
          // We've reached the end of the critical path.
          critical_path_inst = None;
        }
      }
    }

    tracker.prescan(func, universe, iix);

    // If this instruction has a use of `antidep_reg`, breaking it here
    // would sever that very use.
    if let Some(adr) = antidep_reg {
      let uses_it = func
        .reg_operands(iix)
        .iter()
        .any(|op| op.kind == OperandKind::Use && op.reg == adr);
      if uses_it {
        antidep_reg = None;
      }
    }

    // Determine the register's class, if it is live and is consistently
    // used within a single class.
    let mut rename_class = None;
    if let Some(adr) = antidep_reg {
      match tracker.class_of(adr) {
        LiveClass::Single(rc) => rename_class = Some(rc),
        LiveClass::Multi => antidep_reg = None,
        LiveClass::Dead => panic!(
          "{:?} should be live if it's causing an anti-dependence",
          adr
        ),
      }
    }

    // Look for a suitable register to use to break the anti-dependence.
    //
    // TODO: Instead of picking the first free register, consider which
    // might be the best.
    if let (Some(adr), Some(rc)) = (antidep_reg, rename_class) {
      for (new_reg, _name) in universe.allocation_order(rc) {
        let new_reg = *new_reg;
        // Don't replace a register with itself.
        if new_reg == adr {
          continue;
        }
        // Don't replace a register with one that was recently used to
        // repair an anti-dependence with this same register, because that
        // would re-introduce that anti-dependence.
        if Some(new_reg) == last_new_reg[adr.get_index()] {
          continue;
        }
        tracker.check(adr);
        tracker.check(new_reg);
        // If `new_reg` is dead and its most recent def is not before the
        // live range being replaced ends, it's safe to replace.  A range
        // with no kill at all (the anti-dependent def's value is never
        // read) has nothing to gain from renaming, and the match below
        // rejects every candidate for it.
        let new_is_free = tracker.kill_ix(new_reg).is_none()
          && tracker.class_of(new_reg) != LiveClass::Multi
          && match (tracker.kill_ix(adr), tracker.def_ix(new_reg)) {
            (Some(kill), Some(def)) => kill <= def,
            _ => false,
          };
        if new_is_free {
          debug!(
            "breaking anti-dependence edge on {:?} with {} references \
             using {:?}",
            adr,
            tracker.refs(adr).len(),
            new_reg
          );

          // Update the references to the old register to refer to the new
          // one.
          let refs = tracker.refs(adr).to_vec();
          for r in refs {
            func.set_operand_reg(r.iix, r.op, new_reg);
          }
          tracker.rename(adr, new_reg);

          changed = true;
          last_new_reg[adr.get_index()] = Some(new_reg);
          break;
        }
      }
    }

    tracker.scan(func, universe, iix, count);
  }

  changed
}
