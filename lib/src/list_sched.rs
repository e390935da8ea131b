/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The top-down list scheduling loop.
//!
//! The basic approach uses a priority queue of available units.  One at a
//! time, units are taken from the queue (thus in priority order), checked
//! for legality to issue, and emitted if legal.  A unit may not be legal
//! to issue either due to structural hazards or because an input to it has
//! not completed execution.

use log::debug;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::data_structures::UnitIx;
use crate::hazard::{HazardRecognizer, HazardType};
use crate::interface::SchedError;
use crate::sched_graph::SchedGraph;

/// One element of a region's final schedule.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Emitted {
  Unit(UnitIx),
  Noop,
}

/// A scheduled region: the emission order plus cycle-accounting totals.
pub struct RegionSched {
  pub sequence: Vec<Emitted>,
  pub stall_cycles: u32,
  pub noops_inserted: u32,
}

impl RegionSched {
  pub fn empty() -> Self {
    Self { sequence: Vec::new(), stall_cycles: 0, noops_inserted: 0 }
  }
}

//=============================================================================
// The available queue

// Ready units, popped highest-priority first.  Priorities are supplied by
// the graph builder; ties go to the lowest unit index so that a given
// graph always schedules the same way.
struct AvailEntry {
  prio: u32,
  unit: UnitIx,
}

impl PartialEq for AvailEntry {
  fn eq(&self, other: &Self) -> bool {
    self.prio == other.prio && self.unit == other.unit
  }
}
impl Eq for AvailEntry {}
impl PartialOrd for AvailEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for AvailEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    self.prio.cmp(&other.prio).then(other.unit.cmp(&self.unit))
  }
}

struct AvailableQueue {
  heap: BinaryHeap<AvailEntry>,
}

impl AvailableQueue {
  fn new() -> Self {
    Self { heap: BinaryHeap::new() }
  }
  fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }
  fn push(&mut self, graph: &SchedGraph, unit: UnitIx) {
    self.heap.push(AvailEntry { prio: graph.unit(unit).priority, unit });
  }
  fn pop(&mut self) -> Option<UnitIx> {
    self.heap.pop().map(|e| e.unit)
  }
}

//=============================================================================
// Top-down scheduling

/// Decrement the pred count of every successor of `ix`.  A successor whose
/// count reaches zero joins the pending queue (except the exit sentinel).
/// Also raise each successor's cycle bound: it cannot issue until all its
/// predecessors' results are available.
fn release_successors(
  graph: &mut SchedGraph, ix: UnitIx, pending: &mut Vec<UnitIx>,
) -> Result<(), SchedError> {
  let depth = graph.unit(ix).depth;
  let succs = graph.unit(ix).succs.clone();
  for edge in succs {
    let exit = graph.exit;
    let succ = graph.unit_mut(edge.unit);
    if succ.num_preds_left == 0 {
      debug!("*** scheduling failed: {:?} released too many times", edge.unit);
      return Err(SchedError::UnitOverReleased { unit: edge.unit });
    }
    succ.num_preds_left -= 1;
    if succ.depth < depth + edge.latency {
      succ.depth = depth + edge.latency;
    }
    if succ.num_preds_left == 0 && edge.unit != exit {
      pending.push(edge.unit);
    }
  }
  Ok(())
}

/// Schedule one region's graph.  `hazard` decides per-cycle issue
/// legality; the caller chooses which recognizer to supply.
pub fn list_schedule(
  graph: &mut SchedGraph, hazard: &mut dyn HazardRecognizer,
) -> Result<RegionSched, SchedError> {
  let mut cur_cycle = 0u32;
  let mut sequence = Vec::with_capacity(graph.num_real_units() as usize);
  let mut stall_cycles = 0u32;
  let mut noops_inserted = 0u32;

  let mut available = AvailableQueue::new();
  // Units whose predecessors have all issued but whose inputs are still in
  // flight.
  let mut pending: Vec<UnitIx> = Vec::new();

  // Release any successors of the special entry unit.
  let entry = graph.entry;
  release_successors(graph, entry, &mut pending)?;

  // All leaves to the available queue: a unit with no predecessors can
  // issue immediately.
  for ix in graph.real_units() {
    if graph.unit(ix).preds.is_empty() {
      available.push(graph, ix);
      graph.unit_mut(ix).is_available = true;
    }
  }

  // While the available queue is not empty, grab the unit with the highest
  // priority.  If it is not ready put it back.  Schedule the unit.
  let mut not_ready: Vec<UnitIx> = Vec::new();
  while !available.is_empty() || !pending.is_empty() {
    // Check to see if any of the pending units are ready to issue.  If
    // so, add them to the available queue.
    let mut min_depth: Option<u32> = None;
    let mut i = 0;
    while i < pending.len() {
      let ix = pending[i];
      let depth = graph.unit(ix).depth;
      if depth <= cur_cycle {
        available.push(graph, ix);
        graph.unit_mut(ix).is_available = true;
        pending.swap_remove(i);
      } else {
        if min_depth.map_or(true, |d| depth < d) {
          min_depth = Some(depth);
        }
        i += 1;
      }
    }

    // If there are no units available, don't try to issue anything, and
    // don't consult the hazard recognizer.
    if available.is_empty() {
      cur_cycle = match min_depth {
        Some(d) => d,
        None => cur_cycle + 1,
      };
      continue;
    }

    let mut found: Option<UnitIx> = None;
    let mut has_noop_hazards = false;
    while let Some(ix) = available.pop() {
      match hazard.hazard_type(graph.unit(ix)) {
        HazardType::NoHazard => {
          found = Some(ix);
          break;
        }
        ht => {
          // Remember if this is a noop hazard.
          has_noop_hazards |= ht == HazardType::NoopHazard;
          not_ready.push(ix);
        }
      }
    }

    // Add the units that aren't ready back onto the available queue.
    for ix in not_ready.drain(..) {
      available.push(graph, ix);
    }

    if let Some(ix) = found {
      // Add the unit to the schedule and release its successors.
      debug!("*** scheduling [{}]: {:?}", cur_cycle, graph.unit(ix));
      sequence.push(Emitted::Unit(ix));
      {
        let unit = graph.unit_mut(ix);
        assert!(
          cur_cycle >= unit.depth,
          "{:?} scheduled above its depth",
          ix
        );
        if unit.depth < cur_cycle {
          unit.depth = cur_cycle;
        }
        unit.sched_cycle = cur_cycle;
      }
      release_successors(graph, ix, &mut pending)?;
      graph.unit_mut(ix).is_scheduled = true;
      hazard.emit_instruction(graph.unit(ix));
      // Don't advance the cycle for pseudo-ops.
      if graph.unit(ix).latency != 0 {
        cur_cycle += 1;
      }
    } else if !has_noop_hazards {
      // We have a pipeline stall, but no other problem: just advance the
      // current cycle and try again.
      debug!("*** advancing cycle, no work to do");
      hazard.advance_cycle();
      stall_cycles += 1;
      cur_cycle += 1;
    } else {
      // We have no instructions to issue and we have instructions that
      // will fault if we don't do this right.  This is the case for
      // processors without pipeline interlocks and other cases.
      debug!("*** emitting noop");
      hazard.emit_noop();
      sequence.push(Emitted::Noop);
      noops_inserted += 1;
      cur_cycle += 1;
    }
  }

  #[cfg(debug_assertions)]
  verify_schedule(graph, &sequence);

  Ok(RegionSched { sequence, stall_cycles, noops_inserted })
}

/// Checked-build postcondition: the emitted sequence respects every edge
/// of the graph and no unit issued before its depth.
#[cfg(debug_assertions)]
fn verify_schedule(graph: &SchedGraph, sequence: &[Emitted]) {
  use crate::data_structures::Map;

  let mut position = Map::<UnitIx, usize>::default();
  for (pos, emitted) in sequence.iter().enumerate() {
    if let Emitted::Unit(ix) = emitted {
      assert!(
        position.insert(*ix, pos).is_none(),
        "{:?} emitted twice",
        ix
      );
    }
  }
  for ix in graph.real_units() {
    let unit = graph.unit(ix);
    assert!(
      unit.is_scheduled && position.contains_key(&ix),
      "{:?} was never scheduled: {:?}",
      ix,
      unit
    );
    assert!(
      unit.sched_cycle >= unit.depth,
      "{:?} issued at cycle {} above its depth {}",
      ix,
      unit.sched_cycle,
      unit.depth
    );
    for edge in &unit.preds {
      if graph.is_sentinel(edge.unit) {
        continue;
      }
      assert!(
        position[&edge.unit] < position[&ix],
        "schedule breaks dependency {:?} -> {:?} ({:?})",
        edge.unit,
        ix,
        edge
      );
    }
  }
}
