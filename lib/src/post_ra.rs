/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The per-block driver for post-RA scheduling.
//!
//! Each block is processed from its last instruction toward its first.
//! Scheduling boundaries (labels, terminators, stack-pointer writers)
//! split the block into regions; each region in turn has its dependency
//! graph built, its critical-path anti-dependencies broken, and its
//! instructions list-scheduled.  Liveness state is threaded backward
//! across the boundaries so that renaming stays safe upstream of code that
//! has already been reordered.

use log::debug;

use crate::anti_dep::break_anti_dependencies;
use crate::data_structures::{BlockIx, InstIx, RealRegUniverse, TypedIxVec};
use crate::hazard::{
  HazardRecognizer, SimpleHazardRecognizer, TrivialHazardRecognizer,
};
use crate::interface::{
  Function, GraphBuilder, SchedError, SchedOptions, SchedResult,
};
use crate::list_sched::{list_schedule, Emitted};
use crate::liveness::LiveRegTracker;

/// One element of a block's final instruction sequence.
#[derive(Copy, Clone, Debug)]
enum BlockEmit {
  /// An instruction of the original block, identified by its old index.
  Old(InstIx),
  /// A noop demanded by the hazard recognizer.
  Noop,
}

struct Totals {
  noops_inserted: u32,
  stall_cycles: u32,
}

pub fn run_scheduler<F: Function, B: GraphBuilder<F>>(
  func: &mut F, builder: &B, universe: &RealRegUniverse, opts: &SchedOptions,
) -> Result<SchedResult<F>, SchedError> {
  debug!("post-RA scheduler: {:?}", opts);

  let mut hazard: Box<dyn HazardRecognizer> = if opts.avoid_hazards {
    Box::new(SimpleHazardRecognizer::new())
  } else {
    Box::new(TrivialHazardRecognizer)
  };
  let mut tracker = LiveRegTracker::new(universe);
  let mut totals = Totals { noops_inserted: 0, stall_cycles: 0 };

  // Schedule each block, collecting its new sequence in terms of old
  // instruction indices (plus noop markers).
  let mut block_seqs: Vec<Vec<BlockEmit>> = Vec::new();
  for bix in func.blocks() {
    let seq = schedule_block(
      func,
      builder,
      universe,
      &mut tracker,
      hazard.as_mut(),
      opts,
      bix,
      &mut totals,
    )?;
    block_seqs.push(seq);
  }

  // Materialize the new instruction stream.
  let mut insns: Vec<F::Inst> = Vec::with_capacity(func.insns().len());
  let mut target_map = TypedIxVec::<BlockIx, InstIx>::new();
  for seq in block_seqs {
    target_map.push(InstIx::new(insns.len() as u32));
    for emit in seq {
      match emit {
        BlockEmit::Old(iix) => {
          insns.push(func.insns()[iix.get_usize()].clone())
        }
        BlockEmit::Noop => insns.push(func.gen_noop()),
      }
    }
  }

  debug!(
    "post-RA scheduler: {} noops inserted, {} pipeline stalls",
    totals.noops_inserted, totals.stall_cycles
  );
  Ok(SchedResult {
    insns,
    target_map,
    noops_inserted: totals.noops_inserted,
    stall_cycles: totals.stall_cycles,
  })
}

/// Schedule one block.  Returns the block's new sequence in forward
/// order.
fn schedule_block<F: Function, B: GraphBuilder<F>>(
  func: &mut F, builder: &B, universe: &RealRegUniverse,
  tracker: &mut LiveRegTracker, hazard: &mut dyn HazardRecognizer,
  opts: &SchedOptions, bix: BlockIx, totals: &mut Totals,
) -> Result<Vec<BlockEmit>, SchedError> {
  let insts: Vec<InstIx> = func.block_insns(bix).into_iter().collect();
  let block_len = insts.len() as u32;
  if block_len == 0 {
    return Ok(Vec::new());
  }
  let block_first = insts[0];

  tracker.start_block(func, universe, bix, block_len);

  // Schedule each sequence of instructions not interrupted by a label or
  // anything else that effectively needs to shut down scheduling.  The
  // regions come out bottom-up; `(begin, end, sequence)` bounds are
  // block-relative.
  let mut regions: Vec<(u32, u32, Vec<BlockEmit>)> = Vec::new();
  let mut region_end = block_len;
  for count in (0..block_len).rev() {
    let iix = insts[count as usize];
    if func.is_scheduling_boundary(iix) {
      let seq = schedule_region(
        func,
        builder,
        universe,
        tracker,
        hazard,
        opts,
        block_first,
        count + 1,
        region_end,
        totals,
      )?;
      regions.push((count + 1, region_end, seq));

      // The boundary instruction itself is not scheduled, but its
      // liveness effects still apply; and any register defined within the
      // just-scheduled region may have moved anywhere inside it.
      tracker.observe_region_boundary(count, region_end);
      tracker.prescan(func, universe, iix);
      tracker.scan(func, universe, iix, count);

      region_end = count;
    }
  }
  let seq = schedule_region(
    func,
    builder,
    universe,
    tracker,
    hazard,
    opts,
    block_first,
    0,
    region_end,
    totals,
  )?;
  regions.push((0, region_end, seq));

  tracker.finish_block();

  // Reassemble the block in forward order: each region's schedule,
  // followed by the boundary instruction that ended it (if any).
  let mut out: Vec<BlockEmit> = Vec::with_capacity(block_len as usize);
  for (_begin, end, seq) in regions.into_iter().rev() {
    out.extend(seq);
    if end < block_len {
      out.push(BlockEmit::Old(insts[end as usize]));
    }
  }
  Ok(out)
}

/// Build, break and schedule one region `[begin, end)` (block-relative;
/// empty regions are legal and yield nothing).
fn schedule_region<F: Function, B: GraphBuilder<F>>(
  func: &mut F, builder: &B, universe: &RealRegUniverse,
  tracker: &mut LiveRegTracker, hazard: &mut dyn HazardRecognizer,
  opts: &SchedOptions, block_first: InstIx, begin: u32, end: u32,
  totals: &mut Totals,
) -> Result<Vec<BlockEmit>, SchedError> {
  if begin == end {
    return Ok(Vec::new());
  }
  let begin_iix = block_first.plus(begin);
  let end_iix = block_first.plus(end);

  let mut graph = builder.build_graph(func, begin_iix, end_iix);
  if opts.break_anti_dependencies {
    let changed = break_anti_dependencies(
      func,
      universe,
      &graph,
      tracker,
      begin,
      end,
      block_first,
    );
    if changed {
      // We renamed registers, so the graph's register-carried edges are
      // stale.  Rebuilding from scratch is the simplest correct move;
      // patching the edges in place is a possible future refinement.
      graph = builder.build_graph(func, begin_iix, end_iix);
    }
  }

  let sched = list_schedule(&mut graph, hazard)?;
  totals.stall_cycles += sched.stall_cycles;
  totals.noops_inserted += sched.noops_inserted;

  let mut out = Vec::with_capacity(sched.sequence.len());
  for emitted in sched.sequence {
    match emitted {
      Emitted::Unit(ix) => {
        let iix = match graph.unit(ix).inst {
          Some(iix) => iix,
          None => panic!("sentinel unit in emitted schedule"),
        };
        out.push(BlockEmit::Old(iix));
      }
      Emitted::Noop => out.push(BlockEmit::Noop),
    }
  }
  Ok(out)
}
