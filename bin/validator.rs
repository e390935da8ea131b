/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Structural validation of a schedule: every block must contain the same
//! instructions as before (plus noops), split into the same regions by the
//! same boundaries, with nothing moved across a boundary.  Semantic checks
//! are the interpreter's job.

use crate::test_framework::{inst_is_boundary, Func, Inst};
use postsched::{BlockIx, Function, InstIx, SchedResult};

// A block's contents split at scheduling boundaries: for each segment, the
// (sorted) multiset of non-noop instruction renderings, then the boundary
// instruction that ended it, if any.
fn segment(
  insns: &[Inst], sp: Option<postsched::RealReg>,
) -> Vec<(Vec<String>, Option<String>)> {
  let mut segments = Vec::new();
  let mut current: Vec<String> = Vec::new();
  for insn in insns {
    if inst_is_boundary(insn, sp) {
      current.sort();
      segments.push((
        std::mem::replace(&mut current, Vec::new()),
        Some(format!("{:?}", insn)),
      ));
    } else {
      match insn {
        Inst::Noop => {}
        _ => current.push(format!("{:?}", insn)),
      }
    }
  }
  current.sort();
  segments.push((current, None));
  segments
}

pub fn validate(func: &Func, result: &SchedResult<Func>) -> Result<(), String> {
  let num_blocks = func.blocks.len();
  if result.target_map.len() != num_blocks {
    return Err(format!(
      "target map has {} entries for {} blocks",
      result.target_map.len(),
      num_blocks
    ));
  }

  let mut noops_seen = 0;
  for insn in &result.insns {
    if let Inst::Noop = insn {
      noops_seen += 1;
    }
  }
  // The input may itself contain noops; only the increase is checked.
  let mut noops_before = 0;
  for insn in func.insns.iter() {
    if let Inst::Noop = insn {
      noops_before += 1;
    }
  }
  if noops_seen != noops_before + result.noops_inserted {
    return Err(format!(
      "stream has {} noops, expected {} + {} inserted",
      noops_seen, noops_before, result.noops_inserted
    ));
  }

  for bnum in 0..num_blocks {
    let bix = BlockIx::new(bnum);
    let start = result.target_map[bix].get() as usize;
    let end = if bnum + 1 < num_blocks {
      result.target_map[BlockIx::new(bnum + 1)].get() as usize
    } else {
      result.insns.len()
    };
    if start > end || end > result.insns.len() {
      return Err(format!("block {:?} has bad bounds {}..{}", bix, start, end));
    }

    let old_insns: Vec<Inst> = func
      .block_insns(bix)
      .into_iter()
      .map(|iix: InstIx| func.insns[iix].clone())
      .collect();
    let new_insns = &result.insns[start..end];

    // The last instruction of a nonempty block must still be its
    // terminator.
    if let Some(last) = old_insns.last() {
      match new_insns.last() {
        Some(new_last) if format!("{:?}", new_last) == format!("{:?}", last) => {
        }
        _ => {
          return Err(format!(
            "block {:?} no longer ends with its terminator",
            bix
          ))
        }
      }
    }

    let old_segments = segment(&old_insns, func.sp);
    let new_segments = segment(new_insns, func.sp);
    if old_segments.len() != new_segments.len() {
      return Err(format!(
        "block {:?}: {} regions became {}",
        bix,
        old_segments.len(),
        new_segments.len()
      ));
    }
    for (k, (old_seg, new_seg)) in
      old_segments.iter().zip(new_segments.iter()).enumerate()
    {
      if old_seg.1 != new_seg.1 {
        return Err(format!(
          "block {:?} region {}: boundary changed from {:?} to {:?}",
          bix, k, old_seg.1, new_seg.1
        ));
      }
      if old_seg.0 != new_seg.0 {
        return Err(format!(
          "block {:?} region {}: instructions changed or crossed a boundary",
          bix, k
        ));
      }
    }
  }

  Ok(())
}
