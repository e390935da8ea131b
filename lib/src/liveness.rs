/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Bottom-up physical-register liveness bookkeeping.
//!
//! This is shared by the anti-dependency breaker (which both reads it and
//! mutates the register assignments it describes) and the region driver
//! (which threads it backward across region boundaries within a block).
//! All indices are block-relative instruction positions: the block's first
//! instruction is 0 and "the end of the block" is the block length.

use crate::data_structures::{BlockIx, InstIx, RealReg, RealRegUniverse, RegClass};
use crate::interface::{Function, OperandKind};

/// Liveness/renamability class of one physical register.
///
/// `Single` means the register is live and all its uses in the live range
/// seen so far agree on one register class; only such registers may be
/// renamed.  `Multi` means live but used across incompatible classes, or
/// aliased, or otherwise pinned; renaming is off the table.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LiveClass {
  Dead,
  Single(RegClass),
  Multi,
}

/// One register mention site: operand `op` of instruction `iix`, as
/// numbered by `Function::reg_operands`.
#[derive(Copy, Clone, Debug)]
pub struct OperandRef {
  pub iix: InstIx,
  pub op: usize,
}

pub struct LiveRegTracker {
  /// Per register: its `LiveClass`.
  classes: Vec<LiveClass>,
  /// Per register: the index of the most recent kill (proceeding
  /// bottom-up), or `None` if the register is not live.
  kill_ix: Vec<Option<u32>>,
  /// Per register: the index of the most recent complete def (proceeding
  /// bottom-up), or `None` if the register is live.  Exactly one of
  /// `kill_ix` and `def_ix` is `None` for every register at every step.
  def_ix: Vec<Option<u32>>,
  /// Per register: all its reference sites within the current live range.
  reg_refs: Vec<Vec<OperandRef>>,
}

impl LiveRegTracker {
  pub fn new(universe: &RealRegUniverse) -> Self {
    let n = universe.num_regs();
    Self {
      classes: vec![LiveClass::Dead; n],
      kill_ix: vec![None; n],
      def_ix: vec![None; n],
      reg_refs: vec![Vec::new(); n],
    }
  }

  pub fn class_of(&self, reg: RealReg) -> LiveClass {
    self.classes[reg.get_index()]
  }

  pub fn kill_ix(&self, reg: RealReg) -> Option<u32> {
    self.kill_ix[reg.get_index()]
  }

  pub fn def_ix(&self, reg: RealReg) -> Option<u32> {
    self.def_ix[reg.get_index()]
  }

  pub fn refs(&self, reg: RealReg) -> &[OperandRef] {
    &self.reg_refs[reg.get_index()]
  }

  /// Panic unless exactly one of kill/def is present for `reg`.
  pub fn check(&self, reg: RealReg) {
    let ri = reg.get_index();
    assert!(
      self.kill_ix[ri].is_none() != self.def_ix[ri].is_none(),
      "kill and def maps aren't consistent for {:?}",
      reg
    );
  }

  /// Initialize register live-range state for scheduling in this block.
  pub fn start_block<F: Function>(
    &mut self, func: &F, universe: &RealRegUniverse, bix: BlockIx,
    block_len: u32,
  ) {
    // Clear out the register class data and initialize the indices to
    // indicate that no register is live: the most recent def of a dead
    // register is notionally the end of the block.
    for r in 0..self.classes.len() {
      self.classes[r] = LiveClass::Dead;
      self.kill_ix[r] = None;
      self.def_ix[r] = Some(block_len);
      self.reg_refs[r].clear();
    }

    // Determine the live-out physregs for this block.
    let insts: Vec<InstIx> = func.block_insns(bix).into_iter().collect();
    let is_return_block =
      insts.last().map_or(false, |&iix| func.is_return(iix));
    if is_return_block {
      // In a return block, examine the function live-out regs.
      for reg in func.func_liveouts() {
        self.set_live_out(universe, reg, block_len);
      }
    } else {
      // In a non-return block, examine the live-in regs of all
      // successors.
      for succ in func.block_succs(bix) {
        for reg in func.block_liveins(succ) {
          self.set_live_out(universe, reg, block_len);
        }
      }
    }

    // Consider callee-saved registers as live-out, since we're running
    // after prologue/epilogue insertion so there's no way to add
    // additional saved registers.
    for i in 0..universe.callee_saved.len() {
      let reg = universe.callee_saved[i];
      self.set_live_out(universe, reg, block_len);
    }
  }

  fn set_live_out(
    &mut self, universe: &RealRegUniverse, reg: RealReg, block_len: u32,
  ) {
    let ri = reg.get_index();
    self.classes[ri] = LiveClass::Multi;
    self.kill_ix[ri] = Some(block_len);
    self.def_ix[ri] = None;
    // Repeat, for all aliases.
    for alias in universe.aliases(reg) {
      let ai = alias.get_index();
      self.classes[ai] = LiveClass::Multi;
      self.kill_ix[ai] = Some(block_len);
      self.def_ix[ai] = None;
    }
  }

  /// Clean up register live-range state at the end of a block.
  pub fn finish_block(&mut self) {
    for refs in self.reg_refs.iter_mut() {
      refs.clear();
    }
  }

  fn merge_class(&mut self, ri: usize, new_rc: Option<RegClass>) {
    // Only allow the register to be renamed if its register class is
    // consistent across all uses.
    match (self.classes[ri], new_rc) {
      (LiveClass::Dead, Some(rc)) => self.classes[ri] = LiveClass::Single(rc),
      (LiveClass::Single(rc0), Some(rc)) if rc0 == rc => {}
      _ => self.classes[ri] = LiveClass::Multi,
    }
  }

  /// Scan the register operands of `iix`, updating classes and reference
  /// sites.  Performed before any rename decision at this instruction.
  pub fn prescan<F: Function>(
    &mut self, func: &F, universe: &RealRegUniverse, iix: InstIx,
  ) {
    for (op_ix, operand) in func.reg_operands(iix).iter().enumerate() {
      let reg = operand.reg;
      let ri = reg.get_index();
      let new_rc = func.operand_reg_class(iix, op_ix);
      self.merge_class(ri, new_rc);

      // If an alias of the reg is live during the live range, give up.
      // This also means we never have to check whether a rename
      // candidate overlaps any alias of the register it replaces.
      for alias in universe.aliases(reg) {
        let ai = alias.get_index();
        if self.classes[ai] != LiveClass::Dead {
          self.classes[ai] = LiveClass::Multi;
          self.classes[ri] = LiveClass::Multi;
        }
      }

      // If we're still willing to consider this register, note the
      // reference.
      if self.classes[ri] != LiveClass::Multi {
        self.reg_refs[ri].push(OperandRef { iix, op: op_ix });
      }
    }
  }

  /// Update liveness for `iix`, the instruction at block-relative position
  /// `count`.  Proceeding upwards, registers that are defed but not used
  /// by the instruction become dead, and used registers become live.
  pub fn scan<F: Function>(
    &mut self, func: &F, universe: &RealRegUniverse, iix: InstIx, count: u32,
  ) {
    let operands = func.reg_operands(iix);

    for operand in operands.iter() {
      if operand.kind != OperandKind::Def {
        continue;
      }
      // Ignore two-addr defs; the register stays live through them.
      if operand.tied_to_use {
        continue;
      }
      let reg = operand.reg;
      self.set_dead(reg, count);
      self.check(reg);
      // Repeat, for all subregs.
      for sub in &universe.sub_regs[reg.get_index()] {
        self.set_dead(*sub, count);
      }
      // Conservatively mark super-registers as unusable.
      for sup in &universe.super_regs[reg.get_index()] {
        self.classes[sup.get_index()] = LiveClass::Multi;
      }
    }

    for (op_ix, operand) in operands.iter().enumerate() {
      if operand.kind != OperandKind::Use {
        continue;
      }
      let reg = operand.reg;
      let ri = reg.get_index();
      let new_rc = func.operand_reg_class(iix, op_ix);
      self.merge_class(ri, new_rc);
      self.reg_refs[ri].push(OperandRef { iix, op: op_ix });

      // It wasn't previously live but now it is, this is a kill.
      if self.kill_ix[ri].is_none() {
        self.kill_ix[ri] = Some(count);
        self.def_ix[ri] = None;
        self.check(reg);
      }
      // Repeat, for all aliases.
      for alias in universe.aliases(reg) {
        let ai = alias.get_index();
        if self.kill_ix[ai].is_none() {
          self.kill_ix[ai] = Some(count);
          self.def_ix[ai] = None;
        }
      }
    }
  }

  fn set_dead(&mut self, reg: RealReg, count: u32) {
    let ri = reg.get_index();
    self.def_ix[ri] = Some(count);
    self.kill_ix[ri] = None;
    self.classes[ri] = LiveClass::Dead;
    self.reg_refs[ri].clear();
  }

  /// Account for scheduling having finished a downstream region: any
  /// register defined inside `[count, insert_pos)` may have been
  /// rescheduled anywhere within that region, so its exact def position is
  /// no longer known.  Pin it against renaming and move its def index to
  /// the region's insertion point.
  pub fn observe_region_boundary(&mut self, count: u32, insert_pos: u32) {
    assert!(count < insert_pos, "instruction index out of expected range");
    for ri in 0..self.def_ix.len() {
      if let Some(d) = self.def_ix[ri] {
        if d >= count && d < insert_pos {
          assert!(
            self.kill_ix[ri].is_none(),
            "clobbered register is live across a region boundary"
          );
          self.classes[ri] = LiveClass::Multi;
          self.def_ix[ri] = Some(insert_pos);
        }
      }
    }
  }

  /// Transfer the live range of `old` onto `new` after every reference has
  /// been rewritten.  We just went back in time and modified history; the
  /// liveness information for `old` is now inconsistent, so reset it as if
  /// the register were dead.
  pub fn rename(&mut self, old: RealReg, new: RealReg) {
    let oi = old.get_index();
    let ni = new.get_index();
    self.classes[ni] = self.classes[oi];
    self.def_ix[ni] = self.def_ix[oi];
    self.kill_ix[ni] = self.kill_ix[oi];
    self.check(new);

    self.classes[oi] = LiveClass::Dead;
    self.def_ix[oi] = self.kill_ix[oi];
    self.kill_ix[oi] = None;
    self.check(old);

    self.reg_refs[oi].clear();
  }
}
