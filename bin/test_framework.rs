/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

#![allow(non_snake_case)]

/// As part of this set of test cases, we define a mini post-RA IR and
/// implement the `Function` trait for it so that we can use the postsched
/// public interface.  All registers here are real (physical): the IR
/// models machine code as it looks after register allocation.
use postsched::{
  BlockIx, DepKind, Function, GraphBuilder, InstIx, MyRange, OperandKind,
  RealReg, RealRegUniverse, RegClass, RegClassInfo, RegOperand, SchedGraph,
  SchedResult, Set, TypedIxVec, UnitIx, NUM_REG_CLASSES,
};

use std::fmt;

//=============================================================================
// Definition of: Label, RI (reg-or-immediate operands), AM (address modes),
// and Inst (instructions).  Destinations are on the left.

#[derive(Clone)]
pub enum Label {
  Unresolved { name: String },
  Resolved { name: String, bix: BlockIx },
}
impl fmt::Debug for Label {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Label::Unresolved { name } => write!(fmt, "??:{}", &name),
      Label::Resolved { name, bix } => write!(fmt, "{:?}:{}", bix, name),
    }
  }
}
impl Label {
  pub fn newUnresolved(name: String) -> Label {
    Label::Unresolved { name }
  }
  pub fn getBlockIx(&self) -> BlockIx {
    match self {
      Label::Resolved { name: _, bix } => *bix,
      Label::Unresolved { .. } => {
        panic!("Label::getBlockIx: unresolved label!")
      }
    }
  }
}

#[derive(Copy, Clone)]
pub enum RI {
  Reg { reg: RealReg },
  Imm { imm: u32 },
}
pub fn RI_R(reg: RealReg) -> RI {
  debug_assert!(reg.get_class() == RegClass::I32);
  RI::Reg { reg }
}
pub fn RI_I(imm: u32) -> RI {
  RI::Imm { imm }
}
impl fmt::Debug for RI {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RI::Reg { reg } => reg.fmt(fmt),
      RI::Imm { imm } => write!(fmt, "{}", imm),
    }
  }
}

#[derive(Copy, Clone)]
pub enum AM {
  RI { base: RealReg, offset: u32 },
  RR { base: RealReg, offset: RealReg },
}
pub fn AM_R(base: RealReg) -> AM {
  debug_assert!(base.get_class() == RegClass::I32);
  AM::RI { base, offset: 0 }
}
pub fn AM_RI(base: RealReg, offset: u32) -> AM {
  debug_assert!(base.get_class() == RegClass::I32);
  AM::RI { base, offset }
}
pub fn AM_RR(base: RealReg, offset: RealReg) -> AM {
  debug_assert!(base.get_class() == RegClass::I32);
  debug_assert!(offset.get_class() == RegClass::I32);
  AM::RR { base, offset }
}
impl fmt::Debug for AM {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      AM::RI { base, offset } => write!(fmt, "[{:?}, {:?}]", base, offset),
      AM::RR { base, offset } => write!(fmt, "[{:?}, {:?}]", base, offset),
    }
  }
}

#[derive(Copy, Clone)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Mod,
  Shr,
  And,
  CmpEQ,
  CmpLT,
  CmpLE,
  CmpGE,
  CmpGT,
}
impl fmt::Debug for BinOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{}",
      match self {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Mod => "mod",
        BinOp::Shr => "shr",
        BinOp::And => "and",
        BinOp::CmpEQ => "cmpeq",
        BinOp::CmpLT => "cmplt",
        BinOp::CmpLE => "cmple",
        BinOp::CmpGE => "cmpge",
        BinOp::CmpGT => "cmpgt",
      }
    )
  }
}
impl BinOp {
  pub fn calc(self, argL: u32, argR: u32) -> u32 {
    match self {
      BinOp::Add => u32::wrapping_add(argL, argR),
      BinOp::Sub => u32::wrapping_sub(argL, argR),
      BinOp::Mul => u32::wrapping_mul(argL, argR),
      BinOp::Mod => argL % argR,
      BinOp::Shr => argL >> (argR & 31),
      BinOp::And => argL & argR,
      BinOp::CmpEQ => (argL == argR) as u32,
      BinOp::CmpLT => (argL < argR) as u32,
      BinOp::CmpLE => (argL <= argR) as u32,
      BinOp::CmpGE => (argL >= argR) as u32,
      BinOp::CmpGT => (argL > argR) as u32,
    }
  }
}

#[derive(Copy, Clone)]
pub enum BinOpF {
  FAdd,
  FSub,
  FMul,
}
impl fmt::Debug for BinOpF {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{}",
      match self {
        BinOpF::FAdd => "fadd",
        BinOpF::FSub => "fsub",
        BinOpF::FMul => "fmul",
      }
    )
  }
}
impl BinOpF {
  pub fn calc(self, argL: f32, argR: f32) -> f32 {
    match self {
      BinOpF::FAdd => argL + argR,
      BinOpF::FSub => argL - argR,
      BinOpF::FMul => argL * argR,
    }
  }
}

#[derive(Clone)]
pub enum Inst {
  Imm { dst: RealReg, imm: u32 },
  ImmF { dst: RealReg, imm: f32 },
  Copy { dst: RealReg, src: RealReg },
  BinOp { op: BinOp, dst: RealReg, srcL: RealReg, srcR: RI },
  BinOpM { op: BinOp, dst: RealReg, srcR: RI }, // "mod" semantics for |dst|
  BinOpF { op: BinOpF, dst: RealReg, srcL: RealReg, srcR: RealReg },
  Load { dst: RealReg, addr: AM },
  Store { addr: AM, src: RealReg },
  ImplicitDef { dst: RealReg },
  Noop,
  Goto { target: Label },
  GotoCTF { cond: RealReg, targetT: Label, targetF: Label },
  Finish { reg: Option<RealReg> },
}

pub fn i_imm(dst: RealReg, imm: u32) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::Imm { dst, imm }
}
pub fn i_immf(dst: RealReg, imm: f32) -> Inst {
  debug_assert!(dst.get_class() == RegClass::F32);
  Inst::ImmF { dst, imm }
}
pub fn i_copy(dst: RealReg, src: RealReg) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::Copy { dst, src }
}
pub fn i_load(dst: RealReg, addr: AM) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::Load { dst, addr }
}
pub fn i_store(addr: AM, src: RealReg) -> Inst {
  debug_assert!(src.get_class() == RegClass::I32);
  Inst::Store { addr, src }
}
pub fn i_implicit_def(dst: RealReg) -> Inst {
  Inst::ImplicitDef { dst }
}
pub fn i_goto(target: &str) -> Inst {
  Inst::Goto { target: Label::newUnresolved(target.to_string()) }
}
pub fn i_goto_ctf(cond: RealReg, targetT: &str, targetF: &str) -> Inst {
  debug_assert!(cond.get_class() == RegClass::I32);
  Inst::GotoCTF {
    cond,
    targetT: Label::newUnresolved(targetT.to_string()),
    targetF: Label::newUnresolved(targetF.to_string()),
  }
}
pub fn i_finish(reg: Option<RealReg>) -> Inst {
  Inst::Finish { reg }
}

pub fn i_add(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  debug_assert!(srcL.get_class() == RegClass::I32);
  Inst::BinOp { op: BinOp::Add, dst, srcL, srcR }
}
pub fn i_sub(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  debug_assert!(srcL.get_class() == RegClass::I32);
  Inst::BinOp { op: BinOp::Sub, dst, srcL, srcR }
}
pub fn i_mul(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  debug_assert!(srcL.get_class() == RegClass::I32);
  Inst::BinOp { op: BinOp::Mul, dst, srcL, srcR }
}
pub fn i_cmp_gt(dst: RealReg, srcL: RealReg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  debug_assert!(srcL.get_class() == RegClass::I32);
  Inst::BinOp { op: BinOp::CmpGT, dst, srcL, srcR }
}

// 2-operand ("modify" the destination) versions, for two-address shapes.
pub fn i_addm(dst: RealReg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::BinOpM { op: BinOp::Add, dst, srcR }
}
pub fn i_subm(dst: RealReg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::BinOpM { op: BinOp::Sub, dst, srcR }
}

pub fn i_fadd(dst: RealReg, srcL: RealReg, srcR: RealReg) -> Inst {
  debug_assert!(dst.get_class() == RegClass::F32);
  debug_assert!(srcL.get_class() == RegClass::F32);
  debug_assert!(srcR.get_class() == RegClass::F32);
  Inst::BinOpF { op: BinOpF::FAdd, dst, srcL, srcR }
}

impl fmt::Debug for Inst {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Inst::Imm { dst, imm } => write!(fmt, "imm     {:?}, {:?}", dst, imm),
      Inst::ImmF { dst, imm } => write!(fmt, "immf    {:?}, {:?}", dst, imm),
      Inst::Copy { dst, src } => write!(fmt, "copy    {:?}, {:?}", dst, src),
      Inst::BinOp { op, dst, srcL, srcR } => {
        write!(fmt, "{:<7?} {:?}, {:?}, {:?}", op, dst, srcL, srcR)
      }
      Inst::BinOpM { op, dst, srcR } => {
        write!(fmt, "{:?}m    {:?}, {:?}", op, dst, srcR)
      }
      Inst::BinOpF { op, dst, srcL, srcR } => {
        write!(fmt, "{:<7?} {:?}, {:?}, {:?}", op, dst, srcL, srcR)
      }
      Inst::Load { dst, addr } => write!(fmt, "load    {:?}, {:?}", dst, addr),
      Inst::Store { addr, src } => {
        write!(fmt, "store   {:?}, {:?}", addr, src)
      }
      Inst::ImplicitDef { dst } => write!(fmt, "impdef  {:?}", dst),
      Inst::Noop => write!(fmt, "noop"),
      Inst::Goto { target } => write!(fmt, "goto    {:?}", target),
      Inst::GotoCTF { cond, targetT, targetF } => write!(
        fmt,
        "goto    if {:?} then {:?} else {:?}",
        cond, targetT, targetF
      ),
      Inst::Finish { reg } => write!(fmt, "finish  {:?}", reg),
    }
  }
}

impl Inst {
  // Returns a vector of BlockIxs, being those that this insn might jump
  // to.  This function should not be applied to non-control-flow
  // instructions.  The labels are assumed all to be "resolved".
  pub fn getTargets(&self) -> Vec<BlockIx> {
    match self {
      Inst::Goto { target } => vec![target.getBlockIx()],
      Inst::GotoCTF { cond: _, targetT, targetF } => {
        vec![targetT.getBlockIx(), targetF.getBlockIx()]
      }
      Inst::Finish { reg: _ } => vec![],
      _other => panic!("Inst::getTargets: incorrectly applied to: {:?}", self),
    }
  }

  /// The register operands of this instruction, in the fixed numbering
  /// also used by `get_operand_class` and `set_operand`.
  pub fn get_operands(&self) -> Vec<RegOperand> {
    fn def(reg: RealReg) -> RegOperand {
      RegOperand { reg, kind: OperandKind::Def, tied_to_use: false }
    }
    fn def_tied(reg: RealReg) -> RegOperand {
      RegOperand { reg, kind: OperandKind::Def, tied_to_use: true }
    }
    fn use_(reg: RealReg) -> RegOperand {
      RegOperand { reg, kind: OperandKind::Use, tied_to_use: false }
    }
    fn push_ri(ops: &mut Vec<RegOperand>, ri: &RI) {
      if let RI::Reg { reg } = ri {
        ops.push(use_(*reg));
      }
    }
    fn push_am(ops: &mut Vec<RegOperand>, am: &AM) {
      match am {
        AM::RI { base, .. } => ops.push(use_(*base)),
        AM::RR { base, offset } => {
          ops.push(use_(*base));
          ops.push(use_(*offset));
        }
      }
    }

    let mut ops = Vec::new();
    match self {
      Inst::Imm { dst, .. } | Inst::ImmF { dst, .. } => ops.push(def(*dst)),
      Inst::Copy { dst, src } => {
        ops.push(def(*dst));
        ops.push(use_(*src));
      }
      Inst::BinOp { op: _, dst, srcL, srcR } => {
        ops.push(def(*dst));
        ops.push(use_(*srcL));
        push_ri(&mut ops, srcR);
      }
      Inst::BinOpM { op: _, dst, srcR } => {
        ops.push(def_tied(*dst));
        ops.push(use_(*dst));
        push_ri(&mut ops, srcR);
      }
      Inst::BinOpF { op: _, dst, srcL, srcR } => {
        ops.push(def(*dst));
        ops.push(use_(*srcL));
        ops.push(use_(*srcR));
      }
      Inst::Load { dst, addr } => {
        ops.push(def(*dst));
        push_am(&mut ops, addr);
      }
      Inst::Store { addr, src } => {
        push_am(&mut ops, addr);
        ops.push(use_(*src));
      }
      Inst::ImplicitDef { dst } => ops.push(def(*dst)),
      Inst::Noop => {}
      Inst::Goto { .. } => {}
      Inst::GotoCTF { cond, .. } => ops.push(use_(*cond)),
      Inst::Finish { reg } => {
        if let Some(reg) = reg {
          ops.push(use_(*reg));
        }
      }
    }
    ops
  }

  /// The register class the target requires of operand `op`, if any.
  /// Implicit defs constrain nothing.
  pub fn get_operand_class(&self, _op: usize) -> Option<RegClass> {
    match self {
      Inst::ImplicitDef { .. } => None,
      Inst::ImmF { .. } | Inst::BinOpF { .. } => Some(RegClass::F32),
      _ => Some(RegClass::I32),
    }
  }

  /// Rewrite operand `op` (as numbered by `get_operands`) to `new_reg`.
  pub fn set_operand(&mut self, op: usize, new_reg: RealReg) {
    fn set_ri(ri: &mut RI, new_reg: RealReg) {
      match ri {
        RI::Reg { reg } => *reg = new_reg,
        RI::Imm { .. } => panic!("Inst::set_operand: immediate operand"),
      }
    }
    fn set_am(am: &mut AM, op: usize, new_reg: RealReg) {
      match (am, op) {
        (AM::RI { base, .. }, 0) => *base = new_reg,
        (AM::RR { base, .. }, 0) => *base = new_reg,
        (AM::RR { offset, .. }, 1) => *offset = new_reg,
        _ => panic!("Inst::set_operand: bad address-mode operand"),
      }
    }

    match (self, op) {
      (Inst::Imm { dst, .. }, 0) => *dst = new_reg,
      (Inst::ImmF { dst, .. }, 0) => *dst = new_reg,
      (Inst::Copy { dst, .. }, 0) => *dst = new_reg,
      (Inst::Copy { src, .. }, 1) => *src = new_reg,
      (Inst::BinOp { dst, .. }, 0) => *dst = new_reg,
      (Inst::BinOp { srcL, .. }, 1) => *srcL = new_reg,
      (Inst::BinOp { srcR, .. }, 2) => set_ri(srcR, new_reg),
      (Inst::BinOpM { dst, .. }, 0) => *dst = new_reg,
      (Inst::BinOpM { dst, .. }, 1) => *dst = new_reg,
      (Inst::BinOpM { srcR, .. }, 2) => set_ri(srcR, new_reg),
      (Inst::BinOpF { dst, .. }, 0) => *dst = new_reg,
      (Inst::BinOpF { srcL, .. }, 1) => *srcL = new_reg,
      (Inst::BinOpF { srcR, .. }, 2) => *srcR = new_reg,
      (Inst::Load { dst, .. }, 0) => *dst = new_reg,
      (Inst::Load { addr, .. }, n) => set_am(addr, n - 1, new_reg),
      (Inst::Store { addr, src }, n) => {
        let addr_regs = match addr {
          AM::RI { .. } => 1,
          AM::RR { .. } => 2,
        };
        if n < addr_regs {
          set_am(addr, n, new_reg);
        } else if n == addr_regs {
          *src = new_reg;
        } else {
          panic!("Inst::set_operand: bad store operand {}", n);
        }
      }
      (Inst::ImplicitDef { dst }, 0) => *dst = new_reg,
      (Inst::GotoCTF { cond, .. }, 0) => *cond = new_reg,
      (Inst::Finish { reg: Some(reg) }, 0) => *reg = new_reg,
      (insn, n) => {
        panic!("Inst::set_operand: no operand {} in {:?}", n, insn)
      }
    }
  }

  /// Issue latency: cycles before a consumer can use the result.
  pub fn latency(&self) -> u32 {
    match self {
      Inst::Load { .. } => 2,
      Inst::BinOp { op: BinOp::Mul, .. } => 3,
      Inst::BinOpM { op: BinOp::Mul, .. } => 3,
      Inst::ImplicitDef { .. } | Inst::Noop => 0,
      _ => 1,
    }
  }

  pub fn may_load(&self) -> bool {
    match self {
      Inst::Load { .. } => true,
      _ => false,
    }
  }

  pub fn may_store(&self) -> bool {
    match self {
      Inst::Store { .. } => true,
      _ => false,
    }
  }
}

fn is_control_flow_insn(insn: &Inst) -> bool {
  match insn {
    Inst::Goto { .. } | Inst::GotoCTF { .. } | Inst::Finish { reg: _ } => true,
    _ => false,
  }
}

/// Would this instruction shut down scheduling?  Control flow always does;
/// so does a write to the stack-oriented pointer, when there is one.
pub fn inst_is_boundary(insn: &Inst, sp: Option<RealReg>) -> bool {
  if is_control_flow_insn(insn) {
    return true;
  }
  if let Some(sp) = sp {
    for op in insn.get_operands() {
      if op.kind == OperandKind::Def && op.reg == sp {
        return true;
      }
    }
  }
  false
}

//=============================================================================
// Definition of Block and Func, and printing thereof.

#[derive(Clone, Debug)]
pub struct Block {
  pub name: String,
  pub start: InstIx,
  pub len: u32,
}
impl Block {
  pub fn new(name: String, start: InstIx, len: u32) -> Self {
    Self { name, start, len }
  }
}

#[derive(Clone, Debug)]
pub struct Func {
  pub name: String,
  pub entry: Label,
  pub insns: TypedIxVec<InstIx, Inst>, // indexed by InstIx

  // Note that |blocks| must be in order of increasing |Block::start|
  // fields.
  pub blocks: TypedIxVec<BlockIx, Block>, // indexed by BlockIx

  // The stack-oriented pointer, if this "target" has one; any write to it
  // is a scheduling boundary.
  pub sp: Option<RealReg>,

  // Filled in by |finish|: the liveness collaborator's results.
  pub liveins: Vec<Vec<RealReg>>, // indexed by block
  pub liveouts: Vec<RealReg>,     // function live-outs (return values)
}

// Find a block Ix for a block name
fn lookup(blocks: &TypedIxVec<BlockIx, Block>, name: String) -> BlockIx {
  let mut bix = 0;
  for b in blocks.iter() {
    if b.name == name {
      return BlockIx::new(bix);
    }
    bix += 1;
  }
  panic!("Func::lookup: can't resolve label name '{}'", name);
}

fn resolve_label<F>(label: &mut Label, lookup: F)
where
  F: Fn(String) -> BlockIx,
{
  let resolved = match label {
    Label::Unresolved { name } => {
      Label::Resolved { name: name.clone(), bix: lookup(name.clone()) }
    }
    Label::Resolved { .. } => panic!("resolve_label: is already resolved!"),
  };
  *label = resolved;
}

fn resolve_inst<F>(insn: &mut Inst, lookup: F)
where
  F: Copy + Fn(String) -> BlockIx,
{
  match insn {
    Inst::Goto { ref mut target } => resolve_label(target, lookup),
    Inst::GotoCTF { cond: _, ref mut targetT, ref mut targetF } => {
      resolve_label(targetT, lookup);
      resolve_label(targetF, lookup);
    }
    _ => (),
  }
}

impl Func {
  pub fn new(name: &str, entry: &str) -> Self {
    Func {
      name: name.to_string(),
      entry: Label::Unresolved { name: entry.to_string() },
      insns: TypedIxVec::new(),
      blocks: TypedIxVec::new(),
      sp: None,
      liveins: Vec::new(),
      liveouts: Vec::new(),
    }
  }

  pub fn print(&self, who: &str) {
    println!("");
    println!("Func {}: name='{}' entry='{:?}' {{", who, self.name, self.entry);
    let mut ix = 0;
    for b in self.blocks.iter() {
      if ix > 0 {
        println!("");
      }
      println!("  {:?}:{}", BlockIx::new(ix), b.name);
      for i in b.start.get()..b.start.get() + b.len {
        let ixI = InstIx::new(i);
        println!("      {:<3?}   {:?}", ixI, self.insns[ixI]);
      }
      ix += 1;
    }
    println!("}}");
  }

  pub fn set_stack_pointer(&mut self, sp: RealReg) {
    self.sp = Some(sp);
  }

  // Add a block to the Func
  pub fn block(&mut self, name: &str, insns: Vec<Inst>) {
    let start = self.insns.len();
    let len = insns.len() as u32;
    let mut insns = TypedIxVec::from_vec(insns);
    self.insns.append(&mut insns);
    let b = Block::new(name.to_string(), InstIx::new(start), len);
    self.blocks.push(b);
  }

  // All blocks have been added.  Check the Func is well formed, resolve
  // labels, and compute the liveness results the scheduler consumes.
  pub fn finish(&mut self) {
    for bix in BlockIx::new(0).dotdot(BlockIx::new(self.blocks.len())) {
      let b = &self.blocks[bix];
      if b.len == 0 {
        panic!("Func::finish: a block is empty");
      }
      if bix > BlockIx::new(0)
        && self.blocks[bix.minus(1)].start >= self.blocks[bix].start
      {
        panic!("Func: blocks are not in increasing order of InstIx");
      }
      for i in 0..b.len {
        let iix = b.start.plus(i);
        if i == b.len - 1 && !is_control_flow_insn(&self.insns[iix]) {
          panic!("Func: block must end in control flow insn");
        }
        if i != b.len - 1 && is_control_flow_insn(&self.insns[iix]) {
          panic!("Func: block contains control flow insn not at end");
        }
      }
    }

    // Resolve all labels
    let blocks = &self.blocks;
    for i in self.insns.iter_mut() {
      resolve_inst(i, |name| lookup(blocks, name));
    }
    resolve_label(&mut self.entry, |name| lookup(blocks, name));

    self.compute_liveness();
  }

  // A standard backward liveness fixpoint over the blocks.  The scheduler
  // treats this as an external collaborator's result.
  fn compute_liveness(&mut self) {
    // Function live-outs: whatever the return instructions hand back.
    let mut liveouts = Set::<RealReg>::empty();
    for insn in self.insns.iter() {
      if let Inst::Finish { reg: Some(reg) } = insn {
        liveouts.insert(*reg);
      }
    }
    self.liveouts = liveouts.to_vec();

    let nblocks = self.blocks.len();
    let mut livein_sets: Vec<Set<RealReg>> = Vec::new();
    for _ in 0..nblocks {
      livein_sets.push(Set::empty());
    }

    let mut changed = true;
    while changed {
      changed = false;
      for bnum in (0..nblocks).rev() {
        let bix = BlockIx::new(bnum);
        let b = &self.blocks[bix];
        let last = b.start.plus(b.len - 1);
        let mut live = if let Inst::Finish { .. } = &self.insns[last] {
          liveouts.clone()
        } else {
          let mut l = Set::<RealReg>::empty();
          for succ in self.insns[last].getTargets() {
            l.union(&livein_sets[succ.get_usize()]);
          }
          l
        };
        for i in (0..b.len).rev() {
          let insn = &self.insns[b.start.plus(i)];
          let ops = insn.get_operands();
          for op in ops.iter() {
            if op.kind == OperandKind::Def {
              live.remove(op.reg);
            }
          }
          for op in ops.iter() {
            if op.kind == OperandKind::Use {
              live.insert(op.reg);
            }
          }
        }
        if !live.equals(&livein_sets[bnum as usize]) {
          livein_sets[bnum as usize] = live;
          changed = true;
        }
      }
    }

    self.liveins = livein_sets.into_iter().map(|s| s.to_vec()).collect();
  }

  /// Replace our instruction stream with the scheduler's output.
  pub fn update_from_sched(&mut self, result: SchedResult<Func>) {
    let num_insns = result.insns.len() as u32;
    let target_map = result.target_map;
    self.insns = TypedIxVec::from_vec(result.insns);
    for bnum in 0..self.blocks.len() {
      let bix = BlockIx::new(bnum);
      let start = target_map[bix];
      let end = if bnum + 1 < self.blocks.len() {
        target_map[BlockIx::new(bnum + 1)].get()
      } else {
        num_insns
      };
      let b = &mut self.blocks[bix];
      b.start = start;
      b.len = end - start.get();
    }
  }
}

impl Function for Func {
  type Inst = Inst;

  fn insns(&self) -> &[Inst] {
    self.insns.elems()
  }

  fn blocks(&self) -> MyRange<BlockIx> {
    BlockIx::new(0).dotdot(BlockIx::new(self.blocks.len()))
  }

  fn block_insns(&self, block: BlockIx) -> MyRange<InstIx> {
    let b = &self.blocks[block];
    b.start.dotdot(b.start.plus(b.len))
  }

  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    let b = &self.blocks[block];
    let last = b.start.plus(b.len - 1);
    match &self.insns[last] {
      Inst::Finish { .. } => vec![],
      insn => insn.getTargets(),
    }
  }

  fn block_liveins(&self, block: BlockIx) -> Vec<RealReg> {
    self.liveins[block.get_usize()].clone()
  }

  fn func_liveouts(&self) -> Vec<RealReg> {
    self.liveouts.clone()
  }

  fn is_return(&self, iix: InstIx) -> bool {
    match &self.insns[iix] {
      Inst::Finish { .. } => true,
      _ => false,
    }
  }

  fn is_scheduling_boundary(&self, iix: InstIx) -> bool {
    // Don't attempt to schedule around control flow or anything that
    // modifies a stack-oriented pointer, so that stack slot references
    // don't all need dependencies on it.
    inst_is_boundary(&self.insns[iix], self.sp)
  }

  fn is_implicit_def(&self, iix: InstIx) -> bool {
    match &self.insns[iix] {
      Inst::ImplicitDef { .. } => true,
      _ => false,
    }
  }

  fn reg_operands(&self, iix: InstIx) -> Vec<RegOperand> {
    self.insns[iix].get_operands()
  }

  fn operand_reg_class(&self, iix: InstIx, op: usize) -> Option<RegClass> {
    self.insns[iix].get_operand_class(op)
  }

  fn set_operand_reg(&mut self, iix: InstIx, op: usize, new_reg: RealReg) {
    self.insns[iix].set_operand(op, new_reg);
  }

  fn gen_noop(&self) -> Inst {
    Inst::Noop
  }
}

//=============================================================================
// Construction of the RealRegUniverse, for testing.

/// Create a universe with `nI32` allocable `R` registers and `nF32`
/// allocable `F` registers, plus two non-allocable registers: a stack
/// pointer `SP`, and (when `nI32` >= 2) a pair register `W0` overlapping
/// `R0` and `R1`.  `callee_saved` starts out empty; tests that want some
/// fill the field in directly.
pub fn make_universe(nI32: usize, nF32: usize) -> RealRegUniverse {
  let total_regs = nI32 + nF32;
  if total_regs >= 254 {
    panic!("make_universe: too many regs, cannot represent");
  }

  let mut regs = Vec::<(RealReg, String)>::new();
  let mut allocable_by_class = [None; NUM_REG_CLASSES];
  let mut index = 0u8;

  if nI32 > 0 {
    let first = index as usize;
    for i in 0..nI32 {
      let name = format!("R{}", i);
      let reg = RealReg::new(RegClass::I32, /*enc=*/ 0, index);
      regs.push((reg, name));
      index += 1;
    }
    let last = index as usize - 1;
    allocable_by_class[RegClass::I32.rc_to_usize()] =
      Some(RegClassInfo { first, last });
  }

  if nF32 > 0 {
    let first = index as usize;
    for i in 0..nF32 {
      let name = format!("F{}", i);
      let reg = RealReg::new(RegClass::F32, /*enc=*/ 0, index);
      regs.push((reg, name));
      index += 1;
    }
    let last = index as usize - 1;
    allocable_by_class[RegClass::F32.rc_to_usize()] =
      Some(RegClassInfo { first, last });
  }

  let allocable = regs.len();

  // The stack pointer.
  let sp = RealReg::new(RegClass::I32, 0, index);
  regs.push((sp, "SP".to_string()));
  index += 1;

  let mut sub_regs = vec![Vec::new(); regs.len()];
  let mut super_regs = vec![Vec::new(); regs.len()];

  // A wide register pairing R0 and R1, so that the aliasing paths have
  // something to chew on.
  if nI32 >= 2 {
    let w0 = RealReg::new(RegClass::I32, 0, index);
    regs.push((w0, "W0".to_string()));
    let r0 = regs[0].0;
    let r1 = regs[1].0;
    sub_regs.push(vec![r0, r1]);
    super_regs.push(Vec::new());
    super_regs[r0.get_index()].push(w0);
    super_regs[r1.get_index()].push(w0);
  }

  let univ = RealRegUniverse {
    regs,
    allocable,
    allocable_by_class,
    callee_saved: Vec::new(),
    sub_regs,
    super_regs,
  };
  univ.check_is_sane();

  univ
}

/// The stack pointer of a universe made by `make_universe`.
pub fn universe_sp(
  univ: &RealRegUniverse, nI32: usize, nF32: usize,
) -> RealReg {
  univ.regs[nI32 + nF32].0
}

//=============================================================================
// The dependency-graph builder.  The scheduler treats this as an external
// collaborator: a pure function of the current instruction order, rebuilt
// from scratch whenever the anti-dependency breaker changes a register.

pub struct DepGraphBuilder<'a> {
  pub universe: &'a RealRegUniverse,
}

impl<'a> DepGraphBuilder<'a> {
  pub fn new(universe: &'a RealRegUniverse) -> Self {
    Self { universe }
  }
}

impl<'a> GraphBuilder<Func> for DepGraphBuilder<'a> {
  fn build_graph(
    &self, func: &Func, begin: InstIx, end: InstIx,
  ) -> SchedGraph {
    let mut graph = SchedGraph::new();
    let universe = self.universe;
    let nregs = universe.num_regs();

    // One unit per instruction, in program order.
    let mut units = Vec::<UnitIx>::new();
    for iix in begin.dotdot(end) {
      let insn = &func.insns[iix];
      let u = graph.add_unit(iix, insn.latency());
      graph.unit_mut(u).may_load = insn.may_load();
      graph.unit_mut(u).may_store = insn.may_store();
      units.push(u);
    }

    // Register dependencies: last def and uses-since-last-def, per
    // register, walked forward.  A def clobbers its aliases too.
    let mut last_def: Vec<Option<UnitIx>> = vec![None; nregs];
    let mut uses_since: Vec<Vec<UnitIx>> = vec![Vec::new(); nregs];
    // Memory dependencies: a simple chain through stores.
    let mut last_store: Option<UnitIx> = None;
    let mut loads_since_store = Vec::<UnitIx>::new();

    for (k, iix) in begin.dotdot(end).into_iter().enumerate() {
      let u = units[k];
      let insn = &func.insns[iix];
      let ops = insn.get_operands();

      // Reads happen before writes.
      for op in ops.iter() {
        if op.kind != OperandKind::Use {
          continue;
        }
        let ri = op.reg.get_index();
        if let Some(d) = last_def[ri] {
          let latency = graph.unit(d).latency;
          graph.add_edge(d, u, DepKind::Data, latency, Some(op.reg));
        }
        for alias in universe.aliases(op.reg) {
          if let Some(d) = last_def[alias.get_index()] {
            let latency = graph.unit(d).latency;
            graph.add_edge(d, u, DepKind::Data, latency, Some(alias));
          }
        }
        uses_since[ri].push(u);
      }

      for op in ops.iter() {
        if op.kind != OperandKind::Def {
          continue;
        }
        let reg = op.reg;
        let mut clobbered = vec![reg];
        for alias in universe.aliases(reg) {
          clobbered.push(alias);
        }
        for creg in clobbered {
          let ci = creg.get_index();
          for pu in &uses_since[ci] {
            if *pu != u {
              graph.add_edge(*pu, u, DepKind::Anti, 0, Some(creg));
            }
          }
          if let Some(d) = last_def[ci] {
            if d != u {
              graph.add_edge(d, u, DepKind::Output, 1, Some(creg));
            }
          }
          last_def[ci] = Some(u);
          uses_since[ci].clear();
        }
      }

      if insn.may_load() {
        if let Some(s) = last_store {
          graph.add_edge(s, u, DepKind::Order, 1, None);
        }
        loads_since_store.push(u);
      }
      if insn.may_store() {
        if let Some(s) = last_store {
          graph.add_edge(s, u, DepKind::Order, 1, None);
        }
        for l in loads_since_store.drain(..) {
          if l != u {
            graph.add_edge(l, u, DepKind::Order, 0, None);
          }
        }
        last_store = Some(u);
      }
    }

    // Priorities: the latency height toward the region's end, so that the
    // longest chains go first.  Units were added in program order and all
    // edges point forward, so a reverse walk sees every successor before
    // its predecessors.
    for k in (0..units.len()).rev() {
      let u = units[k];
      let mut height = graph.unit(u).latency;
      for edge in graph.unit(u).succs.clone() {
        let candidate = edge.latency + graph.unit(edge.unit).priority;
        if height < candidate {
          height = candidate;
        }
      }
      graph.unit_mut(u).priority = height;
    }

    graph.finish();
    graph
  }
}

//=============================================================================
// The interpreter

#[derive(Copy, Clone, PartialEq)]
pub enum Value {
  U32(u32),
  F32(f32),
}
impl Value {
  fn toU32(self) -> u32 {
    match self {
      Value::U32(n) => n,
      Value::F32(_) => panic!("Value::toU32: this is a F32"),
    }
  }
  fn toF32(self) -> f32 {
    match self {
      Value::U32(_) => panic!("Value::toF32: this is a U32"),
      Value::F32(n) => n,
    }
  }
}
impl fmt::Debug for Value {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Value::U32(n) => write!(fmt, "{}", n),
      Value::F32(n) => write!(fmt, "{}", n),
    }
  }
}

/// What a run of a Func produced.  Scheduling must leave this unchanged.
#[derive(PartialEq, Debug)]
pub struct RunResult {
  pub ret_value: Option<Value>,
  pub mem: Vec<Option<Value>>,
}

struct IState<'a> {
  func: &'a Func,
  nia: InstIx,               // Program counter ("next instruction address")
  rregs: Vec<Option<Value>>, // [0 .. maxRealRegs)
  mem: Vec<Option<Value>>,   // [0 .. maxMem)
  n_insns: usize,            // Stats: number of insns executed
  ret_value: Option<Value>,
}

impl<'a> IState<'a> {
  fn new(func: &'a Func, maxRealRegs: usize, maxMem: usize) -> Self {
    let mut state = IState {
      func,
      nia: func.blocks[func.entry.getBlockIx()].start,
      rregs: Vec::new(),
      mem: Vec::new(),
      n_insns: 0,
      ret_value: None,
    };
    state.rregs.resize(maxRealRegs, None);
    state.mem.resize(maxMem, None);
    state
  }

  fn get_reg(&self, reg: RealReg) -> Value {
    // No automatic resizing.  If the reg doesn't exist, just fail.
    match self.rregs.get(reg.get_index()) {
      None => panic!("IState::get_reg: invalid reg {:?}", reg),
      Some(None) => panic!(
        "IState::get_reg: read of uninit reg {:?} at nia {:?}",
        reg, self.nia
      ),
      Some(Some(val)) => *val,
    }
  }

  fn set_reg(&mut self, reg: RealReg, val: Value) {
    match self.rregs.get_mut(reg.get_index()) {
      None => panic!("IState::set_reg: invalid reg {:?}", reg),
      Some(valP) => *valP = Some(val),
    }
  }

  fn get_mem(&self, addr: u32) -> Value {
    match self.mem.get(addr as usize) {
      None => panic!("IState::get_mem: invalid addr {}", addr),
      Some(None) => {
        panic!("IState::get_mem: read of uninit mem at addr {}", addr)
      }
      Some(Some(val)) => *val,
    }
  }

  fn set_mem(&mut self, addr: u32, val: Value) {
    match self.mem.get_mut(addr as usize) {
      None => panic!("IState::set_mem: invalid addr {}", addr),
      Some(valP) => *valP = Some(val),
    }
  }

  fn get_RI(&self, ri: &RI) -> u32 {
    match ri {
      RI::Reg { reg } => self.get_reg(*reg).toU32(),
      RI::Imm { imm } => *imm,
    }
  }

  fn get_AM(&self, am: &AM) -> u32 {
    match am {
      AM::RI { base, offset } => self.get_reg(*base).toU32() + offset,
      AM::RR { base, offset } => {
        self.get_reg(*base).toU32() + self.get_reg(*offset).toU32()
      }
    }
  }

  // Move the interpreter one step forward
  fn step(&mut self) -> bool {
    let mut done = false;

    let iix = self.nia;
    self.nia = iix.plus(1);
    self.n_insns += 1;
    if self.n_insns > 100_000 {
      panic!("IState::step: execution ran away");
    }

    let insn = &self.func.insns[iix];
    match insn {
      Inst::Imm { dst, imm } => self.set_reg(*dst, Value::U32(*imm)),
      Inst::ImmF { dst, imm } => self.set_reg(*dst, Value::F32(*imm)),
      Inst::Copy { dst, src } => {
        let v = self.get_reg(*src);
        self.set_reg(*dst, v)
      }
      Inst::BinOp { op, dst, srcL, srcR } => {
        let srcL_v = self.get_reg(*srcL).toU32();
        let srcR_v = self.get_RI(srcR);
        self.set_reg(*dst, Value::U32(op.calc(srcL_v, srcR_v)));
      }
      Inst::BinOpM { op, dst, srcR } => {
        let dst_v = self.get_reg(*dst).toU32();
        let srcR_v = self.get_RI(srcR);
        self.set_reg(*dst, Value::U32(op.calc(dst_v, srcR_v)));
      }
      Inst::BinOpF { op, dst, srcL, srcR } => {
        let srcL_v = self.get_reg(*srcL).toF32();
        let srcR_v = self.get_reg(*srcR).toF32();
        self.set_reg(*dst, Value::F32(op.calc(srcL_v, srcR_v)));
      }
      Inst::Load { dst, addr } => {
        let addr_v = self.get_AM(addr);
        let v = self.get_mem(addr_v);
        self.set_reg(*dst, v);
      }
      Inst::Store { addr, src } => {
        let addr_v = self.get_AM(addr);
        let v = self.get_reg(*src);
        self.set_mem(addr_v, v);
      }
      Inst::ImplicitDef { dst } => {
        // A placeholder def: give the register a defined value so later
        // reads don't trap, without modeling any real computation.
        let v = match dst.get_class() {
          RegClass::I32 => Value::U32(0),
          RegClass::F32 => Value::F32(0.0),
        };
        self.set_reg(*dst, v);
      }
      Inst::Noop => {}
      Inst::Goto { target } => {
        self.nia = self.func.blocks[target.getBlockIx()].start
      }
      Inst::GotoCTF { cond, targetT, targetF } => {
        let target =
          if self.get_reg(*cond).toU32() != 0 { targetT } else { targetF };
        self.nia = self.func.blocks[target.getBlockIx()].start;
      }
      Inst::Finish { reg } => {
        self.ret_value = reg.map(|reg| self.get_reg(reg));
        done = true;
      }
    }
    done
  }
}

pub fn run_func(
  f: &Func, who: &str, reg_universe: &RealRegUniverse,
) -> RunResult {
  println!("");
  println!(
    "Running stage '{}': Func: name='{}' entry='{:?}'",
    who, f.name, f.entry
  );

  let mut istate =
    IState::new(f, reg_universe.regs.len(), /*maxMem=*/ 1000);
  let mut done = false;
  while !done {
    done = istate.step();
  }

  println!("Running stage '{}': done.  {} insns", who, istate.n_insns);

  RunResult { ret_value: istate.ret_value, mem: istate.mem }
}
