//! Data structures for the whole crate: registers, register classes, the
//! real-register universe, and typed index vectors.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::slice::{Iter, IterMut};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

//=============================================================================
// Maps

pub type Map<K, V> = FxHashMap<K, V>;

//=============================================================================
// Sets of things

#[derive(Clone)]
pub struct Set<T> {
  set: FxHashSet<T>,
}

impl<T: Eq + Ord + Hash + Copy + fmt::Debug> Set<T> {
  pub fn empty() -> Self {
    Self { set: FxHashSet::<T>::default() }
  }

  pub fn unit(item: T) -> Self {
    let mut s = Self::empty();
    s.insert(item);
    s
  }

  pub fn card(&self) -> usize {
    self.set.len()
  }

  pub fn insert(&mut self, item: T) {
    self.set.insert(item);
  }

  pub fn is_empty(&self) -> bool {
    self.set.is_empty()
  }

  pub fn contains(&self, item: T) -> bool {
    self.set.contains(&item)
  }

  pub fn union(&mut self, other: &Self) {
    for item in other.set.iter() {
      self.set.insert(*item);
    }
  }

  pub fn remove(&mut self, item: T) {
    self.set.remove(&item);
  }

  pub fn to_vec(&self) -> Vec<T> {
    let mut res: Vec<T> = self.set.iter().cloned().collect();
    res.sort_unstable();
    res
  }

  pub fn from_vec(vec: Vec<T>) -> Self {
    let mut res = Set::<T>::empty();
    for x in vec {
      res.insert(x);
    }
    res
  }

  pub fn equals(&self, other: &Self) -> bool {
    self.set == other.set
  }
}

pub struct SetIter<'a, T> {
  set_iter: std::collections::hash_set::Iter<'a, T>,
}
impl<T> Set<T> {
  pub fn iter(&self) -> SetIter<T> {
    SetIter { set_iter: self.set.iter() }
  }
}
impl<'a, T> Iterator for SetIter<'a, T> {
  type Item = &'a T;
  fn next(&mut self) -> Option<Self::Item> {
    self.set_iter.next()
  }
}

impl<T: Eq + Ord + Hash + Copy + fmt::Debug> fmt::Debug for Set<T> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{{")?;
    let mut first = true;
    for item in self.to_vec().iter() {
      if !first {
        write!(fmt, ", ")?;
      }
      first = false;
      write!(fmt, "{:?}", item)?;
    }
    write!(fmt, "}}")
  }
}

//=============================================================================
// Iteration boilerplate for entities.  The only purpose of this is to support
// constructions of the form
//
//   for ent in start_ent .dotdot( end_plus1_ent ) {
//   }
//
// until such time as |trait Step| is available in stable Rust.

trait PlusOne {
  fn plus_one(&self) -> Self;
}

#[derive(Clone, Copy)]
pub struct MyRange<T> {
  first: T,
  last_plus1: T,
}
impl<T: Copy + PartialOrd + PlusOne> IntoIterator for MyRange<T> {
  type Item = T;
  type IntoIter = MyIterator<T>;
  fn into_iter(self) -> Self::IntoIter {
    MyIterator { range: self, next: self.first }
  }
}

pub struct MyIterator<T> {
  range: MyRange<T>,
  next: T,
}
impl<T: Copy + PartialOrd + PlusOne> Iterator for MyIterator<T> {
  type Item = T;
  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.range.last_plus1 {
      None
    } else {
      let res = Some(self.next);
      self.next = self.next.plus_one();
      res
    }
  }
}

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored).

pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}
impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn from_vec(vek: Vec<Ty>) -> Self {
    Self { vek, ty_ix: PhantomData::<TyIx> }
  }
  pub fn append(&mut self, other: &mut TypedIxVec<TyIx, Ty>) {
    self.vek.append(&mut other.vek);
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  pub fn elems(&self) -> &[Ty] {
    &self.vek
  }
  pub fn len(&self) -> u32 {
    self.vek.len() as u32
  }
  pub fn is_empty(&self) -> bool {
    self.vek.is_empty()
  }
  pub fn push(&mut self, item: Ty) {
    self.vek.push(item);
  }
  pub fn resize(&mut self, new_len: u32, value: Ty) {
    self.vek.resize(new_len as usize, value);
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> Clone for TypedIxVec<TyIx, Ty>
where
  Ty: Clone,
{
  fn clone(&self) -> Self {
    Self { vek: self.vek.clone(), ty_ix: PhantomData::<TyIx> }
  }
}

impl<TyIx, Ty> fmt::Debug for TypedIxVec<TyIx, Ty>
where
  Ty: fmt::Debug,
{
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    self.vek.fmt(f)
  }
}

//=============================================================================

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $Type:ident, $PrintingPrefix:expr) => {
    // Firstly, the indexing type (TypeIx)
    #[cfg_attr(
      feature = "enable-serde",
      derive(Serialize, Deserialize)
    )]
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    pub struct $TypeIx(u32);
    impl $TypeIx {
      pub fn new(n: u32) -> Self {
        Self(n)
      }
      pub fn get(self) -> u32 {
        self.0
      }
      pub fn get_usize(self) -> usize {
        self.0 as usize
      }
      pub fn plus(self, delta: u32) -> $TypeIx {
        Self(self.0 + delta)
      }
      pub fn minus(self, delta: u32) -> $TypeIx {
        Self(self.0 - delta)
      }
      pub fn dotdot(&self, last_plus1: $TypeIx) -> MyRange<$TypeIx> {
        MyRange { first: *self, last_plus1 }
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, self.0)
      }
    }
    impl PlusOne for $TypeIx {
      fn plus_one(&self) -> Self {
        self.plus(1)
      }
    }
    impl Into<u32> for $TypeIx {
      fn into(self) -> u32 {
        self.0
      }
    }
  };
}

generate_boilerplate!(InstIx, Inst, "i");

generate_boilerplate!(BlockIx, Block, "b");

generate_boilerplate!(UnitIx, SchedUnit, "u");

//=============================================================================
// Register classes

#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegClass {
  I32,
  F32,
}

pub const NUM_REG_CLASSES: usize = 2;

impl RegClass {
  pub fn rc_to_u32(self) -> u32 {
    match self {
      RegClass::I32 => 0,
      RegClass::F32 => 1,
    }
  }
  pub fn rc_to_usize(self) -> usize {
    self.rc_to_u32() as usize
  }
}

pub fn rc_from_u32(rc: u32) -> RegClass {
  match rc {
    0 => RegClass::I32,
    1 => RegClass::F32,
    _ => panic!("rc_from_u32"),
  }
}

impl fmt::Debug for RegClass {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RegClass::I32 => write!(fmt, "I32"),
      RegClass::F32 => write!(fmt, "F32"),
    }
  }
}

//=============================================================================
// Registers

// RealReg represents a physical register.  This pass runs after register
// allocation, so there are no virtual registers; every register mentioned by
// an instruction is one of these.  For compactness and speed the fields are
// packed into a single u32.  The format is:
//
//   Real Reg:   uu:13  rc:3  enc:8  index:8
//
// |rc| is the register class.  |uu| means "unused".  |enc| is the hardware
// encoding for the reg.  |index| is the entry number in the associated
// |RealRegUniverse|.
//
// This scheme gives us a compact representation, fast equality tests, the
// ability to handle targets with up to 256 real registers, and the ability
// to use a register as a zero-based index into dense per-register arrays
// without a side lookup.
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RealReg {
  bits: u32,
}

impl RealReg {
  pub fn new(rc: RegClass, enc: u8, index: u8) -> RealReg {
    let bits = (rc.rc_to_u32() << 16) | ((enc as u32) << 8) | (index as u32);
    RealReg { bits }
  }
  pub fn get_class(self) -> RegClass {
    rc_from_u32((self.bits >> 16) & 0x7)
  }
  pub fn get_enc(self) -> u8 {
    ((self.bits >> 8) & 0xFF) as u8
  }
  // Return type is usize because typically we will want to use the result
  // for indexing into a Vec.
  pub fn get_index(self) -> usize {
    (self.bits & 0xFF) as usize
  }
}

impl fmt::Debug for RealReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let prefix = match self.get_class() {
      RegClass::I32 => "R",
      RegClass::F32 => "F",
    };
    write!(fmt, "{}{}", prefix, self.get_index())
  }
}

//=============================================================================
// The real-register universe

/// The allocable registers of one register class form a contiguous group in
/// the universe's `regs` array; this describes the group.  The range
/// includes both `first` and `last`.
#[derive(Clone, Copy, Debug)]
pub struct RegClassInfo {
  pub first: usize,
  pub last: usize,
}

/// A "universe" of real registers.  This serves several purposes:
///
/// * it defines the mapping from real register indices to the registers
///   themselves, and gives each one a name for printing;
///
/// * it defines the size of the initial section of that mapping that is
///   available for renaming, so that the anti-dependency breaker can treat
///   the registers under its control as a zero based, contiguous array;
///
/// * it carries the target queries the scheduler needs: allocation order
///   per class, callee-saved registers, and the sub/super register
///   structure from which aliasing is derived.
pub struct RealRegUniverse {
  /// The registers themselves.  All must have their index number
  /// (.get_index()) equal to the array index here, since this is the only
  /// place where we map index numbers to actual registers.
  pub regs: Vec<(RealReg, String)>,

  /// This is the size of the initial section of `regs` that may be used as
  /// rename targets.  It must be <= `regs`.len().  Registers past this
  /// point (stack pointer, wide pair registers, etc) are still tracked for
  /// liveness but never chosen as a `NewReg`.
  pub allocable: usize,

  /// Ranges for groups of allocable registers, indexed by register class.
  /// `None` means there are no allocable registers in that class.  The
  /// in-range order of `regs` is the class's allocation order.
  pub allocable_by_class: [Option<RegClassInfo>; NUM_REG_CLASSES],

  /// Callee-saved registers.  Conservatively treated as live across every
  /// block, since this runs after prologue/epilogue insertion and there is
  /// no way to add additional saved registers.
  pub callee_saved: Vec<RealReg>,

  /// Sub- and super-registers of each register, indexed by register
  /// number.  Empty for targets with a flat register file.
  pub sub_regs: Vec<Vec<RealReg>>,
  pub super_regs: Vec<Vec<RealReg>>,
}

impl RealRegUniverse {
  pub fn num_regs(&self) -> usize {
    self.regs.len()
  }

  pub fn is_allocable(&self, reg: RealReg) -> bool {
    reg.get_index() < self.allocable
  }

  /// The registers of `rc` in allocation order, or an empty slice if the
  /// class has none.
  pub fn allocation_order(&self, rc: RegClass) -> &[(RealReg, String)] {
    match self.allocable_by_class[rc.rc_to_usize()] {
      Some(info) => &self.regs[info.first..info.last + 1],
      None => &[],
    }
  }

  /// All registers overlapping `reg`, not including `reg` itself.
  pub fn aliases(&self, reg: RealReg) -> impl Iterator<Item = RealReg> + '_ {
    let ix = reg.get_index();
    self.sub_regs[ix].iter().chain(self.super_regs[ix].iter()).cloned()
  }

  /// Check that the universe satisfies various invariants, and panic if
  /// not.  All the invariants are important.
  pub fn check_is_sane(&self) {
    let regs_len = self.regs.len();
    let regs_allocable = self.allocable;
    // The universe must contain at most 256 registers, since RealReg only
    // has an 8-bit index field.
    let mut ok = regs_len <= 256;
    // The allocable section must be a prefix of `regs`.
    if ok {
      ok = regs_allocable <= regs_len;
    }
    // All registers must have an index value which points back at the
    // `regs` slot they are in.
    if ok {
      for i in 0..regs_len {
        let (reg, _name) = &self.regs[i];
        if reg.get_index() != i {
          ok = false;
        }
      }
    }
    // The per-class groupings must exactly tile the allocable prefix, and
    // the registers in each grouping must really be of the claimed class.
    if ok {
      let mut regs_visited = 0;
      for rc in 0..NUM_REG_CLASSES {
        if let Some(info) = &self.allocable_by_class[rc] {
          if info.first > info.last || info.last >= regs_allocable {
            ok = false;
            break;
          }
          for i in info.first..info.last + 1 {
            let (reg, _name) = &self.regs[i];
            if rc_from_u32(rc as u32) != reg.get_class() {
              ok = false;
            }
            regs_visited += 1;
          }
        }
      }
      if ok && regs_visited != regs_allocable {
        ok = false;
      }
    }
    // The alias tables must cover every register.
    if ok {
      ok = self.sub_regs.len() == regs_len && self.super_regs.len() == regs_len;
    }
    // Callee-saved registers must exist in the universe.
    if ok {
      for reg in &self.callee_saved {
        if reg.get_index() >= regs_len {
          ok = false;
        }
      }
    }
    // So finally ..
    if !ok {
      panic!("RealRegUniverse::check_is_sane: invalid RealRegUniverse");
    }
  }
}
