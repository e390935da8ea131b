//! Hazard recognizers: decide whether an otherwise-ready unit may issue in
//! the current cycle.

use crate::sched_graph::SchedUnit;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HazardType {
  /// This instruction can be emitted at this cycle.
  NoHazard,
  /// This instruction cannot be emitted at this cycle.
  Hazard,
  /// This instruction cannot be emitted at this cycle, and a noop must be
  /// emitted if nothing else can be.
  NoopHazard,
}

/// The scheduler consults one of these before each emission.  The default
/// methods describe a machine with no structural constraints at all.
pub trait HazardRecognizer {
  /// Classify a candidate for emission at the current cycle.
  fn hazard_type(&mut self, _unit: &SchedUnit) -> HazardType {
    HazardType::NoHazard
  }

  /// A unit was emitted, so update internal state.
  fn emit_instruction(&mut self, _unit: &SchedUnit) {}

  /// The scheduler advanced a cycle without emitting anything.
  fn advance_cycle(&mut self) {}

  /// The scheduler emitted a noop.
  fn emit_noop(&mut self) {}
}

/// Recognizer for targets needing no hazard avoidance.
pub struct TrivialHazardRecognizer;

impl HazardRecognizer for TrivialHazardRecognizer {}

/// A coarse classification of units for `SimpleHazardRecognizer`.
#[derive(Copy, Clone, PartialEq, Eq)]
enum MemClass {
  Other,
  Load,
  Store,
}

const WINDOW_SIZE: usize = 8;

/// A *very* simple hazard recognizer.  It uses a coarse classification and
/// attempts to avoid that instructions of a given class aren't grouped too
/// densely together.  It never demands noops.
pub struct SimpleHazardRecognizer {
  /// The class values of the most recently issued instructions, most
  /// recent last.
  window: [MemClass; WINDOW_SIZE],
}

impl SimpleHazardRecognizer {
  pub fn new() -> Self {
    Self { window: [MemClass::Other; WINDOW_SIZE] }
  }

  fn get_class(unit: &SchedUnit) -> MemClass {
    if unit.may_load {
      MemClass::Load
    } else if unit.may_store {
      MemClass::Store
    } else {
      MemClass::Other
    }
  }

  /// Rotate the window and insert `c` as the most recent entry.
  fn step(&mut self, c: MemClass) {
    self.window.copy_within(1.., 0);
    self.window[WINDOW_SIZE - 1] = c;
  }
}

impl HazardRecognizer for SimpleHazardRecognizer {
  fn hazard_type(&mut self, unit: &SchedUnit) -> HazardType {
    let c = Self::get_class(unit);
    if c == MemClass::Other {
      return HazardType::NoHazard;
    }
    let mut score = 0;
    for i in 0..WINDOW_SIZE {
      if self.window[i] == c {
        score += i + 1;
      }
    }
    if score > WINDOW_SIZE * 2 {
      HazardType::Hazard
    } else {
      HazardType::NoHazard
    }
  }

  fn emit_instruction(&mut self, unit: &SchedUnit) {
    self.step(Self::get_class(unit));
  }

  fn advance_cycle(&mut self) {
    self.step(MemClass::Other);
  }
}
