/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

#![allow(non_snake_case)]

/// Test cases.  The list of them is right at the bottom, function
/// |find_func|.  Add new ones there.
///
/// Each case fixes its own register universe, since the scheduler's
/// behavior depends on the exact register geometry (aliasing, the stack
/// pointer, how many rename targets exist).
use crate::test_framework::*;
use postsched::RealRegUniverse;

pub struct TestCase {
  pub func: Func,
  pub universe: RealRegUniverse,
}

fn reg(universe: &RealRegUniverse, ix: usize) -> postsched::RealReg {
  universe.regs[ix].0
}

// A single block of straight-line code with some latency to hide: loads
// feeding arithmetic, and a final reuse of R0 giving one anti-dependency.
fn test__straight_line() -> TestCase {
  let universe = make_universe(8, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("straight_line", "b0");
  func.block(
    "b0",
    vec![
      i_imm(r(7), 100),
      i_imm(r(2), 10),
      i_store(AM_RI(r(7), 0), r(2)),
      i_imm(r(3), 20),
      i_store(AM_RI(r(7), 1), r(3)),
      i_load(r(4), AM_RI(r(7), 0)),
      i_load(r(5), AM_RI(r(7), 1)),
      i_add(r(6), r(4), RI_R(r(5))),
      i_mul(r(2), r(6), RI_I(3)),
      i_add(r(2), r(2), RI_I(1)),
      i_finish(Some(r(2))),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

// The classic anti-dependency chain: one register recycled through four
// def/use pairs.  R4 is the recycled register; R0..R2 are free alternates
// (R3 is the store base).  Breaking should rename the second and third
// pairs to distinct fresh registers and reuse the first fresh one for the
// last pair, never the same fresh register twice in a row.
fn test__anti_chain() -> TestCase {
  let universe = make_universe(5, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("anti_chain", "b0");
  func.block(
    "b0",
    vec![
      i_imm(r(3), 40),
      i_imm(r(4), 1),
      i_store(AM_RI(r(3), 0), r(4)),
      i_imm(r(4), 2),
      i_store(AM_RI(r(3), 1), r(4)),
      i_imm(r(4), 3),
      i_store(AM_RI(r(3), 2), r(4)),
      i_imm(r(4), 4),
      i_store(AM_RI(r(3), 3), r(4)),
      i_finish(None),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

// A burst of independent loads dense enough to trip the windowed hazard
// recognizer into stalling.
fn test__loads_hazard() -> TestCase {
  let universe = make_universe(10, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("loads_hazard", "b0");
  func.block(
    "b0",
    vec![
      i_imm(r(8), 60),
      i_imm(r(9), 11),
      i_store(AM_RI(r(8), 0), r(9)),
      i_imm(r(9), 22),
      i_store(AM_RI(r(8), 1), r(9)),
      i_imm(r(9), 33),
      i_store(AM_RI(r(8), 2), r(9)),
      i_load(r(0), AM_RI(r(8), 0)),
      i_load(r(1), AM_RI(r(8), 1)),
      i_load(r(2), AM_RI(r(8), 2)),
      i_load(r(3), AM_RI(r(8), 0)),
      i_load(r(4), AM_RI(r(8), 1)),
      i_load(r(5), AM_RI(r(8), 2)),
      i_load(r(6), AM_RI(r(8), 0)),
      i_load(r(7), AM_RI(r(8), 1)),
      i_finish(None),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

// A write to the stack pointer in mid-block.  The block splits into two
// scheduling regions; nothing may cross the SP write, and liveness has to
// be threaded backward over the already-scheduled downstream region.
fn test__multi_region() -> TestCase {
  let universe = make_universe(6, 0);
  let sp = universe_sp(&universe, 6, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("multi_region", "b0");
  func.block(
    "b0",
    vec![
      i_imm(r(2), 80),
      i_imm(r(3), 5),
      i_store(AM_RI(r(2), 0), r(3)),
      i_imm(r(3), 6),
      i_store(AM_RI(r(2), 1), r(3)),
      i_imm(sp, 999),
      i_load(r(4), AM_RI(r(2), 0)),
      i_imm(r(3), 7),
      i_store(AM_RI(r(2), 2), r(3)),
      i_add(r(5), r(4), RI_R(r(3))),
      i_store(AM_RI(r(2), 3), r(5)),
      i_finish(None),
    ],
  );
  func.set_stack_pointer(sp);
  func.finish();
  TestCase { func, universe }
}

// A live wide register (W0, overlapping R0 and R1) must keep the breaker
// from renaming anything onto R0 or R1; the rename lands on R2 instead.
fn test__alias_block() -> TestCase {
  let universe = make_universe(5, 0);
  let r = |i| reg(&universe, i);
  let w0 = universe.regs[6].0; // after R0..R4 and SP
  let mut func = Func::new("alias_block", "b0");
  func.block(
    "b0",
    vec![
      i_imm(r(3), 50),
      i_implicit_def(w0),
      i_imm(r(4), 1),
      i_store(AM_RI(r(3), 0), r(4)),
      i_imm(r(4), 2),
      i_store(AM_RI(r(3), 1), r(4)),
      i_store(AM_RI(r(3), 2), w0),
      i_finish(None),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

// Two-address instructions: the modified register is tied, so the chain
// through R2 must stay intact whatever the scheduler does.
fn test__tied_ops() -> TestCase {
  let universe = make_universe(4, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("tied_ops", "b0");
  func.block(
    "b0",
    vec![
      i_imm(r(2), 10),
      i_addm(r(2), RI_I(5)),
      i_subm(r(2), RI_I(3)),
      i_imm(r(3), 100),
      i_store(AM_RI(r(3), 0), r(2)),
      i_finish(Some(r(2))),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

// A small counted loop: several blocks, successor live-ins, and a
// conditional terminator.
fn test__ctf_loop() -> TestCase {
  let universe = make_universe(6, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("ctf_loop", "start");
  func.block(
    "start",
    vec![i_imm(r(2), 0), i_imm(r(3), 5), i_goto("loop")],
  );
  func.block(
    "loop",
    vec![
      i_add(r(2), r(2), RI_R(r(3))),
      i_subm(r(3), RI_I(1)),
      i_cmp_gt(r(4), r(3), RI_I(0)),
      i_goto_ctf(r(4), "loop", "done"),
    ],
  );
  func.block("done", vec![i_finish(Some(r(2)))]);
  func.finish();
  TestCase { func, universe }
}

// Both register classes in one region: integer and float chains schedule
// around each other, and any renaming stays inside its own class.
fn test__f32_mix() -> TestCase {
  let universe = make_universe(4, 3);
  let r = |i| reg(&universe, i);
  let f = |i: usize| reg(&universe, 4 + i);
  let mut func = Func::new("f32_mix", "b0");
  func.block(
    "b0",
    vec![
      i_immf(f(0), 1.5),
      i_immf(f(1), 2.5),
      i_fadd(f(2), f(0), f(1)),
      i_fadd(f(0), f(2), f(1)),
      i_imm(r(2), 3),
      i_imm(r(3), 77),
      i_store(AM_RI(r(3), 0), r(2)),
      i_finish(Some(r(2))),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

// Implicit defs are not rename anchors: a region consisting mostly of
// them must come through untouched.
fn test__implicit_defs() -> TestCase {
  let universe = make_universe(4, 0);
  let r = |i| reg(&universe, i);
  let mut func = Func::new("implicit_defs", "b0");
  func.block(
    "b0",
    vec![
      i_implicit_def(r(2)),
      i_implicit_def(r(3)),
      i_add(r(2), r(2), RI_R(r(3))),
      i_finish(Some(r(2))),
    ],
  );
  func.finish();
  TestCase { func, universe }
}

//=============================================================================
// The list of available test cases.

pub fn find_func(name: &str) -> Result<TestCase, Vec<String>> {
  let all_funcs: Vec<(&str, fn() -> TestCase)> = vec![
    ("straight_line", test__straight_line),
    ("anti_chain", test__anti_chain),
    ("loads_hazard", test__loads_hazard),
    ("multi_region", test__multi_region),
    ("alias_block", test__alias_block),
    ("tied_ops", test__tied_ops),
    ("ctf_loop", test__ctf_loop),
    ("f32_mix", test__f32_mix),
    ("implicit_defs", test__implicit_defs),
  ];

  for (cand_name, make) in &all_funcs {
    if *cand_name == name {
      return Ok(make());
    }
  }
  Err(all_funcs.iter().map(|(name, _)| name.to_string()).collect())
}
