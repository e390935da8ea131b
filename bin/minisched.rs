/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

mod test_cases;
mod test_framework;
mod validator;

use postsched::{schedule_function, SchedOptions};
use test_cases::find_func;
use test_framework::{run_func, DepGraphBuilder};

use clap;
use log::{self, error, info};
use pretty_env_logger;

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("minisched")
    .about("a simple program to allow separate testing of postsched")
    .arg(
      clap::Arg::new("test")
        .short('t')
        .long("test")
        .takes_value(true)
        .required(true)
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("no-antidep")
        .long("no-antidep")
        .help("disable anti-dependency breaking"),
    )
    .arg(
      clap::Arg::new("no-hazard")
        .long("no-hazard")
        .help("disable hazard avoidance (use the trivial recognizer)"),
    );
  let matches = app.get_matches();

  let func_name = matches.value_of("test").unwrap();
  let test_case = match find_func(func_name) {
    Ok(test_case) => test_case,
    Err(available_func_names) => {
      error!("can't find Func with name '{}'", func_name);
      println!("available func names are:");
      for name in available_func_names {
        println!("     {}", name);
      }
      return;
    }
  };

  let opts = SchedOptions {
    break_anti_dependencies: !matches.is_present("no-antidep"),
    avoid_hazards: !matches.is_present("no-hazard"),
  };
  info!("scheduling with {:?}", opts);

  let test_cases::TestCase { mut func, universe } = test_case;
  func.print("before scheduling");

  let before_result = run_func(&func, "Before scheduling", &universe);

  let builder = DepGraphBuilder::new(&universe);
  let sched = match schedule_function(&mut func, &builder, &universe, &opts) {
    Ok(sched) => sched,
    Err(err) => {
      error!("scheduling failed: {}", err);
      return;
    }
  };

  if let Err(err) = validator::validate(&func, &sched) {
    error!("schedule does not validate: {}", err);
    return;
  }

  println!(
    "scheduling done: {} noops inserted, {} stall cycles",
    sched.noops_inserted, sched.stall_cycles
  );
  func.update_from_sched(sched);
  func.print("after scheduling");

  let after_result = run_func(&func, "After scheduling", &universe);
  if before_result != after_result {
    error!("scheduling changed the program's behavior!");
    return;
  }
  println!("before/after runs agree");
}

//=============================================================================
// Test cases.  The real content is in test_cases.rs; these drive each case
// through the scheduler with the interpreter and validator as oracles.

#[cfg(test)]
mod test_utils {
  use super::*;
  use crate::test_cases::TestCase;
  use crate::test_framework::{Func, RunResult};
  use postsched::{RealRegUniverse, SchedResult};

  /// Schedule a named func.  Returns everything a test might want to poke
  /// at: the func (renamed in place, still in original order), the
  /// scheduler's output, the universe, and the pre-scheduling run.
  pub fn sched_func(
    func_name: &str, opts: &SchedOptions,
  ) -> (Func, SchedResult<Func>, RealRegUniverse, RunResult) {
    let _ = pretty_env_logger::try_init();
    let TestCase { mut func, universe } = find_func(func_name).unwrap();
    let before_result = run_func(&func, "Before scheduling", &universe);
    let builder = DepGraphBuilder::new(&universe);
    let sched = schedule_function(&mut func, &builder, &universe, opts)
      .unwrap_or_else(|err| {
        panic!("scheduling failed: {}", err);
      });
    crate::validator::validate(&func, &sched)
      .unwrap_or_else(|err| panic!("invalid schedule: {}", err));
    (func, sched, universe, before_result)
  }

  /// Full round trip: schedule, validate, and check that the scheduled
  /// code still computes the same thing.  Returns (noops, stalls) and the
  /// pre-scheduling run result.
  pub fn check_sched(
    func_name: &str, opts: &SchedOptions,
  ) -> (u32, u32, RunResult) {
    let (mut func, sched, universe, before_result) =
      sched_func(func_name, opts);
    let noops = sched.noops_inserted;
    let stalls = sched.stall_cycles;
    func.update_from_sched(sched);
    func.print("after scheduling");
    let after_result = run_func(&func, "After scheduling", &universe);
    assert_eq!(before_result, after_result);
    (noops, stalls, before_result)
  }

  pub fn all_opts() -> Vec<SchedOptions> {
    vec![
      SchedOptions { break_anti_dependencies: true, avoid_hazards: true },
      SchedOptions { break_anti_dependencies: true, avoid_hazards: false },
      SchedOptions { break_anti_dependencies: false, avoid_hazards: true },
      SchedOptions { break_anti_dependencies: false, avoid_hazards: false },
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::test_utils::*;
  use super::*;
  use crate::test_framework::{Inst, Value};
  use postsched::{
    list_schedule, DepKind, Emitted, HazardRecognizer, HazardType, InstIx,
    SchedError, SchedGraph, SchedUnit, TrivialHazardRecognizer, UnitIx,
  };

  #[test]
  fn straight_line() {
    for opts in all_opts() {
      let (_, _, before) = check_sched("straight_line", &opts);
      assert_eq!(before.ret_value, Some(Value::U32(91)));
    }
  }

  #[test]
  fn tied_ops() {
    for opts in all_opts() {
      let (_, _, before) = check_sched("tied_ops", &opts);
      assert_eq!(before.ret_value, Some(Value::U32(12)));
    }
  }

  #[test]
  fn ctf_loop() {
    for opts in all_opts() {
      let (_, _, before) = check_sched("ctf_loop", &opts);
      assert_eq!(before.ret_value, Some(Value::U32(15)));
    }
  }

  #[test]
  fn f32_mix() {
    for opts in all_opts() {
      check_sched("f32_mix", &opts);
    }
  }

  #[test]
  fn implicit_defs() {
    for opts in all_opts() {
      let (_, _, before) = check_sched("implicit_defs", &opts);
      assert_eq!(before.ret_value, Some(Value::U32(0)));
    }
  }

  #[test]
  fn multi_region() {
    for opts in all_opts() {
      check_sched("multi_region", &opts);
    }
  }

  fn imm_dst(insn: &Inst) -> postsched::RealReg {
    match insn {
      Inst::Imm { dst, .. } => *dst,
      _ => panic!("expected imm, got {:?}", insn),
    }
  }

  fn store_src(insn: &Inst) -> postsched::RealReg {
    match insn {
      Inst::Store { src, .. } => *src,
      _ => panic!("expected store, got {:?}", insn),
    }
  }

  // Four def/use pairs recycling R4, an anti-dependency at every
  // redefinition.  The second and third pairs must land on distinct fresh
  // registers, and the fourth must reuse the first fresh register, not the
  // second (the most-recent-rename rule).
  #[test]
  fn anti_chain_renames() {
    let opts = SchedOptions::default();
    let (func, sched, universe, before) = sched_func("anti_chain", &opts);
    let r = |i: usize| universe.regs[i].0;

    // Renames are applied in place, in the original program order.
    let dsts: Vec<_> =
      [1u32, 3, 5, 7].iter().map(|&i| imm_dst(&func.insns[InstIx::new(i)])).collect();
    assert_eq!(dsts, vec![r(4), r(0), r(1), r(0)]);
    let srcs: Vec<_> =
      [2u32, 4, 6, 8].iter().map(|&i| store_src(&func.insns[InstIx::new(i)])).collect();
    assert_eq!(srcs, vec![r(4), r(0), r(1), r(0)]);

    // And the reordered stream still stores 1..4.
    let mut func = func;
    func.update_from_sched(sched);
    let after = run_func(&func, "After scheduling", &universe);
    assert_eq!(before, after);
    for k in 0..4 {
      assert_eq!(after.mem[40 + k], Some(Value::U32(k as u32 + 1)));
    }
  }

  #[test]
  fn anti_chain_disabled_leaves_registers_alone() {
    let opts =
      SchedOptions { break_anti_dependencies: false, avoid_hazards: true };
    let (func, _, universe, _) = sched_func("anti_chain", &opts);
    let r4 = universe.regs[4].0;
    for &i in &[1u32, 3, 5, 7] {
      assert_eq!(imm_dst(&func.insns[InstIx::new(i)]), r4);
    }
  }

  // A live wide register overlapping R0/R1 must push the rename to R2.
  #[test]
  fn alias_blocks_rename() {
    let opts = SchedOptions::default();
    let (func, _, universe, _) = sched_func("alias_block", &opts);
    let r2 = universe.regs[2].0;
    assert_eq!(imm_dst(&func.insns[InstIx::new(4)]), r2);
    assert_eq!(store_src(&func.insns[InstIx::new(5)]), r2);
  }

  // Dense loads trip the windowed recognizer into stalling; the trivial
  // recognizer never stalls.
  #[test]
  fn hazard_stalls() {
    let opts =
      SchedOptions { break_anti_dependencies: true, avoid_hazards: true };
    let (_, stalls, _) = check_sched("loads_hazard", &opts);
    assert!(stalls > 0, "expected stalls from the load window");

    let opts =
      SchedOptions { break_anti_dependencies: true, avoid_hazards: false };
    let (_, stalls, _) = check_sched("loads_hazard", &opts);
    assert_eq!(stalls, 0);
  }

  #[test]
  fn deterministic() {
    for name in &["straight_line", "anti_chain", "loads_hazard"] {
      let opts = SchedOptions::default();
      let (mut f1, s1, _, _) = sched_func(name, &opts);
      let (mut f2, s2, _, _) = sched_func(name, &opts);
      assert_eq!(s1.noops_inserted, s2.noops_inserted);
      assert_eq!(s1.stall_cycles, s2.stall_cycles);
      f1.update_from_sched(s1);
      f2.update_from_sched(s2);
      let d1: Vec<String> =
        f1.insns.iter().map(|i| format!("{:?}", i)).collect();
      let d2: Vec<String> =
        f2.insns.iter().map(|i| format!("{:?}", i)).collect();
      assert_eq!(d1, d2);
    }
  }

  // Degenerate control flow: blocks containing only terminators give the
  // scheduler nothing but empty regions.
  #[test]
  fn empty_regions() {
    let _ = pretty_env_logger::try_init();
    let universe = test_framework::make_universe(2, 0);
    let mut func = test_framework::Func::new("empties", "b0");
    func.block("b0", vec![test_framework::i_goto("b1")]);
    func.block("b1", vec![test_framework::i_finish(None)]);
    func.finish();
    let builder = DepGraphBuilder::new(&universe);
    let opts = SchedOptions::default();
    let sched = schedule_function(&mut func, &builder, &universe, &opts)
      .unwrap_or_else(|err| panic!("scheduling failed: {}", err));
    validator::validate(&func, &sched).unwrap();
    assert_eq!(sched.insns.len(), 2);
    assert_eq!(sched.noops_inserted, 0);
    assert_eq!(sched.stall_cycles, 0);
  }

  // A region of exactly one instruction has nothing to reorder and nothing
  // to rename, but must still come through intact.
  #[test]
  fn single_instruction_region() {
    let _ = pretty_env_logger::try_init();
    let universe = test_framework::make_universe(2, 0);
    let r0 = universe.regs[0].0;
    let mut func = test_framework::Func::new("single", "b0");
    func.block(
      "b0",
      vec![test_framework::i_imm(r0, 7), test_framework::i_finish(Some(r0))],
    );
    func.finish();
    let builder = DepGraphBuilder::new(&universe);
    for opts in all_opts() {
      let mut func = func.clone();
      let sched = schedule_function(&mut func, &builder, &universe, &opts)
        .unwrap_or_else(|err| panic!("scheduling failed: {}", err));
      validator::validate(&func, &sched).unwrap();
      func.update_from_sched(sched);
      let after = run_func(&func, "After scheduling", &universe);
      assert_eq!(after.ret_value, Some(Value::U32(7)));
    }
  }

  //===========================================================================
  // Direct graph-level tests of the list scheduler itself.

  fn leaf(graph: &mut SchedGraph, iix: u32, latency: u32, prio: u32) -> UnitIx {
    let u = graph.add_unit(InstIx::new(iix), latency);
    graph.unit_mut(u).priority = prio;
    u
  }

  // Three independent units are emitted in priority order, one cycle
  // apart, with no stalls or noops.
  #[test]
  fn independent_units_in_priority_order() {
    let mut graph = SchedGraph::new();
    let a = leaf(&mut graph, 0, 1, 3);
    let b = leaf(&mut graph, 1, 1, 2);
    let c = leaf(&mut graph, 2, 1, 1);
    graph.finish();

    let mut hazard = TrivialHazardRecognizer;
    let sched = list_schedule(&mut graph, &mut hazard).unwrap();
    assert_eq!(
      sched.sequence,
      vec![Emitted::Unit(a), Emitted::Unit(b), Emitted::Unit(c)]
    );
    assert_eq!(graph.unit(a).sched_cycle, 0);
    assert_eq!(graph.unit(b).sched_cycle, 1);
    assert_eq!(graph.unit(c).sched_cycle, 2);
    assert_eq!(sched.stall_cycles, 0);
    assert_eq!(sched.noops_inserted, 0);
  }

  // Latency gates readiness: a dependent unit cannot issue until its
  // input's latency has elapsed, even with nothing else to do.
  #[test]
  fn latency_delays_successors() {
    let mut graph = SchedGraph::new();
    let a = leaf(&mut graph, 0, 3, 1);
    let b = leaf(&mut graph, 1, 1, 1);
    graph.add_edge(a, b, DepKind::Data, 3, None);
    graph.finish();

    let mut hazard = TrivialHazardRecognizer;
    let sched = list_schedule(&mut graph, &mut hazard).unwrap();
    assert_eq!(sched.sequence, vec![Emitted::Unit(a), Emitted::Unit(b)]);
    assert_eq!(graph.unit(a).sched_cycle, 0);
    assert_eq!(graph.unit(b).sched_cycle, 3);
    // The gap is bridged by moving the cycle counter, not by stall
    // cycles: nothing was available, so the hazard recognizer was never
    // consulted.
    assert_eq!(sched.stall_cycles, 0);
  }

  // A graph whose pred counts are inconsistent with its edges must be
  // reported, not scheduled.
  #[test]
  fn over_release_is_an_error() {
    let mut graph = SchedGraph::new();
    let a = leaf(&mut graph, 0, 1, 2);
    let b = leaf(&mut graph, 1, 1, 1);
    graph.add_edge(a, b, DepKind::Data, 1, None);
    graph.finish();
    // Corrupt the graph: b claims to have no outstanding predecessors.
    graph.unit_mut(b).num_preds_left = 0;

    let mut hazard = TrivialHazardRecognizer;
    match list_schedule(&mut graph, &mut hazard) {
      Err(SchedError::UnitOverReleased { unit }) => assert_eq!(unit, b),
      Ok(_) => panic!("corrupt graph was scheduled"),
    }
  }

  // A recognizer that demands a dead cycle after every emission, via
  // NoopHazard: the scheduler must put explicit noops in the sequence.
  struct EveryOtherCycle {
    hot: bool,
  }
  impl HazardRecognizer for EveryOtherCycle {
    fn hazard_type(&mut self, _unit: &SchedUnit) -> HazardType {
      if self.hot {
        HazardType::NoopHazard
      } else {
        HazardType::NoHazard
      }
    }
    fn emit_instruction(&mut self, _unit: &SchedUnit) {
      self.hot = true;
    }
    fn advance_cycle(&mut self) {
      self.hot = false;
    }
    fn emit_noop(&mut self) {
      self.hot = false;
    }
  }

  #[test]
  fn noop_hazards_emit_noops() {
    let mut graph = SchedGraph::new();
    let a = leaf(&mut graph, 0, 1, 3);
    let b = leaf(&mut graph, 1, 1, 2);
    let c = leaf(&mut graph, 2, 1, 1);
    graph.finish();

    let mut hazard = EveryOtherCycle { hot: false };
    let sched = list_schedule(&mut graph, &mut hazard).unwrap();
    assert_eq!(
      sched.sequence,
      vec![
        Emitted::Unit(a),
        Emitted::Noop,
        Emitted::Unit(b),
        Emitted::Noop,
        Emitted::Unit(c),
      ]
    );
    assert_eq!(sched.noops_inserted, 2);
    assert_eq!(sched.stall_cycles, 0);
  }

  // Zero-latency pseudo-ops don't consume an issue cycle.
  #[test]
  fn pseudo_ops_are_free() {
    let mut graph = SchedGraph::new();
    let a = leaf(&mut graph, 0, 0, 2);
    let b = leaf(&mut graph, 1, 1, 1);
    graph.finish();

    let mut hazard = TrivialHazardRecognizer;
    let sched = list_schedule(&mut graph, &mut hazard).unwrap();
    assert_eq!(sched.sequence, vec![Emitted::Unit(a), Emitted::Unit(b)]);
    assert_eq!(graph.unit(a).sched_cycle, 0);
    assert_eq!(graph.unit(b).sched_cycle, 0);
  }
}
