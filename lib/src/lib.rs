/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for postsched library.

mod anti_dep;
mod data_structures;
mod hazard;
mod interface;
mod list_sched;
mod liveness;
mod post_ra;
mod sched_graph;

pub use crate::interface::*;
pub use crate::list_sched::{list_schedule, Emitted, RegionSched};
