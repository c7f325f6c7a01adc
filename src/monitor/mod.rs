// SPDX-License-Identifier: GPL-3.0-only
mod backend;
mod enumeration;

pub use backend::{Candidate, Device};
pub use enumeration::{BaselinePolicy, ProbeMode, discover_external, discover_panel, probe_candidate};
