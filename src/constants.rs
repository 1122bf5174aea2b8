// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reserved identifier prefixes and names used by internally generated
//! code. No user identifier may begin with `PREFIX`; the preprocessor
//! rejects such collisions (`ConfigError::ReservedNameCollision`).

pub const PREFIX: &str = "checkdp_";

pub const LAP: &str = "Lap";
pub const OUTPUT: &str = "OUTPUT";
pub const ASSERT: &str = "ASSERT";
pub const ASSUME: &str = "ASSUME";
pub const ASSUME_HOLE: &str = "ASSUME_HOLE";

pub const ALIGNED_DISTANCE_PREFIX: &str = "aligned_";
pub const SHADOW_DISTANCE_PREFIX: &str = "shadow_";

pub fn aligned_distance_name(var: &str) -> String {
    format!("{}{}", ALIGNED_DISTANCE_PREFIX, var)
}

pub fn shadow_distance_name(var: &str) -> String {
    format!("{}{}", SHADOW_DISTANCE_PREFIX, var)
}

pub const V_EPSILON: &str = "v_epsilon";
pub const SAMPLE_INDEX: &str = "sample_index";
pub const SAMPLE_ARRAY: &str = "sample_array";
pub const ALIGNMENT_ARRAY: &str = "alignment_array";
pub const SYMBOLIC_COST: &str = "symbolic_cost";
pub const SELECTOR_PREFIX: &str = "selector_";
pub const SELECT_ALIGNED: &str = "0";
pub const SELECT_SHADOW: &str = "1";
pub const RANDOM_DISTANCE_PREFIX: &str = "RANDOM_DISTANCE_";
pub const SELECTOR_MACRO_PREFIX: &str = "SELECTOR_";
pub const HOLE: &str = "HOLE";

/// Private per-run index variable used by the `ONE_DIFFER` precondition
/// class to select which array index the two inputs differ at.
pub const ONE_DIFFER_INDEX: &str = "checkdp_one_differ_index";

pub fn selector_name(var: &str) -> String {
    format!("{}{}", SELECTOR_PREFIX, var)
}

/// Placeholder identifier standing in for the alignment template not yet
/// generated at transform time, analogous to the original's
/// `#define CHECKDP_RANDOM_DISTANCE_eta (template)` (base.py:249). Spliced
/// out for the real `alignment_array`-indexed expression once
/// `alignment::generate_templates` has run over the transformed body.
pub fn random_distance_macro_name(var: &str) -> String {
    format!("{}{}", RANDOM_DISTANCE_PREFIX, var)
}

/// Placeholder for the per-`eta` selector template, analogous to the
/// original's `#define CHECKDP_SELECTOR_eta (template)`
/// (original_source `transform/random_distance.py:202`).
pub fn selector_macro_name(var: &str) -> String {
    format!("{}{}", SELECTOR_MACRO_PREFIX, var)
}

/// Strips `random_distance_macro_name`'s prefix back off, used by the
/// splice pass to recover the sample name a placeholder identifier names.
pub fn strip_random_distance_macro(ident: &str) -> Option<&str> {
    ident.strip_prefix(RANDOM_DISTANCE_PREFIX)
}

/// Strips `selector_macro_name`'s prefix back off.
pub fn strip_selector_macro(ident: &str) -> Option<&str> {
    ident.strip_prefix(SELECTOR_MACRO_PREFIX)
}
