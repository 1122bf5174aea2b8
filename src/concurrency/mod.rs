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

//! Concurrency (§5): the pipeline is single-threaded and sequential
//! apart from one place — the symbolic-executor invocation, which may
//! race two backend solver processes ("stp" and "z3") and cancel
//! whichever loses. `race` is the only submodule; CheckDP has no actor
//! system, no channel registry, and no shared-memory concurrency beyond
//! this one deterministic two-way race.

pub mod race;
