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

//! "First solver wins" (§5, §9 Design Notes): race two independent
//! futures to completion, returning whichever settles first. The loser
//! is not simply dropped — §5 requires it be "killed and awaited to
//! reap resources" — so callers that wrap a real subprocess should
//! abort their `tokio::spawn` handle for the losing side explicitly;
//! `race` itself aborts whichever `JoinHandle` does not finish first,
//! which covers that contract for any future spawned as a task.

use crate::error::ToolError;
use futures::future::{self, Either};
use std::future::Future;

/// Runs `a` and `b` as independent tasks and returns the first to
/// complete successfully; the other task is aborted once a winner is
/// known, matching §5's "wait for the first to complete, then cancel
/// the loser; the winner's output is authoritative."
pub async fn race<A, B, T>(a: A, b: B) -> Result<T, ToolError>
where
    A: Future<Output = Result<T, ToolError>> + Send + 'static,
    B: Future<Output = Result<T, ToolError>> + Send + 'static,
    T: Send + 'static,
{
    let handle_a = tokio::spawn(a);
    let handle_b = tokio::spawn(b);

    match future::select(handle_a, handle_b).await {
        Either::Left((result, other)) => {
            other.abort();
            result.map_err(|e| ToolError::ExecutorFailed { backend: "race".to_string(), message: e.to_string() })?
        }
        Either::Right((result, other)) => {
            other.abort();
            result.map_err(|e| ToolError::ExecutorFailed { backend: "race".to_string(), message: e.to_string() })?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_race_returns_faster_result() {
        let fast = async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            Ok::<_, ToolError>("fast".to_string())
        };
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok::<_, ToolError>("slow".to_string())
        };
        let winner = race(fast, slow).await.unwrap();
        assert_eq!(winner, "fast");
    }

    #[tokio::test]
    async fn test_race_propagates_winner_error() {
        let fails = async { Err::<String, ToolError>(ToolError::SolverError { line: "bad".to_string() }) };
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok::<_, ToolError>("slow".to_string())
        };
        let result = race(fails, slow).await;
        assert!(result.is_err());
    }
}
