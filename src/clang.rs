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

//! Thin wrapper around the `clang` external collaborator (§1 "the C
//! parser/pretty-printer... are external collaborators whose interfaces
//! only are specified", §6 "CLI surface"). Four operations, mirroring
//! the reference's `clang.py`: a syntax check, a plain preprocess, a
//! bytecode compile (feeding the symbolic executor) and a native binary
//! compile (feeding the concrete re-execution phase, §4.6
//! "Counterexample phase").
//!
//! Detection of failure is intentionally crude, matching the reference:
//! any `"error"`/`"ERROR"` substring in the combined stdout/stderr of an
//! otherwise-zero-exit-code invocation is treated as a rejection, since
//! clang's own exit code is not always reliable for the KLEE-targeting
//! bitcode flags this pipeline uses.

use crate::error::ToolError;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub struct Clang {
    pub binary: PathBuf,
}

impl Clang {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn run(&self, args: &[&str], file: &Path) -> Result<String, ToolError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| ToolError::CompilerRejected { file: file.display().to_string(), message: e.to_string() })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = format!("{}{}", stdout, stderr);

        if !output.status.success() || combined.contains("error") || combined.contains("ERROR") {
            return Err(ToolError::CompilerRejected { file: file.display().to_string(), message: combined });
        }
        Ok(stdout)
    }

    /// `clang -fsyntax-only`: validates the rendered driver compiles as
    /// C before it is ever handed to the bitcode pipeline.
    pub async fn syntax_check(&self, file: &Path) -> Result<(), ToolError> {
        self.run(&["-fsyntax-only", path_str(file)], file).await.map(|_| ())
    }

    /// `clang -E`: plain preprocessing, used to resolve driver macros
    /// before persisting `preprocessed.c` (§6 "Persisted layout").
    pub async fn preprocess(&self, file: &Path) -> Result<String, ToolError> {
        self.run(&["-E", path_str(file)], file).await
    }

    /// Compiles to LLVM bitcode for the symbolic executor (`-c -emit-llvm`).
    pub async fn compile_bytecode(&self, file: &Path, out: &Path) -> Result<PathBuf, ToolError> {
        self.run(&["-c", "-emit-llvm", "-g", "-O0", "-o", path_str(out), path_str(file)], file).await?;
        Ok(out.to_path_buf())
    }

    /// Compiles a native binary for the concrete counterexample
    /// re-execution (§4.6 "Counterexample phase").
    pub async fn compile_binary(&self, file: &Path, out: &Path) -> Result<PathBuf, ToolError> {
        self.run(&["-O0", "-o", path_str(out), path_str(file)], file).await?;
        Ok(out.to_path_buf())
    }
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clang_wrapper_stores_binary_path() {
        let clang = Clang::new(PathBuf::from("/usr/bin/clang"));
        assert_eq!(clang.binary, PathBuf::from("/usr/bin/clang"));
    }
}
