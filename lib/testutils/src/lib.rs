// Copyright 2024 The Pbgen Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use pbgen_lib::settings::{InvocationSettings, OsFamily};
use tempfile::TempDir;

/// A throwaway build environment: a fake JDK, a build root, and a proto
/// source directory, all inside one temporary directory.
pub struct TestEnv {
    temp_dir: TempDir,
    pub java_home: PathBuf,
    pub build_root: PathBuf,
    pub proto_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let java_home = temp_dir.path().join("jdk");
        fs::create_dir_all(java_home.join("bin")).unwrap();
        fs::write(java_home.join("bin/java"), "").unwrap();
        fs::write(java_home.join("bin/java.exe"), "").unwrap();
        let build_root = temp_dir.path().join("build");
        fs::create_dir_all(&build_root).unwrap();
        let proto_dir = temp_dir.path().join("src/main/proto");
        fs::create_dir_all(&proto_dir).unwrap();
        TestEnv {
            temp_dir,
            java_home,
            build_root,
            proto_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn settings(&self, os_family: OsFamily) -> InvocationSettings {
        InvocationSettings::new(os_family, &self.java_home, &self.build_root)
    }

    /// Writes a proto source file under the proto source directory and
    /// returns its path.
    pub fn write_proto(&self, name: &str) -> PathBuf {
        let path = self.proto_dir.join(name);
        fs::write(&path, format!("syntax = \"proto3\"; // {name}\n")).unwrap();
        path
    }

    /// Writes an executable shell script under the environment root and
    /// returns its path.
    pub fn write_tool(&self, name: &str, body: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        set_executable(&path);
        path
    }

    /// Writes a fake `protoc` that appends each invocation's arguments
    /// (one per line, invocations separated by a `---` line) to `log`,
    /// then exits with `exit_code`.
    pub fn write_fake_protoc(&self, log: &Path, exit_code: i32) -> PathBuf {
        self.write_tool(
            "protoc",
            &format!(
                "printf '%s\\n' \"$@\" >> '{}'\necho '---' >> '{}'\nexit {}",
                log.display(),
                log.display(),
                exit_code
            ),
        )
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        TestEnv::new()
    }
}

fn set_executable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Parses a fake-protoc log back into one argument vector per
/// invocation.
pub fn read_invocations(log: &Path) -> Vec<Vec<String>> {
    let text = fs::read_to_string(log).unwrap_or_default();
    let mut invocations = vec![];
    let mut current = vec![];
    for line in text.lines() {
        if line == "---" {
            invocations.push(std::mem::take(&mut current));
        } else {
            current.push(line.to_owned());
        }
    }
    invocations
}

pub fn assert_no_forgotten_test_files(test_dir: &Path) {
    let runner_path = test_dir.join("runner.rs");
    let runner = fs::read_to_string(&runner_path).unwrap();
    let entries = fs::read_dir(test_dir).unwrap();
    for entry in entries {
        let path = entry.unwrap().path();
        if let Some(ext) = path.extension() {
            let name = path.file_stem().unwrap();
            if ext == "rs" && name != "runner" {
                let search = format!("mod {};", name.to_str().unwrap());
                assert!(
                    runner.contains(&search),
                    "missing `{search}` declaration in {}",
                    runner_path.display()
                );
            }
        }
    }
}
