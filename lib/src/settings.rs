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

//! The invocation environment handed to a compile task.
//!
//! Everything the driver would otherwise read from ambient process state
//! (OS name, Java installation, build output root) is collected here
//! explicitly so that tasks are testable in isolation.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::command::WINDOWS_CMD_LENGTH_LIMIT;

/// Error computing a value from [`InvocationSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The Java installation has no launcher binary.
    #[error("Could not find java executable at {path}")]
    JavaNotFound {
        /// The launcher path that was probed.
        path: PathBuf,
    },
}

/// The family of operating system a task runs on, as far as command-line
/// assembly is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// Windows and friends: batch trampolines, bounded command lines.
    Windows,
    /// Everything else: POSIX shell trampolines, unbounded command lines.
    Unix,
}

impl OsFamily {
    /// Detects the family of the current process's platform.
    pub fn detect() -> Self {
        if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Unix
        }
    }

    /// Classifies an OS name string (e.g. the JVM's `os.name` property or
    /// `uname -s` output). Any name containing "win" counts as Windows.
    pub fn from_os_name(os_name: &str) -> Self {
        if os_name.to_lowercase().contains("win") {
            OsFamily::Windows
        } else {
            OsFamily::Unix
        }
    }

    /// Whether this is the Windows family.
    pub fn is_windows(self) -> bool {
        self == OsFamily::Windows
    }
}

/// Explicit environment for one compile task: platform, Java runtime, and
/// the build output root that scripts and generated files live under.
#[derive(Debug, Clone)]
pub struct InvocationSettings {
    os_family: OsFamily,
    java_home: PathBuf,
    build_root: PathBuf,
    cmd_length_limit: Option<usize>,
}

impl InvocationSettings {
    /// Creates settings for the given platform family.
    pub fn new(
        os_family: OsFamily,
        java_home: impl Into<PathBuf>,
        build_root: impl Into<PathBuf>,
    ) -> Self {
        InvocationSettings {
            os_family,
            java_home: java_home.into(),
            build_root: build_root.into(),
            cmd_length_limit: None,
        }
    }

    /// Overrides the platform-derived command-line length limit. Mostly
    /// useful to force partitioning in tests.
    pub fn with_cmd_length_limit(mut self, limit: usize) -> Self {
        self.cmd_length_limit = Some(limit);
        self
    }

    /// The platform family these settings describe.
    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    /// The root directory for build outputs. Trampoline scripts are
    /// written under it.
    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// The directory trampoline scripts are generated into.
    pub fn scripts_dir(&self) -> PathBuf {
        self.build_root.join("scripts")
    }

    /// The maximum quoted length of one assembled command line.
    ///
    /// Windows' `CreateProcess` caps command lines at 32768 characters;
    /// other platforms are effectively unbounded.
    pub fn cmd_length_limit(&self) -> usize {
        match self.cmd_length_limit {
            Some(limit) => limit,
            None if self.os_family.is_windows() => WINDOWS_CMD_LENGTH_LIMIT,
            None => usize::MAX,
        }
    }

    /// The path of the Java launcher inside `java_home`, failing if no
    /// such binary exists. Needed to run `.jar` codegen plugins.
    pub fn java_exe_path(&self) -> Result<PathBuf, SettingsError> {
        let java = self.java_home.join(if self.os_family.is_windows() {
            "bin/java.exe"
        } else {
            "bin/java"
        });
        if !java.exists() {
            return Err(SettingsError::JavaNotFound { path: java });
        }
        Ok(java)
    }
}
