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

//! Resolution of executable locators into runnable paths.
//!
//! protoc only supports plugins that are a single self-contained
//! executable file. For `.jar` plugins we generate a small trampoline
//! script that execs the Java runtime against the jar, assuming the jar
//! is a fat jar needing no further artifact resolution.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::command::{escape_path_unix, escape_path_windows};
use crate::file_util::{create_parent_dirs, set_executable, IoResultExt as _, PathError};
use crate::locator::{ArtifactCoordinate, CoordinateParseError, ExecutableLocator, ToolRegistry};
use crate::settings::{InvocationSettings, SettingsError};

const JAR_SUFFIX: &str = ".jar";

/// Error turning an [`ExecutableLocator`] into a runnable path.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The locator names an artifact, but the host registered no resolved
    /// file for it.
    #[error("No resolved artifact file registered for executable '{name}'")]
    NoResolvedArtifact {
        /// The locator's name.
        name: String,
    },
    /// The locator's artifact coordinate does not parse.
    #[error(transparent)]
    Coordinate(#[from] CoordinateParseError),
    /// A resolved binary could not be marked executable.
    #[error("Cannot set {path} as executable")]
    SetExecutable {
        /// The file that could not be marked.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: PathError,
    },
    /// A jar path with no file name beyond the `.jar` suffix.
    #[error(".jar protoc plugin path '{path}' has no file name")]
    JarWithoutName {
        /// The offending jar path.
        path: PathBuf,
    },
    /// Trampoline generation was asked for a non-jar path.
    #[error("Expected a .jar path but got '{path}'")]
    NotAJar {
        /// The offending path.
        path: PathBuf,
    },
    /// Writing or marking the trampoline script failed.
    #[error("Unable to generate trampoline for .jar protoc plugin")]
    Trampoline {
        /// The underlying I/O failure.
        #[source]
        source: PathError,
    },
    /// The Java runtime needed to run a jar plugin is missing.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Resolves a locator to a directly executable path.
///
/// A local path is returned verbatim unless it points at a jar, in which
/// case a trampoline script is generated. An artifact locator is looked
/// up in the registry's resolved files; resolved binaries get their
/// executable bit ensured, resolved jars get a trampoline. `task_name`
/// disambiguates trampoline script names between tasks sharing one build
/// root.
pub fn compute_executable_path(
    locator: &ExecutableLocator,
    registry: &ToolRegistry,
    settings: &InvocationSettings,
    task_name: &str,
) -> Result<PathBuf, ResolveError> {
    if let Some(path) = locator.path() {
        if path.ends_with(JAR_SUFFIX) {
            return create_jar_trampoline_script(Path::new(path), settings, task_name);
        }
        return Ok(PathBuf::from(path));
    }
    if let Some(spec) = locator.artifact() {
        // The coordinate was accepted unvalidated at configuration time;
        // validate it now that it matters.
        ArtifactCoordinate::parse(spec)?;
    }
    let file = registry
        .resolved_file(locator.name())
        .ok_or_else(|| ResolveError::NoResolvedArtifact {
            name: locator.name().to_owned(),
        })?;
    if file
        .file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(JAR_SUFFIX))
    {
        return create_jar_trampoline_script(file, settings, task_name);
    }
    set_executable(file).map_err(|source| ResolveError::SetExecutable {
        path: file.to_owned(),
        source,
    })?;
    tracing::info!(file = %file.display(), "Resolved artifact");
    Ok(file.to_owned())
}

/// Writes an OS-appropriate launcher script that execs the Java runtime
/// against `jar_path`, and returns the script's path.
fn create_jar_trampoline_script(
    jar_path: &Path,
    settings: &InvocationSettings,
    task_name: &str,
) -> Result<PathBuf, ResolveError> {
    let jar_file_name = jar_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !jar_file_name.ends_with(JAR_SUFFIX) {
        return Err(ResolveError::NotAJar {
            path: jar_path.to_owned(),
        });
    }
    if jar_file_name.len() <= JAR_SUFFIX.len() {
        return Err(ResolveError::JarWithoutName {
            path: jar_path.to_owned(),
        });
    }
    let is_windows = settings.os_family().is_windows();
    let stem = &jar_file_name[..jar_file_name.len() - JAR_SUFFIX.len()];
    let extension = if is_windows { "bat" } else { "sh" };
    let script_path = settings
        .scripts_dir()
        .join(format!("{stem}-{task_name}-trampoline.{extension}"));
    create_parent_dirs(&script_path).map_err(|source| ResolveError::Trampoline { source })?;
    let java_exe = settings.java_exe_path()?;
    let java_exe = java_exe.to_string_lossy();
    let jar = jar_path.to_string_lossy();
    // Rewrite the trampoline unconditionally (even if it already exists):
    // the jar it points at may have changed, and the content is cheap to
    // regenerate.
    let trampoline = if is_windows {
        format!(
            "@ECHO OFF\r\n\"{}\" -jar \"{}\" %*\r\n",
            escape_path_windows(&java_exe),
            escape_path_windows(&jar)
        )
    } else {
        format!(
            "#!/bin/sh\nexec '{}' -jar '{}' \"$@\"\n",
            escape_path_unix(&java_exe),
            escape_path_unix(&jar)
        )
    };
    let result = fs::write(&script_path, &trampoline)
        .context(&script_path)
        .and_then(|()| set_executable(&script_path));
    if let Err(source) = result {
        // Don't leave a broken script behind.
        fs::remove_file(&script_path).ok();
        return Err(ResolveError::Trampoline { source });
    }
    tracing::info!(
        jar = %jar_path.display(),
        script = %script_path.display(),
        "Resolved artifact jar, created trampoline file",
    );
    Ok(script_path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;

    use super::*;
    use crate::settings::OsFamily;

    struct Fixture {
        _temp_dir: tempfile::TempDir,
        settings: InvocationSettings,
        build_root: PathBuf,
    }

    fn fixture(os_family: OsFamily) -> Fixture {
        let temp_dir = tempfile::tempdir().unwrap();
        let java_home = temp_dir.path().join("jdk");
        fs::create_dir_all(java_home.join("bin")).unwrap();
        fs::write(java_home.join("bin/java"), "").unwrap();
        fs::write(java_home.join("bin/java.exe"), "").unwrap();
        let build_root = temp_dir.path().join("build");
        let settings = InvocationSettings::new(os_family, &java_home, &build_root);
        Fixture {
            _temp_dir: temp_dir,
            settings,
            build_root,
        }
    }

    #[test]
    fn test_non_jar_path_returned_verbatim() {
        let fixture = fixture(OsFamily::Unix);
        let mut locator = ExecutableLocator::new("protoc");
        locator.set_path("/usr/bin/protoc");
        let registry = ToolRegistry::new();
        let resolved =
            compute_executable_path(&locator, &registry, &fixture.settings, "generateProto")
                .unwrap();
        assert_eq!(resolved, PathBuf::from("/usr/bin/protoc"));
        // No scripts directory gets created for a plain path.
        assert!(!fixture.build_root.join("scripts").exists());
    }

    #[test]
    fn test_jar_path_generates_sh_trampoline() {
        let fixture = fixture(OsFamily::Unix);
        let mut locator = ExecutableLocator::new("grpc");
        locator.set_path("/cache/protoc-gen-grpc-java-1.58.0.jar");
        let registry = ToolRegistry::new();
        let script =
            compute_executable_path(&locator, &registry, &fixture.settings, "generateProto")
                .unwrap();
        assert_eq!(
            script,
            fixture
                .build_root
                .join("scripts/protoc-gen-grpc-java-1.58.0-generateProto-trampoline.sh")
        );
        let java = fixture.settings.java_exe_path().unwrap();
        let expected = format!(
            "#!/bin/sh\nexec '{}' -jar '/cache/protoc-gen-grpc-java-1.58.0.jar' \"$@\"\n",
            java.display()
        );
        assert_eq!(fs::read_to_string(&script).unwrap(), expected);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&script).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_jar_path_generates_bat_trampoline_for_windows_family() {
        let fixture = fixture(OsFamily::Windows);
        let mut locator = ExecutableLocator::new("grpc");
        locator.set_path("/cache/gen-100%.jar");
        let registry = ToolRegistry::new();
        let script =
            compute_executable_path(&locator, &registry, &fixture.settings, "generateProto")
                .unwrap();
        assert_eq!(
            script,
            fixture
                .build_root
                .join("scripts/gen-100%-generateProto-trampoline.bat")
        );
        let java = fixture.settings.java_exe_path().unwrap();
        let expected = format!(
            "@ECHO OFF\r\n\"{}\" -jar \"/cache/gen-100%%.jar\" %*\r\n",
            java.display()
        );
        assert_eq!(fs::read_to_string(&script).unwrap(), expected);
    }

    #[test]
    fn test_trampoline_is_rewritten_unconditionally() {
        let fixture = fixture(OsFamily::Unix);
        let mut locator = ExecutableLocator::new("grpc");
        locator.set_path("/cache/plugin.jar");
        let registry = ToolRegistry::new();
        let script =
            compute_executable_path(&locator, &registry, &fixture.settings, "task").unwrap();
        fs::write(&script, "stale").unwrap();
        let script_again =
            compute_executable_path(&locator, &registry, &fixture.settings, "task").unwrap();
        assert_eq!(script, script_again);
        assert_ne!(fs::read_to_string(&script).unwrap(), "stale");
    }

    #[test]
    fn test_jar_without_name_fails() {
        let fixture = fixture(OsFamily::Unix);
        let mut locator = ExecutableLocator::new("grpc");
        locator.set_path("/cache/.jar");
        let registry = ToolRegistry::new();
        assert_matches!(
            compute_executable_path(&locator, &registry, &fixture.settings, "task"),
            Err(ResolveError::JarWithoutName { .. })
        );
    }

    #[test]
    fn test_artifact_locator_requires_resolved_file() {
        let fixture = fixture(OsFamily::Unix);
        let mut locator = ExecutableLocator::new("protoc");
        locator.set_artifact("com.google.protobuf:protoc:3.25.1");
        let registry = ToolRegistry::new();
        assert_matches!(
            compute_executable_path(&locator, &registry, &fixture.settings, "task"),
            Err(ResolveError::NoResolvedArtifact { .. })
        );
    }

    #[test]
    fn test_malformed_artifact_spec_fails_at_resolution() {
        let fixture = fixture(OsFamily::Unix);
        let mut locator = ExecutableLocator::new("protoc");
        locator.set_artifact("not-a-coordinate");
        let mut registry = ToolRegistry::new();
        registry.set_resolved_file("protoc", "/cache/protoc");
        assert_matches!(
            compute_executable_path(&locator, &registry, &fixture.settings, "task"),
            Err(ResolveError::Coordinate(_))
        );
    }

    #[test]
    fn test_resolved_binary_gets_executable_bit() {
        let fixture = fixture(OsFamily::Unix);
        let binary = fixture.build_root.join("protoc-3.25.1-linux-x86_64.exe");
        fs::create_dir_all(&fixture.build_root).unwrap();
        fs::write(&binary, "binary").unwrap();
        let mut locator = ExecutableLocator::new("protoc");
        locator.set_artifact("com.google.protobuf:protoc:3.25.1");
        let mut registry = ToolRegistry::new();
        registry.set_resolved_file("protoc", &binary);
        let resolved =
            compute_executable_path(&locator, &registry, &fixture.settings, "task").unwrap();
        assert_eq!(resolved, binary);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&binary).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_resolved_jar_gets_trampoline() {
        let fixture = fixture(OsFamily::Unix);
        let jar = fixture.build_root.join("protoc-gen-plugin-0.1.jar");
        fs::create_dir_all(&fixture.build_root).unwrap();
        fs::write(&jar, "jar").unwrap();
        let mut locator = ExecutableLocator::new("plugin");
        locator.set_artifact("g:protoc-gen-plugin:0.1");
        let mut registry = ToolRegistry::new();
        registry.set_resolved_file("plugin", &jar);
        let resolved =
            compute_executable_path(&locator, &registry, &fixture.settings, "task").unwrap();
        assert_eq!(
            resolved,
            fixture
                .build_root
                .join("scripts/protoc-gen-plugin-0.1-task-trampoline.sh")
        );
    }

    #[test]
    fn test_missing_java_fails_trampoline() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = InvocationSettings::new(
            OsFamily::Unix,
            temp_dir.path().join("no-jdk"),
            temp_dir.path().join("build"),
        );
        let mut locator = ExecutableLocator::new("grpc");
        locator.set_path("/cache/plugin.jar");
        let registry = ToolRegistry::new();
        assert_matches!(
            compute_executable_path(&locator, &registry, &settings, "task"),
            Err(ResolveError::Settings(SettingsError::JavaNotFound { .. }))
        );
    }
}
