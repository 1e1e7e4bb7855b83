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

//! Named references to the `protoc` executable and codegen plugin
//! executables.
//!
//! A locator points at either a local path or a downloadable artifact
//! coordinate, never both. Artifact download itself is the host's job;
//! the resolved local file is registered back into the [`ToolRegistry`]
//! before a task runs.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;

/// Error parsing an artifact coordinate string.
#[derive(Debug, Error)]
#[error("Invalid artifact spec '{spec}', expected 'group:artifact:version[:classifier][@extension]'")]
pub struct CoordinateParseError {
    /// The offending coordinate string.
    pub spec: String,
}

/// Where an executable comes from: a local path, or an artifact to be
/// resolved by the host's dependency machinery.
///
/// Making this an enum keeps "path and artifact are mutually exclusive" a
/// structural fact rather than a setter side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutableSource {
    /// A local filesystem path (or bare program name on the system PATH).
    Path(String),
    /// An artifact coordinate: `group:artifact:version[:classifier][@extension]`.
    Artifact(String),
}

/// A named reference to one executable: the `protoc` compiler itself or a
/// codegen plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableLocator {
    name: String,
    source: Option<ExecutableSource>,
}

impl ExecutableLocator {
    /// Creates a locator with neither a path nor an artifact set. Such a
    /// locator falls back to the system PATH naming convention at
    /// resolution time.
    pub fn new(name: impl Into<String>) -> Self {
        ExecutableLocator {
            name: name.into(),
            source: None,
        }
    }

    /// The executable's name (`"protoc"`, or a plugin name like `"grpc"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points the locator at an artifact coordinate, replacing any
    /// previously set path. The coordinate is not validated here; a
    /// malformed spec surfaces when it is resolved.
    pub fn set_artifact(&mut self, artifact: impl Into<String>) {
        self.source = Some(ExecutableSource::Artifact(artifact.into()));
    }

    /// Points the locator at a local path, replacing any previously set
    /// artifact coordinate.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.source = Some(ExecutableSource::Path(path.into()));
    }

    /// The artifact coordinate, if this locator points at one.
    pub fn artifact(&self) -> Option<&str> {
        match &self.source {
            Some(ExecutableSource::Artifact(spec)) => Some(spec),
            _ => None,
        }
    }

    /// The local path, if this locator points at one.
    pub fn path(&self) -> Option<&str> {
        match &self.source {
            Some(ExecutableSource::Path(path)) => Some(path),
            _ => None,
        }
    }

    /// The underlying source, if any.
    pub fn source(&self) -> Option<&ExecutableSource> {
        self.source.as_ref()
    }
}

/// A parsed artifact coordinate.
///
/// Spec format: `group:artifact:version[:classifier][@extension]`. A
/// coordinate ending in a bare `@` carries an empty (but present)
/// extension, which hosts typically treat differently from an absent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCoordinate {
    /// Group id.
    pub group: String,
    /// Artifact id.
    pub artifact: String,
    /// Version.
    pub version: String,
    /// Optional classifier (e.g. an OS/arch qualifier).
    pub classifier: Option<String>,
    /// Optional packaging extension (e.g. `exe` or `jar`).
    pub extension: Option<String>,
}

impl ArtifactCoordinate {
    /// Parses a coordinate string.
    pub fn parse(spec: &str) -> Result<Self, CoordinateParseError> {
        let err = || CoordinateParseError {
            spec: spec.to_owned(),
        };
        let (coord, extension) = match spec.split_once('@') {
            Some((coord, ext)) => (coord, Some(ext.to_owned())),
            None => (spec, None),
        };
        let mut parts = coord.split(':');
        let group = parts.next().filter(|s| !s.is_empty()).ok_or_else(err)?;
        let artifact = parts.next().filter(|s| !s.is_empty()).ok_or_else(err)?;
        let version = parts.next().filter(|s| !s.is_empty()).ok_or_else(err)?;
        let classifier = parts.next().map(|s| s.to_owned());
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(ArtifactCoordinate {
            group: group.to_owned(),
            artifact: artifact.to_owned(),
            version: version.to_owned(),
            classifier,
            extension,
        })
    }
}

/// The set of executables one compilation may need: the `protoc` locator,
/// named plugin locators, and the local files the host resolved artifact
/// coordinates to.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    protoc: Option<ExecutableLocator>,
    plugins: IndexMap<String, ExecutableLocator>,
    resolved_files: IndexMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    /// The locator for the `protoc` compiler, if one was registered.
    pub fn protoc(&self) -> Option<&ExecutableLocator> {
        self.protoc.as_ref()
    }

    /// Registers (or replaces) the locator for the `protoc` compiler.
    pub fn set_protoc(&mut self, locator: ExecutableLocator) {
        self.protoc = Some(locator);
    }

    /// The locator registered for the named plugin, if any.
    pub fn plugin(&self, name: &str) -> Option<&ExecutableLocator> {
        self.plugins.get(name)
    }

    /// Registers a plugin locator under its own name, replacing any
    /// previous locator of the same name.
    pub fn add_plugin(&mut self, locator: ExecutableLocator) {
        self.plugins.insert(locator.name().to_owned(), locator);
    }

    /// Plugin locators in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &ExecutableLocator> {
        self.plugins.values()
    }

    /// Records the local file the host resolved the named locator's
    /// artifact coordinate to.
    pub fn set_resolved_file(&mut self, name: impl Into<String>, file: impl Into<PathBuf>) {
        self.resolved_files.insert(name.into(), file.into());
    }

    /// The resolved local file for the named locator, if the host
    /// registered one.
    pub fn resolved_file(&self, name: &str) -> Option<&Path> {
        self.resolved_files.get(name).map(PathBuf::as_path)
    }

    /// Gives every locator without a source the conventional system-PATH
    /// program name: `protoc` for the compiler, `protoc-gen-<name>` for
    /// plugins. Locators pointing at a path or artifact are untouched.
    pub fn apply_path_defaults(&mut self) {
        if let Some(protoc) = &mut self.protoc {
            if protoc.source().is_none() {
                protoc.set_path("protoc");
            }
        }
        for plugin in self.plugins.values_mut() {
            if plugin.source().is_none() {
                let default = format!("protoc-gen-{}", plugin.name());
                plugin.set_path(default);
            }
        }
    }
}
