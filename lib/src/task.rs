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

//! The proto compilation task: configuration lifecycle and the driver
//! that turns accumulated configuration into `protoc` invocations.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use itertools::Itertools as _;
use thiserror::Error;

use crate::command::{generate_cmds, make_options_prefix};
use crate::file_util::{create_parent_dirs, IoResultExt as _, PathError};
use crate::locator::ToolRegistry;
use crate::process::{run_command, RunError};
use crate::resolver::{compute_executable_path, ResolveError};
use crate::settings::InvocationSettings;

/// A task's position in its configuration lifecycle.
///
/// Structural fields are settable only in `Init`; collections are
/// mutable in `Init` and `Config`; compilation runs only in `Finalized`.
/// Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The embedding build system is wiring up the task.
    Init,
    /// The user's build script is configuring the task.
    Config,
    /// Configuration is frozen; the task may compile.
    Finalized,
}

/// Violation of the task lifecycle.
#[derive(Debug, Error)]
pub enum TaskStateError {
    /// An `Init`-only setter was called later.
    #[error("Should not be called after initialization has finished")]
    NotInitializing,
    /// A configuration mutator was called after `done_config()`.
    #[error("Should not be called after configuration has finished")]
    NotConfigurable,
    /// `compile()` was called before the task was finalized.
    #[error("done_config() has not been called")]
    NotFinalized,
    /// A lifecycle transition was requested from the wrong state.
    #[error("Invalid state: {actual:?}")]
    InvalidTransition {
        /// The state the task was actually in.
        actual: TaskState,
    },
    /// A single-assignment field was set twice.
    #[error("{field} is already set")]
    AlreadySet {
        /// The field's name.
        field: &'static str,
    },
}

/// A builtin or plugin with the given name already exists in the
/// container.
#[derive(Debug, Error)]
#[error("A code generator named '{name}' is already defined")]
pub struct DuplicateNameError {
    /// The clashing name.
    pub name: String,
}

/// Error from [`GenerateProtoTask::compile`].
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task lifecycle was violated.
    #[error(transparent)]
    State(#[from] TaskStateError),
    /// The task was never given an output base directory.
    #[error("output base dir is not set")]
    OutputBaseDirNotSet,
    /// The registry has no locator for `protoc` itself.
    #[error("No protoc locator is registered")]
    ProtocNotConfigured,
    /// Creating an output directory failed.
    #[error(transparent)]
    Io(#[from] PathError),
    /// An executable locator could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// A protoc process could not be spawned or awaited.
    #[error(transparent)]
    Run(#[from] RunError),
    /// A protoc invocation exited with a non-zero code.
    #[error("protoc exited with code {exit_code}: stdout: {stdout}. stderr: {stderr}")]
    ProtocFailed {
        /// The exit code (or a placeholder for signal death).
        exit_code: String,
        /// The invocation's captured standard output.
        stdout: String,
        /// The invocation's captured standard error.
        stderr: String,
    },
}

/// The command-line options for one protoc builtin or codegen plugin.
///
/// protoc prefixes comma-delimited options to the output path in the
/// `--<name>_out` flag; the options here become that prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOptions {
    name: String,
    options: Vec<String>,
    output_sub_dir: String,
}

impl PluginOptions {
    fn new(name: String) -> Self {
        let output_sub_dir = name.clone();
        PluginOptions {
            name,
            options: vec![],
            output_sub_dir,
        }
    }

    /// The builtin's or plugin's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends one option. Returns `self` for chaining.
    pub fn option(&mut self, option: impl Into<String>) -> &mut Self {
        self.options.push(option.into());
        self
    }

    /// The accumulated options, in insertion order.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// The subdirectory of the output base dir this generator writes to.
    /// Defaults to the generator's name.
    pub fn output_sub_dir(&self) -> &str {
        &self.output_sub_dir
    }

    /// Overrides the output subdirectory.
    pub fn set_output_sub_dir(&mut self, sub_dir: impl Into<String>) {
        self.output_sub_dir = sub_dir.into();
    }
}

/// An insertion-ordered, name-unique set of [`PluginOptions`].
#[derive(Debug, Clone, Default)]
pub struct PluginOptionsContainer {
    entries: IndexMap<String, PluginOptions>,
}

impl PluginOptionsContainer {
    /// Creates an entry with the given name and returns it for further
    /// configuration. Fails if the name is taken.
    pub fn create(&mut self, name: &str) -> Result<&mut PluginOptions, DuplicateNameError> {
        if self.entries.contains_key(name) {
            return Err(DuplicateNameError {
                name: name.to_owned(),
            });
        }
        Ok(self
            .entries
            .entry(name.to_owned())
            .or_insert_with(|| PluginOptions::new(name.to_owned())))
    }

    /// The entry with the given name, if any.
    pub fn get(&self, name: &str) -> Option<&PluginOptions> {
        self.entries.get(name)
    }

    /// Whether an entry with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginOptions> {
        self.entries.values()
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Configuration for emitting a descriptor set alongside generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorSetOptions {
    /// Alternative output location. When unset, the descriptor set goes
    /// to `<output base dir>/descriptor_set.desc`.
    pub path: Option<String>,
    /// Include source information (comments, locations).
    pub include_source_info: bool,
    /// Include imports, making the descriptor set self-contained.
    pub include_imports: bool,
}

/// One proto compilation: a set of sources and include directories, the
/// code generators to run, and the lifecycle guarding when each may be
/// configured.
///
/// The task is created by the embedding build system in [`TaskState::Init`],
/// handed to user configuration in [`TaskState::Config`], frozen with
/// [`done_config`](Self::done_config), and then compiled.
#[derive(Debug)]
pub struct GenerateProtoTask {
    name: String,
    settings: InvocationSettings,
    state: TaskState,
    output_base_dir: Option<PathBuf>,
    source_set_name: Option<String>,
    variant_name: Option<String>,
    is_test_variant: Option<bool>,
    flavors: Option<Vec<String>>,
    build_type: Option<String>,
    include_dirs: Vec<PathBuf>,
    source_files: Vec<PathBuf>,
    builtins: PluginOptionsContainer,
    plugins: PluginOptionsContainer,
    generate_descriptor_set: bool,
    descriptor_set_options: DescriptorSetOptions,
}

impl GenerateProtoTask {
    /// Creates a task in [`TaskState::Init`]. `name` identifies the task
    /// in logs and in generated trampoline script names.
    pub fn new(name: impl Into<String>, settings: InvocationSettings) -> Self {
        GenerateProtoTask {
            name: name.into(),
            settings,
            state: TaskState::Init,
            output_base_dir: None,
            source_set_name: None,
            variant_name: None,
            is_test_variant: None,
            flavors: None,
            build_type: None,
            include_dirs: vec![],
            source_files: vec![],
            builtins: PluginOptionsContainer::default(),
            plugins: PluginOptionsContainer::default(),
            generate_descriptor_set: false,
            descriptor_set_options: DescriptorSetOptions::default(),
        }
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    fn check_initializing(&self) -> Result<(), TaskStateError> {
        match self.state {
            TaskState::Init => Ok(()),
            _ => Err(TaskStateError::NotInitializing),
        }
    }

    fn check_can_config(&self) -> Result<(), TaskStateError> {
        match self.state {
            TaskState::Init | TaskState::Config => Ok(()),
            TaskState::Finalized => Err(TaskStateError::NotConfigurable),
        }
    }

    /// Ends the build system's initialization phase; user configuration
    /// may begin.
    pub fn done_initializing(&mut self) -> Result<(), TaskStateError> {
        match self.state {
            TaskState::Init => {
                self.state = TaskState::Config;
                Ok(())
            }
            actual => Err(TaskStateError::InvalidTransition { actual }),
        }
    }

    /// Ends the configuration phase; the task becomes compilable and
    /// immutable.
    pub fn done_config(&mut self) -> Result<(), TaskStateError> {
        match self.state {
            TaskState::Config => {
                self.state = TaskState::Finalized;
                Ok(())
            }
            actual => Err(TaskStateError::InvalidTransition { actual }),
        }
    }

    /// Sets the directory all generated output goes under. `Init` only,
    /// single assignment.
    pub fn set_output_base_dir(&mut self, dir: impl Into<PathBuf>) -> Result<(), TaskStateError> {
        self.check_initializing()?;
        if self.output_base_dir.is_some() {
            return Err(TaskStateError::AlreadySet {
                field: "output base dir",
            });
        }
        self.output_base_dir = Some(dir.into());
        Ok(())
    }

    /// The output base directory, once set.
    pub fn output_base_dir(&self) -> Option<&Path> {
        self.output_base_dir.as_deref()
    }

    /// Binds the task to a named source set. `Init` only, single
    /// assignment.
    pub fn set_source_set_name(&mut self, name: impl Into<String>) -> Result<(), TaskStateError> {
        self.check_initializing()?;
        if self.source_set_name.is_some() {
            return Err(TaskStateError::AlreadySet {
                field: "source set",
            });
        }
        self.source_set_name = Some(name.into());
        Ok(())
    }

    /// The bound source set name, if any.
    pub fn source_set_name(&self) -> Option<&str> {
        self.source_set_name.as_deref()
    }

    /// Binds the task to a build variant. `Init` only, single assignment.
    pub fn set_variant(
        &mut self,
        name: impl Into<String>,
        is_test_variant: bool,
    ) -> Result<(), TaskStateError> {
        self.check_initializing()?;
        if self.variant_name.is_some() {
            return Err(TaskStateError::AlreadySet { field: "variant" });
        }
        self.variant_name = Some(name.into());
        self.is_test_variant = Some(is_test_variant);
        Ok(())
    }

    /// The bound variant name, if any.
    pub fn variant_name(&self) -> Option<&str> {
        self.variant_name.as_deref()
    }

    /// Records the variant's flavor names. `Init` only, single
    /// assignment.
    pub fn set_flavors(&mut self, flavors: Vec<String>) -> Result<(), TaskStateError> {
        self.check_initializing()?;
        if self.flavors.is_some() {
            return Err(TaskStateError::AlreadySet { field: "flavors" });
        }
        self.flavors = Some(flavors);
        Ok(())
    }

    /// The variant's flavors, if set.
    pub fn flavors(&self) -> Option<&[String]> {
        self.flavors.as_deref()
    }

    /// Records the variant's build type. `Init` only, single assignment.
    pub fn set_build_type(&mut self, build_type: impl Into<String>) -> Result<(), TaskStateError> {
        self.check_initializing()?;
        if self.build_type.is_some() {
            return Err(TaskStateError::AlreadySet { field: "build type" });
        }
        self.build_type = Some(build_type.into());
        Ok(())
    }

    /// The variant's build type, if set.
    pub fn build_type(&self) -> Option<&str> {
        self.build_type.as_deref()
    }

    /// Whether this task compiles test sources: either the variant was
    /// tagged as a test variant, or the bound variant/source-set name is
    /// a conventional test name.
    pub fn is_test(&self) -> bool {
        if self.is_test_variant == Some(true) {
            return true;
        }
        let name = self
            .variant_name
            .as_deref()
            .or(self.source_set_name.as_deref())
            .unwrap_or_default()
            .to_lowercase();
        name == "test" || name.contains("androidtest") || name.contains("unittest")
    }

    /// Adds proto files to compile. They get sorted before invocation,
    /// so insertion order doesn't matter.
    pub fn add_source_files(
        &mut self,
        files: impl IntoIterator<Item = PathBuf>,
    ) -> Result<(), TaskStateError> {
        self.check_can_config()?;
        self.source_files.extend(files);
        Ok(())
    }

    /// Adds a directory to protoc's include path (`-I`). Include dirs
    /// hold protos that may be imported but are not compiled themselves.
    pub fn add_include_dir(&mut self, dir: impl Into<PathBuf>) -> Result<(), TaskStateError> {
        self.check_can_config()?;
        self.include_dirs.push(dir.into());
        Ok(())
    }

    /// The configured builtins (protoc's own code generators).
    pub fn builtins(&self) -> &PluginOptionsContainer {
        &self.builtins
    }

    /// Mutable access to the builtins, while configuration is allowed.
    pub fn builtins_mut(&mut self) -> Result<&mut PluginOptionsContainer, TaskStateError> {
        self.check_can_config()?;
        Ok(&mut self.builtins)
    }

    /// The configured codegen plugins.
    pub fn plugins(&self) -> &PluginOptionsContainer {
        &self.plugins
    }

    /// Mutable access to the plugins, while configuration is allowed.
    pub fn plugins_mut(&mut self) -> Result<&mut PluginOptionsContainer, TaskStateError> {
        self.check_can_config()?;
        Ok(&mut self.plugins)
    }

    /// Whether the task has a plugin with the given name.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains(name)
    }

    /// Turns descriptor-set emission on or off.
    pub fn set_generate_descriptor_set(&mut self, generate: bool) -> Result<(), TaskStateError> {
        self.check_can_config()?;
        self.generate_descriptor_set = generate;
        Ok(())
    }

    /// The descriptor-set options.
    pub fn descriptor_set_options(&self) -> &DescriptorSetOptions {
        &self.descriptor_set_options
    }

    /// Mutable access to the descriptor-set options, while configuration
    /// is allowed.
    pub fn descriptor_set_options_mut(
        &mut self,
    ) -> Result<&mut DescriptorSetOptions, TaskStateError> {
        self.check_can_config()?;
        Ok(&mut self.descriptor_set_options)
    }

    /// The path the descriptor set will be written to, or `None` when
    /// descriptor-set generation is off (or no location can be derived
    /// yet because the output base dir is unset).
    pub fn descriptor_path(&self) -> Option<String> {
        if !self.generate_descriptor_set {
            return None;
        }
        if let Some(path) = &self.descriptor_set_options.path {
            return Some(path.clone());
        }
        let base = self.output_base_dir.as_ref()?;
        Some(format!("{}/descriptor_set.desc", base.display()))
    }

    /// The output directory for one builtin or plugin:
    /// `<output base dir>/<output sub dir>`.
    pub fn output_dir(&self, plugin: &PluginOptions) -> Option<PathBuf> {
        self.output_base_dir
            .as_ref()
            .map(|base| base.join(plugin.output_sub_dir()))
    }

    /// All generated-source directories, in builtin-then-plugin order.
    /// This is what a host wires into its downstream compilation graph.
    pub fn output_source_dirs(&self) -> Vec<PathBuf> {
        self.builtins
            .iter()
            .chain(self.plugins.iter())
            .filter_map(|plugin| self.output_dir(plugin))
            .collect()
    }

    /// Compiles the configured protos: resolves executables, assembles
    /// the command line, partitions it under the platform length limit,
    /// and runs each partition in order, stopping at the first failure.
    pub fn compile(&self, registry: &ToolRegistry) -> Result<(), TaskError> {
        if self.state != TaskState::Finalized {
            return Err(TaskStateError::NotFinalized.into());
        }
        let output_base_dir = self
            .output_base_dir
            .as_ref()
            .ok_or(TaskError::OutputBaseDirNotSet)?;

        // Sort to ensure generated descriptors have a canonical
        // representation, to avoid triggering unnecessary rebuilds
        // downstream.
        let mut proto_files = self.source_files.clone();
        proto_files.sort();
        proto_files.dedup();

        for plugin in self.builtins.iter().chain(self.plugins.iter()) {
            let output_dir = output_base_dir.join(plugin.output_sub_dir());
            fs::create_dir_all(&output_dir).context(&output_dir)?;
        }

        // The source directory designated from the source set may not
        // actually exist on disk. "Include" it only when it exists, so
        // that protoc won't complain.
        let dirs = self
            .include_dirs
            .iter()
            .filter(|dir| dir.exists())
            .map(|dir| format!("-I{}", dir.display()))
            .collect_vec();
        tracing::debug!(?dirs, "Compiling with include directories");
        tracing::debug!(?proto_files, "Compiling proto files");

        let protoc = registry.protoc().ok_or(TaskError::ProtocNotConfigured)?;
        let protoc_path = compute_executable_path(protoc, registry, &self.settings, &self.name)?;
        let mut base_cmd = vec![protoc_path.to_string_lossy().into_owned()];
        base_cmd.extend(dirs);

        for builtin in self.builtins.iter() {
            let out_prefix = make_options_prefix(builtin.options());
            base_cmd.push(format!(
                "--{}_out={}{}",
                builtin.name(),
                out_prefix,
                output_base_dir.join(builtin.output_sub_dir()).display()
            ));
        }

        for plugin in self.plugins.iter() {
            let name = plugin.name();
            if let Some(locator) = registry.plugin(name) {
                let plugin_path =
                    compute_executable_path(locator, registry, &self.settings, &self.name)?;
                base_cmd.push(format!(
                    "--plugin=protoc-gen-{name}={}",
                    plugin_path.display()
                ));
            } else {
                tracing::warn!(
                    "protoc plugin '{name}' not defined. Trying to use 'protoc-gen-{name}' from \
                     system path"
                );
            }
            let out_prefix = make_options_prefix(plugin.options());
            base_cmd.push(format!(
                "--{name}_out={}{}",
                out_prefix,
                output_base_dir.join(plugin.output_sub_dir()).display()
            ));
        }

        if self.generate_descriptor_set {
            let path = self
                .descriptor_path()
                .unwrap_or_else(|| format!("{}/descriptor_set.desc", output_base_dir.display()));
            // The user may have pointed the descriptor outside any
            // existing tree.
            create_parent_dirs(Path::new(&path))?;
            base_cmd.push(format!("--descriptor_set_out={path}"));
            if self.descriptor_set_options.include_imports {
                base_cmd.push("--include_imports".to_owned());
            }
            if self.descriptor_set_options.include_source_info {
                base_cmd.push("--include_source_info".to_owned());
            }
        }

        let file_args = proto_files.iter().map(|path| file_arg(path)).collect_vec();
        let cmds = generate_cmds(&base_cmd, &file_args, self.settings.cmd_length_limit());
        for cmd in &cmds {
            self.compile_files(cmd)?;
        }
        Ok(())
    }

    fn compile_files(&self, cmd: &[String]) -> Result<(), TaskError> {
        let output = run_command(cmd)?;
        if output.success() {
            tracing::info!(
                "protoc: stdout: {}. stderr: {}",
                output.stdout,
                output.stderr
            );
            Ok(())
        } else {
            Err(TaskError::ProtocFailed {
                exit_code: output.exit_code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// The argument protoc sees for one proto file: its bare file name,
/// resolvable through the include path.
fn file_arg(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.display().to_string(),
    }
}
