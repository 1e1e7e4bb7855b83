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

//! Assembly of `protoc` command lines.
//!
//! A logically single compile request may exceed the platform's
//! command-line length ceiling when the proto set is large, so the file
//! arguments are partitioned into one or more invocations that each fit.

/// Windows `CreateProcess` has a command line limit of 32768:
/// <https://msdn.microsoft.com/en-us/library/windows/desktop/ms682425(v=vs.85).aspx>
pub const WINDOWS_CMD_LENGTH_LIMIT: usize = 32760;

/// Extra command line length for an additional argument: two quotes and a
/// space, assuming arguments get quoted when the line is put together.
pub const CMD_ARGUMENT_EXTRA_LENGTH: usize = 3;

/// Partitions `proto_files` over one or more commands so that each
/// command's quoted length stays within `cmd_length_limit`.
///
/// Files are taken in the given order; the caller is expected to have
/// sorted them so that repeated builds produce identical invocations
/// regardless of filesystem iteration order. An empty file list yields no
/// commands at all. A single file longer than the limit still gets a
/// command of its own rather than being dropped; the resulting process
/// failure, if any, is the runner's to report.
pub fn generate_cmds(
    base_cmd: &[String],
    proto_files: &[String],
    cmd_length_limit: usize,
) -> Vec<Vec<String>> {
    let mut cmds = vec![];
    if proto_files.is_empty() {
        return cmds;
    }
    let base_cmd_length: usize = base_cmd
        .iter()
        .map(|arg| arg.len() + CMD_ARGUMENT_EXTRA_LENGTH)
        .sum();
    let mut current_args: Vec<String> = vec![];
    let mut current_args_length = 0;
    for file_name in proto_files {
        let current_file_length = file_name.len() + CMD_ARGUMENT_EXTRA_LENGTH;
        // Close off the current command before this file would overflow
        // the limit.
        if !current_args.is_empty()
            && base_cmd_length + current_args_length + current_file_length > cmd_length_limit
        {
            cmds.push([base_cmd, current_args.as_slice()].concat());
            current_args.clear();
            current_args_length = 0;
        }
        current_args.push(file_name.clone());
        current_args_length += current_file_length;
    }
    cmds.push([base_cmd, current_args.as_slice()].concat());
    cmds
}

/// Builds the option prefix for a `--<name>_out` flag.
///
/// protoc accepts comma-delimited options prefixed to the output path:
/// `--java_out=/out` without options, `--java_out=opt1,opt2:/out` with.
/// Returns the empty string when there are no options.
pub fn make_options_prefix(options: &[String]) -> String {
    if options.is_empty() {
        String::new()
    } else {
        format!("{}:", options.join(","))
    }
}

/// Escapes a path for embedding in single quotes in a POSIX shell script.
pub fn escape_path_unix(path: &str) -> String {
    path.replace('\'', "'\\''")
}

/// Escapes a path for embedding in double quotes in a Windows batch
/// script: literal percent signs are doubled, and a trailing backslash is
/// doubled so it can't escape the closing quote.
pub fn escape_path_windows(path: &str) -> String {
    let escaped = path.replace('%', "%%");
    if escaped.ends_with('\\') {
        format!("{escaped}\\")
    } else {
        escaped
    }
}
