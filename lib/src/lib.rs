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

//! Orchestration of `protoc` compiler invocations.
//!
//! This library is the execution core of a protobuf code-generation build
//! step: it resolves the `protoc` executable and codegen plugin
//! executables (local paths, pre-resolved artifacts, or `.jar` plugins
//! wrapped in generated trampoline scripts), assembles command lines that
//! respect the platform's length ceiling, and runs them with captured
//! output. Discovering proto sources, extracting archives, and
//! downloading artifacts are the embedding build system's job; this
//! library only consumes the results.

#![warn(missing_docs)]
#![deny(unused_must_use)]
#![forbid(unsafe_code)]

pub mod command;
pub mod file_util;
pub mod locator;
pub mod process;
pub mod resolver;
pub mod settings;
pub mod task;
