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

use std::fs;
use std::path::PathBuf;

use itertools::Itertools as _;
use pbgen_lib::locator::{ExecutableLocator, ToolRegistry};
use pbgen_lib::settings::OsFamily;
use pbgen_lib::task::GenerateProtoTask;
use pretty_assertions::assert_eq;
use testutils::{read_invocations, TestEnv};

fn registry_with_protoc(env: &TestEnv, log: &std::path::Path) -> ToolRegistry {
    let protoc = env.write_fake_protoc(log, 0);
    let mut registry = ToolRegistry::new();
    let mut locator = ExecutableLocator::new("protoc");
    locator.set_path(protoc.to_str().unwrap());
    registry.set_protoc(locator);
    registry
}

#[test]
fn test_builtin_without_options() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);
    let out_base = env.build_root.join("generated");

    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(&out_base).unwrap();
    task.done_initializing().unwrap();
    task.add_include_dir(&env.proto_dir).unwrap();
    task.add_source_files([env.write_proto("a.proto")]).unwrap();
    task.builtins_mut().unwrap().create("java").unwrap();
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    let invocations = read_invocations(&log);
    assert_eq!(invocations.len(), 1);
    let args = &invocations[0];
    assert_eq!(
        args,
        &[
            format!("-I{}", env.proto_dir.display()),
            format!("--java_out={}", out_base.join("java").display()),
            "a.proto".to_owned(),
        ]
    );
    // The builtin's output directory was created for protoc.
    assert!(out_base.join("java").is_dir());
}

#[test]
fn test_plugin_without_locator_falls_back_to_system_path() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);
    let out_base = env.build_root.join("generated");

    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(&out_base).unwrap();
    task.done_initializing().unwrap();
    task.add_source_files([env.write_proto("a.proto")]).unwrap();
    task.plugins_mut()
        .unwrap()
        .create("grpc")
        .unwrap()
        .option("lite");
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    let args = &read_invocations(&log)[0];
    // No --plugin= flag; protoc is left to find protoc-gen-grpc itself.
    assert!(!args.iter().any(|arg| arg.starts_with("--plugin=")));
    assert_eq!(
        args.iter().filter(|arg| arg.starts_with("--grpc_out=")).collect_vec(),
        [&format!("--grpc_out=lite:{}", out_base.join("grpc").display())]
    );
}

#[test]
fn test_plugin_with_jar_locator_gets_trampoline_flag() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let mut registry = registry_with_protoc(&env, &log);
    let jar = env.root().join("protoc-gen-grpc-java-1.58.0.jar");
    fs::write(&jar, "jar").unwrap();
    let mut grpc_locator = ExecutableLocator::new("grpc");
    grpc_locator.set_path(jar.to_str().unwrap());
    registry.add_plugin(grpc_locator);
    let out_base = env.build_root.join("generated");

    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(&out_base).unwrap();
    task.done_initializing().unwrap();
    task.add_source_files([env.write_proto("a.proto")]).unwrap();
    task.plugins_mut().unwrap().create("grpc").unwrap();
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    let expected_script = env
        .build_root
        .join("scripts/protoc-gen-grpc-java-1.58.0-generateProto-trampoline.sh");
    assert!(expected_script.is_file());
    let args = &read_invocations(&log)[0];
    assert!(args.contains(&format!(
        "--plugin=protoc-gen-grpc={}",
        expected_script.display()
    )));
}

#[test]
fn test_descriptor_set_flags() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);
    let out_base = env.build_root.join("generated");
    let descriptor = env.root().join("descriptors/main.desc");

    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(&out_base).unwrap();
    task.done_initializing().unwrap();
    task.add_source_files([env.write_proto("a.proto")]).unwrap();
    task.builtins_mut().unwrap().create("java").unwrap();
    task.set_generate_descriptor_set(true).unwrap();
    {
        let options = task.descriptor_set_options_mut().unwrap();
        options.path = Some(descriptor.display().to_string());
        options.include_imports = true;
        options.include_source_info = true;
    }
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    // The descriptor's parent directory is created up front; protoc
    // itself would write the file.
    assert!(descriptor.parent().unwrap().is_dir());
    let args = &read_invocations(&log)[0];
    assert!(args.contains(&format!("--descriptor_set_out={}", descriptor.display())));
    assert!(args.contains(&"--include_imports".to_owned()));
    assert!(args.contains(&"--include_source_info".to_owned()));
}

#[test]
fn test_nonexistent_include_dirs_are_omitted() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);

    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(env.build_root.join("generated"))
        .unwrap();
    task.done_initializing().unwrap();
    task.add_include_dir(&env.proto_dir).unwrap();
    task.add_include_dir(env.root().join("no-such-dir")).unwrap();
    task.add_source_files([env.write_proto("a.proto")]).unwrap();
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    let args = &read_invocations(&log)[0];
    let includes = args
        .iter()
        .filter(|arg| arg.starts_with("-I"))
        .collect_vec();
    assert_eq!(includes, [&format!("-I{}", env.proto_dir.display())]);
}

#[test]
fn test_source_files_are_sorted_and_deduplicated() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);

    let b = env.write_proto("b.proto");
    let a = env.write_proto("a.proto");
    let c = env.write_proto("c.proto");
    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(env.build_root.join("generated"))
        .unwrap();
    task.done_initializing().unwrap();
    task.add_source_files([b.clone(), c, a, b]).unwrap();
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    let args = &read_invocations(&log)[0];
    let files = args
        .iter()
        .filter(|arg| arg.ends_with(".proto"))
        .collect_vec();
    assert_eq!(files, ["a.proto", "b.proto", "c.proto"]);
}

#[test]
fn test_empty_source_set_runs_no_protoc() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);

    let mut task = GenerateProtoTask::new("generateProto", env.settings(OsFamily::Unix));
    task.set_output_base_dir(env.build_root.join("generated"))
        .unwrap();
    task.done_initializing().unwrap();
    task.builtins_mut().unwrap().create("java").unwrap();
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    assert_eq!(read_invocations(&log), Vec::<Vec<String>>::new());
    // Output directories are still created for downstream wiring.
    assert!(env.build_root.join("generated/java").is_dir());
}

#[test]
fn test_partitioned_compile_runs_all_partitions() {
    let env = TestEnv::new();
    let log = env.root().join("protoc.log");
    let registry = registry_with_protoc(&env, &log);

    let files: Vec<PathBuf> = (0..6)
        .map(|i| env.write_proto(&format!("file_{i}.proto")))
        .collect();
    let settings = env.settings(OsFamily::Unix).with_cmd_length_limit(
        // Room for the base command plus roughly two file names per
        // partition.
        env.root().join("protoc").display().to_string().len() + 40,
    );
    let mut task = GenerateProtoTask::new("generateProto", settings);
    task.set_output_base_dir(env.build_root.join("generated"))
        .unwrap();
    task.done_initializing().unwrap();
    task.add_source_files(files).unwrap();
    task.done_config().unwrap();
    task.compile(&registry).unwrap();

    let invocations = read_invocations(&log);
    assert!(invocations.len() > 1, "expected multiple partitions");
    let all_files = invocations
        .iter()
        .flatten()
        .filter(|arg| arg.ends_with(".proto"))
        .cloned()
        .collect_vec();
    assert_eq!(
        all_files,
        (0..6).map(|i| format!("file_{i}.proto")).collect_vec()
    );
}
