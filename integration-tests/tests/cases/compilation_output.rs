// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end: run `bear` over a real build command and check the
//! compilation database it produces.

use crate::fixtures::*;

#[test]
#[cfg(has_executable_compiler_c)]
fn records_a_simple_compile() {
    let env = TestEnvironment::new().unwrap();
    env.write_file("main.c", "int main(void) { return 0; }\n")
        .unwrap();

    let output = env
        .run_bear("compile_commands.json", &[COMPILER_C_PATH, "-c", "main.c"])
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let records = env.load_database("compile_commands.json").unwrap();
    assert_eq!(records.len(), 1, "expected exactly one record: {records:?}");

    let record = &records[0];
    assert!(record["file"].as_str().unwrap().ends_with("main.c"));
    assert!(record["command"].as_str().unwrap().contains("main.c"));
    assert!(record["directory"].is_string());
}

#[test]
#[cfg(has_executable_compiler_c)]
fn non_compiler_commands_produce_no_records() {
    let env = TestEnvironment::new().unwrap();

    let output = env.run_bear("compile_commands.json", &["true"]).unwrap();
    assert!(output.status.success(), "{output:?}");

    let records = env.load_database("compile_commands.json").unwrap();
    assert!(records.is_empty(), "expected no records: {records:?}");
}

#[test]
#[cfg(has_executable_compiler_c)]
fn propagates_the_build_commands_exit_code() {
    let env = TestEnvironment::new().unwrap();

    let output = env.run_bear("compile_commands.json", &["false"]).unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
#[cfg(has_executable_compiler_c)]
fn dependency_generation_only_invocation_yields_no_record() {
    let env = TestEnvironment::new().unwrap();
    env.write_file("main.c", "int main(void) { return 0; }\n")
        .unwrap();

    let output = env
        .run_bear(
            "compile_commands.json",
            &[COMPILER_C_PATH, "-M", "main.c"],
        )
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let records = env.load_database("compile_commands.json").unwrap();
    assert!(records.is_empty(), "expected no records: {records:?}");
}

#[test]
#[cfg(has_executable_compiler_c)]
fn debug_mode_records_dependency_generation_only_invocation() {
    let env = TestEnvironment::new().unwrap();
    env.write_file("main.c", "int main(void) { return 0; }\n")
        .unwrap();

    let output = env
        .run_bear_with(
            "compile_commands.json",
            &["-d"],
            &[COMPILER_C_PATH, "-M", "main.c"],
        )
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let records = env.load_database("compile_commands.json").unwrap();
    assert_eq!(records.len(), 1, "expected exactly one record: {records:?}");

    let record = &records[0];
    assert!(record["command"].as_str().unwrap().contains("main.c"));
    assert!(record.get("file").is_none(), "expected no file: {record:?}");
}

#[test]
#[cfg(has_executable_compiler_c)]
fn chained_exec_through_a_shell_is_still_observed() {
    let env = TestEnvironment::new().unwrap();
    env.write_file("main.c", "int main(void) { return 0; }\n")
        .unwrap();

    let script = format!("{COMPILER_C_PATH} -c main.c");
    let output = env
        .run_bear("compile_commands.json", &["sh", "-c", &script])
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let records = env.load_database("compile_commands.json").unwrap();
    assert_eq!(records.len(), 1, "expected exactly one record: {records:?}");
}
