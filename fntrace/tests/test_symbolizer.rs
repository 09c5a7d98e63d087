mod common;

use common::{elf_with_segments, ImageBuilder, Subprogram};
use fntrace::capture::FunctionTable;
use fntrace::domain::{FunctionId, ImageError};
use fntrace::symbolization::{FunctionSymbol, ImageArch, IndexState, SourceLocation, Symbolizer};
use object::Architecture;

fn main_image() -> ImageBuilder {
    ImageBuilder::new(Architecture::X86_64)
        .symbol("main", 0x1000, 16)
        .file("main.c")
        .subprogram(Subprogram::new("main", 0x1000).declared(1, 42))
}

#[test]
fn test_function_symbols_and_resolve() {
    let image = main_image().write();
    let symbolizer = Symbolizer::open(image.path()).expect("Failed to open image");

    let symbols = symbolizer.function_symbols();
    println!("Symbols: {symbols:?}");
    assert_eq!(symbols, vec![FunctionSymbol { name: "main".into(), address: 0x1000, size: 16 }]);

    let resolved = symbolizer.resolve(0x1000).expect("main should be indexed");
    assert_eq!(resolved.name, "main");
    assert_eq!(resolved.location, SourceLocation::Known { file: "main.c".into(), line: 42 });
}

#[test]
fn test_resolve_return_address() {
    let image = main_image().write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let resolved = symbolizer.resolve(0x1001).expect("address - 1 should be tried");
    assert_eq!(resolved.address, 0x1000);
    assert!(symbolizer.resolve(0x2000).is_none(), "unindexed address must not resolve");
}

#[test]
fn test_index_is_lazy() {
    let image = main_image().write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    assert_eq!(symbolizer.index_state(), IndexState::Empty);
    symbolizer.die(0x1000);
    assert_eq!(symbolizer.index_state(), IndexState::Ready);
    assert_eq!(symbolizer.debug_info().stats().indexed, 1);
}

#[test]
fn test_build_id_absent_is_empty() {
    let image = main_image().write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let info = symbolizer.info();
    assert_eq!(info.build_id, "");
    assert_eq!(info.architecture, ImageArch::X86_64);
    assert_eq!(info.load_bias, None, "relocatable objects have no segments");
}

#[test]
fn test_build_id_present() {
    let image = main_image().build_id(&[0xde, 0xad, 0xbe, 0xef, 0x01]).write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    assert_eq!(symbolizer.image().build_id(), vec![0xde, 0xad, 0xbe, 0xef, 0x01]);
    assert_eq!(symbolizer.info().build_id, "deadbeef01");
}

#[test]
fn test_verify_build_id() {
    let image = main_image().build_id(&[0xde, 0xad, 0xbe, 0xef, 0x01]).write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    symbolizer.verify_build_id("deadbeef01").expect("same build");
    symbolizer.verify_build_id("DEADBEEF01").expect("hex case is irrelevant");

    let err = symbolizer.verify_build_id("deadbeef02").unwrap_err();
    println!("Error: {err}");
    assert!(matches!(
        &err,
        ImageError::BuildIdMismatch { expected, actual, .. } if expected == "deadbeef02" && actual == "deadbeef01"
    ));
}

#[test]
fn test_verify_build_id_without_note_fails() {
    let image = main_image().write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let err = symbolizer.verify_build_id("deadbeef01").unwrap_err();
    assert!(matches!(&err, ImageError::BuildIdMismatch { actual, .. } if actual.is_empty()));
    assert!(err.to_string().contains("image has none"), "got {err}");
}

#[test]
fn test_load_bias_first_executable_segment() {
    let image = elf_with_segments(&[(4, 0), (5, 0x1000), (5, 0x8000)]);
    let symbolizer = Symbolizer::open(image.path()).unwrap();
    assert_eq!(symbolizer.info().load_bias, Some(0x1000));

    let data_only = elf_with_segments(&[(4, 0), (6, 0x2000)]);
    let symbolizer = Symbolizer::open(data_only.path()).unwrap();
    assert_eq!(symbolizer.info().load_bias, None);
}

#[test]
fn test_decl_file_zero_is_unknown() {
    let image = ImageBuilder::new(Architecture::X86_64)
        .symbol("anon", 0x1000, 8)
        .file("main.c")
        .subprogram(Subprogram::new("anon", 0x1000).declared(0, 7))
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let entry = symbolizer.die(0x1000).expect("entry must be indexed");
    assert_eq!(entry.decl_file, Some(0));
    let resolved = symbolizer.resolve(0x1000).unwrap();
    assert_eq!(resolved.location, SourceLocation::Unknown);
    assert!(symbolizer.traced_functions().is_empty(), "unknown source is not traced");
}

#[test]
fn test_artificial_entry_uses_unit_name() {
    let image = ImageBuilder::new(Architecture::X86_64)
        .unit_name("gen.cc")
        .symbol("thunk", 0x1100, 4)
        .subprogram(Subprogram { artificial: true, ..Subprogram::new("thunk", 0x1100) })
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let resolved = symbolizer.resolve(0x1100).unwrap();
    assert_eq!(resolved.location, SourceLocation::Known { file: "gen.cc".into(), line: -1 });
}

#[test]
fn test_arm32_thumb_fixup() {
    let image = ImageBuilder::new(Architecture::Arm)
        .symbol("thumb_fn", 0x2001, 12)
        .file("thumb.c")
        .subprogram(Subprogram::new("thumb_fn", 0x2000).declared(1, 3))
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    assert_eq!(symbolizer.info().architecture, ImageArch::Arm32);
    assert!(symbolizer.die(0x2001).is_some(), "entry should be keyed by the Thumb address");
    assert!(symbolizer.die(0x2000).is_none());
}

#[test]
fn test_arm32_without_symbol_is_skipped() {
    let image = ImageBuilder::new(Architecture::Arm)
        .symbol("other", 0x3000, 4)
        .file("a.c")
        .subprogram(Subprogram::new("lost", 0x2000).declared(1, 1))
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    assert!(symbolizer.debug_info().is_empty());
    assert_eq!(symbolizer.debug_info().stats().skipped, 1);
}

#[test]
fn test_nested_entries_complete_innermost_first() {
    let outer = Subprogram {
        children: vec![Subprogram::new("inner", 0x4000).declared(1, 20)],
        ..Subprogram::new("outer", 0x4000).declared(1, 10)
    };
    let image = ImageBuilder::new(Architecture::X86_64)
        .symbol("outer", 0x4000, 32)
        .file("nest.c")
        .subprogram(outer)
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let index = symbolizer.debug_info();
    assert_eq!(index.die(0x4000).unwrap().name, "inner");
    assert_eq!(index.conflicts().len(), 1);
    assert_eq!(index.conflicts()[0].name, "outer");
}

#[test]
fn test_same_name_same_address_is_not_a_conflict() {
    let image = ImageBuilder::new(Architecture::X86_64)
        .symbol("dup", 0x5000, 8)
        .file("dup.c")
        .subprogram(Subprogram::new("dup", 0x5000).declared(1, 1))
        .subprogram(Subprogram::new("dup", 0x5000).declared(1, 1))
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let stats = symbolizer.debug_info().stats();
    assert_eq!(stats.indexed, 1);
    assert_eq!(stats.duplicates, 1);
    assert!(symbolizer.debug_info().conflicts().is_empty());
}

#[test]
fn test_linkage_name_is_demangled() {
    let image = ImageBuilder::new(Architecture::X86_64)
        .symbol("_Z3fooi", 0x6000, 8)
        .file("foo.cc")
        .subprogram(Subprogram { linkage_name: Some("_Z3fooi"), ..Subprogram::new("foo", 0x6000).declared(1, 5) })
        .write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let functions = symbolizer.traced_functions();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].symbol, "_Z3fooi");
    assert_eq!(functions[0].name, "foo(int)");
    assert_eq!((functions[0].file.as_str(), functions[0].line), ("foo.cc", 5));
}

#[test]
fn test_traced_functions_skip_undocumented() {
    let image = main_image().symbol("no_debug", 0x1100, 8).symbol("empty", 0x1200, 0).write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let names: Vec<String> = symbolizer.traced_functions().into_iter().map(|f| f.symbol).collect();
    assert_eq!(names, vec!["main".to_string()]);
}

#[test]
fn test_line_resolver_uses_line_table() {
    let image = main_image().write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();
    let lines = symbolizer.line_resolver().expect("Failed to load line tables");

    let resolved = lines.resolve(0x1008);
    println!("{resolved}");
    assert_eq!(resolved.frames.len(), 1);
    assert_eq!(resolved.frames[0].function, "main");
    assert_eq!(resolved.line(), Some(42));
    let file = resolved.frames[0].location.as_ref().and_then(|loc| loc.file.clone()).unwrap();
    assert!(file.ends_with("main.c"), "got {file}");

    assert!(lines.resolve(0x3000).frames.is_empty(), "outside every sequence");
}

#[test]
fn test_function_table_from_image() {
    let image = main_image().symbol("no_debug", 0x1100, 8).write();
    let symbolizer = Symbolizer::open(image.path()).unwrap();

    let table = symbolizer.function_table().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.id_for_key(0x1000), Some(FunctionId(0)));

    let main = table.get(FunctionId(0)).unwrap();
    assert_eq!(main.name, "main");
    assert_eq!(main.file.as_deref(), Some("main.c"));
    assert_eq!(main.line, Some(42));
    let file_name = image.path().file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(main.module.as_deref(), Some(file_name.as_str()));
}

#[test]
fn test_open_rejects_non_elf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-an-image");
    std::fs::write(&path, b"definitely not ELF").unwrap();

    let result = Symbolizer::open(&path);
    assert!(matches!(result, Err(ImageError::Malformed { .. })), "got {:?}", result.err());

    let missing = Symbolizer::open(dir.path().join("missing"));
    assert!(matches!(missing, Err(ImageError::Io { .. })));
}

#[test]
fn test_cli_resolve() {
    let image = main_image().write();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_fntrace"))
        .args(["resolve", image.path().to_str().unwrap(), "0x1000", "0x1008", "0x9999"])
        .output()
        .expect("Failed to run fntrace");

    let stdout = String::from_utf8_lossy(&output.stdout);
    println!("{stdout}");
    assert!(output.status.success());
    assert!(stdout.contains("0x1000 main main.c:42"));
    assert!(stdout.contains("0x1008 <not indexed> (in main+0x8)"));
    assert!(stdout.contains("0x9999 <not indexed>\n"));
}

#[test]
fn test_cli_usage_error_exit_code() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_fntrace"))
        .args(["resolve"])
        .output()
        .expect("Failed to run fntrace");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_cli_resolve_precise() {
    let image = main_image().write();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_fntrace"))
        .args(["resolve", image.path().to_str().unwrap(), "0x1000", "--precise"])
        .output()
        .expect("Failed to run fntrace");

    let stdout = String::from_utf8_lossy(&output.stdout);
    println!("{stdout}");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("0x0000000000001000 main"));
    assert!(
        stdout.lines().map(str::trim).any(|line| line.starts_with("at ") && line.ends_with("main.c:42")),
        "no line-table location in output"
    );
}

#[test]
fn test_cli_build_id_check() {
    let image = main_image().build_id(&[0xca, 0xfe]).write();
    let path = image.path().to_str().unwrap();

    let matching = std::process::Command::new(env!("CARGO_BIN_EXE_fntrace"))
        .args(["resolve", path, "0x1000", "--build-id", "cafe"])
        .output()
        .expect("Failed to run fntrace");
    assert!(matching.status.success());
    assert!(String::from_utf8_lossy(&matching.stdout).contains("main main.c:42"));

    for command in [vec!["resolve", path, "0x1000"], vec!["functions", path]] {
        let output = std::process::Command::new(env!("CARGO_BIN_EXE_fntrace"))
            .args(&command)
            .args(["--build-id", "beef"])
            .output()
            .expect("Failed to run fntrace");

        let stderr = String::from_utf8_lossy(&output.stderr);
        println!("{} -> {stderr}", command[0]);
        assert_eq!(output.status.code(), Some(1));
        assert!(stderr.contains("build id mismatch"));
        assert!(output.stdout.is_empty(), "nothing is resolved against the wrong build");
    }
}

#[test]
fn test_cli_functions_table_feeds_decode() {
    let image = main_image().write();
    let dir = tempfile::tempdir().unwrap();
    let table_path = dir.path().join("fn.json");

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_fntrace"))
        .arg("functions")
        .arg(image.path())
        .arg("--table")
        .arg(&table_path)
        .output()
        .expect("Failed to run fntrace");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let table = FunctionTable::load(std::fs::File::open(&table_path).unwrap()).expect("decode reads this format");
    assert_eq!(table.id_for_key(0x1000), Some(FunctionId(0)));
    let main = table.get(FunctionId(0)).unwrap();
    assert_eq!((main.file.as_deref(), main.line), (Some("main.c"), Some(42)));
}
