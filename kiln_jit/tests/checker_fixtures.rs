//! Runs every `.kasm` fixture through the checker for each instruction set.

use std::fs;
use std::path::PathBuf;

use kiln_jit::checker::check_source;
use kiln_jit::opt::pipeline::{InstructionSet, PipelineConfig};

fn fixtures() -> Vec<PathBuf> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
        .expect("fixture directory")
        .map(|entry| entry.expect("readable entry").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "kasm"))
        .collect();
    paths.sort();
    paths
}

#[test]
fn test_fixtures_hold_on_every_isa() {
    let paths = fixtures();
    assert!(paths.len() >= 4, "fixtures missing: {paths:?}");

    for isa in InstructionSet::ALL {
        let config = PipelineConfig::full().with_isa(isa);
        for path in &paths {
            let source = fs::read_to_string(path).expect("readable fixture");
            let report = check_source(&source, &config)
                .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            let failures: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
            assert!(
                report.passed(),
                "{} on {isa}:\n{}\ncompile failures: {:?}",
                path.display(),
                failures.join("\n"),
                report.compile_failures
            );
            assert!(report.checked > 0, "{} checked nothing on {isa}", path.display());
        }
    }
}

#[test]
fn test_arm64_blocks_skipped_on_x86() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/arm64.kasm");
    let source = fs::read_to_string(path).expect("readable fixture");

    let arm = check_source(&source, &PipelineConfig::default().with_isa(InstructionSet::Arm64))
        .expect("checks");
    let x86 = check_source(&source, &PipelineConfig::default().with_isa(InstructionSet::X86_64))
        .expect("checks");
    assert_eq!(arm.checked, 4);
    assert_eq!(arm.skipped, 1);
    assert_eq!(x86.checked, 1);
    assert_eq!(x86.skipped, 4);
}

#[test]
fn test_wrong_expectation_is_reported() {
    let source = "
/// CHECK-START: void Main.fill(int[]) BCE (after)
/// CHECK: <<Len:i\\d+>> ArrayLength
/// CHECK: BoundsCheck
.method static void Main.fill(int[])
    iconst 0
    istore 1
head:
    iload 1
    aload 0
    arraylength
    if_icmpge done
    aload 0
    iload 1
    iconst 1
    iastore
    iinc 1 1
    goto head
done:
    return
.end
";
    let report = check_source(source, &PipelineConfig::default()).expect("checks");
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.key, "void Main.fill(int[]) BCE (after)");
    assert_eq!(failure.line, 4);
    assert_eq!(failure.bindings.len(), 1);
    assert_eq!(failure.bindings[0].0, "Len");
}
