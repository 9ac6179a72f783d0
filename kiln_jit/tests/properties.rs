//! Semantic properties of the optimizer, checked by executing graphs before
//! and after optimization.

use kiln_jit::bytecode::parse_program;
use kiln_jit::interp::{Heap, InterpError, Interpreter, Outcome, Value, DEFAULT_FUEL};
use kiln_jit::ir::{build_graph, DataType, Graph};
use kiln_jit::opt::fold::ConstantFolding;
use kiln_jit::opt::pipeline::{InstructionSet, OptPipeline, PipelineConfig};
use kiln_jit::opt::OptimizationPass;
use proptest::prelude::*;

fn compile(source: &str) -> Graph {
    let program = parse_program(source).expect("assembles");
    build_graph(&program.methods[0]).expect("builds")
}

fn optimized(source: &str, isa: InstructionSet) -> Graph {
    let mut graph = compile(source);
    OptPipeline::with_config(PipelineConfig::full().with_isa(isa))
        .run(&mut graph)
        .expect("optimizes");
    graph
}

fn run(graph: &Graph, args: &[Value]) -> Outcome {
    Interpreter::new(graph).run(args).expect("executes")
}

const INT_OPS: [(&str, &str); 11] = [
    ("iadd", "Add"),
    ("isub", "Sub"),
    ("imul", "Mul"),
    ("idiv", "Div"),
    ("irem", "Rem"),
    ("ishl", "Shl"),
    ("ishr", "Shr"),
    ("iushr", "UShr"),
    ("iand", "And"),
    ("ior", "Or"),
    ("ixor", "Xor"),
];

const LONG_OPS: [(&str, &str); 8] = [
    ("ladd", "Add"),
    ("lsub", "Sub"),
    ("lmul", "Mul"),
    ("ldiv", "Div"),
    ("lrem", "Rem"),
    ("land", "And"),
    ("lor", "Or"),
    ("lxor", "Xor"),
];

fn boundary_ints() -> impl Strategy<Value = i32> {
    prop_oneof![
        Just(0),
        Just(1),
        Just(-1),
        Just(i32::MIN),
        Just(i32::MAX),
        Just(31),
        Just(32),
        any::<i32>(),
    ]
}

fn boundary_longs() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(0),
        Just(1),
        Just(-1),
        Just(i64::MIN),
        Just(i64::MAX),
        any::<i64>(),
    ]
}

/// Loops over `a[start..end]` in the shapes bounds-check elimination
/// distinguishes.
const LOOP_SHAPES: [(&str, &str); 5] = [
    (
        "pairs",
        ".method static void Main.pairs(int[], int, int)
            iload 1
            istore 3
        head:
            iload 3
            iload 2
            if_icmpge done
            aload 0
            iload 3
            iconst 1
            iastore
            aload 0
            iload 3
            iconst 1
            iadd
            iconst 2
            iastore
            iinc 3 1
            goto head
        done:
            return
        .end",
    ),
    (
        "decreasing",
        ".method static void Main.down(int[], int, int)
            iload 2
            iconst 1
            isub
            istore 3
        head:
            iload 3
            iload 1
            if_icmplt done
            aload 0
            iload 3
            iconst 1
            iastore
            iinc 3 -1
            goto head
        done:
            return
        .end",
    ),
    (
        "inclusive",
        ".method static void Main.inclusive(int[], int, int)
            iload 1
            istore 3
        head:
            iload 3
            iload 2
            if_icmpgt done
            aload 0
            iload 3
            iconst 1
            iastore
            iinc 3 1
            goto head
        done:
            return
        .end",
    ),
    (
        "stride2",
        ".method static void Main.stride(int[], int, int)
            iload 1
            istore 3
        head:
            iload 3
            iload 2
            if_icmpge done
            aload 0
            iload 3
            iconst 1
            iastore
            iinc 3 2
            goto head
        done:
            return
        .end",
    ),
    (
        "previous",
        ".method static void Main.previous(int[], int, int)
            iload 1
            istore 3
        head:
            iload 3
            iload 2
            if_icmpge done
            aload 0
            iload 3
            iconst 1
            isub
            iload 3
            iastore
            iinc 3 1
            goto head
        done:
            return
        .end",
    ),
];

struct LoopInput {
    /// `None` passes a null array.
    len: Option<usize>,
    start: i32,
    end: i32,
}

/// Run a loop shape with `fuel`, returning the outcome, the array contents
/// afterwards and the number of steps taken.
fn execute(
    graph: &Graph,
    input: &LoopInput,
    fuel: u64,
) -> (Result<Outcome, InterpError>, Option<Vec<Value>>, u64) {
    let mut heap = Heap::default();
    let array = match input.len {
        Some(len) => heap.alloc_zeroed(len),
        None => Value::Null,
    };
    let mut interp = Interpreter::new(graph).with_heap(heap).with_fuel(fuel);
    let outcome = interp.run(&[array, Value::Int(input.start), Value::Int(input.end)]);
    let contents = match array {
        Value::Array(array) => interp.heap().contents(array, DataType::Int32),
        _ => None,
    };
    (outcome, contents, interp.steps())
}

proptest! {
    #[test]
    fn folded_int_ops_match_execution(
        op in 0..INT_OPS.len(),
        a in boundary_ints(),
        b in boundary_ints(),
    ) {
        let (mnemonic, name) = INT_OPS[op];
        let dynamic = compile(&format!(
            ".method static int Main.f(int, int)\n iload 0\n iload 1\n {mnemonic}\n ireturn\n.end\n"
        ));
        let constant = format!(
            ".method static int Main.k()\n iconst {a}\n iconst {b}\n {mnemonic}\n ireturn\n.end\n"
        );
        let folded = optimized(&constant, InstructionSet::Arm64);

        let expected = run(&dynamic, &[Value::Int(a), Value::Int(b)]);
        prop_assert_eq!(run(&folded, &[]), expected);
        if !matches!(name, "Div" | "Rem") || b != 0 {
            prop_assert_eq!(folded.count_named(name), 0);
        }
    }

    #[test]
    fn folded_long_ops_match_execution(
        op in 0..LONG_OPS.len(),
        a in boundary_longs(),
        b in boundary_longs(),
    ) {
        let (mnemonic, _) = LONG_OPS[op];
        let dynamic = compile(&format!(
            ".method static long Main.f(long, long)
                lload 0
                lload 1
                {mnemonic}
                lreturn
            .end"
        ));
        let constant = format!(
            ".method static long Main.k()\n lconst {a}\n lconst {b}\n {mnemonic}\n lreturn\n.end\n"
        );
        let folded = optimized(&constant, InstructionSet::X86_64);
        prop_assert_eq!(run(&folded, &[]), run(&dynamic, &[Value::Long(a), Value::Long(b)]));
    }

    #[test]
    fn int_rotate_round_trip(v in any::<i32>(), d in -40i32..72) {
        let source = ".method static int Main.ror(int, int)
            iload 0
            iload 1
            iushr
            iload 0
            iconst 32
            iload 1
            isub
            ishl
            ior
            ireturn
        .end";
        let plain = compile(source);
        let expected = Outcome::Return(Some(Value::Int(v.rotate_right(d as u32 & 31))));
        prop_assert_eq!(run(&plain, &[Value::Int(v), Value::Int(d)]), expected.clone());
        for isa in InstructionSet::ALL {
            let fused = optimized(source, isa);
            prop_assert_eq!(fused.count_named("Ror"), 1);
            prop_assert_eq!(run(&fused, &[Value::Int(v), Value::Int(d)]), expected.clone());
        }
    }

    #[test]
    fn long_rotate_round_trip(v in any::<i64>(), d in -70i32..140) {
        let source = ".method static long Main.rol(long, int)
            lload 0
            iload 1
            lshl
            lload 0
            iload 1
            ineg
            lushr
            lor
            lreturn
        .end";
        let plain = compile(source);
        let expected = Outcome::Return(Some(Value::Long(v.rotate_left(d as u32 & 63))));
        prop_assert_eq!(run(&plain, &[Value::Long(v), Value::Int(d)]), expected.clone());
        let fused = optimized(source, InstructionSet::Arm64);
        prop_assert_eq!(run(&fused, &[Value::Long(v), Value::Int(d)]), expected);
    }

    #[test]
    fn bce_never_hides_a_fault(
        shape in 0..LOOP_SHAPES.len(),
        len in 0usize..8,
        start in -2i32..10,
        end in -2i32..10,
        null in any::<bool>(),
    ) {
        let (name, source) = LOOP_SHAPES[shape];
        let plain = compile(source);
        let guarded = optimized(source, InstructionSet::Arm64);
        let input = LoopInput { len: (!null).then_some(len), start, end };

        let (want, want_contents, steps) = execute(&plain, &input, DEFAULT_FUEL);
        let want = want.expect("unoptimized run executes");
        // An access left without its check surfaces here as an error.
        let (got, got_contents, _) = execute(&guarded, &input, DEFAULT_FUEL);
        let got = got.unwrap_or_else(|e| panic!("{name}: {e}"));
        match got {
            Outcome::Deoptimize(_) => {
                // Stores made before the guard fired must be a state the
                // unoptimized run passes through.
                let reachable =
                    (0..=steps).any(|fuel| execute(&plain, &input, fuel).1 == got_contents);
                prop_assert!(reachable, "{}: deoptimized with {:?}", name, got_contents);
            }
            Outcome::Return(_) | Outcome::Throw(_) => {
                prop_assert_eq!(&got, &want, "{}", name);
                prop_assert_eq!(got_contents, want_contents, "{}", name);
            }
        }
    }

    #[test]
    fn statically_eliminated_loop_never_faults(len in 0usize..16) {
        let source = ".method static void Main.fill(int[])
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
        .end";
        let graph = optimized(source, InstructionSet::Arm64);
        prop_assert_eq!(graph.count_named("BoundsCheck"), 0);
        let mut interp = Interpreter::new(&graph);
        let array = interp.heap_mut().alloc_zeroed(len);
        prop_assert_eq!(interp.run(&[array]).expect("executes"), Outcome::Return(None));
        if let Value::Array(array) = array {
            let contents = interp.heap().contents(array, DataType::Int32).expect("array");
            prop_assert!(contents.iter().all(|v| *v == Value::Int(1)));
        }
    }
}

#[test]
fn test_folding_is_idempotent_after_pipeline() {
    let mut graph = optimized(
        ".method static int Main.f(int)
            iload 0
            iconst 3
            iconst 4
            imul
            iadd
            iconst 0
            ixor
            ireturn
        .end",
        InstructionSet::Arm64,
    );
    assert!(!ConstantFolding::new().run(&mut graph));
}

#[test]
fn test_rotate_scenario_gives_two_for_eight() {
    let source = ".method static int Main.ror(int)
        iload 0
        iconst 2
        iushr
        iload 0
        iconst 30
        ishl
        ior
        ireturn
    .end";
    let plain = compile(source);
    let fused = optimized(source, InstructionSet::Arm64);
    assert_eq!(fused.count_named("Ror"), 1);
    let expected = Outcome::Return(Some(Value::Int(2)));
    assert_eq!(run(&plain, &[Value::Int(8)]), expected);
    assert_eq!(run(&fused, &[Value::Int(8)]), expected);
}

#[test]
fn test_fused_neg_after_block_merge_executes() {
    let source = ".method static int Main.negShift(int)
        iload 0
        iconst 7
        iushr
        ineg
        ireturn
    .end";
    let plain = compile(source);
    let fused = optimized(source, InstructionSet::Arm64);
    assert_eq!(fused.count_named("DataProcWithShifterOp"), 1);
    fused.verify().expect("valid after fusion");
    for v in [0, 1, 127, 128, -1, i32::MIN, i32::MAX] {
        let args = [Value::Int(v)];
        assert_eq!(run(&fused, &args), run(&plain, &args), "v = {v}");
    }
}

#[test]
fn test_second_pipeline_run_keeps_graph_valid() {
    let source = ".method static int Main.twice(int, int)
        iload 0
        ifle low
        iconst 3
        istore 2
        goto join
    low:
        iconst 5
        istore 2
    join:
        iload 2
        iconst 10
        iadd
        iload 1
        imul
        iload 1
        iadd
        ireturn
    .end";
    let plain = compile(source);
    let mut graph = optimized(source, InstructionSet::Arm64);
    OptPipeline::with_config(PipelineConfig::full())
        .run(&mut graph)
        .expect("second run verifies");
    for (a, p) in [(1, 2), (0, 2), (-4, -7), (9, i32::MAX)] {
        let args = [Value::Int(a), Value::Int(p)];
        assert_eq!(run(&graph, &args), run(&plain, &args), "a = {a}, p = {p}");
    }
}
