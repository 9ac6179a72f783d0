//! Unit tests for SSA construction.
//!
//! Tests are organized by construction step:
//! - Straight-line code and guards
//! - Merges and loops (phi placement, suspend checks, preheaders)
//! - Fatal errors

use super::*;
use crate::bytecode::{parse_program, JavaType};

fn build(source: &str) -> Graph {
    let program = parse_program(source).expect("assembles");
    let graph = build_graph(&program.methods[0]).expect("builds");
    graph.verify().expect("valid graph");
    graph
}

fn build_err(source: &str) -> BuildError {
    let program = parse_program(source).expect("assembles");
    build_graph(&program.methods[0]).expect_err("build fails")
}

fn find(graph: &Graph, name: &str) -> Vec<InstId> {
    graph
        .reverse_post_order()
        .iter()
        .flat_map(|&b| {
            let bb = graph.block(b);
            bb.phis.iter().chain(&bb.instructions).copied().collect::<Vec<_>>()
        })
        .filter(|&id| graph.op(id).name() == name)
        .collect()
}

// =============================================================================
// Straight-Line Code
// =============================================================================

#[test]
fn test_builder_add_parameters() {
    let g = build(
        ".method static int Main.add(int, int)
            iload 0
            iload 1
            iadd
            ireturn
        .end",
    );
    let adds = find(&g, "Add");
    assert_eq!(adds.len(), 1);
    assert_eq!(g.inst(adds[0]).inputs.to_vec(), g.parameters().to_vec());
    let ret = find(&g, "Return");
    assert_eq!(g.input(ret[0], 0), adds[0]);
    assert_eq!(find(&g, "Exit").len(), 1);
}

#[test]
fn test_builder_constants_live_in_entry() {
    let g = build(
        ".method static int Main.k()
            iconst 7
            iconst 7
            iadd
            ireturn
        .end",
    );
    let consts = find(&g, "IntConstant");
    assert_eq!(consts.len(), 1);
    assert_eq!(g.block_of(consts[0]), g.entry);
}

#[test]
fn test_builder_array_load_guards() {
    let g = build(
        ".method static int Main.get(int[], int)
            aload 0
            iload 1
            iaload
            ireturn
        .end",
    );
    let null_check = find(&g, "NullCheck")[0];
    let length = find(&g, "ArrayLength")[0];
    let bounds = find(&g, "BoundsCheck")[0];
    let get = find(&g, "ArrayGet")[0];

    assert_eq!(g.input(length, 0), null_check);
    assert_eq!(g.inst(bounds).inputs.to_vec(), vec![g.parameters()[1], length]);
    assert_eq!(g.inst(get).inputs.to_vec(), vec![null_check, bounds]);
    assert!(g.inst(bounds).env.is_some());
    assert!(g.instruction_dominates(bounds, get));
}

#[test]
fn test_builder_array_store_guards() {
    let g = build(
        ".method static void Main.put(long[], int, long)
            aload 0
            iload 1
            lload 2
            lastore
            return
        .end",
    );
    let set = find(&g, "ArraySet")[0];
    assert_eq!(g.input(set, 2), g.parameters()[2]);
    assert_eq!(g.op(g.input(set, 1)).name(), "BoundsCheck");
    assert_eq!(find(&g, "ReturnVoid").len(), 1);
}

#[test]
fn test_builder_division_guard() {
    let g = build(
        ".method static int Main.div(int, int)
            iload 0
            iload 1
            idiv
            ireturn
        .end",
    );
    let check = find(&g, "DivZeroCheck")[0];
    let div = find(&g, "Div")[0];
    assert_eq!(g.input(div, 1), check);
    assert_eq!(g.input(check, 0), g.parameters()[1]);
}

#[test]
fn test_builder_float_division_unguarded() {
    let g = build(
        ".method static double Main.div(double, double)
            dload 0
            dload 1
            ddiv
            dreturn
        .end",
    );
    assert!(find(&g, "DivZeroCheck").is_empty());
}

#[test]
fn test_builder_environment_snapshots_locals() {
    let g = build(
        ".method static int Main.f(int[])
            iconst 3
            istore 1
            aload 0
            arraylength
            ireturn
        .end",
    );
    let check = find(&g, "NullCheck")[0];
    let env = g.inst(check).env.clone().expect("environment");
    let three = g.int_value(env.vregs[1].expect("local 1"));
    assert_eq!(env.vregs[0], Some(g.parameters()[0]));
    assert_eq!(three, Some(3));
}

#[test]
fn test_builder_iinc_and_shift() {
    let g = build(
        ".method static int Main.f(int)
            iinc 0 5
            iload 0
            iconst 2
            ishl
            ireturn
        .end",
    );
    let add = find(&g, "Add")[0];
    assert_eq!(g.int_value(g.input(add, 1)), Some(5));
    let shl = find(&g, "Shl")[0];
    assert_eq!(g.input(shl, 0), add);
}

#[test]
fn test_builder_long_compare_and_branch() {
    let g = build(
        ".method static int Main.cmp(long, long)
            lload 0
            lload 1
            lcmp
            ifge big
            iconst 0
            ireturn
        big:
            iconst 1
            ireturn
        .end",
    );
    let cmp = find(&g, "Compare")[0];
    let cond = find(&g, "GreaterThanOrEqual")[0];
    assert_eq!(g.input(cond, 0), cmp);
    assert_eq!(g.ty(cond), DataType::Bool);
    let branch = find(&g, "If")[0];
    assert_eq!(g.input(branch, 0), cond);
}

#[test]
fn test_builder_unreachable_code_dropped() {
    let g = build(
        ".method static int Main.f()
            iconst 1
            ireturn
            iconst 2
            ireturn
        .end",
    );
    assert_eq!(find(&g, "Return").len(), 1);
    assert_eq!(g.count_named("IntConstant"), 1);
}

#[test]
fn test_builder_invoke_intrinsic() {
    let g = build(
        ".method static int Main.rot(int, int)
            iload 0
            iload 1
            invokestatic int Integer.rotateRight(int, int)
            ireturn
        .end",
    );
    let call = find(&g, "InvokeStaticOrDirect")[0];
    assert_eq!(g.inst(call).inputs.len(), 2);
    assert!(g.inst(call).env.is_some());
    assert!(matches!(g.op(call), Operator::InvokeStaticOrDirect(t) if t.intrinsic.is_some()));
}

// =============================================================================
// Merges and Loops
// =============================================================================

#[test]
fn test_builder_diamond_phi() {
    let g = build(
        ".method static int Main.pick(int)
            iload 0
            ifeq zero
            iconst 10
            istore 1
            goto join
        zero:
            iconst 20
            istore 1
        join:
            iload 1
            ireturn
        .end",
    );
    let phis = find(&g, "Phi");
    assert_eq!(phis.len(), 1);
    let values: Vec<Option<i32>> = g
        .inst(phis[0])
        .inputs
        .iter()
        .map(|v| g.int_value(v))
        .collect();
    assert_eq!(values.len(), 2);
    assert!(values.contains(&Some(10)) && values.contains(&Some(20)));
    assert_eq!(g.input(find(&g, "Return")[0], 0), phis[0]);
}

#[test]
fn test_builder_same_value_merge_has_no_phi() {
    let g = build(
        ".method static int Main.f(int)
            iload 0
            ifeq skip
            nop
        skip:
            iload 0
            ireturn
        .end",
    );
    assert!(find(&g, "Phi").is_empty());
}

const SUM: &str = ".method static int Main.sum(int[])
    iconst 0
    istore 1
    iconst 0
    istore 2
loop:
    iload 2
    aload 0
    arraylength
    if_icmpge done
    iload 1
    aload 0
    iload 2
    iaload
    iadd
    istore 1
    iinc 2 1
    goto loop
done:
    iload 1
    ireturn
.end";

#[test]
fn test_builder_loop_header_phis() {
    let g = build(SUM);
    let loops = g.loops();
    assert_eq!(loops.len(), 1);
    let header = loops[0].header;

    // The array parameter does not change in the loop: no phi for it.
    let phis = g.block(header).phis.clone();
    assert_eq!(phis.len(), 2);
    for &phi in &phis {
        assert_eq!(g.inst(phi).inputs.len(), 2);
        assert_eq!(g.int_value(g.input(phi, 0)), Some(0));
        assert!(loops[0].contains(g.block_of(g.input(phi, 1))));
    }
}

#[test]
fn test_builder_loop_suspend_check_and_preheader() {
    let g = build(SUM);
    let info = g.loops()[0].clone();
    let suspend = info.suspend_check(&g).expect("suspend check");
    assert!(g.inst(suspend).env.is_some());
    let pre_header = info.pre_header(&g);
    assert!(!info.contains(pre_header));
    assert_eq!(g.block(pre_header).successors, vec![info.header]);
    assert_eq!(info.back_edges.len(), 1);
}

#[test]
fn test_builder_loop_at_method_start() {
    let g = build(
        ".method static void Main.spin(int)
        top:
            iinc 0 -1
            iload 0
            ifgt top
            return
        .end",
    );
    let info = g.loops()[0].clone();
    assert_eq!(g.block(info.header).phis.len(), 1);
    assert!(!info.contains(info.pre_header(&g)));
}

#[test]
fn test_builder_critical_edges_split() {
    let g = build(
        ".method static int Main.f(int)
            iconst 1
            istore 1
            iload 0
            ifeq out
            iconst 2
            istore 1
        out:
            iload 1
            ireturn
        .end",
    );
    for &b in g.reverse_post_order() {
        let bb = g.block(b);
        if bb.successors.len() > 1 {
            for &s in &bb.successors {
                assert_eq!(g.block(s).predecessors.len(), 1);
            }
        }
    }
    assert_eq!(find(&g, "Phi").len(), 1);
}

#[test]
fn test_builder_conflicting_dead_local_is_dropped() {
    let g = build(
        ".method static int Main.f(int)
            iload 0
            ifeq other
            iconst 1
            istore 1
            goto join
        other:
            lconst 1
            lstore 1
        join:
            iconst 0
            ireturn
        .end",
    );
    assert!(find(&g, "Phi").is_empty());
}

#[test]
fn test_builder_dead_loop_phi_removed() {
    let g = build(
        ".method static void Main.f(int)
            iconst 0
            istore 1
        loop:
            iinc 1 1
            iload 1
            iload 0
            if_icmplt loop
            return
        .end",
    );
    // Local 0 is loop invariant; local 1 feeds the exit test.
    assert_eq!(find(&g, "Phi").len(), 1);
    let add = find(&g, "Add")[0];
    assert_eq!(g.op(g.input(add, 0)).name(), "Phi");
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_builder_empty_method() {
    let sig = Signature::new(JavaType::Void, "Main", "empty", vec![]);
    let method = Method::new(sig, vec![]);
    assert!(matches!(build_graph(&method), Err(BuildError::EmptyMethod { .. })));
}

#[test]
fn test_builder_stack_underflow() {
    let err = build_err(".method static int Main.f()\n iadd\n ireturn\n.end");
    assert_eq!(
        err,
        BuildError::StackUnderflow {
            method: "int Main.f()".into(),
            pc: 0
        }
    );
}

#[test]
fn test_builder_type_mismatch() {
    let err = build_err(".method static int Main.f(long)\n iload 0\n ireturn\n.end");
    assert!(matches!(
        err,
        BuildError::TypeMismatch {
            expected: DataType::Int32,
            found: DataType::Int64,
            ..
        }
    ));
}

#[test]
fn test_builder_undefined_local() {
    let err = build_err(".method static int Main.f()\n iload 3\n ireturn\n.end");
    assert!(matches!(err, BuildError::UndefinedLocal { slot: 3, pc: 0, .. }));
}

#[test]
fn test_builder_conflicting_local_read_fails() {
    let err = build_err(
        ".method static int Main.f(int)
            iload 0
            ifeq other
            iconst 1
            istore 1
            goto join
        other:
            lconst 1
            lstore 1
        join:
            iload 1
            ireturn
        .end",
    );
    assert!(matches!(err, BuildError::UndefinedLocal { slot: 1, .. }));
}

#[test]
fn test_builder_falls_off_end() {
    let err = build_err(".method static void Main.f()\n nop\n.end");
    assert!(matches!(err, BuildError::FallOffEnd { .. }));
}

#[test]
fn test_builder_bad_return() {
    let err = build_err(".method static void Main.f()\n iconst 1\n ireturn\n.end");
    assert!(matches!(err, BuildError::BadReturn { expected: DataType::Void, .. }));
    let err = build_err(".method static int Main.f()\n return\n.end");
    assert!(matches!(err, BuildError::BadReturn { .. }));
}

#[test]
fn test_builder_unbalanced_stack() {
    let err = build_err(
        ".method static int Main.f(int)
            iload 0
            ifeq skip
            iconst 1
        skip:
            iconst 2
            ireturn
        .end",
    );
    assert!(matches!(err, BuildError::UnbalancedStack { .. }));
}
