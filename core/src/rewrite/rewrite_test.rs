use crate::access::AccessMode;
use crate::ast::build::TuBuilder;
use crate::ast::{AstEvent, CmpOp, ForParts, IndexExpr, LoopCond, LoopInit, LoopStep, Operand, StmtId, StmtKind, TranslationUnit};
use crate::driver::{AnalyzerOptions, analyze_unit};

fn kernel(
    b: &mut TuBuilder,
    brace_nth: usize,
    close_pat: &str,
    close_nth: usize,
    pragma_nth: usize,
    parent: StmtId,
) -> (StmtId, StmtId) {
    let begin = b.pos_nth("{", brace_nth);
    let end = b.pos_after_nth(close_pat, close_nth);
    let captured = b.stmt(StmtKind::Compound, begin, end, None);
    let dir = b.stmt_over_nth(
        StmtKind::Directive {
            captured: Some(captured),
            kernel: true,
            atomic: false,
        },
        "#pragma omp target",
        pragma_nth,
        Some(parent),
    );
    b.set_parent(captured, dir);
    (dir, captured)
}

fn sub_lit(n: i64) -> IndexExpr {
    IndexExpr {
        vars: vec![],
        literal: Some(n),
    }
}

/// Kernel writes `a[0]`, host reads it after the region.
fn single_kernel_unit() -> TranslationUnit {
    let src = "void reduce(int *a, int n) {\n    #pragma omp target\n    {\n        a[0] = n;\n    }\n    int x = a[0];\n}\n";
    let mut b = TuBuilder::new("reduce.c", src);
    let a = b.pointer("a", false);
    let n = b.scalar("n");
    let x = b.scalar("x");

    let body_begin = b.pos("{");
    let body_end = b.pos_after("\n}");
    let body = b.stmt(StmtKind::Compound, body_begin, body_end, None);
    let (dir, cap) = kernel(&mut b, 1, "    }", 0, 0, body);
    let assign = b.stmt_over(StmtKind::Other, "a[0] = n", Some(cap));
    let x_decl = b.stmt_over(StmtKind::Other, "int x = a[0]", Some(body));

    b.function("reduce", b.pos("void"), body, vec![a, n]);
    b.event(AstEvent::Directive {
        stmt: dir,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[0]"),
        stmt: assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::ArraySubscript {
        base: a,
        pos: b.pos("a[0]"),
        index: sub_lit(0),
    });
    b.event(AstEvent::Access {
        var: n,
        pos: b.pos("n;"),
        stmt: assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    b.event(AstEvent::LocalDecl {
        var: x,
        stmt: x_decl,
        has_init: true,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos_nth("a[0]", 1),
        stmt: x_decl,
        mode: AccessMode::Read,
        overwrite: false,
    });

    b.finish()
}

#[test]
fn test_single_kernel_extends_its_own_pragma() {
    let tu = single_kernel_unit();
    let out = analyze_unit(&tu, &AnalyzerOptions::default());
    assert!(out.changed);
    assert_eq!(
        out.source,
        "void reduce(int *a, int n) {\n    #pragma omp target firstprivate(n) map(from:a)\n    {\n        a[0] = n;\n    }\n    int x = a[0];\n}\n"
    );
}

/// Two kernels with a host mutation between them.
fn pipeline_unit() -> TranslationUnit {
    let src = "void pipeline(int *a, int n) {\n    #pragma omp target\n    {\n        a[0] = n;\n    }\n    a[1] = 5;\n    #pragma omp target\n    {\n        a[2] = a[1];\n    }\n}\n";
    let mut b = TuBuilder::new("pipeline.c", src);
    let a = b.pointer("a", false);
    let n = b.scalar("n");

    let body_begin = b.pos("{");
    let body_end = b.pos_after("\n}");
    let body = b.stmt(StmtKind::Compound, body_begin, body_end, None);
    let (dir1, cap1) = kernel(&mut b, 1, "    }", 0, 0, body);
    let k1_assign = b.stmt_over(StmtKind::Other, "a[0] = n", Some(cap1));
    let mutation = b.stmt_over(StmtKind::Other, "a[1] = 5", Some(body));
    let (dir2, cap2) = kernel(&mut b, 2, "    }", 1, 1, body);
    let k2_assign = b.stmt_over(StmtKind::Other, "a[2] = a[1]", Some(cap2));

    b.function("pipeline", b.pos("void"), body, vec![a, n]);
    b.event(AstEvent::Directive {
        stmt: dir1,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[0]"),
        stmt: k1_assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: n,
        pos: b.pos("n;"),
        stmt: k1_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[1]"),
        stmt: mutation,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::ArraySubscript {
        base: a,
        pos: b.pos("a[1]"),
        index: sub_lit(1),
    });
    b.event(AstEvent::Directive {
        stmt: dir2,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[2]"),
        stmt: k2_assign,
        mode: AccessMode::ReadWrite,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos_nth("a[1]", 1),
        stmt: k2_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });

    b.finish()
}

#[test]
fn test_multi_kernel_region_is_wrapped_and_updated() {
    let tu = pipeline_unit();
    let out = analyze_unit(&tu, &AnalyzerOptions::default());
    assert!(out.changed);
    assert_eq!(
        out.source,
        concat!(
            "void pipeline(int *a, int n) {\n",
            "    #pragma omp target data map(from:a)\n",
            "    {\n",
            "        #pragma omp target firstprivate(n)\n",
            "        {\n",
            "            a[0] = n;\n",
            "        }\n",
            "        a[1] = 5;\n",
            "        #pragma omp target update to(a)\n",
            "        #pragma omp target\n",
            "        {\n",
            "            a[2] = a[1];\n",
            "        }\n",
            "    }\n",
            "\n",
            "}\n",
        )
    );
}

#[test]
fn test_analysis_is_deterministic() {
    let tu = pipeline_unit();
    let first = analyze_unit(&tu, &AnalyzerOptions::default());
    let second = analyze_unit(&tu, &AnalyzerOptions::default());
    assert_eq!(first.source, second.source);
}

#[test]
fn test_unit_without_offload_is_untouched() {
    let src = "void plain(int *a) {\n    a[0] = 1;\n}\n";
    let mut b = TuBuilder::new("plain.c", src);
    let a = b.pointer("a", false);
    let body_begin = b.pos("{");
    let body_end = b.pos_after("\n}");
    let body = b.stmt(StmtKind::Compound, body_begin, body_end, None);
    let assign = b.stmt_over(StmtKind::Other, "a[0] = 1", Some(body));
    b.function("plain", b.pos("void"), body, vec![a]);
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[0]"),
        stmt: assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    let tu = b.finish();

    let out = analyze_unit(&tu, &AnalyzerOptions::default());
    assert!(!out.changed);
    assert_eq!(out.source, tu.source);
    assert!(out.diagnostics.is_empty());
}

/// Device-resident array read on the host through a loop index: the
/// update hoists to the loop boundary.
#[test]
fn test_hoisted_update_from_lands_before_the_loop() {
    let src = "void stage(int *a, int *b, int n) {\n    #pragma omp target\n    {\n        a[0] = n;\n    }\n    int s = 0;\n    for (int j = 0; j < n; ++j) {\n        s = s + a[j];\n    }\n    #pragma omp target\n    {\n        b[0] = a[0];\n    }\n}\n";
    let mut b = TuBuilder::new("stage.c", src);
    let a = b.pointer("a", false);
    let bb = b.pointer("b", false);
    let n = b.scalar("n");
    let s = b.scalar("s");
    let j = b.scalar("j");

    let body_begin = b.pos("{");
    let body_end = b.pos_after("\n}");
    let body = b.stmt(StmtKind::Compound, body_begin, body_end, None);
    let (dir1, cap1) = kernel(&mut b, 1, "    }", 0, 0, body);
    let a_assign = b.stmt_over(StmtKind::Other, "a[0] = n", Some(cap1));
    let s_decl = b.stmt_over(StmtKind::Other, "int s = 0", Some(body));
    let for_body_begin = b.pos_nth("{", 2);
    let for_body_end = b.pos_after_nth("    }", 1);
    let for_body = b.stmt(StmtKind::Compound, for_body_begin, for_body_end, None);
    let for_stmt = b.stmt_over(
        StmtKind::For { body: for_body },
        "for (int j = 0; j < n; ++j) {\n        s = s + a[j];\n    }",
        Some(body),
    );
    b.set_parent(for_body, for_stmt);
    let s_assign = b.stmt_over(StmtKind::Other, "s = s + a[j]", Some(for_body));
    let (dir2, cap2) = kernel(&mut b, 3, "    }", 2, 1, body);
    let b_assign = b.stmt_over(StmtKind::Other, "b[0] = a[0]", Some(cap2));

    b.function("stage", b.pos("void"), body, vec![a, bb, n]);
    b.event(AstEvent::Directive {
        stmt: dir1,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[0]"),
        stmt: a_assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: n,
        pos: b.pos("n;"),
        stmt: a_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    b.event(AstEvent::LocalDecl {
        var: s,
        stmt: s_decl,
        has_init: true,
    });
    b.event(AstEvent::Loop {
        stmt: for_stmt,
        parts: Some(ForParts {
            init: Some(LoopInit {
                var: j,
                value: Operand::Literal(0),
            }),
            cond: Some(LoopCond {
                op: CmpOp::Lt,
                lhs: Operand::Var(j),
                rhs: Operand::Var(n),
            }),
            step: Some(LoopStep { var: j, ascending: true }),
        }),
    });
    b.event(AstEvent::LocalDecl {
        var: j,
        stmt: for_stmt,
        has_init: true,
    });
    b.event(AstEvent::Access {
        var: s,
        pos: b.pos("s = s"),
        stmt: s_assign,
        mode: AccessMode::ReadWrite,
        overwrite: true,
    });
    b.event(AstEvent::ArraySubscript {
        base: a,
        pos: b.pos("a[j]"),
        index: IndexExpr {
            vars: vec![j],
            literal: None,
        },
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[j]"),
        stmt: s_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    b.event(AstEvent::Directive {
        stmt: dir2,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: bb,
        pos: b.pos("b[0]"),
        stmt: b_assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos_nth("a[0]", 1),
        stmt: b_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    let tu = b.finish();

    let out = analyze_unit(&tu, &AnalyzerOptions::default());
    assert!(out.source.contains("#pragma omp target data map(alloc:a) map(from:b)"));
    // Exactly one copy, outside the loop, directly before it.
    assert_eq!(out.source.matches("update from(a)").count(), 1);
    assert!(
        out.source
            .contains("        #pragma omp target update from(a)\n        for (int j = 0; j < n; ++j) {"),
        "directive not hoisted before the loop:\n{}",
        out.source
    );
    assert!(out.source.contains("#pragma omp target firstprivate(n)"));
}

/// A host write in a braceless conditional arm: the update lands after
/// the whole conditional, not inside the arm.
#[test]
fn test_conditional_write_updates_after_the_if() {
    let src = "void guard(int *a, int c, int n) {\n    #pragma omp target\n    {\n        a[0] = n;\n    }\n    if (c)\n        a[1] = 2;\n    #pragma omp target\n    {\n        a[2] = a[1];\n    }\n}\n";
    let mut b = TuBuilder::new("guard.c", src);
    let a = b.pointer("a", false);
    let c = b.scalar("c");
    let n = b.scalar("n");

    let body_begin = b.pos("{");
    let body_end = b.pos_after("\n}");
    let body = b.stmt(StmtKind::Compound, body_begin, body_end, None);
    let (dir1, cap1) = kernel(&mut b, 1, "    }", 0, 0, body);
    let k1_assign = b.stmt_over(StmtKind::Other, "a[0] = n", Some(cap1));
    let if_stmt = b.stmt_over(StmtKind::If, "if (c)\n        a[1] = 2", Some(body));
    let arm_assign = b.stmt_over(StmtKind::Other, "a[1] = 2", Some(if_stmt));
    let (dir2, cap2) = kernel(&mut b, 2, "    }", 1, 1, body);
    let k2_assign = b.stmt_over(StmtKind::Other, "a[2] = a[1]", Some(cap2));

    b.function("guard", b.pos("void"), body, vec![a, c, n]);
    b.event(AstEvent::Directive {
        stmt: dir1,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[0]"),
        stmt: k1_assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: n,
        pos: b.pos("n;"),
        stmt: k1_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    b.event(AstEvent::Cond {
        stmt: if_stmt,
        arms: vec![],
    });
    b.event(AstEvent::Access {
        var: c,
        pos: b.pos("c)"),
        stmt: if_stmt,
        mode: AccessMode::Read,
        overwrite: false,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[1]"),
        stmt: arm_assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::ArraySubscript {
        base: a,
        pos: b.pos("a[1]"),
        index: sub_lit(1),
    });
    b.event(AstEvent::Directive {
        stmt: dir2,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[2]"),
        stmt: k2_assign,
        mode: AccessMode::ReadWrite,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos_nth("a[1]", 1),
        stmt: k2_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    let tu = b.finish();

    let out = analyze_unit(&tu, &AnalyzerOptions::default());
    assert!(
        out.source.contains("a[1] = 2;\n        #pragma omp target update to(a)\n"),
        "update not placed after the conditional:\n{}",
        out.source
    );
}

/// Kernel inside a host loop: the copy in goes after the host write,
/// the copy back sits at the end of the loop body.
#[test]
fn test_loop_carried_updates_inside_the_loop_body() {
    let src = "void iter(int *a, int n) {\n    for (int k = 0; k < n; ++k) {\n        a[0] = k;\n        #pragma omp target\n        {\n            a[1] = a[0];\n        }\n    }\n}\n";
    let mut b = TuBuilder::new("iter.c", src);
    let a = b.pointer("a", false);
    let n = b.scalar("n");
    let k = b.scalar("k");

    let body_begin = b.pos("{");
    let body_end = b.pos_after("\n}");
    let body = b.stmt(StmtKind::Compound, body_begin, body_end, None);
    let for_body_begin = b.pos_nth("{", 1);
    let for_body_end = b.pos_after("    }\n}");
    let for_body = b.stmt(StmtKind::Compound, for_body_begin, for_body_end, None);
    let for_stmt = {
        let begin = b.pos("for (");
        b.stmt(StmtKind::For { body: for_body }, begin, for_body_end, Some(body))
    };
    b.set_parent(for_body, for_stmt);
    let host_assign = b.stmt_over(StmtKind::Other, "a[0] = k", Some(for_body));
    let (dir, cap) = kernel(&mut b, 2, "        }", 0, 0, for_body);
    let k_assign = b.stmt_over(StmtKind::Other, "a[1] = a[0]", Some(cap));

    b.function("iter", b.pos("void"), body, vec![a, n]);
    b.event(AstEvent::Loop {
        stmt: for_stmt,
        parts: Some(ForParts {
            init: Some(LoopInit {
                var: k,
                value: Operand::Literal(0),
            }),
            cond: Some(LoopCond {
                op: CmpOp::Lt,
                lhs: Operand::Var(k),
                rhs: Operand::Var(n),
            }),
            step: Some(LoopStep { var: k, ascending: true }),
        }),
    });
    b.event(AstEvent::LocalDecl {
        var: k,
        stmt: for_stmt,
        has_init: true,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[0]"),
        stmt: host_assign,
        mode: AccessMode::Write,
        overwrite: true,
    });
    b.event(AstEvent::ArraySubscript {
        base: a,
        pos: b.pos("a[0]"),
        index: sub_lit(0),
    });
    b.event(AstEvent::Directive {
        stmt: dir,
        private_vars: vec![],
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos("a[1]"),
        stmt: k_assign,
        mode: AccessMode::ReadWrite,
        overwrite: true,
    });
    b.event(AstEvent::Access {
        var: a,
        pos: b.pos_nth("a[0]", 1),
        stmt: k_assign,
        mode: AccessMode::Read,
        overwrite: false,
    });
    let tu = b.finish();

    let out = analyze_unit(&tu, &AnalyzerOptions::default());
    assert!(out.source.contains("#pragma omp target data map(alloc:a)"));
    assert!(
        out.source.contains("a[0] = k;\n            #pragma omp target update to(a)"),
        "copy-in not placed after the host write:\n{}",
        out.source
    );
    assert!(
        out.source.contains("            #pragma omp target update from(a)\n        }"),
        "copy-back not placed at the loop body end:\n{}",
        out.source
    );
}
