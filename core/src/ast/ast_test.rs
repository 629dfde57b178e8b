use crate::ast::build::TuBuilder;
use crate::ast::{SourcePos, StmtKind, offset_to_pos};

#[test]
fn test_offset_to_pos() {
    let text = "int a;\nint b;\nvoid f() {}\n";

    assert_eq!(offset_to_pos(text, 0), SourcePos::new(1, 1, 0));
    assert_eq!(offset_to_pos(text, 4), SourcePos::new(1, 5, 4));
    assert_eq!(offset_to_pos(text, 7), SourcePos::new(2, 1, 7));
    assert_eq!(offset_to_pos(text, 14), SourcePos::new(3, 1, 14));
}

#[test]
fn test_pos_ordering_is_by_offset() {
    let a = SourcePos::new(1, 9, 8);
    let b = SourcePos::new(2, 1, 10);
    assert!(a < b);
    // Line and column do not participate in equality.
    assert_eq!(a, SourcePos::new(9, 9, 8));
    assert_eq!(a.to_string(), "1:9");
}

#[test]
fn test_outermost_capturing_stmt() {
    let src = "void f() {\n    while (1) {\n        x = 1;\n    }\n}\n";
    let mut b = TuBuilder::new("f.c", src);
    let body = b.stmt_over(StmtKind::Compound, "{\n    while (1) {\n        x = 1;\n    }\n}", None);
    let inner = b.stmt_over(StmtKind::Compound, "{\n        x = 1;\n    }", Some(body));
    let assign = b.stmt_over(StmtKind::Other, "x = 1", Some(inner));
    let w = b.stmt_over(StmtKind::While { body: inner }, "while (1) {\n        x = 1;\n    }", Some(body));
    // Fix the nesting: the inner compound hangs off the while.
    let mut tu = b.finish();
    tu.stmts[inner.0 as usize].parent = Some(w);

    assert_eq!(tu.outermost_capturing_stmt(body, assign), Some(w));
    assert_eq!(tu.outermost_capturing_stmt(body, w), Some(w));
    assert_eq!(tu.outermost_capturing_stmt(body, body), Some(body));
    // A statement outside the ancestor chain cannot be anchored.
    assert_eq!(tu.outermost_capturing_stmt(assign, w), None);
}

#[test]
fn test_semi_terminated_stmt() {
    let src = "void f() {\n    if (c)\n        x = 1;\n}\n";
    let mut b = TuBuilder::new("f.c", src);
    let body = b.stmt_over(StmtKind::Compound, "{\n    if (c)\n        x = 1;\n}", None);
    let iff = b.stmt_over(StmtKind::If, "if (c)\n        x = 1", Some(body));
    let assign = b.stmt_over(StmtKind::Other, "x = 1", Some(iff));
    let tu = b.finish();

    // The braceless arm resolves up to the if statement.
    assert_eq!(tu.semi_terminated_stmt(assign), iff);
    assert_eq!(tu.semi_terminated_stmt(iff), iff);
}

#[test]
fn test_directive_captured_end() {
    let src = "void f() {\n    #pragma omp target\n    {\n        x = 1;\n    }\n}\n";
    let mut b = TuBuilder::new("f.c", src);
    let body = b.stmt_over(StmtKind::Compound, "{\n    #pragma omp target\n    {\n        x = 1;\n    }\n}", None);
    let captured = b.stmt_over(StmtKind::Compound, "{\n        x = 1;\n    }", None);
    let dir = b.stmt_over(
        StmtKind::Directive {
            captured: Some(captured),
            kernel: true,
            atomic: false,
        },
        "#pragma omp target",
        Some(body),
    );
    let mut tu = b.finish();
    tu.stmts[captured.0 as usize].parent = Some(dir);

    assert_eq!(tu.directive_captured_end(dir), tu.stmt(captured).end);
    assert_eq!(tu.directive_captured_end(captured), tu.stmt(captured).end);
}

#[test]
fn test_builder_position_anchors() {
    let src = "a = 1;\na = 2;\n";
    let b = TuBuilder::new("f.c", src);
    assert_eq!(b.pos("a = "), SourcePos::new(1, 1, 0));
    assert_eq!(b.pos_nth("a = ", 1), SourcePos::new(2, 1, 7));
    assert_eq!(b.pos_after("a = 1"), SourcePos::new(1, 6, 5));
}
