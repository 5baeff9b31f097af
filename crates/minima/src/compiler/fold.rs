// Constant folding: a pure AST -> AST simplification pass.
// Folds arithmetic/comparison/logic over literal operands only. Never
// evaluates variables or commands and never allocates runtime containers.
// Numeric promotion and string equality follow the VM's rules.

use crate::compiler::ast::{BinaryOp, Command, Expr, ExprKind, Script, UnaryOp};

pub fn fold_script(script: &mut Script) {
    for cmd in &mut script.commands {
        fold_command(cmd);
    }
}

fn fold_command(cmd: &mut Command) {
    fold_expr(&mut cmd.head);
    for arg in &mut cmd.args {
        fold_expr(arg);
    }
}

fn fold_expr(expr: &mut Expr) {
    if expr.is_literal() {
        return;
    }

    // Recurse first so constant subtrees fold even when the parent is not
    // fully foldable (e.g. x + (1 + 2)).
    match &mut expr.kind {
        ExprKind::Binary { left, right, .. } => {
            fold_expr(left);
            fold_expr(right);
        }
        ExprKind::Unary { expr: inner, .. } => {
            fold_expr(inner);
        }
        ExprKind::Index { target, index } => {
            fold_expr(target);
            fold_expr(index);
        }
        ExprKind::Command { head, args } => {
            // Fold inside the head and arguments, but never evaluate the
            // command itself. Commands are runtime.
            fold_expr(head);
            for a in args {
                fold_expr(a);
            }
            return;
        }
        ExprKind::List { items } => {
            for item in items {
                fold_expr(item);
            }
        }
        ExprKind::Dict { items } => {
            for item in items {
                fold_expr(item);
            }
        }
        ExprKind::Pair { key, value } => {
            fold_expr(key);
            fold_expr(value);
        }
        ExprKind::Block { script } => {
            fold_script(script);
            return;
        }
        ExprKind::Member { base, .. } => {
            fold_expr(base);
            return;
        }
        _ => {}
    }

    let folded = match &expr.kind {
        ExprKind::Unary { op, expr: inner } => fold_unary(*op, inner),
        ExprKind::Binary { op, left, right } => fold_binary(*op, left, right),
        _ => None,
    };

    if let Some(kind) = folded {
        let can_fold = true;
        *expr = Expr::new(kind, expr.token.clone(), can_fold);
    }
}

fn fold_unary(op: UnaryOp, inner: &Expr) -> Option<ExprKind> {
    match (op, &inner.kind) {
        (UnaryOp::Neg, ExprKind::IntLit(v)) => Some(ExprKind::IntLit(v.wrapping_neg())),
        (UnaryOp::Neg, ExprKind::FloatLit(v)) => Some(ExprKind::FloatLit(-v)),
        (UnaryOp::Not, ExprKind::BoolLit(v)) => Some(ExprKind::BoolLit(!v)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, left: &Expr, right: &Expr) -> Option<ExprKind> {
    use ExprKind::*;

    // Logic: bool operands only.
    if let (BoolLit(a), BoolLit(b)) = (&left.kind, &right.kind) {
        return match op {
            BinaryOp::And => Some(BoolLit(*a && *b)),
            BinaryOp::Or => Some(BoolLit(*a || *b)),
            BinaryOp::Eq => Some(BoolLit(a == b)),
            BinaryOp::Neq => Some(BoolLit(a != b)),
            _ => None,
        };
    }

    // String equality compares byte content; other string ops stay runtime.
    if let (StringLit(a), StringLit(b)) = (&left.kind, &right.kind) {
        return match op {
            BinaryOp::Eq => Some(BoolLit(a == b)),
            BinaryOp::Neq => Some(BoolLit(a != b)),
            _ => None,
        };
    }

    // void == void is true; void vs anything else only folds for eq/neq.
    if matches!(left.kind, VoidLit) || matches!(right.kind, VoidLit) {
        let both_void = matches!(left.kind, VoidLit) && matches!(right.kind, VoidLit);
        return match op {
            BinaryOp::Eq => Some(BoolLit(both_void)),
            BinaryOp::Neq => Some(BoolLit(!both_void)),
            _ => None,
        };
    }

    // Numeric: promote to float when either side is float.
    enum Num {
        I(i64),
        F(f64),
    }
    let a = match left.kind {
        IntLit(v) => Num::I(v),
        FloatLit(v) => Num::F(v),
        _ => return None,
    };
    let b = match right.kind {
        IntLit(v) => Num::I(v),
        FloatLit(v) => Num::F(v),
        _ => return None,
    };

    let da = match a {
        Num::I(v) => v as f64,
        Num::F(v) => v,
    };
    let db = match b {
        Num::I(v) => v as f64,
        Num::F(v) => v,
    };

    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            if let (Num::I(x), Num::I(y)) = (&a, &b) {
                let r = match op {
                    BinaryOp::Add => x.wrapping_add(*y),
                    BinaryOp::Sub => x.wrapping_sub(*y),
                    _ => x.wrapping_mul(*y),
                };
                return Some(IntLit(r));
            }
            let r = match op {
                BinaryOp::Add => da + db,
                BinaryOp::Sub => da - db,
                _ => da * db,
            };
            Some(FloatLit(r))
        }
        // Division always yields float; fold only when the divisor is
        // non-zero so the runtime diagnostic is preserved.
        BinaryOp::Div => {
            if db == 0.0 {
                return None;
            }
            Some(FloatLit(da / db))
        }
        // Modulo is int-only and truncates operands.
        BinaryOp::Mod => {
            let (a, b) = (da as i64, db as i64);
            if b == 0 {
                return None;
            }
            Some(IntLit(a.wrapping_rem(b)))
        }
        BinaryOp::Eq => Some(BoolLit(da == db)),
        BinaryOp::Neq => Some(BoolLit(da != db)),
        BinaryOp::Lt => Some(BoolLit(da < db)),
        BinaryOp::LtEq => Some(BoolLit(da <= db)),
        BinaryOp::Gt => Some(BoolLit(da > db)),
        BinaryOp::GtEq => Some(BoolLit(da >= db)),
        BinaryOp::And | BinaryOp::Or => None,
    }
}
