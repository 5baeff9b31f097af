// Shallow typechecker.
// Infers over function bodies without whole-program analysis: literal and
// declared types propagate, everything unknown is `any` and `any` disables
// checking (the variadic-any convention builtins like print rely on).
// Typed functions additionally get a definitely-returns check.

use smol_str::SmolStr;

use crate::compiler::ast::{
    BinaryOp, Command, Expr, ExprKind, FuncSig, FuncTypeSig, Script, TypeKind, UnaryOp,
};
use crate::compiler::parser::error::{CompileError, CompileErrorKind};
use crate::compiler::parser::token::Token;
use crate::vm::Vm;

type TcResult = Result<(), CompileError>;

fn err(msg: String, tok: &Token) -> CompileError {
    CompileError::new(CompileErrorKind::Type, msg, tok.line, tok.column)
}

#[derive(Default)]
struct TcEnv {
    scopes: Vec<Vec<(SmolStr, TypeKind)>>,
}

impl TcEnv {
    fn push(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn get(&self, name: &str) -> Option<TypeKind> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, ty)) = scope.iter().find(|(n, _)| n == name) {
                return Some(*ty);
            }
        }
        None
    }

    fn set(&mut self, name: &str, ty: TypeKind) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(entry) = scope.iter_mut().find(|(n, _)| n == name) {
                entry.1 = ty;
                return;
            }
        }
        if let Some(top) = self.scopes.last_mut() {
            top.push((SmolStr::new(name), ty));
        }
    }
}

struct Typecheck<'a> {
    vm: &'a mut Vm,
    /// Script-level function signatures, gathered up front so forward
    /// references check.
    local_sigs: Vec<FuncSig>,
}

fn is_numeric(t: TypeKind) -> bool {
    matches!(t, TypeKind::Int | TypeKind::Float)
}

fn compatible(got: TypeKind, expected: TypeKind) -> bool {
    expected == TypeKind::Any
        || got == TypeKind::Any
        || got == expected
        // Int arguments promote into float parameters.
        || (expected == TypeKind::Float && got == TypeKind::Int)
}

impl<'a> Typecheck<'a> {
    fn local_sig(&self, name: &str) -> Option<&FuncSig> {
        self.local_sigs.iter().find(|s| s.name.as_str() == name)
    }

    fn infer_expr(&mut self, e: &Expr, env: &TcEnv) -> Result<TypeKind, CompileError> {
        match &e.kind {
            ExprKind::IntLit(_) => Ok(TypeKind::Int),
            ExprKind::FloatLit(_) => Ok(TypeKind::Float),
            ExprKind::StringLit(_) => Ok(TypeKind::String),
            ExprKind::BoolLit(_) => Ok(TypeKind::Bool),
            ExprKind::VoidLit => Ok(TypeKind::Void),
            ExprKind::Var { name } => Ok(env.get(name).unwrap_or(TypeKind::Any)),
            ExprKind::Member { .. } => Ok(TypeKind::Any),
            ExprKind::Index { target, index } => {
                self.infer_expr(target, env)?;
                self.infer_expr(index, env)?;
                Ok(TypeKind::Any)
            }
            ExprKind::Unary { op, expr } => {
                let t = self.infer_expr(expr, env)?;
                match op {
                    UnaryOp::Neg => {
                        if t != TypeKind::Any && !is_numeric(t) {
                            return Err(err(
                                format!("unary '-' requires a number, got {}", t.name()),
                                &expr.token,
                            ));
                        }
                        Ok(t)
                    }
                    UnaryOp::Not => {
                        if t != TypeKind::Any && t != TypeKind::Bool {
                            return Err(err(
                                format!("'!' requires a bool, got {}", t.name()),
                                &expr.token,
                            ));
                        }
                        Ok(TypeKind::Bool)
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let lt = self.infer_expr(left, env)?;
                let rt = self.infer_expr(right, env)?;
                match op {
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                        self.require_numeric(lt, &left.token)?;
                        self.require_numeric(rt, &right.token)?;
                        if lt == TypeKind::Float || rt == TypeKind::Float {
                            Ok(TypeKind::Float)
                        } else if lt == TypeKind::Int && rt == TypeKind::Int {
                            Ok(TypeKind::Int)
                        } else {
                            Ok(TypeKind::Any)
                        }
                    }
                    BinaryOp::Div => {
                        self.require_numeric(lt, &left.token)?;
                        self.require_numeric(rt, &right.token)?;
                        Ok(TypeKind::Float)
                    }
                    BinaryOp::Mod => {
                        self.require_numeric(lt, &left.token)?;
                        self.require_numeric(rt, &right.token)?;
                        Ok(TypeKind::Int)
                    }
                    BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                        self.require_numeric(lt, &left.token)?;
                        self.require_numeric(rt, &right.token)?;
                        Ok(TypeKind::Bool)
                    }
                    BinaryOp::Eq | BinaryOp::Neq => Ok(TypeKind::Bool),
                    BinaryOp::And | BinaryOp::Or => {
                        for (t, tok) in [(lt, &left.token), (rt, &right.token)] {
                            if t != TypeKind::Any && t != TypeKind::Bool {
                                return Err(err(
                                    format!("logic operand must be bool, got {}", t.name()),
                                    tok,
                                ));
                            }
                        }
                        Ok(TypeKind::Bool)
                    }
                }
            }
            ExprKind::List { items } => {
                for item in items {
                    self.infer_expr(item, env)?;
                }
                Ok(TypeKind::List)
            }
            ExprKind::Dict { items } => {
                for item in items {
                    self.infer_expr(item, env)?;
                }
                Ok(TypeKind::Dict)
            }
            ExprKind::Pair { key, value } => {
                self.infer_expr(key, env)?;
                self.infer_expr(value, env)?;
                Ok(TypeKind::Any)
            }
            ExprKind::Block { .. } => Ok(TypeKind::Block),
            ExprKind::Command { head, args } => self.infer_call(e, head, args, env),
        }
    }

    fn require_numeric(&self, t: TypeKind, tok: &Token) -> TcResult {
        if t != TypeKind::Any && !is_numeric(t) {
            return Err(err(format!("arithmetic requires numbers, got {}", t.name()), tok));
        }
        Ok(())
    }

    fn infer_call(
        &mut self,
        call: &Expr,
        head: &Expr,
        args: &[Expr],
        env: &TcEnv,
    ) -> Result<TypeKind, CompileError> {
        let ExprKind::StringLit(name) = &head.kind else {
            for arg in args {
                self.infer_expr(arg, env)?;
            }
            return Ok(TypeKind::Any);
        };

        // Special forms have no signature; argument shapes were fixed at
        // lowering time.
        if matches!(
            name.as_str(),
            "set" | "if" | "while" | "foreach" | "return" | "cmd" | "call" | "break" | "continue"
        ) {
            for arg in args {
                self.infer_expr(arg, env)?;
            }
            return Ok(TypeKind::Any);
        }

        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            arg_types.push(self.infer_expr(arg, env)?);
        }

        // Script-local functions first, then runtime signatures.
        let local = self
            .local_sig(name)
            .map(|l| FuncTypeSig::exact(l.ret_type, l.params.iter().map(|p| p.ty).collect()));
        let sig = match local {
            Some(sig) => Some(sig),
            None => self.vm.find_sig(name),
        };

        let Some(sig) = sig else {
            return Ok(TypeKind::Any);
        };

        if !sig.is_variadic && args.len() != sig.param_types.len() {
            return Err(err(
                format!("{name}: expected {} args, got {}", sig.param_types.len(), args.len()),
                &call.token,
            ));
        }
        if sig.is_variadic && args.len() < sig.param_types.len() {
            return Err(err(
                format!(
                    "{name}: expected at least {} args, got {}",
                    sig.param_types.len(),
                    args.len()
                ),
                &call.token,
            ));
        }

        for (i, expected) in sig.param_types.iter().enumerate() {
            if i >= arg_types.len() {
                break;
            }
            if !compatible(arg_types[i], *expected) {
                return Err(err(
                    format!(
                        "{name}: arg {i} expected {}, got {}",
                        expected.name(),
                        arg_types[i].name()
                    ),
                    &args[i].token,
                ));
            }
        }
        // Tail type `any` stays unchecked by convention.
        if sig.is_variadic && sig.variadic_type != TypeKind::Any {
            for (i, t) in arg_types.iter().enumerate().skip(sig.param_types.len()) {
                if !compatible(*t, sig.variadic_type) {
                    return Err(err(
                        format!(
                            "{name}: arg {i} expected {}, got {}",
                            sig.variadic_type.name(),
                            t.name()
                        ),
                        &args[i].token,
                    ));
                }
            }
        }

        Ok(sig.ret_type)
    }

    //----------------------------------------------------------
    // Statements
    //----------------------------------------------------------

    fn check_command(
        &mut self,
        cmd: &Command,
        env: &mut TcEnv,
        fn_sig: Option<&FuncSig>,
    ) -> TcResult {
        // func declaration: check the body under its own environment.
        if let Some(sig) = &cmd.func_sig {
            let sig = sig.clone();
            let ExprKind::Block { script } = &cmd.args[cmd.args.len() - 1].kind else {
                return Ok(());
            };
            let mut body_env = TcEnv::default();
            body_env.push();
            for p in &sig.params {
                body_env.set(&p.name, p.ty);
            }
            self.check_script(script, &mut body_env, Some(&sig))?;

            if sig.ret_type != TypeKind::Void
                && sig.ret_type != TypeKind::Any
                && !script_definitely_returns(script)
            {
                return Err(err(
                    format!("{}: not all paths return a value", sig.name),
                    &sig.name_tok,
                ));
            }
            return Ok(());
        }

        if cmd.head.is_lit_string("set") && cmd.args.len() == 2 {
            let ty = self.infer_expr(&cmd.args[1], env)?;
            if let ExprKind::StringLit(name) = &cmd.args[0].kind {
                env.set(name, ty);
            } else {
                self.infer_expr(&cmd.args[0], env)?;
            }
            return Ok(());
        }

        if cmd.head.is_lit_string("return") {
            let got = match cmd.args.first() {
                Some(value) => self.infer_expr(value, env)?,
                None => TypeKind::Void,
            };
            if let Some(sig) = fn_sig {
                if !compatible(got, sig.ret_type) {
                    return Err(err(
                        format!(
                            "{}: returns {}, declared {}",
                            sig.name,
                            got.name(),
                            sig.ret_type.name()
                        ),
                        &cmd.head.token,
                    ));
                }
            }
            return Ok(());
        }

        if cmd.head.is_lit_string("if") {
            let mut it = cmd.args.iter();
            while let Some(first) = it.next() {
                if first.is_lit_string("elseif") {
                    continue;
                }
                if first.is_lit_string("else") {
                    if let Some(body) = it.next() {
                        self.check_branch(body, env, fn_sig)?;
                    }
                    break;
                }
                self.infer_expr(first, env)?;
                if let Some(body) = it.next() {
                    self.check_branch(body, env, fn_sig)?;
                }
            }
            return Ok(());
        }

        if cmd.head.is_lit_string("while") {
            if let Some(cond) = cmd.args.first() {
                self.infer_expr(cond, env)?;
            }
            if let Some(body) = cmd.args.get(1) {
                self.check_branch(body, env, fn_sig)?;
            }
            return Ok(());
        }

        if cmd.head.is_lit_string("foreach") {
            if let Some(container) = cmd.args.get(1) {
                if !matches!(container.kind, ExprKind::StringLit(_)) {
                    self.infer_expr(container, env)?;
                }
            }
            if let (Some(var_name), Some(body)) = (cmd.args.first(), cmd.args.get(2)) {
                if let (ExprKind::StringLit(name), ExprKind::Block { script }) =
                    (&var_name.kind, &body.kind)
                {
                    env.push();
                    env.set(name, TypeKind::Any);
                    let result = self.check_script(script, env, fn_sig);
                    env.pop();
                    result?;
                }
            }
            return Ok(());
        }

        // Generic command statement.
        let call = Expr::new(
            ExprKind::Command {
                head: Box::new(cmd.head.clone()),
                args: cmd.args.to_vec(),
            },
            cmd.head.token.clone(),
            false,
        );
        self.infer_expr(&call, env)?;
        Ok(())
    }

    fn check_branch(&mut self, body: &Expr, env: &mut TcEnv, fn_sig: Option<&FuncSig>) -> TcResult {
        if let ExprKind::Block { script } = &body.kind {
            env.push();
            let result = self.check_script(script, env, fn_sig);
            env.pop();
            return result;
        }
        self.infer_expr(body, env)?;
        Ok(())
    }

    fn check_script(
        &mut self,
        script: &Script,
        env: &mut TcEnv,
        fn_sig: Option<&FuncSig>,
    ) -> TcResult {
        for cmd in &script.commands {
            self.check_command(cmd, env, fn_sig)?;
        }
        Ok(())
    }
}

fn command_definitely_returns(cmd: &Command) -> bool {
    if cmd.head.is_lit_string("return") {
        return true;
    }
    // An if-chain returns when every branch returns and an else exists.
    if cmd.head.is_lit_string("if") {
        let mut has_else = false;
        let mut all_return = true;
        let mut it = cmd.args.iter();
        while let Some(first) = it.next() {
            if first.is_lit_string("elseif") {
                continue;
            }
            if first.is_lit_string("else") {
                has_else = true;
                if let Some(body) = it.next() {
                    all_return &= branch_returns(body);
                }
                break;
            }
            // condition; next is the branch body
            if let Some(body) = it.next() {
                all_return &= branch_returns(body);
            }
        }
        return has_else && all_return;
    }
    false
}

fn branch_returns(body: &Expr) -> bool {
    match &body.kind {
        ExprKind::Block { script } => script_definitely_returns(script),
        _ => false,
    }
}

fn script_definitely_returns(script: &Script) -> bool {
    script.commands.iter().any(command_definitely_returns)
}

/// Typecheck a parsed script against the VM's registered signatures.
pub fn typecheck_script(vm: &mut Vm, script: &Script) -> Result<(), CompileError> {
    let local_sigs: Vec<FuncSig> =
        script.commands.iter().filter_map(|c| c.func_sig.clone()).collect();

    let mut tc = Typecheck { vm, local_sigs };
    let mut env = TcEnv::default();
    env.push();
    tc.check_script(script, &mut env, None)
}
