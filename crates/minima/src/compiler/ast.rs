// Command-form AST.
// Every statement lowers to a Command = (head expression, argument list).
// Control flow keeps its surface shape only until lowering; the compiler
// recognizes conventional head strings ("set", "if", "while", ...) later.

use smol_str::SmolStr;

use crate::compiler::parser::token::Token;

/// The closed set of declarable types. Discriminants are encoded into
/// signature lists ([ret, fixed_count, t0..tN-1, variadic_or_-1]) and the
/// MX-independent runtime signature checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum TypeKind {
    Void = 0,
    Bool,
    Int,
    Float,
    String,
    List,
    Dict,
    Block,
    Func,
    Any,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Void => "void",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::String => "string",
            TypeKind::List => "list",
            TypeKind::Dict => "dict",
            TypeKind::Block => "block",
            TypeKind::Func => "func",
            TypeKind::Any => "any",
        }
    }

    pub fn from_i64(v: i64) -> Option<TypeKind> {
        match v {
            0 => Some(TypeKind::Void),
            1 => Some(TypeKind::Bool),
            2 => Some(TypeKind::Int),
            3 => Some(TypeKind::Float),
            4 => Some(TypeKind::String),
            5 => Some(TypeKind::List),
            6 => Some(TypeKind::Dict),
            7 => Some(TypeKind::Block),
            8 => Some(TypeKind::Func),
            9 => Some(TypeKind::Any),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<TypeKind> {
        match name {
            "void" | "()" => Some(TypeKind::Void),
            "bool" => Some(TypeKind::Bool),
            "int" => Some(TypeKind::Int),
            "float" => Some(TypeKind::Float),
            "string" => Some(TypeKind::String),
            "list" => Some(TypeKind::List),
            "dict" => Some(TypeKind::Dict),
            "block" => Some(TypeKind::Block),
            "func" => Some(TypeKind::Func),
            "any" => Some(TypeKind::Any),
            _ => None,
        }
    }
}

/// Callable type signature: fixed parameter kinds plus an optional
/// homogeneous variadic tail. Tail kind `Any` disables tail checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncTypeSig {
    pub ret_type: TypeKind,
    pub param_types: Vec<TypeKind>,
    pub is_variadic: bool,
    pub variadic_type: TypeKind,
}

impl FuncTypeSig {
    pub fn exact(ret_type: TypeKind, param_types: Vec<TypeKind>) -> FuncTypeSig {
        FuncTypeSig { ret_type, param_types, is_variadic: false, variadic_type: TypeKind::Any }
    }

    pub fn variadic(ret_type: TypeKind, param_types: Vec<TypeKind>, tail: TypeKind) -> FuncTypeSig {
        FuncTypeSig { ret_type, param_types, is_variadic: true, variadic_type: tail }
    }
}

/// One declared function parameter, as written in the source. Kept as a
/// sidecar on `func` declarations for the typechecker.
#[derive(Debug, Clone)]
pub struct FuncParam {
    pub name: SmolStr,
    pub name_tok: Token,
    pub ty: TypeKind,
    pub type_tok: Token,
    pub func_sig: Option<FuncTypeSig>,
}

/// Typed signature of a `func` declaration (typechecker sidecar).
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub name: SmolStr,
    pub name_tok: Token,
    pub params: Vec<FuncParam>,
    pub ret_type: TypeKind,
    pub ret_tok: Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

/// Expression node. `token` points at the main source token for error
/// reporting; `can_fold` marks pure literal leaves for the folder.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub token: Token,
    pub can_fold: bool,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    StringLit(SmolStr),
    BoolLit(bool),
    VoidLit,
    /// A variable reference.
    Var { name: SmolStr },
    /// Qualified member access through a block's captured environment:
    /// `base::name` outside call position.
    Member { base: Box<Expr>, name: SmolStr },
    /// target[index]
    Index { target: Box<Expr>, index: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    /// [a, b, c]
    List { items: Vec<Expr> },
    /// [k: v, ...] / [:]; items are Pair nodes.
    Dict { items: Vec<Expr> },
    /// k = v, only produced inside dict literals.
    Pair { key: Box<Expr>, value: Box<Expr> },
    /// { script }
    Block { script: Box<Script> },
    /// head(args...) used in expression position.
    Command { head: Box<Expr>, args: Vec<Expr> },
}

impl Expr {
    pub fn new(kind: ExprKind, token: Token, can_fold: bool) -> Expr {
        Expr { kind, token, can_fold }
    }

    pub fn string_lit(value: impl Into<SmolStr>, token: Token) -> Expr {
        Expr::new(ExprKind::StringLit(value.into()), token, true)
    }

    pub fn is_lit_string(&self, s: &str) -> bool {
        matches!(&self.kind, ExprKind::StringLit(v) if v.as_str() == s)
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::IntLit(_)
                | ExprKind::FloatLit(_)
                | ExprKind::StringLit(_)
                | ExprKind::BoolLit(_)
                | ExprKind::VoidLit
        )
    }
}

/// A lowered statement: head expression applied to arguments.
#[derive(Debug, Clone)]
pub struct Command {
    pub head: Expr,
    pub args: Vec<Expr>,
    /// Typed sidecar for `func` declarations, consumed by the typechecker.
    pub func_sig: Option<FuncSig>,
}

impl Command {
    pub fn new(head: Expr, args: Vec<Expr>) -> Command {
        Command { head, args, func_sig: None }
    }
}

/// An ordered list of commands: a whole file or a `{ ... }` block body.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub commands: Vec<Command>,
}
