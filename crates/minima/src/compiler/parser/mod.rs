// Parser: tokens -> command-form AST.
// Statements lower to Commands with conventional head strings ("set", "if",
// "while", "foreach", "cmd", "return", "call") that the compiler recognizes
// as special forms. Expressions use precedence climbing.

pub mod error;
pub mod token;
pub mod tokenize;

pub use error::{CompileError, CompileErrorKind};
pub use token::{Token, TokenKind};
pub use tokenize::Lexer;

use crate::compiler::ast::{
    BinaryOp, Command, Expr, ExprKind, FuncParam, FuncSig, FuncTypeSig, Script, TypeKind, UnaryOp,
};

pub type ParseResult<T> = Result<T, CompileError>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> ParseResult<Parser<'a>> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        if current.kind == TokenKind::Error {
            return Err(lex_error(&current));
        }
        Ok(Parser { lexer, current, previous: Token::synthetic("") })
    }

    fn peek(&self) -> &Token {
        &self.current
    }

    fn prev(&self) -> Token {
        self.previous.clone()
    }

    fn advance(&mut self) -> ParseResult<Token> {
        self.previous = std::mem::replace(&mut self.current, self.lexer.next_token());
        if self.current.kind == TokenKind::Error {
            return Err(lex_error(&self.current));
        }
        Ok(self.previous.clone())
    }

    fn matches(&mut self, kind: TokenKind) -> ParseResult<bool> {
        if self.current.kind == kind {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> ParseResult<Token> {
        if self.current.kind == kind {
            return self.advance();
        }
        Err(parse_error(msg, &self.current))
    }

    //----------------------------------------------------------
    // Expressions
    //----------------------------------------------------------

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let tok = self.peek().clone();

        if self.matches(TokenKind::Int)? {
            let t = self.prev();
            let value: i64 = t.lexeme.parse().map_err(|_| parse_error("Invalid integer literal", &t))?;
            return Ok(Expr::new(ExprKind::IntLit(value), t, true));
        }

        if self.matches(TokenKind::Float)? {
            let t = self.prev();
            let value: f64 = t.lexeme.parse().map_err(|_| parse_error("Invalid float literal", &t))?;
            return Ok(Expr::new(ExprKind::FloatLit(value), t, true));
        }

        if self.matches(TokenKind::String)? {
            let t = self.prev();
            let value = t.lexeme.clone();
            return Ok(Expr::new(ExprKind::StringLit(value), t, true));
        }

        if self.matches(TokenKind::True)? || self.matches(TokenKind::False)? {
            let t = self.prev();
            let value = t.kind == TokenKind::True;
            return Ok(Expr::new(ExprKind::BoolLit(value), t, true));
        }

        if self.matches(TokenKind::Void)? {
            return Ok(Expr::new(ExprKind::VoidLit, self.prev(), true));
        }

        // List / dict literal. Empty dict is spelled [:] to disambiguate
        // from the empty list []. Pair separators: ':' or '='.
        if self.matches(TokenKind::LBracket)? {
            return self.parse_bracket_literal();
        }

        if self.matches(TokenKind::Identifier)? {
            let ident = self.prev();

            // Qualified name: a::b::c. In call position the joined path
            // becomes the command head string (resolved lazily through the
            // chunk command table); otherwise it is member access through
            // the namespace block's environment.
            if self.peek().kind == TokenKind::DoubleColon {
                let mut segments = vec![ident.lexeme.clone()];
                while self.matches(TokenKind::DoubleColon)? {
                    let seg =
                        self.expect(TokenKind::Identifier, "Expected identifier after '::'")?;
                    segments.push(seg.lexeme.clone());
                }
                if self.peek().kind == TokenKind::LParen {
                    let joined =
                        segments.iter().map(|s| s.as_str()).collect::<Vec<_>>().join("::");
                    return Ok(Expr::string_lit(joined, ident));
                }
                let name = segments[0].clone();
                let mut expr = Expr::new(ExprKind::Var { name }, ident.clone(), false);
                for seg in &segments[1..] {
                    expr = Expr::new(
                        ExprKind::Member { base: Box::new(expr), name: seg.clone() },
                        ident.clone(),
                        false,
                    );
                }
                return Ok(expr);
            }

            // An identifier immediately followed by '(' is a command head
            // string, preserving print(...)-style calls where `print` is
            // otherwise a variable.
            if self.peek().kind == TokenKind::LParen {
                let name = ident.lexeme.clone();
                return Ok(Expr::string_lit(name, ident));
            }
            let name = ident.lexeme.clone();
            return Ok(Expr::new(ExprKind::Var { name }, ident, false));
        }

        if self.matches(TokenKind::LParen)? {
            let e = self.parse_expr()?;
            self.expect(TokenKind::RParen, "Expected ')'")?;
            return Ok(e);
        }

        if self.matches(TokenKind::LBrace)? {
            let bt = self.prev();
            let inner = self.parse_script(true)?;
            self.expect(TokenKind::RBrace, "Expected '}'")?;
            return Ok(Expr::new(ExprKind::Block { script: Box::new(inner) }, bt, false));
        }

        Err(parse_error("Expected expression", &tok))
    }

    fn parse_bracket_literal(&mut self) -> ParseResult<Expr> {
        let lt = self.prev();

        // Empty dict marker: [:]
        if self.matches(TokenKind::Colon)? {
            self.expect(TokenKind::RBracket, "Expected ']' after '[:'")?;
            return Ok(Expr::new(ExprKind::Dict { items: Vec::new() }, lt, false));
        }

        // Empty list: []
        if self.matches(TokenKind::RBracket)? {
            return Ok(Expr::new(ExprKind::List { items: Vec::new() }, lt, false));
        }

        let first = self.parse_expr()?;

        // Dict if the next token is ':' or '='.
        if self.peek().kind == TokenKind::Colon || self.peek().kind == TokenKind::Eq {
            // Bare identifier keys read as strings: [a: 1] keys on "a".
            let as_key = |e: Expr| match &e.kind {
                ExprKind::Var { name } if e.token.kind == TokenKind::Identifier => {
                    Expr::string_lit(name.clone(), e.token.clone())
                }
                _ => e,
            };
            let mut items = Vec::new();
            let mut key = as_key(first);
            loop {
                let sep = self.peek().clone();
                if !(self.matches(TokenKind::Colon)? || self.matches(TokenKind::Eq)?) {
                    return Err(parse_error("Expected ':' or '=' in dict entry", &sep));
                }
                let value = self.parse_expr()?;
                items.push(Expr::new(
                    ExprKind::Pair { key: Box::new(key), value: Box::new(value) },
                    sep,
                    false,
                ));

                if self.matches(TokenKind::Comma)? {
                    // allow trailing comma
                    if self.matches(TokenKind::RBracket)? {
                        break;
                    }
                    key = as_key(self.parse_expr()?);
                    continue;
                }
                self.expect(TokenKind::RBracket, "Expected ']' to close dict literal")?;
                break;
            }
            return Ok(Expr::new(ExprKind::Dict { items }, lt, false));
        }

        // Otherwise: list literal (first already parsed).
        let mut items = vec![first];
        if self.matches(TokenKind::Comma)? {
            if !self.matches(TokenKind::RBracket)? {
                loop {
                    items.push(self.parse_expr()?);
                    if self.matches(TokenKind::Comma)? {
                        if self.matches(TokenKind::RBracket)? {
                            break;
                        }
                        continue;
                    }
                    self.expect(TokenKind::RBracket, "Expected ']' to close list literal")?;
                    break;
                }
            }
        } else {
            self.expect(TokenKind::RBracket, "Expected ']' to close list literal")?;
        }
        Ok(Expr::new(ExprKind::List { items }, lt, false))
    }

    /// Postfix call `(args)` and index `[i]`, left-associative.
    fn parse_call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.matches(TokenKind::LParen)? {
                let call_tok = self.prev();
                let mut args = Vec::new();
                if self.peek().kind != TokenKind::RParen {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.matches(TokenKind::Comma)? {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen, "Expected ')' after call arguments")?;
                expr = Expr::new(
                    ExprKind::Command { head: Box::new(expr), args },
                    call_tok,
                    false,
                );
                continue;
            }

            if self.matches(TokenKind::LBracket)? {
                let it = self.prev();
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "Expected ']' after index expression")?;
                expr = Expr::new(
                    ExprKind::Index { target: Box::new(expr), index: Box::new(index) },
                    it,
                    false,
                );
                continue;
            }

            break;
        }

        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.matches(TokenKind::Bang)? || self.matches(TokenKind::Minus)? {
            let op_tok = self.prev();
            let op = if op_tok.kind == TokenKind::Bang { UnaryOp::Not } else { UnaryOp::Neg };
            let rhs = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary { op, expr: Box::new(rhs) },
                op_tok,
                false,
            ));
        }
        // Unary plus is a no-op.
        if self.matches(TokenKind::Plus)? {
            return self.parse_unary();
        }
        self.parse_call()
    }

    fn parse_binary_rhs(&mut self, mut left: Expr, min_prec: u8) -> ParseResult<Expr> {
        loop {
            let op_tok = self.peek().clone();
            let prec = binary_prec(op_tok.kind);
            if prec < min_prec || prec == 0 {
                break;
            }

            let Some(op) = binary_op(op_tok.kind) else { break };
            self.advance()?;
            let mut right = self.parse_unary()?;

            let next_prec = binary_prec(self.peek().kind);
            if next_prec > prec {
                right = self.parse_binary_rhs(right, prec + 1)?;
            }

            left = Expr::new(
                ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
                op_tok,
                false,
            );
        }
        Ok(left)
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let left = self.parse_unary()?;
        self.parse_binary_rhs(left, 1)
    }

    //----------------------------------------------------------
    // Statements -> Commands
    //----------------------------------------------------------

    /// Parse a branch/loop body. A literal block parses directly; any other
    /// single statement is wrapped into a one-command block.
    fn parse_stmt_as_block_expr(&mut self) -> ParseResult<Expr> {
        if self.peek().kind == TokenKind::LBrace {
            return self.parse_primary();
        }

        let one = self.parse_stmt_command()?;
        let bt = one.head.token.clone();
        let script = Script { commands: vec![one] };
        Ok(Expr::new(ExprKind::Block { script: Box::new(script) }, bt, false))
    }

    fn parse_if_stmt(&mut self, if_tok: Token) -> ParseResult<Command> {
        self.expect(TokenKind::LParen, "Expected '(' after 'if'")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "Expected ')' after if condition")?;
        let then_blk = self.parse_stmt_as_block_expr()?;

        let mut args = vec![cond, then_blk];

        // "else if" is flattened to "elseif" legs; "elseif"/"else" markers
        // are plain string-literal arguments.
        while self.matches(TokenKind::Else)? {
            if self.matches(TokenKind::If)? {
                self.expect(TokenKind::LParen, "Expected '(' after 'if'")?;
                let c2 = self.parse_expr()?;
                self.expect(TokenKind::RParen, "Expected ')' after if condition")?;
                let b2 = self.parse_stmt_as_block_expr()?;
                args.push(Expr::string_lit("elseif", Token::synthetic("elseif")));
                args.push(c2);
                args.push(b2);
                continue;
            }

            let else_blk = self.parse_stmt_as_block_expr()?;
            args.push(Expr::string_lit("else", Token::synthetic("else")));
            args.push(else_blk);
            break;
        }

        Ok(Command::new(Expr::string_lit("if", if_tok), args))
    }

    fn parse_while_stmt(&mut self, while_tok: Token) -> ParseResult<Command> {
        self.expect(TokenKind::LParen, "Expected '(' after 'while'")?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "Expected ')' after while condition")?;
        let body = self.parse_stmt_as_block_expr()?;
        Ok(Command::new(Expr::string_lit("while", while_tok), vec![cond, body]))
    }

    fn parse_foreach_stmt(&mut self, foreach_tok: Token) -> ParseResult<Command> {
        self.expect(TokenKind::LParen, "Expected '(' after 'foreach'")?;
        let var_tok = self.expect(TokenKind::Identifier, "Expected loop variable name in foreach(...)")?;
        self.expect(TokenKind::Comma, "Expected ',' after foreach variable")?;
        let container = self.parse_expr()?;
        self.expect(TokenKind::RParen, "Expected ')' after foreach header")?;

        self.expect(TokenKind::LBrace, "Expected '{' to start foreach body")?;
        let bt = self.prev();
        let inner = self.parse_script(true)?;
        self.expect(TokenKind::RBrace, "Expected '}' after foreach body")?;
        let body = Expr::new(ExprKind::Block { script: Box::new(inner) }, bt, false);

        let var_name = Expr::string_lit(var_tok.lexeme.clone(), var_tok);
        Ok(Command::new(
            Expr::string_lit("foreach", foreach_tok),
            vec![var_name, container, body],
        ))
    }

    fn parse_return_stmt(&mut self) -> ParseResult<Command> {
        let rt = self.prev();
        let mut args = Vec::new();
        if self.peek().kind != TokenKind::Semicolon {
            args.push(self.parse_expr()?);
        }
        self.expect(TokenKind::Semicolon, "Expected ';' after return")?;
        Ok(Command::new(Expr::string_lit("return", rt), args))
    }

    fn parse_assignment_stmt(&mut self, lhs: Expr) -> ParseResult<Command> {
        let eq = self.prev();

        let lvalue = match &lhs.kind {
            ExprKind::Var { name } => Expr::string_lit(name.clone(), lhs.token.clone()),
            ExprKind::Index { .. } | ExprKind::Member { .. } => lhs,
            _ => return Err(parse_error("Invalid assignment target", &eq)),
        };

        let rhs = self.parse_expr()?;
        self.expect(TokenKind::Semicolon, "Expected ';' after assignment")?;

        Ok(Command::new(Expr::string_lit("set", eq), vec![lvalue, rhs]))
    }

    fn parse_type_name(&mut self, tok: &Token) -> ParseResult<TypeKind> {
        if tok.kind == TokenKind::Void {
            return Ok(TypeKind::Void);
        }
        if tok.kind == TokenKind::Func {
            return Ok(TypeKind::Func);
        }
        TypeKind::from_name(&tok.lexeme).ok_or_else(|| parse_error("Unknown type name", tok))
    }

    /// `func(T, ...) -> R` parameter/return kinds for func-typed parameters.
    fn parse_func_type_sig(&mut self) -> ParseResult<FuncTypeSig> {
        self.expect(TokenKind::LParen, "Expected '(' after 'func' in type position")?;

        let mut param_types = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                let t = self.advance()?;
                if !matches!(t.kind, TokenKind::Identifier | TokenKind::Void | TokenKind::Func) {
                    return Err(parse_error("Expected type name in func signature", &t));
                }
                param_types.push(self.parse_type_name(&t)?);
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expected ')' after func signature parameter list")?;

        let mut ret_type = TypeKind::Void;
        if self.matches(TokenKind::Minus)? {
            self.expect(TokenKind::Gt, "Expected '>' after '-' in return type")?;
            let rt = self.advance()?;
            if !matches!(rt.kind, TokenKind::Identifier | TokenKind::Void | TokenKind::Func) {
                return Err(parse_error("Expected return type after '->' in func type", &rt));
            }
            ret_type = self.parse_type_name(&rt)?;
        }

        Ok(FuncTypeSig::exact(ret_type, param_types))
    }

    fn parse_type_spec(&mut self) -> ParseResult<(TypeKind, Option<FuncTypeSig>)> {
        if self.peek().kind == TokenKind::Func {
            self.advance()?;
            let sig = self.parse_func_type_sig()?;
            return Ok((TypeKind::Func, Some(sig)));
        }
        if matches!(self.peek().kind, TokenKind::Void | TokenKind::Identifier) {
            let t = self.advance()?;
            return Ok((self.parse_type_name(&t)?, None));
        }
        Err(parse_error("Expected type name", self.peek()))
    }

    /// func name(p: T, ...) -> R { body }
    ///   -> cmd("name", "p0", ..., sig_list, { body })
    /// where sig_list = [ret, fixed_count, t0..tN-1, -1].
    fn parse_func_decl(&mut self) -> ParseResult<Command> {
        let func_tok = self.prev();
        let name_tok = self.expect(TokenKind::Identifier, "Expected function name after 'func'")?;
        self.expect(TokenKind::LParen, "Expected '(' after function name")?;

        let mut sig = FuncSig {
            name: name_tok.lexeme.clone(),
            name_tok: name_tok.clone(),
            params: Vec::new(),
            ret_type: TypeKind::Void,
            ret_tok: func_tok.clone(),
        };

        let mut args = Vec::new();
        args.push(Expr::string_lit(name_tok.lexeme.clone(), name_tok));

        if self.peek().kind != TokenKind::RParen {
            loop {
                let pt = self.expect(TokenKind::Identifier, "Expected parameter name")?;
                let mut param_type = TypeKind::Any;
                let mut param_func_sig = None;
                let mut type_tok = pt.clone();
                if self.matches(TokenKind::Colon)? {
                    type_tok = self.peek().clone();
                    let (t, fsig) = self.parse_type_spec()?;
                    param_type = t;
                    param_func_sig = fsig;
                }

                sig.params.push(FuncParam {
                    name: pt.lexeme.clone(),
                    name_tok: pt.clone(),
                    ty: param_type,
                    type_tok,
                    func_sig: param_func_sig,
                });

                args.push(Expr::string_lit(pt.lexeme.clone(), pt));

                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expected ')' after parameters")?;

        // Optional return type: -> Type
        if self.matches(TokenKind::Minus)? {
            self.expect(TokenKind::Gt, "Expected '>' after '-' in return type")?;
            if !matches!(self.peek().kind, TokenKind::Identifier | TokenKind::Void | TokenKind::Func) {
                return Err(parse_error("Expected return type name after '->'", self.peek()));
            }
            let rt = self.advance()?;
            sig.ret_type = self.parse_type_name(&rt)?;
            sig.ret_tok = rt;
        }

        // Signature list arg: [ret, fixed_count, t0..tN-1, variadic_or_-1]
        let mut sig_items = Vec::new();
        let int_lit =
            |v: i64| Expr::new(ExprKind::IntLit(v), Token::synthetic("sig"), true);
        sig_items.push(int_lit(sig.ret_type as i64));
        sig_items.push(int_lit(sig.params.len() as i64));
        for p in &sig.params {
            sig_items.push(int_lit(p.ty as i64));
        }
        sig_items.push(int_lit(-1));
        args.push(Expr::new(
            ExprKind::List { items: sig_items },
            Token::synthetic("sig"),
            false,
        ));

        // body block
        self.expect(TokenKind::LBrace, "Expected '{' to start function body")?;
        let bt = self.prev();
        let body = self.parse_script(true)?;
        self.expect(TokenKind::RBrace, "Expected '}' after function body")?;
        args.push(Expr::new(ExprKind::Block { script: Box::new(body) }, bt, false));

        let mut out = Command::new(
            Expr::string_lit("cmd", Token::new(TokenKind::String, "cmd", func_tok.line, func_tok.column)),
            args,
        );
        out.func_sig = Some(sig);
        Ok(out)
    }

    fn parse_stmt_command(&mut self) -> ParseResult<Command> {
        if self.peek().kind == TokenKind::LBrace {
            // A standalone { ... } block statement lowers to call(block).
            let blk = self.parse_primary()?;
            self.matches(TokenKind::Semicolon)?;
            let tok = blk.token.clone();
            return Ok(Command::new(
                Expr::string_lit("call", Token::new(TokenKind::String, "call", tok.line, tok.column)),
                vec![blk],
            ));
        }

        if self.matches(TokenKind::If)? {
            let t = self.prev();
            return self.parse_if_stmt(t);
        }
        if self.matches(TokenKind::While)? {
            let t = self.prev();
            return self.parse_while_stmt(t);
        }
        if self.matches(TokenKind::Foreach)? {
            let t = self.prev();
            return self.parse_foreach_stmt(t);
        }
        if self.matches(TokenKind::Func)? {
            return self.parse_func_decl();
        }
        if self.matches(TokenKind::Return)? {
            return self.parse_return_stmt();
        }
        if self.matches(TokenKind::Let)? {
            // let is currently plain assignment.
            let ident = self.expect(TokenKind::Identifier, "Expected identifier after 'let'")?;
            let name = ident.lexeme.clone();
            let lhs = Expr::new(ExprKind::Var { name }, ident, false);
            self.expect(TokenKind::Eq, "Expected '=' after identifier")?;
            return self.parse_assignment_stmt(lhs);
        }

        // Expression statement or assignment.
        let expr = self.parse_expr()?;

        if self.matches(TokenKind::Eq)? {
            return self.parse_assignment_stmt(expr);
        }

        self.expect(TokenKind::Semicolon, "Expected ';' after statement")?;

        match expr.kind {
            ExprKind::Command { head, args } => Ok(Command::new(*head, args)),
            _ => Err(parse_error("Expected a function call statement", &expr.token)),
        }
    }

    fn parse_script(&mut self, stop_at_rbrace: bool) -> ParseResult<Script> {
        let mut commands = Vec::new();
        loop {
            let tok = self.peek();
            if tok.kind == TokenKind::Eof {
                break;
            }
            if stop_at_rbrace && tok.kind == TokenKind::RBrace {
                break;
            }
            // Allow stray semicolons as empty statements.
            if tok.kind == TokenKind::Semicolon {
                self.advance()?;
                continue;
            }
            commands.push(self.parse_stmt_command()?);
        }
        Ok(Script { commands })
    }
}

fn binary_prec(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 6,
        TokenKind::Plus | TokenKind::Minus => 5,
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => 4,
        TokenKind::EqEq | TokenKind::BangEq => 3,
        TokenKind::AndAnd => 2,
        TokenKind::OrOr => 1,
        _ => 0,
    }
}

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::Plus => Some(BinaryOp::Add),
        TokenKind::Minus => Some(BinaryOp::Sub),
        TokenKind::Star => Some(BinaryOp::Mul),
        TokenKind::Slash => Some(BinaryOp::Div),
        TokenKind::Percent => Some(BinaryOp::Mod),
        TokenKind::EqEq => Some(BinaryOp::Eq),
        TokenKind::BangEq => Some(BinaryOp::Neq),
        TokenKind::Lt => Some(BinaryOp::Lt),
        TokenKind::LtEq => Some(BinaryOp::LtEq),
        TokenKind::Gt => Some(BinaryOp::Gt),
        TokenKind::GtEq => Some(BinaryOp::GtEq),
        TokenKind::AndAnd => Some(BinaryOp::And),
        TokenKind::OrOr => Some(BinaryOp::Or),
        _ => None,
    }
}

fn lex_error(tok: &Token) -> CompileError {
    CompileError::new(CompileErrorKind::Lex, tok.lexeme.to_string(), tok.line, tok.column)
}

fn parse_error(msg: &str, tok: &Token) -> CompileError {
    CompileError::new(CompileErrorKind::Parse, msg, tok.line, tok.column)
}

/// Parse a full script.
pub fn parse_program(source: &str) -> ParseResult<Script> {
    let mut parser = Parser::new(source)?;
    parser.parse_script(false)
}
