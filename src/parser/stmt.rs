//! Statement-level recursive descent.

use super::{BindingPower, Parser};
use crate::arena::ArenaResult;
use crate::ast::{Expr, FunctionDecl, LoopStmt, Param, Stmt, Type};
use crate::lexer::TokenKind;

impl<'t, 'a> Parser<'t, 'a> {
    pub(crate) fn parse_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let base = self.depth;
        let result = if self.descend() {
            self.dispatch_stmt()
        } else {
            self.too_deep_stmt()
        };
        self.depth = base;
        result
    }

    fn dispatch_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let token = self.current();
        log::trace!("statement at {}", token);

        match token.kind {
            TokenKind::Module => self.module_stmt(),
            TokenKind::Var => self.var_stmt(),
            TokenKind::Const => self.const_stmt(),
            TokenKind::Fn => self.fn_stmt(),
            TokenKind::Print | TokenKind::Println => self.print_stmt(),
            TokenKind::Return => self.return_stmt(),
            TokenKind::LBrace => self.block_stmt(),
            TokenKind::Loop => self.loop_stmt(),
            TokenKind::If => self.if_stmt(),
            TokenKind::Use
            | TokenKind::Alloc
            | TokenKind::Free
            | TokenKind::Memcpy
            | TokenKind::Sizeof
            | TokenKind::Cast
            | TokenKind::Struct
            | TokenKind::Enum
            | TokenKind::Pub
            | TokenKind::Priv => self.unsupported_stmt(),
            _ => self.expr_stmt(),
        }
    }

    /// Parse an optional type annotation.
    fn parse_type(&mut self) -> ArenaResult<Option<&'a Type<'a>>> {
        let token = self.current();
        if token.kind.is_type_keyword() || token.kind == TokenKind::Identifier {
            self.advance();
            return self.symbol_type(token.text).map(Some);
        }
        Ok(None)
    }

    /// Parse a required type annotation, leaving an empty name behind when
    /// it is missing.
    fn require_type(&mut self, message: &str) -> ArenaResult<&'a Type<'a>> {
        match self.parse_type()? {
            Some(ty) => Ok(ty),
            None => {
                self.error(message);
                self.symbol_type("")
            }
        }
    }

    fn module_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();
        let name = self.expect_name("Expected a name for the module")?;
        self.expect_token(
            TokenKind::Semicolon,
            "Expected ';' at the end of the module stmt",
        );
        self.stmt(Stmt::Module(name))
    }

    fn var_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();
        let name = self.expect_name("Expected a name for the var declaration")?;
        self.expect_token(TokenKind::Colon, "Expected ':' before the type");
        let ty = self.require_type("Expected a type for the var declaration")?;

        let init = if self.eat(TokenKind::Equals) {
            Some(self.parse_expr(BindingPower::Default)?)
        } else {
            None
        };

        self.expect_token(
            TokenKind::Semicolon,
            "Expected ';' at the end of a var declaration",
        );
        self.stmt(Stmt::Var { name, ty, init })
    }

    /// `const name := fn(...) type { ... };`
    fn const_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();
        let name = self.expect_name("Expected a name for the const declaration")?;
        self.expect_token(TokenKind::Walrus, "Expected ':=' after the const name");

        if self.eat(TokenKind::Fn) {
            return self.function_rest(name, true);
        }

        self.error("Expected a function after ':='");
        self.skip_statement();
        self.stmt(Stmt::Invalid)
    }

    /// `fn name(...) type { ... }`
    fn fn_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();
        let name = self.expect_name("Expected a name for the function")?;
        self.function_rest(name, false)
    }

    fn function_rest(
        &mut self,
        name: &'a str,
        trailing_semicolon: bool,
    ) -> ArenaResult<&'a Stmt<'a>> {
        self.expect_token(TokenKind::LParen, "Expected '(' to start the parameter list");

        let arena = self.arena;
        let mut params = arena.vec();
        while !self.check(TokenKind::RParen) && !self.at_end() {
            let start = self.pos;
            let param_name = self.expect_name("Expected a parameter name")?;
            self.expect_token(TokenKind::Colon, "Expected ':' before the parameter type");
            let ty = self.require_type("Expected a type for the parameter")?;
            params.push(Param {
                name: param_name,
                ty,
            })?;

            if self.check(TokenKind::RParen) {
                break;
            }
            self.expect_token(TokenKind::Comma, "Expected ',' between parameters");
            self.ensure_progress(start);
        }
        self.expect_token(TokenKind::RParen, "Expected ')' to close the parameter list");
        let params = params.into_slice();

        let return_type = self.parse_type()?;
        if return_type.is_none() {
            self.error("Expected a return type for the function");
        }

        let body = if self.check(TokenKind::LBrace) {
            self.block_stmt()?
        } else {
            self.error("Expected '{' to start the function body");
            self.stmt(Stmt::Block(&[]))?
        };

        if trailing_semicolon {
            self.expect_token(
                TokenKind::Semicolon,
                "Expected ';' at the end of a function declaration",
            );
        } else {
            self.eat(TokenKind::Semicolon);
        }

        let decl: &'a FunctionDecl<'a> = arena.alloc(FunctionDecl {
            name,
            return_type,
            params,
            body,
        })?;
        self.stmt(Stmt::Function(decl))
    }

    /// `print(fd, args...);` and `println(fd, args...);`
    fn print_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let newline = self.advance().kind == TokenKind::Println;
        self.expect_token(TokenKind::LParen, "Expected '(' to start the print arguments");
        let fd = self.parse_expr(BindingPower::Default)?;

        let arena = self.arena;
        let mut args = arena.vec();
        while self.eat(TokenKind::Comma) {
            args.push(self.parse_expr(BindingPower::Default)?)?;
        }

        self.expect_token(TokenKind::RParen, "Expected ')' to end the print arguments");
        self.expect_token(
            TokenKind::Semicolon,
            "Expected ';' at the end of the print stmt",
        );

        let args = args.into_slice();
        self.stmt(Stmt::Print { fd, newline, args })
    }

    fn return_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();
        if self.eat(TokenKind::Semicolon) {
            return self.stmt(Stmt::Return(None));
        }

        let value = self.parse_expr(BindingPower::Default)?;
        self.expect_token(
            TokenKind::Semicolon,
            "Expected ';' at the end of a return stmt",
        );
        self.stmt(Stmt::Return(Some(value)))
    }

    pub(crate) fn block_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.expect_token(TokenKind::LBrace, "Expected '{' to start a block");

        let arena = self.arena;
        let mut body = arena.vec();
        while !self.check(TokenKind::RBrace) && !self.at_end() {
            let start = self.pos;
            body.push(self.parse_stmt()?)?;
            self.ensure_progress(start);
        }
        self.expect_token(TokenKind::RBrace, "Expected '}' to end the block");

        let body = body.into_slice();
        self.stmt(Stmt::Block(body))
    }

    /// Loop headers:
    ///
    /// ```text
    /// loop (i = 0; i < 10) : (i++) { ... }
    /// loop (i = 0; i < 10) { ... }
    /// loop (i < 10) : (i++) { ... }
    /// loop (i < 10) { ... }
    /// loop () { ... }
    /// loop { ... }
    /// ```
    fn loop_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();

        let mut is_counted = false;
        let mut init = None;
        let mut condition = None;
        let mut step = None;

        if !self.check(TokenKind::LBrace) {
            self.expect_token(TokenKind::LParen, "Expected '(' to start the loop header");

            if self.check(TokenKind::Identifier) && self.peek(1).kind == TokenKind::Equals {
                is_counted = true;
                init = Some(self.parse_expr(BindingPower::Default)?);
                self.expect_token(
                    TokenKind::Semicolon,
                    "Expected ';' after the loop initializer",
                );
            }
            if !self.check(TokenKind::RParen) {
                condition = Some(self.parse_expr(BindingPower::Default)?);
            }
            self.expect_token(TokenKind::RParen, "Expected ')' to end the loop condition");

            if self.eat(TokenKind::Colon) {
                self.expect_token(TokenKind::LParen, "Expected '(' to start the loop step");
                step = Some(self.parse_expr(BindingPower::Default)?);
                self.expect_token(TokenKind::RParen, "Expected ')' to end the loop step");
            }
        }

        let body = self.parse_stmt()?;
        let node: &'a LoopStmt<'a> = self.arena.alloc(LoopStmt {
            is_counted,
            init,
            condition,
            step,
            body,
        })?;
        self.stmt(Stmt::Loop(node))
    }

    fn if_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.advance();
        self.if_rest()
    }

    /// Condition, then-block and else chain of an `if` or `elif`.
    fn if_rest(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let base = self.depth;
        let result = if self.descend() {
            self.if_chain()
        } else {
            self.too_deep_stmt()
        };
        self.depth = base;
        result
    }

    fn if_chain(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let condition = self.parse_expr(BindingPower::Default)?;
        let then_block = self.branch_body()?;

        let else_block = if self.eat(TokenKind::Elif) {
            Some(self.if_rest()?)
        } else if self.eat(TokenKind::Else) {
            if self.check(TokenKind::If) {
                Some(self.if_stmt()?)
            } else {
                Some(self.branch_body()?)
            }
        } else {
            None
        };

        self.stmt(Stmt::If {
            condition,
            then_block,
            else_block,
        })
    }

    fn branch_body(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        if self.check(TokenKind::LBrace) {
            return self.block_stmt();
        }
        self.error("Expected '{' to start the branch");
        self.parse_stmt()
    }

    fn unsupported_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let token = self.current();
        self.error(format!("'{}' is not supported", token.text));
        self.advance();
        self.skip_statement();
        self.stmt(Stmt::Invalid)
    }

    fn too_deep_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        self.error("Statement nested too deeply");
        self.skip_nested();
        self.eat(TokenKind::Semicolon);
        self.stmt(Stmt::Invalid)
    }

    /// Skip through the next `;`, stopping before a `}` or at `eof`.
    fn skip_statement(&mut self) {
        while !self.at_end() && !self.check(TokenKind::RBrace) {
            if self.advance().kind == TokenKind::Semicolon {
                break;
            }
        }
    }

    fn expr_stmt(&mut self) -> ArenaResult<&'a Stmt<'a>> {
        let expr = self.parse_expr(BindingPower::Default)?;

        if matches!(expr, Expr::Invalid) {
            self.eat(TokenKind::Semicolon);
        } else if !self.at_end() {
            self.expect_token(
                TokenKind::Semicolon,
                "Expected ';' at the end of an expression",
            );
        }
        self.stmt(Stmt::Expr(expr))
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::Arena;
    use crate::ast::{NodeKind, Stmt};
    use crate::diagnostics::Diagnostics;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn tree(source: &str) -> (String, usize) {
        let arena = Arena::new();
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, "t.xi", &mut diagnostics);
        let program = parse(&tokens, &arena, "t.xi", &mut diagnostics).unwrap();
        (program.to_string(), diagnostics.len())
    }

    #[test]
    fn test_function_forms() {
        let (text, errors) = tree("fn add(a: int, b: int) int { return a + b; }");
        assert_eq!(errors, 0);
        assert_eq!(
            text,
            "program\n  fn add(a: int, b: int) int\n    block\n      return (+ a b)\n"
        );

        let (text, errors) = tree("const add := fn(a: int, b: int) int { return a + b; };");
        assert_eq!(errors, 0);
        assert!(text.contains("fn add(a: int, b: int) int"));
    }

    #[test]
    fn test_missing_return_type() {
        let (text, errors) = tree("fn f() { return 1; }");
        assert_eq!(errors, 1);
        assert!(text.contains("fn f()\n"));
    }

    #[test]
    fn test_loop_forms() {
        let (text, errors) = tree("loop (i = 0; i < 10) : (i++) { }");
        assert_eq!(errors, 0);
        assert_eq!(
            text,
            "program\n  loop counted\n    init (= i 0)\n    cond (< i 10)\n    step (post++ i)\n    block\n"
        );

        let (text, errors) = tree("loop (i < 3) { i += 1; }");
        assert_eq!(errors, 0);
        assert!(text.contains("  loop\n    cond (< i 3)\n"));

        let (text, errors) = tree("loop { } loop () { }");
        assert_eq!(errors, 0);
        assert_eq!(text.matches("  loop\n    block\n").count(), 2);
    }

    #[test]
    fn test_if_elif_else() {
        let (text, errors) = tree("if (x < 1) { print(1, 1); } elif (x < 2) { } else { }");
        assert_eq!(errors, 0);
        assert_eq!(text.matches("if ").count(), 2);
        assert_eq!(text.matches("else").count(), 2);
    }

    #[test]
    fn test_print_and_module() {
        let (text, errors) = tree("@module demo; println(1, \"hi\", x);");
        assert_eq!(errors, 0);
        assert_eq!(
            text,
            "program\n  module demo\n  println fd=1 \"hi\" x\n"
        );
    }

    #[test]
    fn test_unsupported_statement_skips_to_semicolon() {
        let arena = Arena::new();
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize("@use std; var x: int = 1;", "t.xi", &mut diagnostics);
        let program = parse(&tokens, &arena, "t.xi", &mut diagnostics).unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(program.statements.len(), 2);
        assert_eq!(program.statements[0].kind(), NodeKind::Invalid);
        assert!(matches!(program.statements[1], Stmt::Var { name: "x", .. }));
    }

    #[test]
    fn test_stray_tokens_terminate() {
        let (_, errors) = tree("} ) ; ,");
        assert!(errors >= 1);

        let (_, errors) = tree("{ var");
        assert!(errors >= 1);
    }

    #[test]
    fn test_bare_expression_program() {
        let (text, errors) = tree("5 * 3 * (3 + 5) / 5");
        assert_eq!(errors, 0);
        assert_eq!(text, "program\n  expr (/ (* (* 5 3) (group (+ 3 5))) 5)\n");
    }
}
