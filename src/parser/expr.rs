//! Precedence-climbing expression parser.

use super::Parser;
use crate::arena::ArenaResult;
use crate::ast::{AssignOperator, BinaryOperator, Expr, StepOperator, UnaryOperator};
use crate::lexer::{unescape, TokenKind};

/// How tightly a token binds to the expression on its left.
///
/// Binary operators parse their right operand at their own power, which makes
/// them left-associative. Assignment parses its right side at `Default`, which
/// makes it right-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BindingPower {
    Default,
    Assignment,
    LogicalOr,
    LogicalAnd,
    Equality,
    Relational,
    Additive,
    Multiplicative,
    Prefix,
    Postfix,
}

pub fn binding_power(kind: TokenKind) -> BindingPower {
    match kind {
        TokenKind::Equals
        | TokenKind::PlusEquals
        | TokenKind::MinusEquals
        | TokenKind::StarEquals
        | TokenKind::SlashEquals => BindingPower::Assignment,
        TokenKind::OrOr => BindingPower::LogicalOr,
        TokenKind::AndAnd => BindingPower::LogicalAnd,
        TokenKind::EqualEqual | TokenKind::BangEqual => BindingPower::Equality,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            BindingPower::Relational
        }
        TokenKind::Plus | TokenKind::Minus => BindingPower::Additive,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => BindingPower::Multiplicative,
        TokenKind::LParen | TokenKind::Increment | TokenKind::Decrement => BindingPower::Postfix,
        _ => BindingPower::Default,
    }
}

impl<'t, 'a> Parser<'t, 'a> {
    pub(crate) fn parse_expr(&mut self, min: BindingPower) -> ArenaResult<&'a Expr<'a>> {
        let base = self.depth;
        let result = self.climb(min);
        self.depth = base;
        result
    }

    /// Every operand and every operator folded into the left side is one
    /// more level of tree depth.
    fn climb(&mut self, min: BindingPower) -> ArenaResult<&'a Expr<'a>> {
        if !self.descend() {
            return self.too_deep_expr();
        }
        let mut left = self.nud()?;
        while binding_power(self.current().kind) > min {
            if !self.descend() {
                return self.too_deep_expr();
            }
            left = self.led(left)?;
        }
        Ok(left)
    }

    fn too_deep_expr(&mut self) -> ArenaResult<&'a Expr<'a>> {
        self.error("Expression nested too deeply");
        self.skip_nested();
        self.expr(Expr::Invalid)
    }

    /// Null denotation: literals, names, prefix operators, groups.
    fn nud(&mut self) -> ArenaResult<&'a Expr<'a>> {
        let token = self.current();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let text = self.text(token.text)?;
                self.expr(Expr::Number(text))
            }
            TokenKind::String => {
                self.advance();
                let value = self.text(&unescape(token.text))?;
                self.expr(Expr::String(value))
            }
            TokenKind::Identifier => {
                self.advance();
                let name = self.text(token.text)?;
                self.expr(Expr::Identifier(name))
            }
            TokenKind::Minus | TokenKind::Plus | TokenKind::Bang => {
                self.advance();
                let operand = self.parse_expr(BindingPower::Prefix)?;
                match UnaryOperator::from_token(token.kind) {
                    Some(op) => self.expr(Expr::Unary { op, operand }),
                    None => self.expr(Expr::Invalid),
                }
            }
            TokenKind::Increment | TokenKind::Decrement => {
                self.advance();
                let target = self.parse_expr(BindingPower::Prefix)?;
                match StepOperator::from_token(token.kind) {
                    Some(op) => self.expr(Expr::Prefix { op, target }),
                    None => self.expr(Expr::Invalid),
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr(BindingPower::Default)?;
                self.expect_token(TokenKind::RParen, "Expected ')' to close the group");
                self.expr(Expr::Group(inner))
            }
            _ => {
                let found = match token.kind {
                    TokenKind::Eof => "end of file".to_string(),
                    _ => format!("'{}'", token.text),
                };
                self.error(format!("Expected an expression but found {}", found));
                // Leave closing punctuation for the enclosing construct.
                if !matches!(
                    token.kind,
                    TokenKind::Semicolon
                        | TokenKind::RParen
                        | TokenKind::RBrace
                        | TokenKind::Comma
                        | TokenKind::Eof
                ) {
                    self.advance();
                }
                self.expr(Expr::Invalid)
            }
        }
    }

    /// Left denotation: binary operators, calls, postfix steps, assignment.
    fn led(&mut self, left: &'a Expr<'a>) -> ArenaResult<&'a Expr<'a>> {
        let token = self.advance();

        if let Some(op) = BinaryOperator::from_token(token.kind) {
            let right = self.parse_expr(binding_power(token.kind))?;
            return self.expr(Expr::Binary { left, op, right });
        }

        if let Some(op) = AssignOperator::from_token(token.kind) {
            let value = self.parse_expr(BindingPower::Default)?;
            return self.expr(Expr::Assign {
                op,
                target: left,
                value,
            });
        }

        if let Some(op) = StepOperator::from_token(token.kind) {
            return self.expr(Expr::Postfix { op, target: left });
        }

        if token.kind == TokenKind::LParen {
            return self.call(left);
        }

        log::warn!("no left denotation for {}", token);
        Ok(left)
    }

    /// Argument list after the opening parenthesis of a call.
    fn call(&mut self, callee: &'a Expr<'a>) -> ArenaResult<&'a Expr<'a>> {
        let arena = self.arena;
        let mut args = arena.vec();

        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr(BindingPower::Default)?)?;
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect_token(TokenKind::RParen, "Expected ')' to close the call arguments");

        let args = args.into_slice();
        self.expr(Expr::Call { callee, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::diagnostics::Diagnostics;
    use crate::lexer::tokenize;
    use crate::parser::parse_expression;

    fn render(source: &str) -> (String, usize) {
        let arena = Arena::new();
        let mut diagnostics = Diagnostics::new();
        let tokens = tokenize(source, "t.xi", &mut diagnostics);
        let expr = parse_expression(&tokens, &arena, "t.xi", &mut diagnostics).unwrap();
        (expr.to_string(), diagnostics.len())
    }

    #[test]
    fn test_precedence() {
        assert_eq!(render("1 + 2 * 3").0, "(+ 1 (* 2 3))");
        assert_eq!(render("1 * 2 + 3").0, "(+ (* 1 2) 3)");
        assert_eq!(render("(1 + 2) * 3").0, "(* (group (+ 1 2)) 3)");
        assert_eq!(render("a < b + 1 == c").0, "(== (< a (+ b 1)) c)");
        assert_eq!(render("a || b && c").0, "(|| a (&& b c))");
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(render("1 - 2 - 3").0, "(- (- 1 2) 3)");
        assert_eq!(render("8 / 4 / 2").0, "(/ (/ 8 4) 2)");
    }

    #[test]
    fn test_assignment_is_right_associative() {
        assert_eq!(render("a = b = 1 + 2").0, "(= a (= b (+ 1 2)))");
        assert_eq!(render("x += 2 * y").0, "(+= x (* 2 y))");
    }

    #[test]
    fn test_prefix_postfix_and_calls() {
        assert_eq!(render("-x * 2").0, "(* (- x) 2)");
        assert_eq!(render("++i").0, "(pre++ i)");
        assert_eq!(render("i--").0, "(post-- i)");
        assert_eq!(render("f(1, g(2), x + 1)").0, "(call f 1 (call g 2) (+ x 1))");
        assert_eq!(render("f()").0, "(call f)");
        assert_eq!(render("!done").0, "(! done)");
    }

    #[test]
    fn test_missing_operand() {
        let (text, errors) = render("1 +");
        assert_eq!(text, "(+ 1 <invalid>)");
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_unclosed_group() {
        let (text, errors) = render("(1 + 2");
        assert_eq!(text, "(group (+ 1 2))");
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_binding_power_order() {
        assert!(binding_power(TokenKind::Star) > binding_power(TokenKind::Plus));
        assert!(binding_power(TokenKind::EqualEqual) > binding_power(TokenKind::Equals));
        assert!(binding_power(TokenKind::LParen) > binding_power(TokenKind::Star));
        assert_eq!(binding_power(TokenKind::Semicolon), BindingPower::Default);
    }
}
