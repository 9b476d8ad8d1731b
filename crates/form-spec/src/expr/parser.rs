use crate::expr::ExprError;
use crate::expr::ast::{BinaryOp, Expr, Function, LogicalOp, UnaryOp};
use crate::expr::lexer::{Spanned, Token};

/// Parses tokens into an expression, refusing nesting deeper than `max_depth`.
pub fn parse(tokens: Vec<Spanned>, source_len: usize, max_depth: usize) -> Result<Expr, ExprError> {
    let mut parser = Parser {
        tokens,
        current: 0,
        depth: 0,
        max_depth,
        source_len,
    };
    let expr = parser.parse_conditional()?;
    if let Some(spanned) = parser.peek_spanned() {
        return Err(ExprError::syntax(
            spanned.offset,
            format!("unexpected token {:?}", spanned.token),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    current: usize,
    depth: usize,
    max_depth: usize,
    source_len: usize,
}

impl Parser {
    fn parse_conditional(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let test = self.parse_or()?;
        let expr = if self.eat(&Token::Question) {
            let consequent = self.parse_conditional()?;
            self.expect(&Token::Colon, "':' in conditional expression")?;
            let alternate = self.parse_conditional()?;
            Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            }
        } else {
            test
        };
        self.leave();
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.enter()?;
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            self.enter()?;
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Equal) => BinaryOp::Equal,
                Some(Token::NotEqual) => BinaryOp::NotEqual,
                Some(Token::StrictEqual) => BinaryOp::StrictEqual,
                Some(Token::StrictNotEqual) => BinaryOp::StrictNotEqual,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Less) => BinaryOp::Less,
                Some(Token::LessEqual) => BinaryOp::LessEqual,
                Some(Token::Greater) => BinaryOp::Greater,
                Some(Token::GreaterEqual) => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                Some(Token::Percent) => BinaryOp::Remainder,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Plus) => UnaryOp::Plus,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let depth = self.depth;
        let mut expr = self.parse_primary()?;
        while self.eat(&Token::Dot) {
            self.enter()?;
            let offset = self.offset();
            match self.advance() {
                Some(Token::Ident(name)) if name == "length" => {
                    expr = Expr::Length(Box::new(expr));
                }
                Some(Token::Ident(name)) if name == "includes" => {
                    let mut args = self.parse_arguments()?;
                    if args.len() != 1 {
                        return Err(ExprError::Arity {
                            function: "includes".into(),
                            expected: 1,
                            found: args.len(),
                        });
                    }
                    let needle = args.remove(0);
                    expr = Expr::Includes {
                        target: Box::new(expr),
                        needle: Box::new(needle),
                    };
                }
                Some(Token::Ident(name)) => {
                    return Err(ExprError::UnknownMember(name));
                }
                _ => return Err(ExprError::syntax(offset, "expected member name after '.'")),
            }
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Str(text)) => Ok(Expr::Text(text)),
            Some(Token::LeftParen) => {
                let inner = self.parse_conditional()?;
                self.expect(&Token::RightParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.parse_identifier(name),
            Some(token) => Err(ExprError::syntax(
                offset,
                format!("unexpected token {:?}", token),
            )),
            None => Err(ExprError::syntax(offset, "unexpected end of formula")),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Result<Expr, ExprError> {
        match name.as_str() {
            "true" => return Ok(Expr::Bool(true)),
            "false" => return Ok(Expr::Bool(false)),
            "null" => return Ok(Expr::Null),
            "undefined" => return Ok(Expr::Undefined),
            _ => {}
        }

        let mut callee = name;
        if callee == "Math" {
            let offset = self.offset();
            if !self.eat(&Token::Dot) {
                return Err(ExprError::syntax(offset, "expected '.' after Math"));
            }
            match self.advance() {
                Some(Token::Ident(member)) => callee = format!("Math.{}", member),
                _ => return Err(ExprError::syntax(offset, "expected Math member")),
            }
            if self.peek() != Some(&Token::LeftParen) {
                return Err(ExprError::UnknownIdentifier(callee));
            }
        }

        if self.peek() != Some(&Token::LeftParen) {
            return Ok(Expr::Ident(callee));
        }

        let function =
            Function::from_name(&callee).ok_or_else(|| ExprError::UnknownFunction(callee.clone()))?;
        let args = self.parse_arguments()?;
        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(ExprError::Arity {
                function: function.name().into(),
                expected: min,
                found: args.len(),
            });
        }
        Ok(Expr::Call { function, args })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        self.expect(&Token::LeftParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_conditional()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RightParen, "')' after arguments")?;
            return Ok(args);
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExprError::TooDeep(self.max_depth));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExprError> {
        let offset = self.offset();
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ExprError::syntax(offset, format!("expected {}", what)))
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current).map(|spanned| &spanned.token)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.current)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.current).map(|spanned| spanned.token.clone());
        if token.is_some() {
            self.current += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek_spanned()
            .map(|spanned| spanned.offset)
            .unwrap_or(self.source_len)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lexer::tokenize;

    fn parse_str(input: &str) -> Result<Expr, ExprError> {
        parse(tokenize(input)?, input.len(), 64)
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_str("1 + 2 * 3").expect("parse");
        assert_eq!(
            expr,
            binary(
                BinaryOp::Add,
                Expr::Number(1.0),
                binary(BinaryOp::Multiply, Expr::Number(2.0), Expr::Number(3.0)),
            )
        );
    }

    #[test]
    fn resolves_math_helpers() {
        let expr = parse_str("Math.round(x)").expect("parse");
        assert!(matches!(
            expr,
            Expr::Call {
                function: Function::Round,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_functions_and_members() {
        assert!(matches!(
            parse_str("eval('1')"),
            Err(ExprError::UnknownFunction(name)) if name == "eval"
        ));
        assert!(matches!(
            parse_str("x.constructor"),
            Err(ExprError::UnknownMember(_))
        ));
    }

    #[test]
    fn enforces_depth_ceiling() {
        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(parse_str(&nested), Err(ExprError::TooDeep(64))));
    }

    #[test]
    fn long_operator_chains_count_toward_depth() {
        let sum = vec!["1"; 2000].join("+");
        assert!(sum.len() < 4096);
        assert!(matches!(parse_str(&sum), Err(ExprError::TooDeep(64))));

        let conjunction = vec!["a"; 100].join(" && ");
        assert!(matches!(parse_str(&conjunction), Err(ExprError::TooDeep(64))));

        let lengths = format!("x{}", ".length".repeat(100));
        assert!(matches!(parse_str(&lengths), Err(ExprError::TooDeep(64))));
    }

    #[test]
    fn short_chains_stay_within_depth() {
        let sum = vec!["1"; 40].join("+");
        assert!(parse_str(&sum).is_ok());
        assert!(parse_str("a * b + c * d - e / f").is_ok());
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(parse_str("a b").is_err());
        assert!(parse_str("diffDays(a)").is_err());
    }
}
