use std::rc::Rc;

use crate::{
    ast::{
        Argument, Block, CatchClause, Comprehension, ComprehensionKind, ForLoop, IterationKind,
        LambdaDef, Literal, MapItem, Node, NodeKind, Param, Require, RequireStyle,
    },
    diagnostics::{Diagnostic, DiagnosticKind, SourcePos},
    lexer::{Keyword, Lexer, Token, TokenKind},
    value::PatternValue,
};

/// Parses a whole script. A script with a single statement parses to that
/// statement, otherwise to a block holding every statement.
pub fn parse_script(source: &str, filename: &str) -> Result<Node, Diagnostic> {
    let tokens = Lexer::new(source, filename).tokenize()?;
    Parser::new(tokens).parse_script()
}

const PREDICATE_WORDS: [&str; 7] = [
    "empty",
    "zero",
    "negative",
    "numerical",
    "alphanumerical",
    "date",
    "time",
];

const LENGTH_OPTIONS: [&str; 3] = ["min_len", "max_len", "exact_len"];

const ASSIGN_OPERATORS: [(&str, &str); 5] = [
    ("+=", "add"),
    ("-=", "sub"),
    ("*=", "mul"),
    ("/=", "div"),
    ("%=", "mod"),
];

const COMPARISON_OPERATORS: [(&str, &str); 7] = [
    ("==", "equals"),
    ("!=", "not_equals"),
    ("<>", "not_equals"),
    ("<", "less"),
    ("<=", "less_equals"),
    (">", "greater"),
    (">=", "greater_equals"),
];

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_script(&mut self) -> Result<Node, Diagnostic> {
        let pos = self.peek().pos.clone();
        let mut body = self.parse_statements(&[])?;
        if body.len() == 1 {
            if let Some(node) = body.pop() {
                return Ok(node);
            }
        }
        Ok(Node::new(
            NodeKind::Block(Box::new(Block {
                body,
                catches: Vec::new(),
                finally: Vec::new(),
            })),
            pos,
        ))
    }

    /// Statements up to (not including) one of `terminators` or end of input.
    fn parse_statements(&mut self, terminators: &[Keyword]) -> Result<Vec<Node>, Diagnostic> {
        let mut statements = Vec::new();
        loop {
            while self.matches_punct(";") {}
            if self.is_at_end() || terminators.iter().any(|kw| self.check_keyword(*kw)) {
                break;
            }
            statements.push(self.parse_statement()?);
            self.consume_optional_semicolon();
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Node, Diagnostic> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Require) => self.parse_require(),
            TokenKind::Keyword(Keyword::Def) => self.parse_def(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            _ => self.parse_assignment(),
        }
    }

    fn parse_require(&mut self) -> Result<Node, Diagnostic> {
        let require = self.advance();
        let module_token = self.advance();
        let module = match module_token.kind {
            TokenKind::Identifier => Node::new(
                NodeKind::Identifier(module_token.lexeme.clone()),
                module_token.pos.clone(),
            ),
            TokenKind::String => Node::new(
                NodeKind::Literal(Literal::String(Rc::from(module_token.lexeme.as_str()))),
                module_token.pos.clone(),
            ),
            _ => return Err(self.error(&module_token, "expected module name after `require`")),
        };
        let style = if self.matches_keyword(Keyword::Unqualified) {
            RequireStyle::Unqualified
        } else if self.matches_keyword(Keyword::As) {
            let alias = self.consume_identifier("expected alias after `as`")?;
            RequireStyle::Qualified(Some(alias.lexeme))
        } else if self.matches_keyword(Keyword::Import) {
            self.consume_punct("[", "expected `[` after `import`")?;
            let mut symbols = Vec::new();
            if !self.check_punct("]") {
                loop {
                    let name = self.consume_identifier("expected symbol name in import list")?;
                    let alias = if self.matches_keyword(Keyword::As) {
                        self.consume_identifier("expected alias after `as`")?.lexeme
                    } else {
                        name.lexeme.clone()
                    };
                    symbols.push((name.lexeme, alias));
                    if !self.matches_punct(",") {
                        break;
                    }
                }
            }
            self.consume_punct("]", "expected `]` to close import list")?;
            RequireStyle::Import(symbols)
        } else {
            RequireStyle::Qualified(None)
        };
        Ok(Node::new(
            NodeKind::Require(Box::new(Require { module, style })),
            require.pos,
        ))
    }

    fn parse_def(&mut self) -> Result<Node, Diagnostic> {
        let def = self.advance();
        if self.matches_punct("[") {
            let names = self.parse_name_list("]")?;
            self.consume_op("=", "expected `=` after destructuring target")?;
            let value = self.parse_expression()?;
            return Ok(Node::new(
                NodeKind::DefDestructuring {
                    names,
                    value: Box::new(value),
                },
                def.pos,
            ));
        }
        let name = self.consume_identifier("expected name after `def`")?;
        let value = if self.check_punct("(") {
            self.parse_lambda_rest(Some(name.lexeme.clone()), name.pos.clone())?
        } else {
            self.consume_op("=", "expected `=` after definition name")?;
            let mut value = self.parse_expression()?;
            if let NodeKind::Lambda(lambda) = &mut value.kind {
                if let Some(lambda) = Rc::get_mut(lambda) {
                    lambda.name.get_or_insert_with(|| name.lexeme.clone());
                }
            }
            value
        };
        Ok(Node::new(
            NodeKind::Def {
                name: name.lexeme,
                value: Box::new(value),
            },
            def.pos,
        ))
    }

    fn parse_for(&mut self) -> Result<Node, Diagnostic> {
        let for_token = self.advance();
        let (names, destructure) = if self.matches_punct("[") {
            (self.parse_name_list("]")?, true)
        } else {
            let mut names = vec![self.consume_identifier("expected loop variable")?.lexeme];
            while self.matches_punct(",") {
                names.push(self.consume_identifier("expected loop variable")?.lexeme);
            }
            let destructure = names.len() > 1;
            (names, destructure)
        };
        self.consume_keyword(Keyword::In, "expected `in` after loop variable")?;
        let what = self.parse_iteration_kind();
        let source = self.parse_expression()?;
        let body = self.parse_statement()?;
        Ok(Node::new(
            NodeKind::For(Box::new(ForLoop {
                names,
                destructure,
                what,
                source,
                body,
            })),
            for_token.pos,
        ))
    }

    /// `keys`, `values` and `entries` are only modifiers when an operand
    /// follows them; otherwise they are ordinary identifiers.
    fn parse_iteration_kind(&mut self) -> IterationKind {
        let token = self.peek();
        if token.kind != TokenKind::Identifier {
            return IterationKind::Default;
        }
        let what = match token.lexeme.as_str() {
            "keys" => IterationKind::Keys,
            "values" => IterationKind::Values,
            "entries" => IterationKind::Entries,
            _ => return IterationKind::Default,
        };
        let next = self.peek_at(1);
        let operand_follows = matches!(
            next.kind,
            TokenKind::Identifier | TokenKind::String
        ) || ["(", "[", "<*"].iter().any(|p| next.is(TokenKind::Interpunction, p))
            || ["<<", "<<<"].iter().any(|op| next.is(TokenKind::Operator, op));
        if operand_follows {
            self.advance();
            what
        } else {
            IterationKind::Default
        }
    }

    fn parse_while(&mut self) -> Result<Node, Diagnostic> {
        let while_token = self.advance();
        let condition = self.parse_expression()?;
        let body = self.parse_statement()?;
        Ok(Node::new(
            NodeKind::While {
                condition: Box::new(condition),
                body: Box::new(body),
            },
            while_token.pos,
        ))
    }

    fn parse_assignment(&mut self) -> Result<Node, Diagnostic> {
        let target = self.parse_expression()?;
        if self.matches_op("=") {
            let value = self.parse_expression()?;
            return self.assign_to(target, value);
        }
        for (op, function) in ASSIGN_OPERATORS {
            if self.matches_op(op) {
                let op_pos = self.previous().pos.clone();
                let rhs = self.parse_expression()?;
                let value = call(function, vec![target.clone(), rhs], op_pos);
                return self.assign_to(target, value);
            }
        }
        Ok(target)
    }

    fn assign_to(&self, target: Node, value: Node) -> Result<Node, Diagnostic> {
        let pos = target.pos.clone();
        let kind = match target.kind {
            NodeKind::Identifier(name) => NodeKind::Assign {
                name,
                value: Box::new(value),
            },
            NodeKind::Deref { target, index } => NodeKind::DerefAssign {
                target,
                index,
                value: Box::new(value),
            },
            NodeKind::List(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item.kind {
                        NodeKind::Identifier(name) => names.push(name),
                        _ => {
                            return Err(Diagnostic::new(
                                DiagnosticKind::Parser,
                                "destructuring target must list identifiers",
                            )
                            .with_pos(item.pos))
                        }
                    }
                }
                NodeKind::AssignDestructuring {
                    names,
                    value: Box::new(value),
                }
            }
            _ => {
                return Err(
                    Diagnostic::new(DiagnosticKind::Parser, "invalid assignment target")
                        .with_pos(pos),
                )
            }
        };
        Ok(Node::new(kind, pos))
    }

    fn parse_expression(&mut self) -> Result<Node, Diagnostic> {
        if self.check_keyword(Keyword::If) {
            return self.parse_if();
        }
        self.parse_or()
    }

    fn parse_if(&mut self) -> Result<Node, Diagnostic> {
        let if_token = self.advance();
        let mut branches = Vec::new();
        loop {
            let condition = self.parse_or()?;
            self.consume_keyword(Keyword::Then, "expected `then` after condition")?;
            let body = self.parse_statement()?;
            branches.push((condition, body));
            if !self.matches_keyword(Keyword::Elif) {
                break;
            }
        }
        let otherwise = if self.matches_keyword(Keyword::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Node::new(
            NodeKind::If {
                branches,
                otherwise,
            },
            if_token.pos,
        ))
    }

    fn parse_or(&mut self) -> Result<Node, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches_keyword(Keyword::Or) {
            let pos = expr.pos.clone();
            let right = self.parse_and()?;
            expr = Node::new(NodeKind::Or(Box::new(expr), Box::new(right)), pos);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Node, Diagnostic> {
        let mut expr = self.parse_not()?;
        while self.matches_keyword(Keyword::And) {
            let pos = expr.pos.clone();
            let right = self.parse_not()?;
            expr = Node::new(NodeKind::And(Box::new(expr), Box::new(right)), pos);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Node, Diagnostic> {
        if self.matches_keyword(Keyword::Not) {
            let pos = self.previous().pos.clone();
            let operand = self.parse_not()?;
            return Ok(Node::new(NodeKind::Not(Box::new(operand)), pos));
        }
        self.parse_relational()
    }

    /// Chained comparisons become a conjunction of pairwise calls, each right
    /// operand reused as the next left operand.
    fn parse_relational(&mut self) -> Result<Node, Diagnostic> {
        let mut left = self.parse_additive()?;
        if self.check_keyword(Keyword::In)
            || (self.check_keyword(Keyword::Not)
                && self.peek_at(1).is_keyword(Keyword::In))
        {
            let negated = self.matches_keyword(Keyword::Not);
            self.advance();
            let container = self.parse_additive()?;
            let pos = left.pos.clone();
            let membership = Node::new(
                NodeKind::In {
                    element: Box::new(left),
                    container: Box::new(container),
                },
                pos.clone(),
            );
            return Ok(if negated {
                Node::new(NodeKind::Not(Box::new(membership)), pos)
            } else {
                membership
            });
        }

        let mut comparisons: Vec<Node> = Vec::new();
        while let Some(function) = self.match_comparison() {
            let op_pos = self.previous().pos.clone();
            let right = self.parse_additive()?;
            comparisons.push(call(function, vec![left, right.clone()], op_pos));
            left = right;
        }
        let mut comparisons = comparisons.into_iter();
        let Some(first) = comparisons.next() else {
            return Ok(left);
        };
        Ok(comparisons.fold(first, |acc, next| {
            let pos = acc.pos.clone();
            Node::new(NodeKind::And(Box::new(acc), Box::new(next)), pos)
        }))
    }

    fn match_comparison(&mut self) -> Option<&'static str> {
        if self.matches_keyword(Keyword::Is) {
            if self.matches_keyword(Keyword::Not) {
                return Some("not_equals");
            }
            return Some("equals");
        }
        for (op, function) in COMPARISON_OPERATORS {
            if self.matches_op(op) {
                return Some(function);
            }
        }
        None
    }

    fn parse_additive(&mut self) -> Result<Node, Diagnostic> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let function = if self.matches_op("+") {
                "add"
            } else if self.matches_op("-") {
                "sub"
            } else {
                break;
            };
            let op_pos = self.previous().pos.clone();
            let right = self.parse_multiplicative()?;
            expr = call(function, vec![expr, right], op_pos);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, Diagnostic> {
        let mut expr = self.parse_unary()?;
        loop {
            let function = if self.matches_op("*") {
                "mul"
            } else if self.matches_op("/") {
                "div"
            } else if self.matches_op("%") {
                "mod"
            } else {
                break;
            };
            let op_pos = self.previous().pos.clone();
            let right = self.parse_unary()?;
            expr = call(function, vec![expr, right], op_pos);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Node, Diagnostic> {
        if self.matches_op("-") {
            let pos = self.previous().pos.clone();
            let operand = self.parse_unary()?;
            let kind = match operand.kind {
                NodeKind::Literal(Literal::Int(n)) => NodeKind::Literal(Literal::Int(-n)),
                NodeKind::Literal(Literal::Decimal(n)) => NodeKind::Literal(Literal::Decimal(-n)),
                _ => {
                    let zero = Node::new(NodeKind::Literal(Literal::Int(0)), pos.clone());
                    return Ok(call("sub", vec![zero, operand], pos));
                }
            };
            return Ok(Node::new(kind, pos));
        }
        self.parse_predicate()
    }

    /// English-like suffixes (`is empty`, `starts with`, ...) desugar to a
    /// call with the operand as first argument.
    fn parse_predicate(&mut self) -> Result<Node, Diagnostic> {
        let expr = self.parse_postfix()?;
        let pos = expr.pos.clone();

        if self.check_keyword(Keyword::Is) {
            let (negated, offset) = if self.peek_at(1).is_keyword(Keyword::Not) {
                (true, 2)
            } else {
                (false, 1)
            };
            let word = self.peek_at(offset);
            if word.kind == TokenKind::Identifier && PREDICATE_WORDS.contains(&word.lexeme.as_str())
            {
                for _ in 0..=offset {
                    self.advance();
                }
                let word = self.previous().lexeme.clone();
                let predicate = self.parse_is_predicate(&word, expr, pos.clone())?;
                return Ok(negate(predicate, negated, pos));
            }
            return Ok(expr);
        }

        let (negated, offset) = if self.check_keyword(Keyword::Not) {
            (true, 1)
        } else {
            (false, 0)
        };
        let word = self.peek_at(offset);
        if word.kind != TokenKind::Identifier {
            return Ok(expr);
        }
        let function = match word.lexeme.as_str() {
            "starts" if self.peek_at(offset + 1).is(TokenKind::Identifier, "with") => {
                "starts_with"
            }
            "ends" if self.peek_at(offset + 1).is(TokenKind::Identifier, "with") => "ends_with",
            "contains" => "contains",
            "matches" => "matches",
            _ => return Ok(expr),
        };
        let skip = if function.contains('_') { 2 } else { 1 };
        for _ in 0..offset + skip {
            self.advance();
        }
        let argument = self.parse_additive()?;
        let predicate = call(function, vec![expr, argument], pos.clone());
        Ok(negate(predicate, negated, pos))
    }

    fn parse_is_predicate(
        &mut self,
        word: &str,
        subject: Node,
        pos: SourcePos,
    ) -> Result<Node, Diagnostic> {
        let mut args = vec![Argument {
            name: None,
            value: subject,
        }];
        let function = match word {
            "empty" => "is_empty",
            "zero" => "is_zero",
            "negative" => "is_negative",
            "time" => "is_time",
            "date" => {
                if self.check(TokenKind::Identifier)
                    && self.peek().lexeme == "with"
                    && self.peek_at(1).is(TokenKind::Identifier, "hour")
                {
                    self.advance();
                    let hour = self.advance();
                    args.push(Argument {
                        name: Some("with_hour".to_string()),
                        value: Node::new(NodeKind::Literal(Literal::Boolean(true)), hour.pos),
                    });
                }
                "is_date"
            }
            "numerical" | "alphanumerical" => {
                while self.check(TokenKind::Identifier)
                    && LENGTH_OPTIONS.contains(&self.peek().lexeme.as_str())
                {
                    let option = self.advance();
                    let value = self.parse_postfix()?;
                    args.push(Argument {
                        name: Some(option.lexeme),
                        value,
                    });
                }
                if word == "numerical" {
                    "is_numerical"
                } else {
                    "is_alphanumerical"
                }
            }
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parser,
                    format!("unknown predicate `{word}`"),
                )
                .with_pos(pos))
            }
        };
        Ok(Node::new(
            NodeKind::Funcall {
                callee: Box::new(identifier(function, pos.clone())),
                args,
            },
            pos,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Node, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches_punct("(") {
                let args = self.parse_arguments()?;
                let pos = expr.pos.clone();
                expr = Node::new(
                    NodeKind::Funcall {
                        callee: Box::new(expr),
                        args,
                    },
                    pos,
                );
            } else if self.matches_punct("[") {
                let index = self.parse_expression()?;
                self.consume_punct("]", "expected `]` after index")?;
                let pos = expr.pos.clone();
                expr = Node::new(
                    NodeKind::Deref {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    pos,
                );
            } else if self.matches_op("->") {
                let member = self.consume_identifier("expected member name after `->`")?;
                let pos = expr.pos.clone();
                if self.matches_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = Node::new(
                        NodeKind::DerefInvoke {
                            target: Box::new(expr),
                            member: member.lexeme,
                            args,
                        },
                        pos,
                    );
                } else {
                    let index = Node::new(
                        NodeKind::Literal(Literal::String(Rc::from(member.lexeme.as_str()))),
                        member.pos,
                    );
                    expr = Node::new(
                        NodeKind::Deref {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    );
                }
            } else if self.matches_op("!>") {
                expr = self.parse_pipeline(expr)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// `expr !> f(args)` calls `f(expr, args)`; the callee may be an
    /// identifier, a member path or an inline lambda.
    fn parse_pipeline(&mut self, subject: Node) -> Result<Node, Diagnostic> {
        let pos = subject.pos.clone();
        let is_lambda = self.check_keyword(Keyword::Fn);
        let mut callee = self.parse_primary()?;
        while !is_lambda && self.matches_op("->") {
            let member = self.consume_identifier("expected member name after `->`")?;
            let index = Node::new(
                NodeKind::Literal(Literal::String(Rc::from(member.lexeme.as_str()))),
                member.pos,
            );
            let callee_pos = callee.pos.clone();
            callee = Node::new(
                NodeKind::Deref {
                    target: Box::new(callee),
                    index: Box::new(index),
                },
                callee_pos,
            );
        }
        let mut args = vec![Argument {
            name: None,
            value: subject,
        }];
        if !is_lambda && self.matches_punct("(") {
            args.extend(self.parse_arguments()?);
        }
        Ok(Node::new(
            NodeKind::Funcall {
                callee: Box::new(callee),
                args,
            },
            pos,
        ))
    }

    /// Arguments after the opening `(`, through the closing `)`.
    fn parse_arguments(&mut self) -> Result<Vec<Argument>, Diagnostic> {
        let mut args = Vec::new();
        if !self.check_punct(")") {
            loop {
                if self.matches_punct("...") {
                    let pos = self.previous().pos.clone();
                    let inner = self.parse_expression()?;
                    args.push(Argument {
                        name: None,
                        value: Node::new(NodeKind::Spread(Box::new(inner)), pos),
                    });
                } else if self.check(TokenKind::Identifier) && self.peek_at(1).is(TokenKind::Operator, "=")
                {
                    let name = self.advance();
                    self.advance();
                    let value = self.parse_expression()?;
                    args.push(Argument {
                        name: Some(name.lexeme),
                        value,
                    });
                } else {
                    args.push(Argument {
                        name: None,
                        value: self.parse_expression()?,
                    });
                }
                if !self.matches_punct(",") {
                    break;
                }
            }
        }
        self.consume_punct(")", "expected `)` after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Node, Diagnostic> {
        if self.check_keyword(Keyword::If) {
            return self.parse_if();
        }
        let token = self.advance();
        let pos = token.pos.clone();
        let kind = match token.kind {
            TokenKind::Int => {
                let n = token
                    .lexeme
                    .parse::<i64>()
                    .map_err(|_| self.error(&token, "integer literal out of range"))?;
                NodeKind::Literal(Literal::Int(n))
            }
            TokenKind::Decimal => {
                let n = token
                    .lexeme
                    .parse::<f64>()
                    .map_err(|_| self.error(&token, "invalid decimal literal"))?;
                NodeKind::Literal(Literal::Decimal(n))
            }
            TokenKind::String => {
                NodeKind::Literal(Literal::String(Rc::from(token.lexeme.as_str())))
            }
            TokenKind::Boolean => NodeKind::Literal(Literal::Boolean(token.lexeme == "TRUE")),
            TokenKind::Pattern => {
                let pattern = PatternValue::new(&token.lexeme).map_err(|err| {
                    self.error(&token, &format!("invalid pattern literal: {err}"))
                })?;
                NodeKind::Literal(Literal::Pattern(Rc::new(pattern)))
            }
            TokenKind::Identifier => NodeKind::Identifier(token.lexeme.clone()),
            TokenKind::Keyword(Keyword::Fn) => return self.parse_lambda_rest(None, pos),
            TokenKind::Keyword(Keyword::Do) => return self.parse_block(pos),
            TokenKind::Keyword(Keyword::Break) => NodeKind::Break,
            TokenKind::Keyword(Keyword::Continue) => NodeKind::Continue,
            TokenKind::Keyword(Keyword::Return) => {
                let value = if self.starts_expression() {
                    Some(Box::new(self.parse_expression()?))
                } else {
                    None
                };
                NodeKind::Return(value)
            }
            TokenKind::Keyword(Keyword::Error) => {
                NodeKind::Error(Box::new(self.parse_expression()?))
            }
            TokenKind::Interpunction if token.lexeme == "(" => {
                let expr = self.parse_expression()?;
                self.consume_punct(")", "expected `)` after expression")?;
                return Ok(expr);
            }
            TokenKind::Interpunction if token.lexeme == "[" => {
                return self.parse_collection(ComprehensionKind::List, "]", pos)
            }
            TokenKind::Interpunction if token.lexeme == "<*" => return self.parse_object(pos),
            TokenKind::Operator if token.lexeme == "<<" => {
                return self.parse_collection(ComprehensionKind::Set, ">>", pos)
            }
            TokenKind::Operator if token.lexeme == "<<<" => return self.parse_map(pos),
            _ => {
                return Err(self.error(&token, &format!("unexpected token `{}`", token.lexeme)))
            }
        };
        Ok(Node::new(kind, pos))
    }

    /// List or set literal (or comprehension) after its opening delimiter.
    fn parse_collection(
        &mut self,
        kind: ComprehensionKind,
        close: &str,
        pos: SourcePos,
    ) -> Result<Node, Diagnostic> {
        let mut items = Vec::new();
        if !self.check_closing(close) {
            let first = self.parse_item()?;
            if self.check_keyword(Keyword::For) {
                let comprehension = self.parse_comprehension(kind, first, None)?;
                self.consume_closing(close)?;
                return Ok(Node::new(
                    NodeKind::Comprehension(Box::new(comprehension)),
                    pos,
                ));
            }
            items.push(first);
            while self.matches_punct(",") {
                if self.check_closing(close) {
                    break;
                }
                items.push(self.parse_item()?);
            }
        }
        self.consume_closing(close)?;
        let kind = match kind {
            ComprehensionKind::Set => NodeKind::Set(items),
            _ => NodeKind::List(items),
        };
        Ok(Node::new(kind, pos))
    }

    fn parse_item(&mut self) -> Result<Node, Diagnostic> {
        if self.matches_punct("...") {
            let pos = self.previous().pos.clone();
            let inner = self.parse_expression()?;
            return Ok(Node::new(NodeKind::Spread(Box::new(inner)), pos));
        }
        self.parse_expression()
    }

    fn parse_map(&mut self, pos: SourcePos) -> Result<Node, Diagnostic> {
        let mut items = Vec::new();
        if !self.check_closing(">>>") {
            loop {
                if self.matches_punct("...") {
                    items.push(MapItem::Spread(self.parse_expression()?));
                } else {
                    let key = self.parse_expression()?;
                    self.consume_op("=>", "expected `=>` in map literal")?;
                    let value = self.parse_expression()?;
                    if items.is_empty() && self.check_keyword(Keyword::For) {
                        let comprehension =
                            self.parse_comprehension(ComprehensionKind::Map, key, Some(value))?;
                        self.consume_closing(">>>")?;
                        return Ok(Node::new(
                            NodeKind::Comprehension(Box::new(comprehension)),
                            pos,
                        ));
                    }
                    items.push(MapItem::Entry(key, value));
                }
                if !self.matches_punct(",") || self.check_closing(">>>") {
                    break;
                }
            }
        }
        self.consume_closing(">>>")?;
        Ok(Node::new(NodeKind::Map(items), pos))
    }

    fn parse_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: Node,
        value: Option<Node>,
    ) -> Result<Comprehension, Diagnostic> {
        self.consume_keyword(Keyword::For, "expected `for` in comprehension")?;
        let var = self.consume_identifier("expected comprehension variable")?;
        self.consume_keyword(Keyword::In, "expected `in` in comprehension")?;
        let source = self.parse_or()?;
        let condition = if self.matches_keyword(Keyword::If) {
            Some(self.parse_or()?)
        } else {
            None
        };
        Ok(Comprehension {
            kind,
            element,
            value,
            var: var.lexeme,
            source,
            condition,
        })
    }

    fn parse_object(&mut self, pos: SourcePos) -> Result<Node, Diagnostic> {
        let mut members = Vec::new();
        if !self.check_punct("*>") {
            loop {
                let name = self.consume_identifier("expected member name in object literal")?;
                self.consume_op("=", "expected `=` after member name")?;
                members.push((name.lexeme, self.parse_expression()?));
                if !self.matches_punct(",") || self.check_punct("*>") {
                    break;
                }
            }
        }
        self.consume_punct("*>", "expected `*>` to close object literal")?;
        Ok(Node::new(NodeKind::Object(members), pos))
    }

    /// Parameter list and body of `fn(...)` or `def name(...)`.
    fn parse_lambda_rest(
        &mut self,
        name: Option<String>,
        pos: SourcePos,
    ) -> Result<Node, Diagnostic> {
        self.consume_punct("(", "expected `(` before parameters")?;
        let mut params = Vec::new();
        let mut rest = None;
        if !self.check_punct(")") {
            loop {
                let param = self.consume_identifier("expected parameter name")?;
                if self.matches_punct("...") {
                    rest = Some(param.lexeme);
                    break;
                }
                let default = if self.matches_op("=") {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                params.push(Param {
                    name: param.lexeme,
                    default,
                });
                if !self.matches_punct(",") {
                    break;
                }
            }
        }
        self.consume_punct(")", "expected `)` after parameters")?;
        let body = self.parse_statement()?;
        Ok(Node::new(
            NodeKind::Lambda(Rc::new(LambdaDef {
                name,
                params,
                rest,
                body,
            })),
            pos,
        ))
    }

    fn parse_block(&mut self, pos: SourcePos) -> Result<Node, Diagnostic> {
        const SECTION_END: [Keyword; 3] = [Keyword::Catch, Keyword::Finally, Keyword::End];
        let body = self.parse_statements(&SECTION_END)?;
        let mut catches = Vec::new();
        while self.matches_keyword(Keyword::Catch) {
            let filter = if self.check(TokenKind::Identifier) && self.peek().lexeme == "all" {
                self.advance();
                None
            } else {
                Some(self.parse_expression()?)
            };
            let body = self.parse_statements(&SECTION_END)?;
            catches.push(CatchClause { filter, body });
        }
        let finally = if self.matches_keyword(Keyword::Finally) {
            self.parse_statements(&[Keyword::End])?
        } else {
            Vec::new()
        };
        self.consume_keyword(Keyword::End, "expected `end` to close block")?;
        Ok(Node::new(
            NodeKind::Block(Box::new(Block {
                body,
                catches,
                finally,
            })),
            pos,
        ))
    }

    fn parse_name_list(&mut self, close: &str) -> Result<Vec<String>, Diagnostic> {
        let mut names = Vec::new();
        loop {
            names.push(self.consume_identifier("expected identifier")?.lexeme);
            if !self.matches_punct(",") {
                break;
            }
        }
        self.consume_punct(close, "expected closing bracket after names")?;
        Ok(names)
    }

    fn starts_expression(&self) -> bool {
        let token = self.peek();
        match token.kind {
            TokenKind::Eof => false,
            TokenKind::Keyword(kw) => !matches!(
                kw,
                Keyword::End
                    | Keyword::Else
                    | Keyword::Elif
                    | Keyword::Catch
                    | Keyword::Finally
                    | Keyword::Then
            ),
            TokenKind::Interpunction => ["(", "[", "<*"].contains(&token.lexeme.as_str()),
            TokenKind::Operator => ["-", "<<", "<<<"].contains(&token.lexeme.as_str()),
            _ => true,
        }
    }

    /// Closing delimiters are operators (`>>`, `>>>`) or interpunction (`]`).
    fn check_closing(&self, close: &str) -> bool {
        let token = self.peek();
        token.lexeme == close
            && matches!(token.kind, TokenKind::Operator | TokenKind::Interpunction)
    }

    fn consume_closing(&mut self, close: &str) -> Result<Token, Diagnostic> {
        if self.check_closing(close) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), &format!("expected `{close}`")))
        }
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches_punct(";");
    }

    fn matches_op(&mut self, op: &str) -> bool {
        if self.peek().is(TokenKind::Operator, op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_punct(&mut self, punct: &str) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_op(&mut self, op: &str, message: &str) -> Result<Token, Diagnostic> {
        if self.peek().is(TokenKind::Operator, op) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn consume_punct(&mut self, punct: &str, message: &str) -> Result<Token, Diagnostic> {
        if self.check_punct(punct) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword, message: &str) -> Result<Token, Diagnostic> {
        if self.check_keyword(keyword) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn check_punct(&self, punct: &str) -> bool {
        self.peek().is(TokenKind::Interpunction, punct)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// The token stream always ends with `Eof`, which is returned for any
    /// lookahead past the end.
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.current + offset).min(last)]
    }

    fn is_at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        if token.kind == TokenKind::Eof {
            return self.error_eof(token);
        }
        Diagnostic::new(DiagnosticKind::Parser, message.to_string()).with_pos(token.pos.clone())
    }

    fn error_eof(&self, token: &Token) -> Diagnostic {
        Diagnostic::unexpected_eof(Some(token.pos.clone()))
    }
}

fn identifier(name: &str, pos: SourcePos) -> Node {
    Node::new(NodeKind::Identifier(name.to_string()), pos)
}

/// Call of a core function with positional arguments.
fn call(function: &str, args: Vec<Node>, pos: SourcePos) -> Node {
    let args = args
        .into_iter()
        .map(|value| Argument { name: None, value })
        .collect();
    Node::new(
        NodeKind::Funcall {
            callee: Box::new(identifier(function, pos.clone())),
            args,
        },
        pos,
    )
}

fn negate(node: Node, negated: bool, pos: SourcePos) -> Node {
    if negated {
        Node::new(NodeKind::Not(Box::new(node)), pos)
    } else {
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Node {
        parse_script(source, "test").expect("parse should succeed")
    }

    #[test]
    fn operators_desugar_to_core_calls() {
        assert_eq!(parse("1 + 2 * 3").to_string(), "add(1, mul(2, 3))");
        assert_eq!(parse("-x").to_string(), "sub(0, x)");
        assert_eq!(parse("-2").to_string(), "-2");
    }

    #[test]
    fn chained_comparisons_share_operands() {
        assert_eq!(
            parse("a < b <= c").to_string(),
            "(less(a, b) and less_equals(b, c))"
        );
        assert_eq!(parse("a is not b").to_string(), "not_equals(a, b)");
    }

    #[test]
    fn predicates_desugar_with_options() {
        assert_eq!(parse("s is not empty").to_string(), "not is_empty(s)");
        assert_eq!(
            parse("s is numerical min_len 3").to_string(),
            "is_numerical(s, min_len=3)"
        );
        assert_eq!(
            parse("s is date with hour").to_string(),
            "is_date(s, with_hour=TRUE)"
        );
        assert_eq!(
            parse("s not starts with 'a'").to_string(),
            "not starts_with(s, 'a')"
        );
    }

    #[test]
    fn pipeline_inserts_first_argument() {
        assert_eq!(parse("xs !> sorted(key=k)").to_string(), "sorted(xs, key=k)");
    }

    #[test]
    fn compound_assignment_on_members() {
        assert_eq!(
            parse("o->n += 1").to_string(),
            "o['n'] = add(o['n'], 1)"
        );
    }

    #[test]
    fn literals_and_comprehensions() {
        assert_eq!(
            parse("[x * 2 for x in xs if x > 1]").to_string(),
            "[mul(x, 2) for x in xs if greater(x, 1)]"
        );
        assert_eq!(
            parse("<<<'a' => 1, ...m>>>").to_string(),
            "<<<'a' => 1, ...m>>>"
        );
        assert_eq!(parse("<*a = 1, b = 2*>").to_string(), "<*a=1, b=2*>");
    }

    #[test]
    fn lambdas_with_defaults_and_rest() {
        assert_eq!(
            parse("fn(a, b = 2, c...) a").to_string(),
            "fn(a, b=2, c...) a"
        );
    }

    #[test]
    fn end_of_input_is_incomplete() {
        let err = parse_script("do x = 1", "test").expect_err("missing end");
        assert!(err.is_incomplete());
        let err = parse_script("println('open", "test").expect_err("open string");
        assert!(err.is_incomplete());
        let err = parse_script("x = )", "test").expect_err("bad token");
        assert!(!err.is_incomplete());
        assert_eq!(err.pos.map(|pos| pos.column), Some(5));
    }
}
