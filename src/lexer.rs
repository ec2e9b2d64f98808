use std::rc::Rc;

use crate::diagnostics::{Diagnostic, DiagnosticKind, SourcePos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    As,
    Break,
    Catch,
    Continue,
    Def,
    Do,
    Elif,
    Else,
    End,
    Error,
    Finally,
    Fn,
    For,
    If,
    Import,
    In,
    Is,
    Not,
    Or,
    Require,
    Return,
    Then,
    Unqualified,
    While,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Keyword(Keyword),
    Boolean,
    String,
    Int,
    Decimal,
    Pattern,
    Operator,
    Interpunction,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub pos: SourcePos,
}

impl Token {
    pub fn is(&self, kind: TokenKind, lexeme: &str) -> bool {
        self.kind == kind && self.lexeme == lexeme
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }
}

pub struct Lexer {
    file: Rc<str>,
    chars: Vec<char>,
    current: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(source: &str, file: &str) -> Self {
        Self {
            file: Rc::from(file),
            chars: source.chars().collect(),
            current: 0,
            line: 1,
            column: 1,
        }
    }

    fn pos(&self) -> SourcePos {
        SourcePos::new(Rc::clone(&self.file), self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = *self.chars.get(self.current)?;
        self.current += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.current + offset).copied()
    }

    fn match_next(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn collect_while<F>(&mut self, first: char, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut text = String::from(first);
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            text.push(ch);
            self.bump();
        }
        text
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '#' {
                while let Some(ch) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn identifier_or_keyword(&mut self, first: char, pos: SourcePos) -> Token {
        let lexeme = self.collect_while(first, |ch| ch.is_alphanumeric() || ch == '_');
        let kind = match lexeme.as_str() {
            "TRUE" | "FALSE" => TokenKind::Boolean,
            other => keyword_for(other).unwrap_or(TokenKind::Identifier),
        };
        Token { kind, lexeme, pos }
    }

    fn number_literal(&mut self, first: char, pos: SourcePos) -> Token {
        let mut lexeme = self.collect_while(first, |ch| ch.is_ascii_digit());
        let mut kind = TokenKind::Int;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|ch| ch.is_ascii_digit()) {
            self.bump();
            lexeme.push('.');
            while let Some(ch) = self.peek() {
                if !ch.is_ascii_digit() {
                    break;
                }
                lexeme.push(ch);
                self.bump();
            }
            kind = TokenKind::Decimal;
        }
        Token { kind, lexeme, pos }
    }

    fn string_literal(&mut self, quote: char, pos: SourcePos) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some(ch) = self.bump() {
            match ch {
                '\\' => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => break,
                },
                ch if ch == quote => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        pos,
                    });
                }
                _ => value.push(ch),
            }
        }
        Err(Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
            .with_pos(pos)
            .incomplete())
    }

    /// Scans the body of `//...//`; the opening delimiter is already consumed.
    fn pattern_literal(&mut self, pos: SourcePos) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some(ch) = self.bump() {
            if ch == '/' && self.peek() == Some('/') {
                self.bump();
                return Ok(Token {
                    kind: TokenKind::Pattern,
                    lexeme: value,
                    pos,
                });
            }
            value.push(ch);
        }
        Err(Diagnostic::new(DiagnosticKind::Lexer, "unterminated pattern literal")
            .with_pos(pos)
            .incomplete())
    }

    fn operator(&mut self, first: char, pos: SourcePos) -> Result<Token, Diagnostic> {
        let lexeme = match first {
            '<' => {
                if self.match_next('<') {
                    if self.match_next('<') {
                        "<<<"
                    } else {
                        "<<"
                    }
                } else if self.match_next('=') {
                    "<="
                } else if self.match_next('>') {
                    "<>"
                } else if self.match_next('*') {
                    return Ok(simple_token(TokenKind::Interpunction, "<*", pos));
                } else {
                    "<"
                }
            }
            '>' => {
                if self.match_next('>') {
                    if self.match_next('>') {
                        ">>>"
                    } else {
                        ">>"
                    }
                } else if self.match_next('=') {
                    ">="
                } else {
                    ">"
                }
            }
            '=' => {
                if self.match_next('=') {
                    "=="
                } else if self.match_next('>') {
                    "=>"
                } else {
                    "="
                }
            }
            '!' => {
                if self.match_next('=') {
                    "!="
                } else if self.match_next('>') {
                    "!>"
                } else {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Lexer,
                        "unexpected character `!`",
                    )
                    .with_pos(pos));
                }
            }
            '-' => {
                if self.match_next('>') {
                    "->"
                } else if self.match_next('=') {
                    "-="
                } else {
                    "-"
                }
            }
            '+' => {
                if self.match_next('=') {
                    "+="
                } else {
                    "+"
                }
            }
            '*' => {
                if self.match_next('=') {
                    "*="
                } else if self.match_next('>') {
                    return Ok(simple_token(TokenKind::Interpunction, "*>", pos));
                } else {
                    "*"
                }
            }
            '/' => {
                if self.match_next('/') {
                    return self.pattern_literal(pos);
                } else if self.match_next('=') {
                    "/="
                } else {
                    "/"
                }
            }
            '%' => {
                if self.match_next('=') {
                    "%="
                } else {
                    "%"
                }
            }
            other => {
                return Err(Diagnostic::new(
                    DiagnosticKind::Lexer,
                    format!("unexpected character `{other}`"),
                )
                .with_pos(pos));
            }
        };
        Ok(simple_token(TokenKind::Operator, lexeme, pos))
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let pos = self.pos();
            let Some(ch) = self.bump() else {
                tokens.push(simple_token(TokenKind::Eof, "", pos));
                break;
            };
            let token = match ch {
                ch if ch.is_alphabetic() || ch == '_' => self.identifier_or_keyword(ch, pos),
                '0'..='9' => self.number_literal(ch, pos),
                '"' | '\'' => self.string_literal(ch, pos)?,
                '.' => {
                    if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                        self.bump();
                        self.bump();
                        simple_token(TokenKind::Interpunction, "...", pos)
                    } else {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lexer,
                            "unexpected character `.`",
                        )
                        .with_pos(pos));
                    }
                }
                '(' | ')' | '[' | ']' | ',' | ';' => {
                    simple_token(TokenKind::Interpunction, &ch.to_string(), pos)
                }
                _ => self.operator(ch, pos)?,
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn simple_token(kind: TokenKind, lexeme: &str, pos: SourcePos) -> Token {
    Token {
        kind,
        lexeme: lexeme.to_string(),
        pos,
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "and" => Kw::And,
        "as" => Kw::As,
        "break" => Kw::Break,
        "catch" => Kw::Catch,
        "continue" => Kw::Continue,
        "def" => Kw::Def,
        "do" => Kw::Do,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "end" => Kw::End,
        "error" => Kw::Error,
        "finally" => Kw::Finally,
        "fn" => Kw::Fn,
        "for" => Kw::For,
        "if" => Kw::If,
        "import" => Kw::Import,
        "in" => Kw::In,
        "is" => Kw::Is,
        "not" => Kw::Not,
        "or" => Kw::Or,
        "require" => Kw::Require,
        "return" => Kw::Return,
        "then" => Kw::Then,
        "unqualified" => Kw::Unqualified,
        "while" => Kw::While,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source, "test").tokenize().expect("lexing should succeed")
    }

    fn lexemes(source: &str) -> Vec<String> {
        lex(source).into_iter().map(|token| token.lexeme).collect()
    }

    #[test]
    fn composite_operators_use_longest_match() {
        assert_eq!(
            lexemes("a <<< b >>> << >> <> <= >= != !> -> == => += /="),
            vec![
                "a", "<<<", "b", ">>>", "<<", ">>", "<>", "<=", ">=", "!=", "!>", "->", "==",
                "=>", "+=", "/=", ""
            ]
        );
    }

    #[test]
    fn keywords_booleans_and_identifiers() {
        let tokens = lex("def TRUE FALSE define iffy if");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Def));
        assert_eq!(tokens[1].kind, TokenKind::Boolean);
        assert_eq!(tokens[2].kind, TokenKind::Boolean);
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
        assert_eq!(tokens[4].kind, TokenKind::Identifier);
        assert_eq!(tokens[5].kind, TokenKind::Keyword(Keyword::If));
    }

    #[test]
    fn numbers_strings_and_patterns() {
        let tokens = lex("12 3.25 'a\\tb' \"q\\\"x\" //^[a-z]+$//");
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[1].kind, TokenKind::Decimal);
        assert_eq!(tokens[1].lexeme, "3.25");
        assert_eq!(tokens[2].lexeme, "a\tb");
        assert_eq!(tokens[3].lexeme, "q\"x");
        assert_eq!(tokens[4].kind, TokenKind::Pattern);
        assert_eq!(tokens[4].lexeme, "^[a-z]+$");
    }

    #[test]
    fn spread_is_a_single_token() {
        assert_eq!(lexemes("f(...xs)"), vec!["f", "(", "...", "xs", ")", ""]);
    }

    #[test]
    fn comments_are_skipped_and_positions_tracked() {
        let tokens = lex("# header\n  x = 1 # trailing\ny");
        assert_eq!(tokens[0].lexeme, "x");
        assert_eq!((tokens[0].pos.line, tokens[0].pos.column), (2, 3));
        assert_eq!(tokens[3].lexeme, "y");
        assert_eq!((tokens[3].pos.line, tokens[3].pos.column), (3, 1));
    }

    #[test]
    fn unterminated_literals_fail_with_position() {
        let err = Lexer::new("x = 'abc", "test")
            .tokenize()
            .expect_err("unterminated string");
        assert!(err.message.contains("unterminated string"));
        assert_eq!(err.pos.map(|pos| pos.column), Some(5));

        let err = Lexer::new("//abc", "test")
            .tokenize()
            .expect_err("unterminated pattern");
        assert!(err.message.contains("unterminated pattern"));
    }

    #[test]
    fn open_literals_at_end_of_input_are_incomplete() {
        let err = Lexer::new("println('abc", "test")
            .tokenize()
            .expect_err("open string");
        assert!(err.is_incomplete());

        let err = Lexer::new("'first line\nsecond", "test")
            .tokenize()
            .expect_err("open string across lines");
        assert!(err.is_incomplete());

        let err = Lexer::new("x = //ab", "test")
            .tokenize()
            .expect_err("open pattern");
        assert!(err.is_incomplete());

        let err = Lexer::new("x = 1 $", "test")
            .tokenize()
            .expect_err("stray character");
        assert!(!err.is_incomplete());
    }
}
