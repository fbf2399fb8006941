//! Tokenizer for entity scripts.

use crate::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Let,
    Model,
    Import,
    True,
    False,
    Null,
    Assign,
    Semi,
    Colon,
    Comma,
    Question,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

impl Tok {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Str(_) => "string literal".into(),
            Self::Int(n) => format!("integer {n}"),
            Self::Eof => "end of input".into(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Let => "let",
            Self::Model => "model",
            Self::Import => "import",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Assign => "=",
            Self::Semi => ";",
            Self::Colon => ":",
            Self::Comma => ",",
            Self::Question => "?",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Bang => "!",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Ident(_) | Self::Str(_) | Self::Int(_) | Self::Eof => "",
        }
    }
}

/// A token with the 1-based position it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

pub(crate) fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn run(mut self) -> ScriptResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let (line, column) = (self.line, self.column);
            let Some(c) = self.bump() else {
                out.push(Token {
                    tok: Tok::Eof,
                    line,
                    column,
                });
                return Ok(out);
            };
            let tok = match c {
                '=' if self.eat('=') => Tok::EqEq,
                '=' => Tok::Assign,
                '!' if self.eat('=') => Tok::NotEq,
                '!' => Tok::Bang,
                '<' if self.eat('=') => Tok::Le,
                '<' => Tok::Lt,
                '>' if self.eat('=') => Tok::Ge,
                '>' => Tok::Gt,
                '&' if self.eat('&') => Tok::AndAnd,
                '|' if self.eat('|') => Tok::OrOr,
                ';' => Tok::Semi,
                ':' => Tok::Colon,
                ',' => Tok::Comma,
                '?' => Tok::Question,
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                '+' => Tok::Plus,
                '-' => Tok::Minus,
                '*' => Tok::Star,
                '"' => Tok::Str(self.string(line, column)?),
                c if c.is_ascii_digit() => self.number(c, line, column)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.word(c),
                other => {
                    return Err(ScriptError::syntax(
                        line,
                        column,
                        format!("unexpected character '{other}'"),
                    ));
                }
            };
            out.push(Token { tok, line, column });
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self, line: usize, column: usize) -> ScriptResult<String> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(ScriptError::syntax(line, column, "unterminated string literal"));
                }
                Some('"') => return Ok(text),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        other => {
                            return Err(ScriptError::syntax(
                                self.line,
                                self.column,
                                format!("unknown escape '\\{}'", other.unwrap_or(' ')),
                            ));
                        }
                    };
                    text.push(escaped);
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn number(&mut self, first: char, line: usize, column: usize) -> ScriptResult<Tok> {
        let mut digits = String::from(first);
        while let Some(c) = self.chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(c);
            self.bump();
        }
        digits
            .parse()
            .map(Tok::Int)
            .map_err(|_| ScriptError::syntax(line, column, format!("integer {digits} out of range")))
    }

    fn word(&mut self, first: char) -> Tok {
        let mut word = String::from(first);
        while let Some(c) = self
            .chars
            .peek()
            .copied()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            word.push(c);
            self.bump();
        }
        match word.as_str() {
            "let" => Tok::Let,
            "model" => Tok::Model,
            "import" => Tok::Import,
            "true" => Tok::True,
            "false" => Tok::False,
            "null" => Tok::Null,
            _ => Tok::Ident(word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn operators_and_comments() {
        assert_eq!(
            toks("a <= 3 // trailing\n&& !b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Le,
                Tok::Int(3),
                Tok::AndAnd,
                Tok::Bang,
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(toks(r#""a\"b\n""#), vec![Tok::Str("a\"b\n".into()), Tok::Eof]);
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("let\n  x").unwrap();
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = tokenize("let s = \"open").unwrap_err();
        assert_eq!(err, ScriptError::syntax(1, 9, "unterminated string literal"));
    }

    #[test]
    fn stray_character_rejected() {
        assert!(matches!(tokenize("a # b"), Err(ScriptError::Syntax { column: 3, .. })));
    }
}
