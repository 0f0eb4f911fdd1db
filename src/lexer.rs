use crate::ast::Position;
use crate::error::CompileError;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Ident,
    Number,
    String,
    Op,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub typ: TokenType,
    pub value: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub pos: Position,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.pos.line, self.pos.column
        )
    }
}

impl Error for LexerError {}

impl From<LexerError> for CompileError {
    fn from(err: LexerError) -> Self {
        CompileError::Syntax {
            message: err.message,
            pos: err.pos,
        }
    }
}

pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    keywords: HashSet<&'static str>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            keywords: keyword_set(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        while !self.at_end() {
            let ch = self.peek();
            if is_ignorable_format_char(ch) {
                self.advance();
                continue;
            }
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
                continue;
            }
            if ch == '\n' {
                let pos = self.pos();
                self.advance();
                tokens.push(Token {
                    typ: TokenType::Newline,
                    value: "\n".to_string(),
                    pos,
                });
                continue;
            }
            if ch == '#' {
                self.skip_comment();
                continue;
            }
            if ch == '"' {
                tokens.push(self.read_string()?);
                continue;
            }
            if ch.is_ascii_digit() {
                tokens.push(self.read_number());
                continue;
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                tokens.push(self.read_identifier());
                continue;
            }
            let pos = self.pos();
            match ch {
                '(' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::LParen,
                        value: "(".to_string(),
                        pos,
                    });
                }
                ')' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::RParen,
                        value: ")".to_string(),
                        pos,
                    });
                }
                '[' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::LBracket,
                        value: "[".to_string(),
                        pos,
                    });
                }
                ']' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::RBracket,
                        value: "]".to_string(),
                        pos,
                    });
                }
                ',' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::Comma,
                        value: ",".to_string(),
                        pos,
                    });
                }
                '+' | '-' | '*' | '/' | '%' => {
                    self.advance();
                    tokens.push(Token {
                        typ: TokenType::Op,
                        value: ch.to_string(),
                        pos,
                    });
                }
                '=' | '!' | '<' | '>' => {
                    tokens.push(self.read_operator());
                }
                _ => {
                    return Err(LexerError {
                        message: format!("Unexpected character {:?}", ch),
                        pos,
                    });
                }
            }
        }
        tokens.push(Token {
            typ: TokenType::Eof,
            value: String::new(),
            pos: self.pos(),
        });
        Ok(tokens)
    }

    fn read_operator(&mut self) -> Token {
        let pos = self.pos();
        let ch = self.advance();
        let mut value = ch.to_string();
        if self.peek() == '=' {
            value.push(self.advance());
        }
        Token {
            typ: TokenType::Op,
            value,
            pos,
        }
    }

    fn read_identifier(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_alphanumeric() || ch == '_' {
                text.push(self.advance());
            } else {
                break;
            }
        }
        let lowered = text.to_lowercase();
        if self.keywords.contains(lowered.as_str()) {
            Token {
                typ: TokenType::Keyword,
                value: lowered,
                pos,
            }
        } else {
            Token {
                typ: TokenType::Ident,
                value: text,
                pos,
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let pos = self.pos();
        let mut text = String::new();
        text.push(self.advance());
        let mut seen_dot = false;
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_digit() {
                text.push(self.advance());
                continue;
            }
            if ch == '.' && !seen_dot {
                seen_dot = true;
                text.push(self.advance());
                continue;
            }
            break;
        }
        Token {
            typ: TokenType::Number,
            value: text,
            pos,
        }
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let pos = self.pos();
        self.advance();
        let mut out = String::new();
        while !self.at_end() {
            let ch = self.advance();
            if ch == '"' {
                return Ok(Token {
                    typ: TokenType::String,
                    value: out,
                    pos,
                });
            }
            if ch == '\\' {
                if self.at_end() {
                    break;
                }
                let esc = self.advance();
                let mapped = match esc {
                    '"' => '"',
                    '\\' => '\\',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    _ => esc,
                };
                out.push(mapped);
                continue;
            }
            if ch == '\n' {
                return Err(LexerError {
                    message: "Unterminated string literal".to_string(),
                    pos,
                });
            }
            out.push(ch);
        }
        Err(LexerError {
            message: "Unterminated string literal".to_string(),
            pos,
        })
    }

    fn skip_comment(&mut self) {
        while !self.at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn at_end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> char {
        if self.at_end() {
            '\0'
        } else {
            self.chars[self.index]
        }
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.index];
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn pos(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

fn keyword_set() -> HashSet<&'static str> {
    [
        "abs",
        "add",
        "all",
        "and",
        "answer",
        "ask",
        "at",
        "broadcast",
        "by",
        "ceiling",
        "change",
        "clicked",
        "contains",
        "costume",
        "define",
        "delete",
        "direction",
        "else",
        "end",
        "flag",
        "floor",
        "for",
        "forever",
        "go",
        "hide",
        "i",
        "if",
        "in",
        "insert",
        "item",
        "key",
        "left",
        "length",
        "list",
        "mouse",
        "move",
        "next",
        "not",
        "of",
        "or",
        "pick",
        "point",
        "position",
        "pressed",
        "random",
        "receive",
        "repeat",
        "replace",
        "reset",
        "right",
        "round",
        "say",
        "script",
        "seconds",
        "set",
        "show",
        "sprite",
        "sqrt",
        "steps",
        "stop",
        "switch",
        "then",
        "think",
        "this",
        "timer",
        "to",
        "turn",
        "until",
        "var",
        "wait",
        "when",
        "with",
        "x",
        "y",
    ]
    .into_iter()
    .collect()
}

fn is_ignorable_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}' // BOM / zero width no-break space
            | '\u{200b}' // zero width space
            | '\u{200c}' // zero width non-joiner
            | '\u{200d}' // zero width joiner
            | '\u{2060}' // word joiner
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize().unwrap()
    }

    #[test]
    fn classifies_keywords_and_identifiers() {
        let tokens = tokenize("set score to (10)");
        let kinds: Vec<_> = tokens.iter().map(|t| t.typ.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenType::Keyword,
                TokenType::Ident,
                TokenType::Keyword,
                TokenType::LParen,
                TokenType::Number,
                TokenType::RParen,
                TokenType::Eof,
            ]
        );
        assert_eq!(tokens[1].value, "score");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = tokenize("When FLAG Clicked");
        assert!(tokens[..3]
            .iter()
            .all(|t| t.typ == TokenType::Keyword));
        assert_eq!(tokens[0].value, "when");
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let tokens = tokenize("show # the sprite\nhide");
        let words: Vec<_> = tokens
            .iter()
            .filter(|t| t.typ == TokenType::Keyword)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(words, vec!["show", "hide"]);
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#"say ("a\"b\n")"#);
        let s = tokens.iter().find(|t| t.typ == TokenType::String).unwrap();
        assert_eq!(s.value, "a\"b\n");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("say (\"oops").tokenize().unwrap_err();
        assert!(err.message.contains("Unterminated"));
        assert_eq!(err.pos.line, 1);
    }

    #[test]
    fn tracks_positions_across_lines() {
        let tokens = tokenize("show\n  hide");
        let hide = tokens.iter().find(|t| t.value == "hide").unwrap();
        assert_eq!(hide.pos, Position::new(2, 3));
    }
}
