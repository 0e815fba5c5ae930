//! Formula tokenizer.
//!
//! Every token keeps the whitespace that follows it so that the parse tree
//! can reproduce the source text exactly. Rules are tried in a fixed order:
//! worksheet-qualified reference forms and literals first, then the generic
//! identifier rule (which reclassifies its match into reference shapes and
//! keywords), then named references and punctuation, longest first.

use regex::Regex;

use crate::error::FormulaError;

/// Whitespace carried by every token.
const WS: &str = r"[ \t]*";

/// `'Sheet name' !` (quotes doubled inside).
const WORKSHEET_NAME: &str = r"'(?:[^']|'')*'[ \t]*![ \t]*";

const CELL_REF_LIKE: &str = r"\$?[A-Za-z]+\$?[1-9][0-9]*";
const COLUMN_REF_LIKE: &str = r"\$?[A-Za-z]+_";
const ROW_REF_LIKE: &str = r"_\$?[1-9][0-9]*";
const NAMED_COLUMN: &str = r"\#(?:[^\#]|\#\#)+\#_";
const NAMED_ROW: &str = r"_\#(?:[^\#]|\#\#)+\#";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Punctuation
    Ampersand,
    Arrow,
    Circumflex,
    Colon,
    Comma,
    Dot,
    DoublePercent,
    DoubleSlash,
    DoubleStar,
    EqualTo,
    Equals,
    Exclamation,
    GreaterThan,
    GreaterThanOrEqual,
    LeftBrace,
    LeftBracket,
    LeftParen,
    LeftShift,
    LessGreater,
    LessThan,
    LessThanOrEqual,
    Minus,
    NotEqual,
    Percent,
    Pipe,
    Plus,
    RightBrace,
    RightBracket,
    RightParen,
    RightShift,
    Slash,
    Star,
    Tilde,

    // Literals
    DecInteger,
    Float,
    HexInteger,
    String,

    // References
    CellRefLike,
    ColumnRefLike,
    Deleted,
    Invalid,
    LongCell,
    LongColumn,
    LongDeleted,
    LongInvalid,
    LongNamedColumn,
    LongNamedRow,
    LongRow,
    NakedWorksheet,
    NamedColumn,
    NamedRow,
    RowRefLike,

    // Words
    And,
    For,
    If,
    In,
    Is,
    IsErr,
    IsError,
    Lambda,
    Name,
    Not,
    Or,

    Eof,
}

impl TokenKind {
    /// True for tokens that may name a worksheet before `!`.
    pub fn is_worksheet_name(self) -> bool {
        matches!(
            self,
            TokenKind::Name
                | TokenKind::CellRefLike
                | TokenKind::ColumnRefLike
                | TokenKind::RowRefLike
        )
    }

    /// True for the fully-qualified `'Sheet'!ref` forms.
    pub fn is_long_reference(self) -> bool {
        matches!(
            self,
            TokenKind::LongCell
                | TokenKind::LongColumn
                | TokenKind::LongDeleted
                | TokenKind::LongInvalid
                | TokenKind::LongNamedColumn
                | TokenKind::LongNamedRow
                | TokenKind::LongRow
        )
    }

    /// Case-insensitive words that parse as function calls.
    pub fn is_pseudo_function(self) -> bool {
        matches!(
            self,
            TokenKind::And | TokenKind::Or | TokenKind::If | TokenKind::IsError | TokenKind::IsErr
        )
    }
}

/// A token: its kind, its source text including trailing whitespace, and
/// the byte offset where it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    /// Token text without its trailing whitespace.
    pub fn trimmed(&self) -> &str {
        self.text.trim_end_matches([' ', '\t'])
    }

    /// The trailing whitespace alone.
    pub fn whitespace(&self) -> &str {
        &self.text[self.trimmed().len()..]
    }
}

enum Rule {
    Token(TokenKind),
    Identifier,
}

/// Keywords the grammar does not implement, plus Rhai statement
/// keywords that would break the compiled script if used as names.
const UNIMPLEMENTED_WORDS: &[&str] = &[
    "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except", "exec",
    "finally", "from", "global", "import", "pass", "print", "raise", "return", "try", "while",
    "with", "yield", "let", "const", "fn", "loop", "do", "until", "switch", "throw", "catch",
    "export", "private", "this",
];

/// Compiled rule table. Build once and share.
pub struct Lexer {
    rules: Vec<(Regex, Rule)>,
    cell_ref_like: Regex,
    column_ref_like: Regex,
    row_ref_like: Regex,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

fn anchored(pattern: &str) -> Regex {
    Regex::new(&format!("^(?:{pattern}){WS}")).expect("valid token regex")
}

fn exact(pattern: &str) -> Regex {
    Regex::new(&format!("^{pattern}$")).expect("valid token regex")
}

impl Lexer {
    pub fn new() -> Self {
        let long = |local: &str| anchored(&format!("{WORKSHEET_NAME}{local}"));
        let point_float = r"(?:[0-9]*\.[0-9]+|[0-9]+\.)";

        let mut rules: Vec<(Regex, Rule)> = vec![
            (
                anchored(r"<'(?:[^']|'')*'>"),
                Rule::Token(TokenKind::NakedWorksheet),
            ),
            (long(CELL_REF_LIKE), Rule::Token(TokenKind::LongCell)),
            (long(COLUMN_REF_LIKE), Rule::Token(TokenKind::LongColumn)),
            (long(NAMED_COLUMN), Rule::Token(TokenKind::LongNamedColumn)),
            (long(NAMED_ROW), Rule::Token(TokenKind::LongNamedRow)),
            (long(ROW_REF_LIKE), Rule::Token(TokenKind::LongRow)),
            (long(r"\#Deleted!"), Rule::Token(TokenKind::LongDeleted)),
            (long(r"\#Invalid!"), Rule::Token(TokenKind::LongInvalid)),
            (
                anchored(&format!(
                    r"(?:[0-9]+|{point_float})[eE][+-]?[0-9]+|{point_float}"
                )),
                Rule::Token(TokenKind::Float),
            ),
            (anchored(r"0[xX][0-9a-fA-F]+"), Rule::Token(TokenKind::HexInteger)),
            (anchored(r"0|[1-9][0-9]*"), Rule::Token(TokenKind::DecInteger)),
            (
                anchored(r#"'(?:[^\\'\n]|\\.)*'|"(?:[^\\"\n]|\\.)*""#),
                Rule::Token(TokenKind::String),
            ),
            (anchored(NAMED_ROW), Rule::Token(TokenKind::NamedRow)),
            (anchored(r"\$?[A-Za-z_][A-Za-z_0-9\$]*"), Rule::Identifier),
            (anchored(NAMED_COLUMN), Rule::Token(TokenKind::NamedColumn)),
            (anchored(r"\#Deleted!"), Rule::Token(TokenKind::Deleted)),
            (anchored(r"\#Invalid!"), Rule::Token(TokenKind::Invalid)),
        ];

        let punctuation: &[(&str, TokenKind)] = &[
            (r"\*\*", TokenKind::DoubleStar),
            (r"//", TokenKind::DoubleSlash),
            (r"%%", TokenKind::DoublePercent),
            (r"<<", TokenKind::LeftShift),
            (r">>", TokenKind::RightShift),
            (r"==", TokenKind::EqualTo),
            (r">=", TokenKind::GreaterThanOrEqual),
            (r"<=", TokenKind::LessThanOrEqual),
            (r"!=", TokenKind::NotEqual),
            (r"<>", TokenKind::LessGreater),
            (r"->", TokenKind::Arrow),
            (r"&", TokenKind::Ampersand),
            (r"\^", TokenKind::Circumflex),
            (r":", TokenKind::Colon),
            (r",", TokenKind::Comma),
            (r"\.", TokenKind::Dot),
            (r"=", TokenKind::Equals),
            (r"!", TokenKind::Exclamation),
            (r">", TokenKind::GreaterThan),
            (r"\{", TokenKind::LeftBrace),
            (r"\[", TokenKind::LeftBracket),
            (r"\(", TokenKind::LeftParen),
            (r"<", TokenKind::LessThan),
            (r"-", TokenKind::Minus),
            (r"%", TokenKind::Percent),
            (r"\|", TokenKind::Pipe),
            (r"\+", TokenKind::Plus),
            (r"\}", TokenKind::RightBrace),
            (r"\]", TokenKind::RightBracket),
            (r"\)", TokenKind::RightParen),
            (r"/", TokenKind::Slash),
            (r"\*", TokenKind::Star),
            (r"~", TokenKind::Tilde),
        ];
        rules.extend(
            punctuation
                .iter()
                .map(|(pattern, kind)| (anchored(pattern), Rule::Token(*kind))),
        );

        Lexer {
            rules,
            cell_ref_like: exact(CELL_REF_LIKE),
            column_ref_like: exact(COLUMN_REF_LIKE),
            row_ref_like: exact(ROW_REF_LIKE),
        }
    }

    /// Split `text` into tokens, ending with an `Eof` token.
    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>, FormulaError> {
        let mut tokens = Vec::new();
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            let matched = self
                .rules
                .iter()
                .find_map(|(re, rule)| re.find(rest).filter(|m| !m.is_empty()).map(|m| (m, rule)));
            let Some((m, rule)) = matched else {
                let unexpected = rest.chars().next().map(String::from).unwrap_or_default();
                return Err(FormulaError::Lexical {
                    position: char_position(text, pos),
                    text: unexpected,
                });
            };
            let token_text = m.as_str().to_string();
            let kind = match rule {
                Rule::Token(kind) => *kind,
                Rule::Identifier => self.classify_identifier(text, pos, &token_text)?,
            };
            tokens.push(Token {
                kind,
                text: token_text,
                offset: pos,
            });
            pos += m.end();
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            offset: text.len(),
        });
        Ok(tokens)
    }

    fn classify_identifier(
        &self,
        source: &str,
        pos: usize,
        token_text: &str,
    ) -> Result<TokenKind, FormulaError> {
        let word = token_text.trim_end_matches([' ', '\t']);
        if self.cell_ref_like.is_match(word) {
            return Ok(TokenKind::CellRefLike);
        }
        if self.column_ref_like.is_match(word) {
            return Ok(TokenKind::ColumnRefLike);
        }
        if self.row_ref_like.is_match(word) {
            return Ok(TokenKind::RowRefLike);
        }
        if word.contains('$') {
            return Err(FormulaError::Lexical {
                position: char_position(source, pos),
                text: word.to_string(),
            });
        }
        match word.to_ascii_lowercase().as_str() {
            "and" => return Ok(TokenKind::And),
            "or" => return Ok(TokenKind::Or),
            "if" => return Ok(TokenKind::If),
            "iserror" => return Ok(TokenKind::IsError),
            "iserr" => return Ok(TokenKind::IsErr),
            _ => {}
        }
        if UNIMPLEMENTED_WORDS.contains(&word) {
            return Err(FormulaError::ReservedWord {
                position: char_position(source, pos),
                word: word.to_string(),
            });
        }
        Ok(match word {
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "is" => TokenKind::Is,
            "lambda" => TokenKind::Lambda,
            "not" => TokenKind::Not,
            _ => TokenKind::Name,
        })
    }
}

/// 1-based character position of a byte offset.
pub(crate) fn char_position(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(text: &str) -> Vec<TokenKind> {
        Lexer::new()
            .tokenize(text)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokens_keep_trailing_whitespace() {
        let tokens = Lexer::new().tokenize("=A1 +  2\t").unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["=", "A1 ", "+  ", "2\t", ""]);
        assert_eq!(tokens[1].trimmed(), "A1");
        assert_eq!(tokens[2].whitespace(), "  ");
        assert_eq!(tokens[3].offset, 7);
    }

    #[test]
    fn test_reference_shapes() {
        use TokenKind::*;
        assert_eq!(
            kinds("$A$1 B_ _3 #Head er#_ _#Row# #Deleted! #Invalid!"),
            vec![
                CellRefLike, ColumnRefLike, RowRefLike, NamedColumn, NamedRow, Deleted, Invalid,
                Eof
            ]
        );
    }

    #[test]
    fn test_long_references() {
        use TokenKind::*;
        assert_eq!(
            kinds("'My Sheet'!A1 'x' ! B_ 'it''s'!_2 'q'!#Invalid!"),
            vec![LongCell, LongColumn, LongRow, LongInvalid, Eof]
        );
        assert_eq!(kinds("<'Sheet 1'>"), vec![NakedWorksheet, Eof]);
        assert_eq!(kinds("'plain'"), vec![String, Eof]);
    }

    #[test]
    fn test_numbers() {
        use TokenKind::*;
        assert_eq!(
            kinds("1 1.5 .5 2e10 0x1F 0"),
            vec![DecInteger, Float, Float, Float, HexInteger, DecInteger, Eof]
        );
    }

    #[test]
    fn test_operators_longest_first() {
        use TokenKind::*;
        assert_eq!(
            kinds("** // %% << >> == >= <= != <> -> * / % < > = ! ^ & | ~"),
            vec![
                DoubleStar, DoubleSlash, DoublePercent, LeftShift, RightShift, EqualTo,
                GreaterThanOrEqual, LessThanOrEqual, NotEqual, LessGreater, Arrow, Star, Slash,
                Percent, LessThan, GreaterThan, Equals, Exclamation, Circumflex, Ampersand, Pipe,
                Tilde, Eof
            ]
        );
    }

    #[test]
    fn test_keywords() {
        use TokenKind::*;
        assert_eq!(
            kinds("AND Or if IsError ISERR in is not lambda for x"),
            vec![And, Or, If, IsError, IsErr, In, Is, Not, Lambda, For, Name, Eof]
        );
        // Reserved words are case-sensitive.
        assert_eq!(kinds("IN Lambda"), vec![Name, Name, Eof]);
    }

    #[test]
    fn test_reserved_word_error() {
        let err = Lexer::new().tokenize("=1 + yield").unwrap_err();
        assert_eq!(
            err,
            FormulaError::ReservedWord {
                position: 6,
                word: "yield".to_string()
            }
        );
    }

    #[test]
    fn test_stray_dollar_is_lexical_error() {
        let err = Lexer::new().tokenize("=A$ + 1").unwrap_err();
        assert_eq!(
            err,
            FormulaError::Lexical {
                position: 2,
                text: "A$".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_character() {
        let err = Lexer::new().tokenize("=1 ? 2").unwrap_err();
        assert_eq!(err.to_string(), "Error in formula at position 4: unexpected '?'");
    }
}
