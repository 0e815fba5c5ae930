//! Recursive-descent formula parser.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! root        := '=' test EOF
//! test        := lambdef | and_test ('or' and_test)*
//! lambdef     := 'lambda' [NAME (',' NAME)* [',']] '->' test
//! and_test    := not_test ('and' not_test)*
//! not_test    := 'not' not_test | comparison
//! comparison  := expr (comp_op expr)*
//! expr        := concat ('|' concat)*
//! concat      := shift ('&' shift)*
//! shift       := arith (('<<' | '>>') arith)*
//! arith       := term (('+' | '-') term)*
//! term        := percent (('*' | '/' | '//' | '%%') percent)*
//! percent     := factor '%'*
//! factor      := ('-' | '+' | '~') factor | power
//! power       := reference [('**' | '^') factor]
//! reference   := primary trailer*
//! primary     := atom | cell_ref [':' cell_ref] | column/row/named refs
//!              | naked_worksheet | PSEUDO_FN call_trailer
//! ```
//!
//! Every level produces its own wrapper node, as the table-driven grammar
//! did, so node shapes are stable for the compiler and rewriter.

use std::sync::OnceLock;

use regex::Regex;

use super::lexer::{Lexer, Token, TokenKind, char_position};
use super::node::{Child, NodeKind, ParseNode};
use crate::engine::{cell_name_to_coordinates, column_name_to_index, MAX_ROW};
use crate::error::{FormulaError, Result};

/// Parses formula text into a [`ParseNode`] tree.
///
/// Holds only the compiled token table, so a single instance can be shared
/// between threads; each call keeps its state on its own stack.
pub struct FormulaParser {
    lexer: Lexer,
}

impl Default for FormulaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormulaParser {
    pub fn new() -> Self {
        FormulaParser {
            lexer: Lexer::new(),
        }
    }

    /// Parse a formula, which must start with `=`.
    pub fn parse(&self, text: &str) -> Result<ParseNode> {
        let tokens = self.lexer.tokenize(text)?;
        Parser {
            source: text,
            tokens,
            pos: 0,
        }
        .parse_root()
    }
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

fn long_worksheet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?<ws>'(?:[^']|'')*'[ \t]*)(?<bang>![ \t]*)(?<local>.*)$")
            .expect("valid worksheet split regex")
    })
}

fn is_comparison(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::LessThan
            | TokenKind::GreaterThan
            | TokenKind::Equals
            | TokenKind::EqualTo
            | TokenKind::GreaterThanOrEqual
            | TokenKind::LessThanOrEqual
            | TokenKind::NotEqual
            | TokenKind::LessGreater
            | TokenKind::In
            | TokenKind::Is
    )
}

/// Tokens that can begin a `test`.
fn starts_test(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        DecInteger
            | Float
            | HexInteger
            | String
            | Name
            | CellRefLike
            | ColumnRefLike
            | RowRefLike
            | NamedColumn
            | NamedRow
            | Deleted
            | Invalid
            | NakedWorksheet
            | LessThan
            | LeftParen
            | LeftBracket
            | LeftBrace
            | Minus
            | Plus
            | Tilde
            | Not
            | Lambda
    ) || kind.is_long_reference()
        || kind.is_pseudo_function()
}

fn range_endpoint(node: &ParseNode) -> bool {
    matches!(
        node.kind(),
        NodeKind::FlCellReference | NodeKind::FlDeletedReference | NodeKind::FlInvalidReference
    )
}

impl<'s> Parser<'s> {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and advance never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn unexpected_token(&self, token: &Token) -> FormulaError {
        if token.kind == TokenKind::Eof {
            FormulaError::Incomplete
        } else {
            FormulaError::Syntax {
                position: char_position(self.source, token.offset),
                text: token.trimmed().to_string(),
            }
        }
    }

    fn unexpected(&self) -> FormulaError {
        self.unexpected_token(self.peek())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_root(mut self) -> Result<ParseNode> {
        let equals = self.expect(TokenKind::Equals)?;
        let test = self.parse_test()?;
        if self.peek_kind() != TokenKind::Eof {
            return Err(self.unexpected());
        }
        Ok(ParseNode::new(
            NodeKind::FlRoot,
            vec![equals.text.into(), test.into()],
        ))
    }

    fn parse_test(&mut self) -> Result<ParseNode> {
        if self.peek_kind() == TokenKind::Lambda {
            let lambdef = self.parse_lambdef()?;
            return Ok(ParseNode::new(NodeKind::Test, vec![lambdef.into()]));
        }
        let mut children: Vec<Child> = vec![self.parse_and_test()?.into()];
        while self.peek_kind() == TokenKind::Or {
            children.push(self.advance().text.into());
            children.push(self.parse_and_test()?.into());
        }
        Ok(ParseNode::new(NodeKind::Test, children))
    }

    fn parse_lambdef(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = vec![self.advance().text.into()];
        if self.peek_kind() != TokenKind::Arrow {
            let mut params: Vec<Child> = Vec::new();
            loop {
                let name = self.expect(TokenKind::Name)?;
                params.push(ParseNode::new(NodeKind::Name, vec![name.text.into()]).into());
                if self.peek_kind() != TokenKind::Comma {
                    break;
                }
                params.push(self.advance().text.into());
                if self.peek_kind() == TokenKind::Arrow {
                    break;
                }
            }
            children.push(ParseNode::new(NodeKind::VarArgsList, params).into());
        }
        children.push(self.expect(TokenKind::Arrow)?.text.into());
        children.push(self.parse_test()?.into());
        Ok(ParseNode::new(NodeKind::LambDef, children))
    }

    fn parse_and_test(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = vec![self.parse_not_test()?.into()];
        while self.peek_kind() == TokenKind::And {
            children.push(self.advance().text.into());
            children.push(self.parse_not_test()?.into());
        }
        Ok(ParseNode::new(NodeKind::AndTest, children))
    }

    fn parse_not_test(&mut self) -> Result<ParseNode> {
        if self.peek_kind() == TokenKind::Not {
            let not = self.advance();
            let inner = self.parse_not_test()?;
            return Ok(ParseNode::new(
                NodeKind::NotTest,
                vec![not.text.into(), inner.into()],
            ));
        }
        let comparison = self.parse_comparison()?;
        Ok(ParseNode::new(NodeKind::NotTest, vec![comparison.into()]))
    }

    fn parse_comparison(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = vec![self.parse_expr()?.into()];
        loop {
            let kind = self.peek_kind();
            let op_text = if is_comparison(kind) {
                let mut text = self.advance().text;
                if kind == TokenKind::Is && self.peek_kind() == TokenKind::Not {
                    text.push_str(&self.advance().text);
                }
                text
            } else if kind == TokenKind::Not && self.peek_nth_kind(1) == TokenKind::In {
                let mut text = self.advance().text;
                text.push_str(&self.advance().text);
                text
            } else {
                break;
            };
            children.push(ParseNode::new(NodeKind::CompOperator, vec![op_text.into()]).into());
            children.push(self.parse_expr()?.into());
        }
        Ok(ParseNode::new(NodeKind::Comparison, children))
    }

    /// `item (op item)*` for the left-associative binary levels.
    fn parse_binary(
        &mut self,
        kind: NodeKind,
        ops: &[TokenKind],
        next: fn(&mut Self) -> Result<ParseNode>,
    ) -> Result<ParseNode> {
        let mut children: Vec<Child> = vec![next(self)?.into()];
        while ops.contains(&self.peek_kind()) {
            children.push(self.advance().text.into());
            children.push(next(self)?.into());
        }
        Ok(ParseNode::new(kind, children))
    }

    fn parse_expr(&mut self) -> Result<ParseNode> {
        self.parse_binary(NodeKind::Expr, &[TokenKind::Pipe], Self::parse_concat)
    }

    fn parse_concat(&mut self) -> Result<ParseNode> {
        self.parse_binary(NodeKind::ConcatExpr, &[TokenKind::Ampersand], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> Result<ParseNode> {
        self.parse_binary(
            NodeKind::ShiftExpr,
            &[TokenKind::LeftShift, TokenKind::RightShift],
            Self::parse_arith,
        )
    }

    fn parse_arith(&mut self) -> Result<ParseNode> {
        self.parse_binary(
            NodeKind::ArithExpr,
            &[TokenKind::Plus, TokenKind::Minus],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> Result<ParseNode> {
        self.parse_binary(
            NodeKind::Term,
            &[
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::DoubleSlash,
                TokenKind::DoublePercent,
            ],
            Self::parse_percent,
        )
    }

    fn parse_percent(&mut self) -> Result<ParseNode> {
        let mut node = self.parse_factor()?;
        while self.peek_kind() == TokenKind::Percent {
            let percent = self.advance();
            node = ParseNode::new(NodeKind::Percent, vec![node.into(), percent.text.into()]);
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> Result<ParseNode> {
        if matches!(
            self.peek_kind(),
            TokenKind::Minus | TokenKind::Plus | TokenKind::Tilde
        ) {
            let op = self.advance();
            let inner = self.parse_factor()?;
            return Ok(ParseNode::new(
                NodeKind::Factor,
                vec![op.text.into(), inner.into()],
            ));
        }
        let power = self.parse_power()?;
        Ok(ParseNode::new(NodeKind::Factor, vec![power.into()]))
    }

    fn parse_power(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = vec![self.parse_reference()?.into()];
        if matches!(
            self.peek_kind(),
            TokenKind::DoubleStar | TokenKind::Circumflex
        ) {
            children.push(self.advance().text.into());
            children.push(self.parse_factor()?.into());
        }
        Ok(ParseNode::new(NodeKind::Power, children))
    }

    fn parse_reference(&mut self) -> Result<ParseNode> {
        let mut children = self.parse_primary()?;
        while matches!(
            self.peek_kind(),
            TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot
        ) {
            children.push(self.parse_trailer()?.into());
        }
        Ok(ParseNode::new(NodeKind::FlReference, children))
    }

    fn parse_primary(&mut self) -> Result<Vec<Child>> {
        let kind = self.peek_kind();
        if kind.is_pseudo_function() {
            if self.peek_nth_kind(1) != TokenKind::LeftParen {
                return Err(self.unexpected());
            }
            let name = self.advance();
            let atom = atom(vec![name_node(name.text).into()]);
            let call = self.parse_trailer()?;
            return Ok(vec![atom.into(), call.into()]);
        }
        let node = match kind {
            TokenKind::DecInteger | TokenKind::HexInteger | TokenKind::Float => {
                let number = self.advance();
                atom(vec![
                    ParseNode::new(NodeKind::Number, vec![number.text.into()]).into(),
                ])
            }
            TokenKind::String => {
                let mut parts: Vec<Child> = Vec::new();
                while self.peek_kind() == TokenKind::String {
                    parts.push(self.advance().text.into());
                }
                atom(vec![ParseNode::new(NodeKind::StringLiteral, parts).into()])
            }
            TokenKind::LeftParen => self.parse_paren_atom()?,
            TokenKind::LeftBracket => self.parse_list_atom()?,
            TokenKind::LeftBrace => self.parse_dict_atom()?,
            _ => self.parse_reference_primary()?,
        };
        Ok(vec![node.into()])
    }

    /// A reference, or a plain name when the identifier is not one.
    fn parse_reference_primary(&mut self) -> Result<ParseNode> {
        let node = self.parse_single_reference()?;
        if !range_endpoint(&node) || self.peek_kind() != TokenKind::Colon {
            return Ok(node);
        }
        let colon = self.advance();
        let second_start = self.peek().clone();
        let second = if starts_test(second_start.kind) {
            self.parse_single_reference()
        } else {
            Err(self.unexpected())
        }?;
        if !range_endpoint(&second) {
            return Err(self.unexpected_token(&second_start));
        }
        Ok(ParseNode::new(
            NodeKind::FlCellRange,
            vec![node.into(), colon.text.into(), second.into()],
        ))
    }

    fn parse_single_reference(&mut self) -> Result<ParseNode> {
        let token = self.peek().clone();
        let qualified = self.peek_nth_kind(1) == TokenKind::Exclamation;
        match token.kind {
            kind if kind.is_worksheet_name() && qualified => {
                self.advance();
                self.parse_qualified(Child::Text(token.text))
            }
            TokenKind::Name => {
                self.advance();
                Ok(atom(vec![name_node(token.text).into()]))
            }
            TokenKind::CellRefLike => {
                self.advance();
                if cell_name_to_coordinates(&token.trimmed().replace('$', "")).is_some() {
                    Ok(leaf(NodeKind::FlCellReference, token.text))
                } else {
                    Ok(atom(vec![name_node(token.text).into()]))
                }
            }
            TokenKind::ColumnRefLike => {
                self.advance();
                if valid_column(token.trimmed()) {
                    Ok(leaf(NodeKind::FlColumnReference, token.text))
                } else {
                    Ok(atom(vec![name_node(token.text).into()]))
                }
            }
            TokenKind::RowRefLike => {
                self.advance();
                if valid_row(token.trimmed()) {
                    Ok(leaf(NodeKind::FlRowReference, token.text))
                } else {
                    Ok(atom(vec![name_node(token.text).into()]))
                }
            }
            TokenKind::NamedColumn => {
                self.advance();
                Ok(leaf(NodeKind::FlNamedColumnReference, token.text))
            }
            TokenKind::NamedRow => {
                self.advance();
                Ok(leaf(NodeKind::FlNamedRowReference, token.text))
            }
            TokenKind::Deleted => {
                self.advance();
                Ok(leaf(NodeKind::FlDeletedReference, token.text))
            }
            TokenKind::Invalid => {
                self.advance();
                Ok(leaf(NodeKind::FlInvalidReference, token.text))
            }
            kind if kind.is_long_reference() => {
                self.advance();
                self.parse_long_reference(&token)
            }
            TokenKind::NakedWorksheet => {
                self.advance();
                let naked = split_naked_worksheet(&token.text);
                self.maybe_qualified_by(naked)
            }
            TokenKind::LessThan => {
                self.advance();
                let name = self.peek().clone();
                if !matches!(name.kind, TokenKind::Name | TokenKind::CellRefLike) {
                    return Err(self.unexpected());
                }
                self.advance();
                let close = self.expect(TokenKind::GreaterThan)?;
                let naked = ParseNode::new(
                    NodeKind::FlNakedWorksheetReference,
                    vec![token.text.into(), name.text.into(), close.text.into()],
                );
                self.maybe_qualified_by(naked)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn maybe_qualified_by(&mut self, naked: ParseNode) -> Result<ParseNode> {
        if self.peek_kind() == TokenKind::Exclamation {
            self.parse_qualified(Child::Node(naked))
        } else {
            Ok(naked)
        }
    }

    /// `qualifier '!' local`, with the qualifier already consumed.
    fn parse_qualified(&mut self, qualifier: Child) -> Result<ParseNode> {
        let bang = self.expect(TokenKind::Exclamation)?;
        let local = self.peek().clone();
        let kind = match local.kind {
            TokenKind::CellRefLike
                if cell_name_to_coordinates(&local.trimmed().replace('$', "")).is_some() =>
            {
                NodeKind::FlCellReference
            }
            TokenKind::ColumnRefLike if valid_column(local.trimmed()) => {
                NodeKind::FlColumnReference
            }
            TokenKind::RowRefLike if valid_row(local.trimmed()) => NodeKind::FlRowReference,
            TokenKind::NamedColumn => NodeKind::FlNamedColumnReference,
            TokenKind::NamedRow => NodeKind::FlNamedRowReference,
            TokenKind::Deleted => NodeKind::FlDeletedReference,
            TokenKind::Invalid => NodeKind::FlInvalidReference,
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(ParseNode::new(
            kind,
            vec![qualifier, bang.text.into(), local.text.into()],
        ))
    }

    fn parse_long_reference(&self, token: &Token) -> Result<ParseNode> {
        let caps = long_worksheet_re()
            .captures(&token.text)
            .ok_or_else(|| self.unexpected_token(token))?;
        let local = caps["local"].to_string();
        let local_trimmed = local.trim_end_matches([' ', '\t']);
        let kind = match token.kind {
            TokenKind::LongCell
                if cell_name_to_coordinates(&local_trimmed.replace('$', "")).is_some() =>
            {
                NodeKind::FlCellReference
            }
            TokenKind::LongColumn if valid_column(local_trimmed) => NodeKind::FlColumnReference,
            TokenKind::LongRow if valid_row(local_trimmed) => NodeKind::FlRowReference,
            TokenKind::LongNamedColumn => NodeKind::FlNamedColumnReference,
            TokenKind::LongNamedRow => NodeKind::FlNamedRowReference,
            TokenKind::LongDeleted => NodeKind::FlDeletedReference,
            TokenKind::LongInvalid => NodeKind::FlInvalidReference,
            _ => return Err(self.unexpected_token(token)),
        };
        Ok(ParseNode::new(
            kind,
            vec![
                caps["ws"].to_string().into(),
                caps["bang"].to_string().into(),
                local.into(),
            ],
        ))
    }

    fn parse_trailer(&mut self) -> Result<ParseNode> {
        let open = self.advance();
        let children: Vec<Child> = match open.kind {
            TokenKind::LeftParen => {
                let mut children: Vec<Child> = vec![open.text.into()];
                if self.peek_kind() != TokenKind::RightParen {
                    children.push(self.parse_arglist()?.into());
                }
                children.push(self.expect(TokenKind::RightParen)?.text.into());
                children
            }
            TokenKind::LeftBracket => {
                let subscripts = self.parse_subscriptlist()?;
                let close = self.expect(TokenKind::RightBracket)?;
                vec![open.text.into(), subscripts.into(), close.text.into()]
            }
            _ => {
                let name = self.peek().clone();
                if !matches!(
                    name.kind,
                    TokenKind::Name
                        | TokenKind::CellRefLike
                        | TokenKind::ColumnRefLike
                        | TokenKind::RowRefLike
                ) {
                    return Err(self.unexpected());
                }
                self.advance();
                vec![open.text.into(), name_node(name.text).into()]
            }
        };
        Ok(ParseNode::new(NodeKind::Trailer, children))
    }

    fn parse_arglist(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = Vec::new();
        loop {
            let test = self.parse_test()?;
            let mut argument: Vec<Child> = vec![test.into()];
            if self.peek_kind() == TokenKind::For {
                argument.push(self.parse_gen_for()?.into());
            }
            children.push(ParseNode::new(NodeKind::Argument, argument).into());
            if self.peek_kind() != TokenKind::Comma {
                break;
            }
            children.push(self.advance().text.into());
            if !starts_test(self.peek_kind()) {
                break;
            }
        }
        Ok(ParseNode::new(NodeKind::ArgList, children))
    }

    fn parse_subscriptlist(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = Vec::new();
        loop {
            children.push(self.parse_subscript()?.into());
            if self.peek_kind() != TokenKind::Comma {
                break;
            }
            children.push(self.advance().text.into());
            if !starts_test(self.peek_kind()) && self.peek_kind() != TokenKind::Arrow {
                break;
            }
        }
        Ok(ParseNode::new(NodeKind::SubscriptList, children))
    }

    fn parse_subscript(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = Vec::new();
        if self.peek_kind() != TokenKind::Arrow {
            children.push(self.parse_test()?.into());
            if self.peek_kind() != TokenKind::Arrow {
                return Ok(ParseNode::new(NodeKind::Subscript, children));
            }
        }
        children.push(self.advance().text.into());
        if starts_test(self.peek_kind()) {
            children.push(self.parse_test()?.into());
        }
        if self.peek_kind() == TokenKind::Arrow {
            let mut slice_op: Vec<Child> = vec![self.advance().text.into()];
            if starts_test(self.peek_kind()) {
                slice_op.push(self.parse_test()?.into());
            }
            children.push(ParseNode::new(NodeKind::SliceOp, slice_op).into());
        }
        Ok(ParseNode::new(NodeKind::Subscript, children))
    }

    fn parse_paren_atom(&mut self) -> Result<ParseNode> {
        let open = self.advance();
        let mut children: Vec<Child> = vec![open.text.into()];
        if self.peek_kind() != TokenKind::RightParen {
            let first = self.parse_test()?;
            let inner = if self.peek_kind() == TokenKind::For {
                let gen_for = self.parse_gen_for()?;
                ParseNode::new(NodeKind::TestListGexp, vec![first.into(), gen_for.into()])
            } else {
                let items = self.parse_comma_tail(first)?;
                ParseNode::new(NodeKind::TestListGexp, items)
            };
            children.push(inner.into());
        }
        children.push(self.expect(TokenKind::RightParen)?.text.into());
        Ok(atom(children))
    }

    fn parse_list_atom(&mut self) -> Result<ParseNode> {
        let open = self.advance();
        let mut children: Vec<Child> = vec![open.text.into()];
        if self.peek_kind() != TokenKind::RightBracket {
            let first = self.parse_test()?;
            let inner = if self.peek_kind() == TokenKind::For {
                let list_for = self.parse_list_for()?;
                ParseNode::new(NodeKind::ListMaker, vec![first.into(), list_for.into()])
            } else {
                let items = self.parse_comma_tail(first)?;
                ParseNode::new(NodeKind::ListMaker, items)
            };
            children.push(inner.into());
        }
        children.push(self.expect(TokenKind::RightBracket)?.text.into());
        Ok(atom(children))
    }

    fn parse_dict_atom(&mut self) -> Result<ParseNode> {
        let open = self.advance();
        let mut children: Vec<Child> = vec![open.text.into()];
        if self.peek_kind() != TokenKind::RightBrace {
            let mut entries: Vec<Child> = Vec::new();
            loop {
                entries.push(self.parse_test()?.into());
                entries.push(self.expect(TokenKind::Arrow)?.text.into());
                entries.push(self.parse_test()?.into());
                if self.peek_kind() != TokenKind::Comma {
                    break;
                }
                entries.push(self.advance().text.into());
                if !starts_test(self.peek_kind()) {
                    break;
                }
            }
            children.push(ParseNode::new(NodeKind::DictMaker, entries).into());
        }
        children.push(self.expect(TokenKind::RightBrace)?.text.into());
        Ok(atom(children))
    }

    /// `first (',' test)* [',']`
    fn parse_comma_tail(&mut self, first: ParseNode) -> Result<Vec<Child>> {
        let mut items: Vec<Child> = vec![first.into()];
        while self.peek_kind() == TokenKind::Comma {
            items.push(self.advance().text.into());
            if !starts_test(self.peek_kind()) {
                break;
            }
            items.push(self.parse_test()?.into());
        }
        Ok(items)
    }

    fn parse_exprlist(&mut self) -> Result<ParseNode> {
        let mut children: Vec<Child> = vec![self.parse_expr()?.into()];
        while self.peek_kind() == TokenKind::Comma {
            children.push(self.advance().text.into());
            if self.peek_kind() == TokenKind::In {
                break;
            }
            children.push(self.parse_expr()?.into());
        }
        Ok(ParseNode::new(NodeKind::ExprList, children))
    }

    fn parse_list_for(&mut self) -> Result<ParseNode> {
        let for_token = self.expect(TokenKind::For)?;
        let targets = self.parse_exprlist()?;
        let in_token = self.expect(TokenKind::In)?;
        let first = self.parse_test()?;
        let source = ParseNode::new(NodeKind::TestList, self.parse_comma_tail(first)?);
        let mut children: Vec<Child> = vec![
            for_token.text.into(),
            targets.into(),
            in_token.text.into(),
            source.into(),
        ];
        if let Some(iter) = self.parse_list_iter()? {
            children.push(iter.into());
        }
        Ok(ParseNode::new(NodeKind::ListFor, children))
    }

    fn parse_list_iter(&mut self) -> Result<Option<ParseNode>> {
        let inner = match self.peek_kind() {
            TokenKind::For => self.parse_list_for()?,
            TokenKind::If => {
                let if_token = self.advance();
                let condition = self.parse_test()?;
                let mut children: Vec<Child> = vec![if_token.text.into(), condition.into()];
                if let Some(iter) = self.parse_list_iter()? {
                    children.push(iter.into());
                }
                ParseNode::new(NodeKind::ListIf, children)
            }
            _ => return Ok(None),
        };
        Ok(Some(ParseNode::new(NodeKind::ListIter, vec![inner.into()])))
    }

    fn parse_gen_for(&mut self) -> Result<ParseNode> {
        let for_token = self.expect(TokenKind::For)?;
        let targets = self.parse_exprlist()?;
        let in_token = self.expect(TokenKind::In)?;
        let source = self.parse_test()?;
        let mut children: Vec<Child> = vec![
            for_token.text.into(),
            targets.into(),
            in_token.text.into(),
            source.into(),
        ];
        if let Some(iter) = self.parse_gen_iter()? {
            children.push(iter.into());
        }
        Ok(ParseNode::new(NodeKind::GenFor, children))
    }

    fn parse_gen_iter(&mut self) -> Result<Option<ParseNode>> {
        let inner = match self.peek_kind() {
            TokenKind::For => self.parse_gen_for()?,
            TokenKind::If => {
                let if_token = self.advance();
                let condition = self.parse_test()?;
                let mut children: Vec<Child> = vec![if_token.text.into(), condition.into()];
                if let Some(iter) = self.parse_gen_iter()? {
                    children.push(iter.into());
                }
                ParseNode::new(NodeKind::GenIf, children)
            }
            _ => return Ok(None),
        };
        Ok(Some(ParseNode::new(NodeKind::GenIter, vec![inner.into()])))
    }
}

fn atom(children: Vec<Child>) -> ParseNode {
    ParseNode::new(NodeKind::Atom, children)
}

fn name_node(text: String) -> ParseNode {
    ParseNode::new(NodeKind::Name, vec![text.into()])
}

fn leaf(kind: NodeKind, text: String) -> ParseNode {
    ParseNode::new(kind, vec![text.into()])
}

fn valid_column(text: &str) -> bool {
    let letters = text.trim_start_matches('$').trim_end_matches('_');
    column_name_to_index(letters).is_some()
}

fn valid_row(text: &str) -> bool {
    text.trim_start_matches('_')
        .trim_start_matches('$')
        .parse::<usize>()
        .is_ok_and(|row| (1..=MAX_ROW).contains(&row))
}

/// `<'Sheet 1'> ` -> `<`, `'Sheet 1'`, `> `.
fn split_naked_worksheet(text: &str) -> ParseNode {
    let trimmed = text.trim_end_matches([' ', '\t']);
    let whitespace = &text[trimmed.len()..];
    let inner = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);
    ParseNode::new(
        NodeKind::FlNakedWorksheetReference,
        vec![
            "<".into(),
            inner.to_string().into(),
            format!(">{whitespace}").into(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> ParseNode {
        FormulaParser::new().parse(text).unwrap()
    }

    fn parse_err(text: &str) -> FormulaError {
        FormulaParser::new().parse(text).unwrap_err()
    }

    /// The FlReference node for a formula that is a single reference.
    fn single_reference(text: &str) -> ParseNode {
        let mut found = None;
        parse(text).walk(&mut |n| {
            if found.is_none() && n.kind() == NodeKind::FlReference {
                found = Some(n.clone());
            }
        });
        found.expect("formula has a reference")
    }

    #[test]
    fn test_parse_number_tree_shape() {
        let expected = node!(FlRoot[
            "=",
            node!(Test[node!(AndTest[node!(NotTest[node!(Comparison[node!(Expr[
                node!(ConcatExpr[node!(ShiftExpr[node!(ArithExpr[node!(Term[
                    node!(Factor[node!(Power[node!(FlReference[
                        node!(Atom[node!(Number["1"])])
                    ])])])
                ])])])])
            ])])])])]),
        ]);
        assert_eq!(parse("=1"), expected);
    }

    #[test]
    fn test_flatten_round_trip() {
        for text in [
            "=1",
            "= A1 + $B$2 * 3 ",
            "=SUM(A1:B3)",
            "=Sheet1!A1 + 'My Sheet' ! $C3",
            "='It''s'!A1:B2",
            "=A_ + _2 + #Price#_ + _#Total#",
            "=<Sheet1> + <'Other one'>",
            "=<Sheet1>!A1",
            "=#Deleted! + #Invalid!:A1",
            "=lambda x, y -> x + y",
            "=[x * 2 for x in A1:A3 if x > 1]",
            "=sum(x for x in range(10))",
            "={'a' -> 1, 'b' -> 2}",
            "=x[1->2, ->, ->->-1]",
            "=IF(A1 > 2, 'big', 'small')",
            "=and(1, 2) or AND(3)",
            "=not a is not b and c not in d",
            "=2 ** -3 ^ 2",
            "=50%",
            "=a // b %% c",
            "=1 << 2 | 3 & 4 >> 5",
            "=x.y.A1(1, 2,)",
            "='a' \"b\"",
            "=(1, 2, )",
            "=[]",
            "={}",
            "=()",
            "=a<>b",
            "=~1",
        ] {
            assert_eq!(parse(text).flatten(), text, "round trip of {text}");
        }
    }

    #[test]
    fn test_cell_reference_node() {
        let reference = single_reference("=$A1 ");
        assert_eq!(
            reference,
            node!(FlReference[node!(FlCellReference["$A1 "])])
        );
    }

    #[test]
    fn test_worksheet_qualified_references() {
        let reference = single_reference("=Sheet1 ! B2");
        assert_eq!(
            reference,
            node!(FlReference[node!(FlCellReference["Sheet1 ", "! ", "B2"])])
        );
        let long = single_reference("='My Sheet' ! C_ ");
        assert_eq!(
            long,
            node!(FlReference[node!(FlColumnReference["'My Sheet' ", "! ", "C_ "])])
        );
    }

    #[test]
    fn test_range_inherits_worksheet() {
        let reference = single_reference("=Sheet1!A1:B2");
        let range = reference.children()[0].as_node().unwrap();
        assert_eq!(
            range,
            &node!(FlCellRange[
                node!(FlCellReference["Sheet1", "!", "A1"]),
                ":",
                node!(FlCellReference["B2"]),
            ])
        );
        let Some(crate::formula::Reference::Range(r)) = range.as_reference() else {
            panic!("expected a range");
        };
        assert_eq!(r.worksheet().as_deref(), Some("Sheet1"));
    }

    #[test]
    fn test_range_endpoints_must_be_cells() {
        assert_eq!(
            parse_err("=A1:B_"),
            FormulaError::Syntax {
                position: 5,
                text: "B_".to_string()
            }
        );
        assert_eq!(
            parse_err("=A1:3"),
            FormulaError::Syntax {
                position: 5,
                text: "3".to_string()
            }
        );
        assert_eq!(parse_err("=A1:"), FormulaError::Incomplete);
    }

    #[test]
    fn test_oversized_cell_name_is_a_plain_name() {
        let reference = single_reference("=ZZZZ1");
        assert_eq!(reference, node!(FlReference[node!(Atom[node!(Name["ZZZZ1"])])]));
    }

    #[test]
    fn test_pseudo_functions_parse_as_calls() {
        let reference = single_reference("=If(1, 2)");
        assert_eq!(reference.children().len(), 2);
        let atom = reference.children()[0].as_node().unwrap();
        assert_eq!(atom, &node!(Atom[node!(Name["If"])]));
        assert_eq!(
            reference.children()[1].as_node().unwrap().kind(),
            NodeKind::Trailer
        );
    }

    #[test]
    fn test_naked_worksheet_forms() {
        let reference = single_reference("=< Sheet1 >");
        assert_eq!(
            reference,
            node!(FlReference[node!(FlNakedWorksheetReference["< ", "Sheet1 ", ">"])])
        );
        let quoted = single_reference("=<'a b'> ");
        assert_eq!(
            quoted,
            node!(FlReference[node!(FlNakedWorksheetReference["<", "'a b'", "> "])])
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse_err("=1 +"), FormulaError::Incomplete);
        assert_eq!(parse_err("="), FormulaError::Incomplete);
        assert_eq!(
            parse_err("=1 + )"),
            FormulaError::Syntax {
                position: 6,
                text: ")".to_string()
            }
        );
        assert_eq!(
            parse_err("1 + 2"),
            FormulaError::Syntax {
                position: 1,
                text: "1".to_string()
            }
        );
        assert_eq!(
            parse_err("=Sheet1!42").to_string(),
            "Error in formula at position 9: unexpected '42'"
        );
    }

    #[test]
    fn test_parser_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FormulaParser>();

        let parser = FormulaParser::new();
        std::thread::scope(|s| {
            for i in 0..4 {
                let parser = &parser;
                s.spawn(move || {
                    let text = format!("=A{} + {}", i + 1, i);
                    assert_eq!(parser.parse(&text).unwrap().flatten(), text);
                });
            }
        });
    }
}
