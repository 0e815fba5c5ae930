//! Typed views over reference nodes.
//!
//! Reference nodes keep the shape `[local]` or `[worksheet, "!", local]`,
//! where `worksheet` is either quoted/bare text or a naked worksheet node and
//! `local` is the reference text with its trailing whitespace. Ranges are
//! `[first, ":", second]` with a reference node at each end.
//!
//! Offsetting never mutates: it returns a rebuilt node, swapping in the
//! `#Invalid!` sentinel when the shifted reference would leave the grid.

use std::sync::OnceLock;

use regex::Regex;

use super::node::{Child, NodeKind, ParseNode};
use crate::engine::{
    Bounds, CellRef, MAX_COL, MAX_ROW, cell_name_to_coordinates, column_index_to_name,
    column_name_to_index, coordinates_to_cell_name,
};

pub const INVALID_SENTINEL: &str = "#Invalid!";
pub const DELETED_SENTINEL: &str = "#Deleted!";

/// Any reference node, dispatched on its kind.
#[derive(Clone, Copy, Debug)]
pub enum Reference<'a> {
    Cell(CellReference<'a>),
    Range(CellRange<'a>),
    Column(ColumnReference<'a>),
    Row(RowReference<'a>),
    NamedColumn(NamedColumnReference<'a>),
    NamedRow(NamedRowReference<'a>),
    NakedWorksheet(NakedWorksheetReference<'a>),
    Deleted(SentinelReference<'a>),
    Invalid(SentinelReference<'a>),
}

impl ParseNode {
    /// The reference view for this node, if it is a reference.
    pub fn as_reference(&self) -> Option<Reference<'_>> {
        Some(match self.kind() {
            NodeKind::FlCellReference => Reference::Cell(CellReference { node: self }),
            NodeKind::FlCellRange => Reference::Range(CellRange { node: self }),
            NodeKind::FlColumnReference => Reference::Column(ColumnReference { node: self }),
            NodeKind::FlRowReference => Reference::Row(RowReference { node: self }),
            NodeKind::FlNamedColumnReference => {
                Reference::NamedColumn(NamedColumnReference { node: self })
            }
            NodeKind::FlNamedRowReference => Reference::NamedRow(NamedRowReference { node: self }),
            NodeKind::FlNakedWorksheetReference => {
                Reference::NakedWorksheet(NakedWorksheetReference { node: self })
            }
            NodeKind::FlDeletedReference => Reference::Deleted(SentinelReference { node: self }),
            NodeKind::FlInvalidReference => Reference::Invalid(SentinelReference { node: self }),
            _ => return None,
        })
    }
}

impl<'a> Reference<'a> {
    pub fn node(&self) -> &'a ParseNode {
        match self {
            Reference::Cell(r) => r.node,
            Reference::Range(r) => r.node,
            Reference::Column(r) => r.node,
            Reference::Row(r) => r.node,
            Reference::NamedColumn(r) => r.node,
            Reference::NamedRow(r) => r.node,
            Reference::NakedWorksheet(r) => r.node,
            Reference::Deleted(r) | Reference::Invalid(r) => r.node,
        }
    }

    /// Worksheet qualifier.
    pub fn worksheet(&self) -> Option<String> {
        match self {
            Reference::Cell(r) => r.worksheet(),
            Reference::Range(r) => r.worksheet(),
            Reference::Column(r) => r.worksheet(),
            Reference::Row(r) => r.worksheet(),
            Reference::NamedColumn(r) => r.worksheet(),
            Reference::NamedRow(r) => r.worksheet(),
            Reference::NakedWorksheet(r) => Some(r.name()),
            Reference::Deleted(r) | Reference::Invalid(r) => r.worksheet(),
        }
    }

    /// Shifted copy. References without coordinates come back unchanged.
    pub fn offset(&self, dx: i64, dy: i64, move_absolute: bool) -> ParseNode {
        match self {
            Reference::Cell(r) => r.offset(dx, dy, move_absolute),
            Reference::Range(r) => r.offset(dx, dy, move_absolute),
            Reference::Column(r) => r.offset(dx, move_absolute),
            Reference::Row(r) => r.offset(dy, move_absolute),
            _ => self.node().clone(),
        }
    }
}

/// Accessors shared by every `[local]` / `[worksheet, "!", local]` node.
pub trait ReferenceNode<'a> {
    fn node(&self) -> &'a ParseNode;

    /// Unquoted worksheet name, if qualified.
    fn worksheet(&self) -> Option<String> {
        let children = self.node().children();
        if children.len() != 3 {
            return None;
        }
        match &children[0] {
            Child::Text(text) => Some(unquote_worksheet_name(text.trim_end())),
            Child::Node(naked) => Some(NakedWorksheetReference { node: naked }.name()),
        }
    }

    /// Local reference text including trailing whitespace.
    fn local_reference(&self) -> &'a str {
        self.node()
            .children()
            .last()
            .and_then(Child::as_text)
            .unwrap_or_default()
    }

    fn whitespace(&self) -> &'a str {
        let local = self.local_reference();
        &local[local.trim_end_matches([' ', '\t']).len()..]
    }

    /// Same qualifier, new local text and kind.
    fn with_local(&self, kind: NodeKind, local: String) -> ParseNode {
        let children = self.node().children();
        let mut rebuilt: Vec<Child> = children[..children.len().saturating_sub(1)].to_vec();
        rebuilt.push(Child::Text(local));
        ParseNode::new(kind, rebuilt)
    }

    /// The `#Invalid!` sentinel with this node's qualifier and whitespace.
    fn invalidated(&self) -> ParseNode {
        self.with_local(
            NodeKind::FlInvalidReference,
            format!("{INVALID_SENTINEL}{}", self.whitespace()),
        )
    }
}

macro_rules! reference_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug)]
        pub struct $name<'a> {
            node: &'a ParseNode,
        }

        impl<'a> ReferenceNode<'a> for $name<'a> {
            fn node(&self) -> &'a ParseNode {
                self.node
            }
        }
    };
}

reference_view!(
    /// `A1`, `$A$1`, `Sheet1!B2`.
    CellReference
);
reference_view!(
    /// `A_`, `$B_`.
    ColumnReference
);
reference_view!(
    /// `_1`, `_$2`.
    RowReference
);
reference_view!(
    /// `#Header#_`.
    NamedColumnReference
);
reference_view!(
    /// `_#Header#`.
    NamedRowReference
);
reference_view!(
    /// `#Deleted!` or `#Invalid!`.
    SentinelReference
);

impl<'a> CellReference<'a> {
    pub fn col_absolute(&self) -> bool {
        self.local_reference().starts_with('$')
    }

    pub fn row_absolute(&self) -> bool {
        self.local_reference()
            .get(1..)
            .is_some_and(|rest| rest.contains('$'))
    }

    /// Cell name without `$` markers or whitespace.
    pub fn plain_name(&self) -> String {
        self.local_reference().trim().replace('$', "")
    }

    pub fn coords(&self) -> Option<CellRef> {
        cell_name_to_coordinates(&self.plain_name())
    }

    pub fn offset(&self, dx: i64, dy: i64, move_absolute: bool) -> ParseNode {
        let Some(coords) = self.coords() else {
            return self.node.clone();
        };
        let (col_abs, row_abs) = (self.col_absolute(), self.row_absolute());
        let dx = if col_abs && !move_absolute { 0 } else { dx };
        let dy = if row_abs && !move_absolute { 0 } else { dy };
        if dx == 0 && dy == 0 {
            return self.node.clone();
        }
        let shifted = coords
            .offset(dx, dy)
            .and_then(|c| coordinates_to_cell_name(c.col, c.row, col_abs, row_abs));
        match shifted {
            Some(name) => self.with_local(
                NodeKind::FlCellReference,
                format!("{name}{}", self.whitespace()),
            ),
            None => self.invalidated(),
        }
    }
}

impl<'a> ColumnReference<'a> {
    pub fn is_absolute(&self) -> bool {
        self.local_reference().trim_start().starts_with('$')
    }

    pub fn plain_column_name(&self) -> String {
        self.local_reference()
            .trim()
            .replace(['$', '_'], "")
    }

    pub fn col_index(&self) -> Option<usize> {
        column_name_to_index(&self.plain_column_name())
    }

    pub fn offset(&self, dx: i64, move_absolute: bool) -> ParseNode {
        if dx == 0 || (self.is_absolute() && !move_absolute) {
            return self.node.clone();
        }
        let Some(col) = self.col_index() else {
            return self.node.clone();
        };
        let shifted = (col as i64)
            .checked_add(dx)
            .filter(|c| *c >= 1 && *c as usize <= MAX_COL)
            .and_then(|c| column_index_to_name(c as usize));
        match shifted {
            Some(name) => {
                let marker = if self.is_absolute() { "$" } else { "" };
                self.with_local(
                    NodeKind::FlColumnReference,
                    format!("{marker}{name}_{}", self.whitespace()),
                )
            }
            None => self.invalidated(),
        }
    }
}

impl<'a> RowReference<'a> {
    pub fn is_absolute(&self) -> bool {
        self.local_reference().contains('$')
    }

    pub fn plain_row_name(&self) -> String {
        self.local_reference()
            .trim()
            .trim_start_matches('_')
            .replace('$', "")
    }

    pub fn row_index(&self) -> Option<usize> {
        self.plain_row_name()
            .parse::<usize>()
            .ok()
            .filter(|row| (1..=MAX_ROW).contains(row))
    }

    pub fn offset(&self, dy: i64, move_absolute: bool) -> ParseNode {
        if dy == 0 || (self.is_absolute() && !move_absolute) {
            return self.node.clone();
        }
        let Some(row) = self.row_index() else {
            return self.node.clone();
        };
        let shifted = (row as i128) + (dy as i128);
        if shifted < 1 || shifted > MAX_ROW as i128 {
            return self.invalidated();
        }
        let marker = if self.is_absolute() { "$" } else { "" };
        self.with_local(
            NodeKind::FlRowReference,
            format!("_{marker}{shifted}{}", self.whitespace()),
        )
    }
}

impl<'a> NamedColumnReference<'a> {
    pub fn header(&self) -> String {
        let text = self.local_reference().trim_end().replace("##", "#");
        text.get(1..text.len().saturating_sub(2))
            .unwrap_or_default()
            .to_string()
    }
}

impl<'a> NamedRowReference<'a> {
    pub fn header(&self) -> String {
        let text = self.local_reference().trim_end().replace("##", "#");
        text.get(2..text.len().saturating_sub(1))
            .unwrap_or_default()
            .to_string()
    }
}

/// `<Sheet1>` or `<'Sheet name'>`: children are `<`, name, `>`.
#[derive(Clone, Copy, Debug)]
pub struct NakedWorksheetReference<'a> {
    node: &'a ParseNode,
}

impl<'a> NakedWorksheetReference<'a> {
    pub fn node(&self) -> &'a ParseNode {
        self.node
    }

    pub fn name(&self) -> String {
        let raw = self
            .node
            .children()
            .get(1)
            .and_then(Child::as_text)
            .unwrap_or_default();
        unquote_worksheet_name(raw.trim())
    }
}

/// `first:second`, each corner a cell, deleted or invalid reference.
#[derive(Clone, Copy, Debug)]
pub struct CellRange<'a> {
    node: &'a ParseNode,
}

impl<'a> CellRange<'a> {
    pub fn node(&self) -> &'a ParseNode {
        self.node
    }

    pub fn first(&self) -> &'a ParseNode {
        self.corner(0)
    }

    pub fn second(&self) -> &'a ParseNode {
        self.corner(2)
    }

    /// A qualifier on either corner covers the whole range.
    pub fn worksheet(&self) -> Option<String> {
        let qualifier = |corner: &ParseNode| corner.as_reference().and_then(|r| r.worksheet());
        qualifier(self.first()).or_else(|| qualifier(self.second()))
    }

    fn corner(&self, index: usize) -> &'a ParseNode {
        self.node.children()[index]
            .as_node()
            .unwrap_or(self.node)
    }

    fn corner_coords(corner: &ParseNode) -> Option<CellRef> {
        match corner.as_reference()? {
            Reference::Cell(cell) => cell.coords(),
            _ => None,
        }
    }

    /// Both corners, when both are valid cell references.
    pub fn corners(&self) -> Option<(CellRef, CellRef)> {
        Some((
            Self::corner_coords(self.first())?,
            Self::corner_coords(self.second())?,
        ))
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.corners().map(|(a, b)| Bounds::from_corners(a, b))
    }

    pub fn offset(&self, dx: i64, dy: i64, move_absolute: bool) -> ParseNode {
        let shift = |corner: &ParseNode| match corner.as_reference() {
            Some(Reference::Cell(cell)) => cell.offset(dx, dy, move_absolute),
            _ => corner.clone(),
        };
        let mut children = self.node.children().to_vec();
        children[0] = Child::Node(shift(self.first()));
        children[2] = Child::Node(shift(self.second()));
        ParseNode::new(NodeKind::FlCellRange, children)
    }
}

fn bare_worksheet_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]\w*$").expect("valid worksheet name regex"))
}

/// Quote a worksheet name unless it is a plain identifier.
pub fn quote_worksheet_name(name: &str) -> String {
    if bare_worksheet_name_re().is_match(name) {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

pub fn unquote_worksheet_name(name: &str) -> String {
    let name = name.replace("''", "'");
    match name.strip_prefix('\'') {
        Some(inner) => inner.strip_suffix('\'').unwrap_or(inner).to_string(),
        None => name,
    }
}

/// Upper-case the local text of every cell, column and row reference.
pub fn canonicalise(tree: &ParseNode) -> ParseNode {
    tree.transform(&mut |node| match node.kind() {
        NodeKind::FlCellReference | NodeKind::FlColumnReference | NodeKind::FlRowReference => {
            let kind = node.kind();
            let mut children = node.into_children();
            if let Some(Child::Text(local)) = children.last_mut() {
                *local = local.to_uppercase();
            }
            ParseNode::new(kind, children)
        }
        _ => node,
    })
}
