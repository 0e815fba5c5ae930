//! Parse tree to Rhai expression compilation.
//!
//! References become calls into the built-in lookup functions
//! (`A1` → `CELL(1, 1)`, `A1:B2` → `RANGE(1, 1, 2, 2)`), formula
//! operators become Rhai operators or helper calls, and every valid
//! reference on the current worksheet is collected as a dependency.
//! Single cells are listed directly. Ranges, columns, rows and named
//! headers are kept as areas and resolved against the worksheet when the
//! dependency graph is built.
//!
//! A formula that fails to parse or compile still yields a script: one that
//! raises the formula error when evaluated, with no dependencies.

use std::collections::HashSet;

use super::node::{Child, NodeKind, ParseNode};
use super::parser::FormulaParser;
use super::reference::{Reference, ReferenceNode};
use crate::engine::{Bounds, CellRef};
use crate::error::{FormulaError, Result};

/// A multi-cell reference a formula reads. Which cells it covers depends on
/// the worksheet, so it is resolved when the dependency graph is built.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DependencyArea {
    Range(Bounds),
    Column(usize),
    Row(usize),
    /// The column headed by this text in row 1, below the header.
    NamedColumn(String),
    /// The row headed by this text in column A, right of the header.
    NamedRow(String),
}

/// The Rhai expression for a formula and the cells it reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledFormula {
    pub expression: String,
    pub dependencies: Vec<CellRef>,
    pub areas: Vec<DependencyArea>,
}

/// Compile a parse tree, counting only unqualified references as dependencies.
pub fn compile(tree: &ParseNode) -> Result<CompiledFormula> {
    compile_in(tree, None)
}

/// Compile a parse tree evaluated on `sheet`. References qualified with that
/// worksheet name (case-insensitively) count as dependencies too.
pub fn compile_in(tree: &ParseNode, sheet: Option<&str>) -> Result<CompiledFormula> {
    let mut compiler = Compiler {
        sheet,
        dependencies: Vec::new(),
        seen: HashSet::new(),
        areas: Vec::new(),
        counter: 0,
    };
    let expression = compiler.emit(tree)?;
    Ok(CompiledFormula {
        expression,
        dependencies: compiler.dependencies,
        areas: compiler.areas,
    })
}

/// Parse and compile formula text. Failures become an error-raising script.
pub fn compile_formula(parser: &FormulaParser, text: &str, sheet: Option<&str>) -> CompiledFormula {
    match parser.parse(text).and_then(|tree| compile_in(&tree, sheet)) {
        Ok(compiled) => compiled,
        Err(err) => CompiledFormula {
            expression: error_raiser(&err),
            ..CompiledFormula::default()
        },
    }
}

/// A script that always fails with the formula error's cell text.
pub fn error_raiser(err: &FormulaError) -> String {
    format!("RAISE({})", rhai_string(&err.cell_error_text()))
}

const PSEUDO_FUNCTIONS: &[&str] = &["if", "and", "or", "iserror", "iserr"];

struct Compiler<'s> {
    sheet: Option<&'s str>,
    dependencies: Vec<CellRef>,
    seen: HashSet<CellRef>,
    areas: Vec<DependencyArea>,
    counter: usize,
}

fn text_of(child: &Child) -> &str {
    match child {
        Child::Text(text) => text.trim(),
        Child::Node(_) => "",
    }
}

impl<'s> Compiler<'s> {
    fn fresh(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("__{prefix}_{}", self.counter)
    }

    fn add_dependency(&mut self, location: CellRef) {
        if self.seen.insert(location) {
            self.dependencies.push(location);
        }
    }

    fn add_area(&mut self, area: DependencyArea) {
        if !self.areas.contains(&area) {
            self.areas.push(area);
        }
    }

    fn on_current_sheet(&self, reference: &Reference<'_>) -> bool {
        match reference.worksheet() {
            None => true,
            Some(ws) => self.sheet.is_some_and(|s| s.eq_ignore_ascii_case(&ws)),
        }
    }

    fn emit_child(&mut self, child: &Child) -> Result<String> {
        match child {
            Child::Node(node) => self.emit(node),
            Child::Text(text) => Ok(text.trim().to_string()),
        }
    }

    fn emit(&mut self, node: &ParseNode) -> Result<String> {
        let children = node.children();
        match node.kind() {
            NodeKind::FlRoot => match children.get(1) {
                Some(test) => self.emit_child(test),
                None => Err(FormulaError::Incomplete),
            },
            NodeKind::Test => self.emit_logical(children, "or"),
            NodeKind::AndTest => self.emit_logical(children, "and"),
            NodeKind::NotTest => match children {
                [inner] => self.emit_child(inner),
                [_, inner] => Ok(format!("!TRUTHY({})", self.emit_child(inner)?)),
                _ => Err(FormulaError::Unsupported("'not' expression".to_string())),
            },
            NodeKind::Comparison => self.emit_comparison(children),
            NodeKind::Expr | NodeKind::ShiftExpr | NodeKind::ArithExpr => {
                self.emit_infix(children)
            }
            NodeKind::ConcatExpr => self.emit_folded(children, |_, a, b| format!("CONCAT({a}, {b})")),
            NodeKind::Term => self.emit_folded(children, |op, a, b| match op {
                "/" => format!("DIV({a}, {b})"),
                "//" => format!("FLOORDIV({a}, {b})"),
                "%%" => format!("({a} % {b})"),
                _ => format!("({a} {op} {b})"),
            }),
            NodeKind::Percent => Ok(format!("PERCENT({})", self.emit_first(children)?)),
            NodeKind::Factor => match children {
                [power] => self.emit_child(power),
                [op, inner] => {
                    let inner = self.emit_child(inner)?;
                    Ok(match text_of(op) {
                        "~" => format!("BITNOT({inner})"),
                        op => format!("({op}{inner})"),
                    })
                }
                _ => Err(FormulaError::Unsupported("unary expression".to_string())),
            },
            NodeKind::Power => match children {
                [base] => self.emit_child(base),
                [base, _, exponent] => Ok(format!(
                    "POW({}, {})",
                    self.emit_child(base)?,
                    self.emit_child(exponent)?
                )),
                _ => Err(FormulaError::Unsupported("power expression".to_string())),
            },
            NodeKind::FlReference => self.emit_reference_chain(children),
            NodeKind::Atom => self.emit_atom(children),
            NodeKind::Name => Ok(emit_name(&node.flatten())),
            NodeKind::Number => emit_number(node.flatten().trim()),
            NodeKind::StringLiteral => Ok(rhai_string(&string_literal_value(node))),
            NodeKind::LambDef => self.emit_lambda(children),
            NodeKind::TestList => {
                let items = self.emit_items(children)?;
                if items.len() == 1 && !has_comma(children) {
                    Ok(items.into_iter().next().unwrap_or_default())
                } else {
                    Ok(format!("[{}]", items.join(", ")))
                }
            }
            NodeKind::Argument => self.emit_argument(node),
            kind if kind.is_reference() => self.emit_reference(node),
            _ => {
                let parts = children
                    .iter()
                    .map(|c| self.emit_child(c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(" "))
            }
        }
    }

    fn emit_first(&mut self, children: &[Child]) -> Result<String> {
        match children.first() {
            Some(child) => self.emit_child(child),
            None => Err(FormulaError::Incomplete),
        }
    }

    /// `and`/`or` return the deciding operand, not a boolean.
    fn emit_logical(&mut self, children: &[Child], word: &str) -> Result<String> {
        let mut operands = children.iter().filter_map(Child::as_node);
        let Some(first) = operands.next() else {
            return Err(FormulaError::Incomplete);
        };
        let mut acc = self.emit(first)?;
        for operand in operands {
            let rhs = self.emit(operand)?;
            let var = self.fresh(word);
            acc = if word == "or" {
                format!("{{ let {var} = {acc}; if TRUTHY({var}) {{ {var} }} else {{ {rhs} }} }}")
            } else {
                format!("{{ let {var} = {acc}; if TRUTHY({var}) {{ {rhs} }} else {{ {var} }} }}")
            };
        }
        Ok(acc)
    }

    fn emit_comparison(&mut self, children: &[Child]) -> Result<String> {
        let mut operands = Vec::new();
        let mut ops = Vec::new();
        for child in children {
            match child {
                Child::Node(n) if n.kind() == NodeKind::CompOperator => {
                    ops.push(n.flatten().split_whitespace().collect::<Vec<_>>().join(" "))
                }
                Child::Node(n) => operands.push(self.emit(n)?),
                Child::Text(_) => {}
            }
        }
        if ops.is_empty() {
            return operands.pop().ok_or(FormulaError::Incomplete);
        }
        let pairs = ops
            .iter()
            .zip(operands.windows(2))
            .map(|(op, pair)| {
                let (a, b) = (&pair[0], &pair[1]);
                Ok(match op.as_str() {
                    "=" | "==" | "is" => format!("({a} == {b})"),
                    "<>" | "!=" | "is not" => format!("({a} != {b})"),
                    "in" => format!("({b}).contains({a})"),
                    "not in" => format!("!({b}).contains({a})"),
                    "<" | ">" | "<=" | ">=" => format!("({a} {op} {b})"),
                    other => return Err(FormulaError::Unsupported(format!("operator '{other}'"))),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(if pairs.len() == 1 {
            pairs.into_iter().next().unwrap_or_default()
        } else {
            format!("({})", pairs.join(" && "))
        })
    }

    fn emit_infix(&mut self, children: &[Child]) -> Result<String> {
        if children.len() == 1 {
            return self.emit_first(children);
        }
        let parts = children
            .iter()
            .map(|c| self.emit_child(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", parts.join(" ")))
    }

    /// Left fold over `operand (op operand)*`.
    fn emit_folded(
        &mut self,
        children: &[Child],
        combine: impl Fn(&str, String, String) -> String,
    ) -> Result<String> {
        let mut acc = self.emit_first(children)?;
        for pair in children[1..].chunks(2) {
            let [op, rhs] = pair else {
                return Err(FormulaError::Incomplete);
            };
            let rhs = self.emit_child(rhs)?;
            acc = combine(text_of(op), acc, rhs);
        }
        Ok(acc)
    }

    fn emit_reference_chain(&mut self, children: &[Child]) -> Result<String> {
        let nodes: Vec<&ParseNode> = children.iter().filter_map(Child::as_node).collect();
        let Some((primary, trailers)) = nodes.split_first() else {
            return Err(FormulaError::Incomplete);
        };

        let (mut acc, mut trailers, mut direct_call) = match pseudo_function(primary) {
            Some(name) if trailers.first().is_some_and(|t| is_call(t)) => {
                let args = self.call_arguments(trailers[0])?;
                (self.emit_pseudo_function(&name, args)?, &trailers[1..], false)
            }
            _ => {
                let direct = primary.kind() == NodeKind::Atom
                    && primary.child_nodes().next().is_some_and(|n| n.kind() == NodeKind::Name)
                    && !is_constant_name(primary);
                (self.emit(primary)?, trailers, direct)
            }
        };

        while let Some((trailer, rest)) = trailers.split_first() {
            trailers = rest;
            let open = trailer.children().first().map(text_of).unwrap_or_default();
            match open {
                "(" => {
                    let args = self.call_arguments(trailer)?.join(", ");
                    acc = if direct_call {
                        format!("{acc}({args})")
                    } else {
                        format!("{acc}.call({args})")
                    };
                    direct_call = false;
                }
                "[" => {
                    acc = self.emit_subscript(acc, trailer)?;
                    direct_call = false;
                }
                _ => {
                    let name = trailer
                        .child_nodes()
                        .next()
                        .map(|n| n.flatten().trim().to_string())
                        .unwrap_or_default();
                    acc = format!("{acc}.{name}");
                    direct_call = true;
                }
            }
        }
        Ok(acc)
    }

    fn call_arguments(&mut self, trailer: &ParseNode) -> Result<Vec<String>> {
        match trailer.child_nodes().next() {
            Some(arglist) => self.emit_items(arglist.children()),
            None => Ok(Vec::new()),
        }
    }

    /// Emit every node child, skipping separators.
    fn emit_items(&mut self, children: &[Child]) -> Result<Vec<String>> {
        children
            .iter()
            .filter_map(Child::as_node)
            .map(|n| self.emit(n))
            .collect()
    }

    fn emit_argument(&mut self, argument: &ParseNode) -> Result<String> {
        let nodes: Vec<&ParseNode> = argument.child_nodes().collect();
        match nodes.as_slice() {
            [value] => self.emit(value),
            [value, gen_for] => self.emit_comprehension(value, gen_for),
            _ => Err(FormulaError::Unsupported("argument".to_string())),
        }
    }

    fn emit_pseudo_function(&mut self, name: &str, args: Vec<String>) -> Result<String> {
        match (name, args.as_slice()) {
            ("if", [condition, then]) => {
                Ok(format!("(if TRUTHY({condition}) {{ {then} }} else {{ false }})"))
            }
            ("if", [condition, then, otherwise]) => Ok(format!(
                "(if TRUTHY({condition}) {{ {then} }} else {{ {otherwise} }})"
            )),
            ("and", []) => Ok("true".to_string()),
            ("or", []) => Ok("false".to_string()),
            ("and" | "or", args) => {
                let joiner = if name == "and" { " && " } else { " || " };
                let parts: Vec<String> = args.iter().map(|a| format!("TRUTHY({a})")).collect();
                Ok(format!("({})", parts.join(joiner)))
            }
            ("iserror" | "iserr", [value]) => {
                let flag = self.fresh("err");
                Ok(format!(
                    "{{ let {flag} = true; try {{ {value}; {flag} = false; }} catch {{ }} {flag} }}"
                ))
            }
            _ => Err(FormulaError::Unsupported(format!(
                "{} with {} arguments",
                name.to_ascii_uppercase(),
                args.len()
            ))),
        }
    }

    fn emit_subscript(&mut self, target: String, trailer: &ParseNode) -> Result<String> {
        let subscripts: Vec<&ParseNode> = trailer
            .child_nodes()
            .next()
            .map(|list| list.child_nodes().collect())
            .unwrap_or_default();
        match subscripts.as_slice() {
            [single] if !is_slice(single) => {
                let index = self.emit_first(single.children())?;
                Ok(format!("{target}[{index}]"))
            }
            [slice] => {
                let (lower, upper, step) = slice_bounds(slice);
                let lower = self.emit_optional(lower)?;
                let upper = self.emit_optional(upper)?;
                let step = self.emit_optional(step)?;
                Ok(format!("SLICE({target}, {lower}, {upper}, {step})"))
            }
            many if many.iter().any(|s| is_slice(s)) => Err(FormulaError::Unsupported(
                "multi-dimensional slice".to_string(),
            )),
            many => {
                let indices = many
                    .iter()
                    .map(|s| self.emit_first(s.children()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{target}[[{}]]", indices.join(", ")))
            }
        }
    }

    fn emit_optional(&mut self, node: Option<&ParseNode>) -> Result<String> {
        match node {
            Some(node) => self.emit(node),
            None => Ok("()".to_string()),
        }
    }

    fn emit_atom(&mut self, children: &[Child]) -> Result<String> {
        let open = children.first().map(text_of).unwrap_or_default();
        let inner = children.get(1).and_then(Child::as_node);
        match (open, inner) {
            ("(", None) | ("[", None) => Ok("[]".to_string()),
            ("{", None) => Ok("DICT([])".to_string()),
            ("(", Some(gexp)) | ("[", Some(gexp)) => self.emit_sequence(gexp, open == "("),
            ("{", Some(dict)) => {
                let parts = self.emit_items(dict.children())?;
                let entries: Vec<String> = parts
                    .chunks(2)
                    .map(|kv| format!("[{}]", kv.join(", ")))
                    .collect();
                Ok(format!("DICT([{}])", entries.join(", ")))
            }
            _ => self.emit_first(children),
        }
    }

    /// Parenthesised expressions, tuples, lists and comprehensions.
    fn emit_sequence(&mut self, node: &ParseNode, parenthesised: bool) -> Result<String> {
        let nodes: Vec<&ParseNode> = node.child_nodes().collect();
        if let [value, comprehension] = nodes.as_slice()
            && matches!(comprehension.kind(), NodeKind::GenFor | NodeKind::ListFor)
        {
            return self.emit_comprehension(value, comprehension);
        }
        let items = self.emit_items(node.children())?;
        if parenthesised && items.len() == 1 && !has_comma(node.children()) {
            return Ok(format!("({})", items[0]));
        }
        Ok(format!("[{}]", items.join(", ")))
    }

    fn emit_lambda(&mut self, children: &[Child]) -> Result<String> {
        let mut params = Vec::new();
        let mut body = None;
        for node in children.iter().filter_map(Child::as_node) {
            if node.kind() == NodeKind::VarArgsList {
                params = node
                    .child_nodes()
                    .map(|n| n.flatten().trim().to_string())
                    .collect();
            } else {
                body = Some(self.emit(node)?);
            }
        }
        let body = body.ok_or(FormulaError::Incomplete)?;
        Ok(format!("|{}| {body}", params.join(", ")))
    }

    /// `[value for targets in source if cond ...]` as a Rhai block that
    /// builds an array.
    fn emit_comprehension(&mut self, value: &ParseNode, clause: &ParseNode) -> Result<String> {
        let result = self.fresh("comp");
        let value = self.emit(value)?;
        let body = self.emit_clause(clause, &format!("{result}.push({value});"))?;
        Ok(format!("{{ let {result} = []; {body} {result} }}"))
    }

    fn emit_clause(&mut self, clause: &ParseNode, innermost: &str) -> Result<String> {
        let nodes: Vec<&ParseNode> = clause.child_nodes().collect();
        match clause.kind() {
            NodeKind::ListFor | NodeKind::GenFor => {
                let (targets, source, next) = match nodes.as_slice() {
                    [targets, source] => (*targets, *source, None),
                    [targets, source, next] => (*targets, *source, Some(*next)),
                    _ => return Err(FormulaError::Incomplete),
                };
                let item = self.fresh("item");
                let source = self.emit(source)?;
                let bindings = bind_targets(targets, &item)?;
                let inner = match next {
                    Some(next) => self.emit_clause(next, innermost)?,
                    None => innermost.to_string(),
                };
                Ok(format!("for {item} in ITER({source}) {{ {bindings} {inner} }}"))
            }
            NodeKind::ListIf | NodeKind::GenIf => {
                let (condition, next) = match nodes.as_slice() {
                    [condition] => (*condition, None),
                    [condition, next] => (*condition, Some(*next)),
                    _ => return Err(FormulaError::Incomplete),
                };
                let condition = self.emit(condition)?;
                let inner = match next {
                    Some(next) => self.emit_clause(next, innermost)?,
                    None => innermost.to_string(),
                };
                Ok(format!("if TRUTHY({condition}) {{ {inner} }}"))
            }
            NodeKind::ListIter | NodeKind::GenIter => match nodes.as_slice() {
                [inner] => self.emit_clause(inner, innermost),
                _ => Err(FormulaError::Incomplete),
            },
            _ => Err(FormulaError::Unsupported("comprehension clause".to_string())),
        }
    }

    fn emit_reference(&mut self, node: &ParseNode) -> Result<String> {
        let Some(reference) = node.as_reference() else {
            return Err(FormulaError::InvalidReference);
        };
        let counts = self.on_current_sheet(&reference);
        match reference {
            Reference::Cell(cell) => {
                let location = cell.coords().ok_or(FormulaError::InvalidReference)?;
                if counts {
                    self.add_dependency(location);
                }
                Ok(format!("CELL({}, {})", location.col, location.row))
            }
            Reference::Range(range) => {
                for corner in [range.first(), range.second()] {
                    match corner.kind() {
                        NodeKind::FlDeletedReference => return Err(FormulaError::DeletedReference),
                        NodeKind::FlInvalidReference => return Err(FormulaError::InvalidReference),
                        _ => {}
                    }
                }
                let bounds = range.bounds().ok_or(FormulaError::InvalidReference)?;
                if counts {
                    self.add_area(DependencyArea::Range(bounds));
                }
                Ok(format!(
                    "RANGE({}, {}, {}, {})",
                    bounds.left, bounds.top, bounds.right, bounds.bottom
                ))
            }
            Reference::Column(column) => {
                let col = column.col_index().ok_or(FormulaError::InvalidReference)?;
                if counts {
                    self.add_area(DependencyArea::Column(col));
                }
                Ok(format!("COLUMN_RANGE({col})"))
            }
            Reference::Row(row) => {
                let row = row.row_index().ok_or(FormulaError::InvalidReference)?;
                if counts {
                    self.add_area(DependencyArea::Row(row));
                }
                Ok(format!("ROW_RANGE({row})"))
            }
            Reference::NamedColumn(named) => {
                let header = named.header();
                if counts {
                    self.add_area(DependencyArea::NamedColumn(header.clone()));
                }
                Ok(format!("NAMED_COLUMN_RANGE({})", rhai_string(&header)))
            }
            Reference::NamedRow(named) => {
                let header = named.header();
                if counts {
                    self.add_area(DependencyArea::NamedRow(header.clone()));
                }
                Ok(format!("NAMED_ROW_RANGE({})", rhai_string(&header)))
            }
            Reference::NakedWorksheet(naked) => {
                Ok(format!("WORKSHEET_REF({})", rhai_string(&naked.name())))
            }
            Reference::Deleted(_) => Err(FormulaError::DeletedReference),
            Reference::Invalid(_) => Err(FormulaError::InvalidReference),
        }
    }
}

fn has_comma(children: &[Child]) -> bool {
    children.iter().any(|c| text_of(c) == ",")
}

fn is_call(trailer: &ParseNode) -> bool {
    trailer.children().first().map(text_of) == Some("(")
}

fn is_slice(subscript: &ParseNode) -> bool {
    subscript.children().iter().any(|c| text_of(c) == "->")
}

/// Lower, upper and step expressions of a `lo->hi->step` subscript.
fn slice_bounds(subscript: &ParseNode) -> (Option<&ParseNode>, Option<&ParseNode>, Option<&ParseNode>) {
    let (mut lower, mut upper, mut step) = (None, None, None);
    let mut seen_arrow = false;
    for child in subscript.children() {
        match child {
            Child::Text(_) => seen_arrow = true,
            Child::Node(n) if n.kind() == NodeKind::SliceOp => step = n.child_nodes().next(),
            Child::Node(n) if seen_arrow => upper = Some(n),
            Child::Node(n) => lower = Some(n),
        }
    }
    (lower, upper, step)
}

/// The lower-cased pseudo-function name of an `Atom[Name[..]]`.
fn pseudo_function(primary: &ParseNode) -> Option<String> {
    if primary.kind() != NodeKind::Atom {
        return None;
    }
    let name = primary.child_nodes().next()?;
    if name.kind() != NodeKind::Name {
        return None;
    }
    let word = name.flatten().trim().to_ascii_lowercase();
    PSEUDO_FUNCTIONS.contains(&word.as_str()).then_some(word)
}

fn is_constant_name(primary: &ParseNode) -> bool {
    matches!(primary.flatten().trim(), "True" | "False" | "None")
}

fn emit_name(text: &str) -> String {
    match text.trim() {
        "True" => "true".to_string(),
        "False" => "false".to_string(),
        "None" => "()".to_string(),
        name => name.to_string(),
    }
}

fn emit_number(text: &str) -> Result<String> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return Ok(format!("0x{hex}"));
    }
    if text.bytes().all(|b| b.is_ascii_digit()) && text.parse::<i64>().is_ok() {
        return Ok(text.to_string());
    }
    let value: f64 = text
        .parse()
        .map_err(|_| FormulaError::Unsupported(format!("number '{text}'")))?;
    let mut rendered = format!("{value:?}");
    if let Some(e) = rendered.find('e')
        && !rendered[..e].contains('.')
    {
        rendered.insert_str(e, ".0");
    }
    Ok(rendered)
}

fn bind_targets(targets: &ParseNode, item: &str) -> Result<String> {
    let names: Vec<String> = targets
        .child_nodes()
        .map(|n| n.flatten().trim().to_string())
        .collect();
    if let Some(bad) = names
        .iter()
        .find(|n| n.is_empty() || !n.chars().all(|c| c.is_alphanumeric() || c == '_'))
    {
        return Err(FormulaError::Unsupported(format!("loop target '{bad}'")));
    }
    let multiple = names.len() > 1 || targets.children().iter().any(|c| text_of(c) == ",");
    Ok(if multiple {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("let {name} = {item}[{i}];"))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        format!("let {} = {item};", names.join(""))
    })
}

/// The concatenated value of adjacent string literals.
fn string_literal_value(node: &ParseNode) -> String {
    node.children()
        .iter()
        .filter_map(Child::as_text)
        .map(|part| unescape_literal(part.trim()))
        .collect()
}

fn unescape_literal(literal: &str) -> String {
    let inner = literal
        .get(1..literal.len().saturating_sub(1))
        .unwrap_or_default();
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(c @ ('\\' | '\'' | '"')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A double-quoted Rhai string literal.
pub(crate) fn rhai_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compiled(text: &str) -> CompiledFormula {
        let tree = FormulaParser::new().parse(text).unwrap();
        compile(&tree).unwrap()
    }

    fn expr(text: &str) -> String {
        compiled(text).expression
    }

    #[test]
    fn test_cell_and_range_lookups() {
        let c = compiled("=A1 + SUM(B1:C2)");
        assert_eq!(c.expression, "(CELL(1, 1) + SUM(RANGE(2, 1, 3, 2)))");
        assert_eq!(c.dependencies, vec![CellRef::new(1, 1)]);
        assert_eq!(c.areas, vec![DependencyArea::Range(Bounds::new(2, 1, 3, 2))]);
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let c = compiled("=A1 + a1 + $A$1");
        assert_eq!(c.dependencies, vec![CellRef::new(1, 1)]);
    }

    #[test]
    fn test_reversed_range_is_normalised() {
        assert_eq!(expr("=B2:A1"), "RANGE(1, 1, 2, 2)");
    }

    #[test]
    fn test_huge_range_is_kept_as_one_area() {
        let c = compiled("=SUM(A1:ZZ100000) + SUM(a1:zz100000)");
        assert!(c.dependencies.is_empty());
        assert_eq!(c.areas, vec![DependencyArea::Range(Bounds::new(1, 1, 702, 100000))]);
    }

    #[test]
    fn test_axis_and_named_references_are_areas() {
        let c = compiled("=SUM(A_) + SUM(_$7) + SUM(#Total#_) + SUM(_#Q1#)");
        assert_eq!(
            c.areas,
            vec![
                DependencyArea::Column(1),
                DependencyArea::Row(7),
                DependencyArea::NamedColumn("Total".to_string()),
                DependencyArea::NamedRow("Q1".to_string()),
            ]
        );
        let tree = FormulaParser::new().parse("=SUM(Other!A_)").unwrap();
        assert!(compile_in(&tree, Some("Sheet1")).unwrap().areas.is_empty());
    }

    #[test]
    fn test_other_worksheet_references_are_not_dependencies() {
        let tree = FormulaParser::new().parse("=Other!A1 + Sheet1!B1 + C1").unwrap();
        let c = compile_in(&tree, Some("sheet1")).unwrap();
        assert_eq!(c.dependencies, vec![CellRef::new(2, 1), CellRef::new(3, 1)]);
        assert_eq!(c.expression, "(CELL(1, 1) + CELL(2, 1) + CELL(3, 1))");
        assert_eq!(compile(&tree).unwrap().dependencies, vec![CellRef::new(3, 1)]);
    }

    #[test]
    fn test_other_reference_kinds() {
        assert_eq!(expr("=A_"), "COLUMN_RANGE(1)");
        assert_eq!(expr("=_$7"), "ROW_RANGE(7)");
        assert_eq!(expr("=#Total#_"), "NAMED_COLUMN_RANGE(\"Total\")");
        assert_eq!(expr("=_#Q1#"), "NAMED_ROW_RANGE(\"Q1\")");
        assert_eq!(expr("=<'My Sheet'>"), "WORKSHEET_REF(\"My Sheet\")");
    }

    #[test]
    fn test_sentinel_references_fail_to_compile() {
        let parser = FormulaParser::new();
        let tree = parser.parse("=#Invalid! + 1").unwrap();
        assert_eq!(compile(&tree), Err(FormulaError::InvalidReference));
        let tree = parser.parse("=SUM(#Deleted!:A2)").unwrap();
        assert_eq!(compile(&tree), Err(FormulaError::DeletedReference));
    }

    #[test]
    fn test_operators() {
        assert_eq!(expr("=1 / 2 // 3 %% 4 * 5"), "((FLOORDIV(DIV(1, 2), 3) % 4) * 5)");
        assert_eq!(expr("=2 ** 3"), "POW(2, 3)");
        assert_eq!(expr("=2 ^ 3"), "POW(2, 3)");
        assert_eq!(expr("=50%"), "PERCENT(50)");
        assert_eq!(expr("='a' & 1"), "CONCAT(\"a\", 1)");
        assert_eq!(expr("=-A1"), "(-CELL(1, 1))");
        assert_eq!(expr("=~5"), "BITNOT(5)");
        assert_eq!(expr("=1 << 2"), "(1 << 2)");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(expr("=1 = 2"), "(1 == 2)");
        assert_eq!(expr("=1 <> 2"), "(1 != 2)");
        assert_eq!(expr("=a is not b"), "(a != b)");
        assert_eq!(expr("=1 < 2 <= 3"), "((1 < 2) && (2 <= 3))");
        assert_eq!(expr("=x not in y"), "!(y).contains(x)");
        assert_eq!(expr("=x in [1, 2]"), "([1, 2]).contains(x)");
    }

    #[test]
    fn test_logic_returns_deciding_operand() {
        assert_eq!(
            expr("=a or b"),
            "{ let __or_1 = a; if TRUTHY(__or_1) { __or_1 } else { b } }"
        );
        assert_eq!(expr("=not a"), "!TRUTHY(a)");
    }

    #[test]
    fn test_literals() {
        assert_eq!(expr("=True"), "true");
        assert_eq!(expr("=None"), "()");
        assert_eq!(expr("=1.5"), "1.5");
        assert_eq!(expr("=1e3"), "1000.0");
        assert_eq!(expr("=2."), "2.0");
        assert_eq!(expr("=0XfF"), "0xfF");
        assert_eq!(expr("='it\\'s' \"x\""), "\"it'sx\"");
        assert_eq!(expr("=\"a\\\"b\""), "\"a\\\"b\"");
        assert_eq!(expr("=()"), "[]");
        assert_eq!(expr("=(1)"), "(1)");
        assert_eq!(expr("=(1,)"), "[1]");
        assert_eq!(expr("=[1, 2]"), "[1, 2]");
        assert_eq!(expr("={'a' -> 1}"), "DICT([[\"a\", 1]])");
    }

    #[test]
    fn test_pseudo_functions() {
        assert_eq!(expr("=IF(A1, 1, 2)"), "(if TRUTHY(CELL(1, 1)) { 1 } else { 2 })");
        assert_eq!(expr("=if(1, 2)"), "(if TRUTHY(1) { 2 } else { false })");
        assert_eq!(expr("=AND(1, 0)"), "(TRUTHY(1) && TRUTHY(0))");
        assert_eq!(expr("=Or()"), "false");
        assert_eq!(
            expr("=ISERROR(1/0)"),
            "{ let __err_1 = true; try { DIV(1, 0); __err_1 = false; } catch { } __err_1 }"
        );
        let tree = FormulaParser::new().parse("=IF(1)").unwrap();
        assert!(matches!(compile(&tree), Err(FormulaError::Unsupported(_))));
    }

    #[test]
    fn test_lambda_and_calls() {
        assert_eq!(expr("=lambda x, y -> x + y"), "|x, y| (x + y)");
        assert_eq!(expr("=(lambda -> 1)()"), "(|| 1).call()");
        assert_eq!(expr("=f(1, 2)"), "f(1, 2)");
        assert_eq!(expr("=x.abs()"), "x.abs()");
        assert_eq!(expr("=f(1)(2)"), "f(1).call(2)");
    }

    #[test]
    fn test_subscripts() {
        assert_eq!(expr("=x[1]"), "x[1]");
        assert_eq!(expr("=x[1->]"), "SLICE(x, 1, (), ())");
        assert_eq!(expr("=x[->->-1]"), "SLICE(x, (), (), (-1))");
        assert_eq!(expr("=A1:B2[1, 2]"), "RANGE(1, 1, 2, 2)[[1, 2]]");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(
            expr("=[x * 2 for x in A1:A2 if x]"),
            "{ let __comp_1 = []; for __item_2 in ITER(RANGE(1, 1, 1, 2)) { let x = __item_2; \
             if TRUTHY(x) { __comp_1.push((x * 2)); } } __comp_1 }"
        );
        assert_eq!(
            expr("=sum(a for a, b in pairs)"),
            "sum({ let __comp_1 = []; for __item_2 in ITER(pairs) { let a = __item_2[0]; \
             let b = __item_2[1]; __comp_1.push(a); } __comp_1 })"
        );
    }

    #[test]
    fn test_failed_parse_compiles_to_raiser() {
        let c = compile_formula(&FormulaParser::new(), "=1 +", None);
        assert_eq!(
            c.expression,
            "RAISE(\"FormulaError: Possibly incomplete formula\")"
        );
        assert!(c.dependencies.is_empty());
        assert!(c.areas.is_empty());
    }
}
