//! PEST-based parser for stanza script
//!
//! Produces the AST in `ast.rs` with spans for diagnostics.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use super::ast::{BinaryOp, Expr, Span, Stmt, UnaryOp};
use crate::error::Diagnostic;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "script/stanza.pest"]
struct StanzaParser;

/* ===================== Error Types ===================== */

#[derive(Debug)]
pub enum ParseError {
    PestError(String, Option<Span>),
    BuildError(String, Option<Span>),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::PestError(_, span) => *span,
            ParseError::BuildError(_, span) => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::PestError(msg, _) => msg,
            ParseError::BuildError(msg, _) => msg,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let span = self.span().unwrap_or_default();
        Diagnostic::new(self.message(), span.line, span.col)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ParseError {}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, col) = match err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => (line, col),
            pest::error::LineColLocation::Span((line, col), _) => (line, col),
        };
        let span = Span::new(0, 0, line.saturating_sub(1), col.saturating_sub(1));
        let message = match &err.variant {
            pest::error::ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
                let expected: Vec<String> = positives.iter().map(describe_rule).collect();
                format!("syntax error, expected {}", expected.join(" or "))
            }
            pest::error::ErrorVariant::CustomError { message } => message.clone(),
            _ => "syntax error".to_string(),
        };
        ParseError::PestError(message, Some(span))
    }
}

fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::identifier => "identifier".to_string(),
        Rule::expression | Rule::or_expr | Rule::unary | Rule::postfix => "expression".to_string(),
        Rule::statement => "statement".to_string(),
        Rule::terminator => "';'".to_string(),
        Rule::block => "'{'".to_string(),
        other => format!("{:?}", other),
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Deepest nesting of expressions and blocks a fragment may use; evaluation
/// and checking recurse once per level
pub const MAX_NESTING: usize = 128;

fn too_deep(span: Span) -> ParseError {
    ParseError::BuildError(
        format!("fragment nests too deeply (limit {})", MAX_NESTING),
        Some(span),
    )
}

/* ===================== Span Helpers ===================== */

/// Convert a PEST pair's span to our Span type
fn pair_to_span(pair: &Pair<Rule>, source: &str) -> Span {
    let pest_span = pair.as_span();
    let start = pest_span.start();
    let (line, col) = offset_to_line_col(source, start);
    Span::new(start, pest_span.end(), line, col)
}

/// Convert byte offset to (line, column) - 0-indexed
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 0;
    let mut col = 0;
    let mut current_offset = 0;

    for ch in source.chars() {
        if current_offset >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
        current_offset += ch.len_utf8();
    }

    (line, col)
}

fn next_pair<'i>(inner: &mut Pairs<'i, Rule>, what: &str, span: Span) -> ParseResult<Pair<'i, Rule>> {
    inner
        .next()
        .ok_or_else(|| ParseError::BuildError(format!("Missing {}", what), Some(span)))
}

/* ===================== Public API ===================== */

/// Parse a fragment into its top-level statements
pub fn parse_program(source: &str) -> ParseResult<Vec<Stmt>> {
    let mut pairs = StanzaParser::parse(Rule::program, source)?;
    let program = next_pair(&mut pairs, "program", Span::default())?;

    program
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::statement)
        .map(|pair| build_statement(pair, source, 0))
        .collect()
}

/// Parse a single expression (used for member lookups and tests)
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let statements = parse_program(source)?;
    match statements.as_slice() {
        [Stmt::Expr { expr, .. }] => Ok(expr.clone()),
        _ => Err(ParseError::BuildError(
            "Expected a single expression".to_string(),
            None,
        )),
    }
}

/* ===================== Statement Builder ===================== */

fn build_statement(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    if depth > MAX_NESTING {
        return Err(too_deep(span));
    }
    let mut inner = pair.into_inner();
    let body = next_pair(&mut inner, "statement body", span)?;
    let terminated = inner.next().is_some();

    match body.as_rule() {
        Rule::load_stmt => build_load_stmt(body, source),
        Rule::use_stmt => {
            let body_span = pair_to_span(&body, source);
            let module = next_pair(&mut body.into_inner(), "module name", body_span)?;
            Ok(Stmt::Use {
                module: module.as_str().to_string(),
                span: body_span,
            })
        }
        Rule::fn_decl => build_fn_decl(body, source, depth),
        Rule::let_stmt | Rule::assign_stmt => build_binding(body, source, depth),
        Rule::if_stmt => build_if_stmt(body, source, depth),
        Rule::while_stmt => build_while_stmt(body, source, depth),
        Rule::expr_stmt => {
            let body_span = pair_to_span(&body, source);
            let expr_pair = next_pair(&mut body.into_inner(), "expression", body_span)?;
            Ok(Stmt::Expr {
                expr: build_expression(expr_pair, source, depth)?,
                terminated,
                span: body_span,
            })
        }
        other => Err(ParseError::BuildError(
            format!("Unexpected statement: {:?}", other),
            Some(span),
        )),
    }
}

fn build_load_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let target_pair = next_pair(&mut pair.into_inner(), "load target", span)?;
    let target = match target_pair.as_rule() {
        Rule::string => string_content(target_pair),
        _ => target_pair.as_str().to_string(),
    };
    Ok(Stmt::Load { target, span })
}

fn build_fn_decl(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let name = next_pair(&mut inner, "function name", span)?.as_str().to_string();
    let params = next_pair(&mut inner, "parameter list", span)?
        .into_inner()
        .map(|p| p.as_str().to_string())
        .collect();
    let body = build_expression(next_pair(&mut inner, "function body", span)?, source, depth)?;

    Ok(Stmt::Fn {
        name,
        params,
        body,
        span,
    })
}

fn build_binding(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let is_let = pair.as_rule() == Rule::let_stmt;
    let mut inner = pair.into_inner();

    let name = next_pair(&mut inner, "binding name", span)?.as_str().to_string();
    let value = build_expression(next_pair(&mut inner, "binding value", span)?, source, depth)?;

    Ok(if is_let {
        Stmt::Let { name, value, span }
    } else {
        Stmt::Assign { name, value, span }
    })
}

fn build_block(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Vec<Stmt>> {
    pair.into_inner()
        .map(|stmt_pair| build_statement(stmt_pair, source, depth + 1))
        .collect()
}

fn build_if_stmt(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    if depth > MAX_NESTING {
        return Err(too_deep(span));
    }
    let mut inner = pair.into_inner();

    let test = build_expression(next_pair(&mut inner, "condition", span)?, source, depth)?;
    let then_b = build_block(next_pair(&mut inner, "block", span)?, source, depth)?;

    let else_b = match inner.next() {
        Some(else_clause) => {
            let else_span = pair_to_span(&else_clause, source);
            let branch = next_pair(&mut else_clause.into_inner(), "else branch", else_span)?;
            match branch.as_rule() {
                Rule::if_stmt => Some(vec![build_if_stmt(branch, source, depth + 1)?]),
                _ => Some(build_block(branch, source, depth)?),
            }
        }
        None => None,
    };

    Ok(Stmt::If {
        test,
        then_b,
        else_b,
        span,
    })
}

fn build_while_stmt(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let test = build_expression(next_pair(&mut inner, "condition", span)?, source, depth)?;
    let body = build_block(next_pair(&mut inner, "loop body", span)?, source, depth)?;

    Ok(Stmt::While { test, body, span })
}

/* ===================== Expression Builder ===================== */

/// `depth` counts the nesting levels above `pair`: enclosing expressions,
/// operators and blocks
fn build_expression(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    if depth > MAX_NESTING {
        return Err(too_deep(span));
    }

    match pair.as_rule() {
        Rule::expression => build_expression(
            next_pair(&mut pair.into_inner(), "expression", span)?,
            source,
            depth + 1,
        ),
        Rule::or_expr | Rule::and_expr | Rule::cmp_expr | Rule::add_expr | Rule::mul_expr => {
            build_binary_chain(pair, source, depth)
        }
        Rule::unary => build_unary(pair, source, depth),
        Rule::postfix => build_postfix(pair, source, depth),
        Rule::number => {
            let value = pair.as_str().parse::<f64>().map_err(|e| {
                ParseError::BuildError(format!("Invalid number: {}", e), Some(span))
            })?;
            Ok(Expr::Num { value, span })
        }
        Rule::string => Ok(Expr::Str {
            value: string_content(pair),
            span,
        }),
        Rule::boolean => Ok(Expr::Bool {
            value: pair.as_str() == "true",
            span,
        }),
        Rule::null_lit => Ok(Expr::Null { span }),
        Rule::list => {
            let items = pair
                .into_inner()
                .map(|item| build_expression(item, source, depth + 1))
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::List { items, span })
        }
        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
            span,
        }),
        other => Err(ParseError::BuildError(
            format!("Unexpected expression rule: {:?}", other),
            Some(span),
        )),
    }
}

/// Folds `a op b op c` left-deep, so every operand sits one level below each
/// operator that follows it
fn build_binary_chain(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();
    let operators = inner.clone().count() / 2;
    if depth + operators > MAX_NESTING {
        return Err(too_deep(span));
    }
    let depth = depth + operators;
    let mut left = build_expression(next_pair(&mut inner, "operand", span)?, source, depth)?;

    while let Some(op_pair) = inner.next() {
        let op = match op_pair.as_rule() {
            Rule::op_or => BinaryOp::Or,
            Rule::op_and => BinaryOp::And,
            Rule::op_eq => BinaryOp::Eq,
            Rule::op_ne => BinaryOp::Ne,
            Rule::op_lt => BinaryOp::Lt,
            Rule::op_lte => BinaryOp::Lte,
            Rule::op_gt => BinaryOp::Gt,
            Rule::op_gte => BinaryOp::Gte,
            Rule::op_add => BinaryOp::Add,
            Rule::op_sub => BinaryOp::Sub,
            Rule::op_mul => BinaryOp::Mul,
            Rule::op_div => BinaryOp::Div,
            Rule::op_mod => BinaryOp::Mod,
            other => {
                return Err(ParseError::BuildError(
                    format!("Unknown operator: {:?}", other),
                    Some(pair_to_span(&op_pair, source)),
                ))
            }
        };
        let right_pair = next_pair(&mut inner, "right operand", span)?;
        let right = build_expression(right_pair, source, depth)?;
        let new_span = left.span().merge(&right.span());
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: new_span,
        };
    }

    Ok(left)
}

fn build_unary(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut ops = Vec::new();
    let mut operand = None;

    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::op_neg => ops.push((UnaryOp::Neg, pair_to_span(&child, source))),
            Rule::op_not => ops.push((UnaryOp::Not, pair_to_span(&child, source))),
            Rule::op_await => ops.push((UnaryOp::Await, pair_to_span(&child, source))),
            _ => operand = Some(build_expression(child, source, depth + ops.len())?),
        }
    }

    let mut expr = operand
        .ok_or_else(|| ParseError::BuildError("Missing operand".to_string(), Some(span)))?;
    for (op, op_span) in ops.into_iter().rev() {
        let new_span = op_span.merge(&expr.span());
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
            span: new_span,
        };
    }
    Ok(expr)
}

fn build_postfix(pair: Pair<Rule>, source: &str, depth: usize) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();
    let depth = depth + inner.clone().count().saturating_sub(1);
    let mut expr = build_expression(next_pair(&mut inner, "operand", span)?, source, depth)?;

    for suffix in inner {
        let suffix_span = pair_to_span(&suffix, source);
        let new_span = expr.span().merge(&suffix_span);
        expr = match suffix.as_rule() {
            Rule::member => {
                let property = next_pair(&mut suffix.into_inner(), "member name", suffix_span)?;
                Expr::Member {
                    object: Box::new(expr),
                    property: property.as_str().to_string(),
                    span: new_span,
                }
            }
            Rule::call => {
                let args = suffix
                    .into_inner()
                    .map(|arg| build_expression(arg, source, depth))
                    .collect::<ParseResult<Vec<_>>>()?;
                Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span: new_span,
                }
            }
            other => {
                return Err(ParseError::BuildError(
                    format!("Unexpected postfix rule: {:?}", other),
                    Some(suffix_span),
                ))
            }
        };
    }

    Ok(expr)
}

fn string_content(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|inner| unescape(inner.as_str()))
        .unwrap_or_default()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(source: &str) -> Stmt {
        parse_program(source).unwrap().pop().unwrap()
    }

    #[test]
    fn test_terminator_is_recorded() {
        assert!(matches!(tail("1+1"), Stmt::Expr { terminated: false, .. }));
        assert!(matches!(tail("1+1;"), Stmt::Expr { terminated: true, .. }));
    }

    #[test]
    fn test_newline_separates_statements() {
        let stmts = parse_program("x = 5\nx + 1").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Stmt::Assign { name, .. } if name == "x"));
        assert!(matches!(&stmts[1], Stmt::Expr { .. }));
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_keywords_need_word_boundary() {
        let stmts = parse_program("letter = 1\nuser = 2").unwrap();
        assert!(matches!(&stmts[0], Stmt::Assign { name, .. } if name == "letter"));
        assert!(matches!(&stmts[1], Stmt::Assign { name, .. } if name == "user"));
    }

    #[test]
    fn test_load_and_use() {
        let stmts = parse_program("#load \"stats\"\nuse stats; mean([1, 2])").unwrap();
        assert!(matches!(&stmts[0], Stmt::Load { target, .. } if target == "stats"));
        assert!(matches!(&stmts[1], Stmt::Use { module, .. } if module == "stats"));
        assert!(matches!(&stmts[2], Stmt::Expr { terminated: false, .. }));
    }

    #[test]
    fn test_member_call_and_await() {
        let expr = parse_expression("await time.delay(10, \"a\\nb\")").unwrap();
        let Expr::Unary { op: UnaryOp::Await, operand, .. } = expr else {
            panic!("expected await");
        };
        let Expr::Call { callee, args, .. } = *operand else {
            panic!("expected call");
        };
        assert!(matches!(*callee, Expr::Member { ref property, .. } if property == "delay"));
        assert!(matches!(&args[1], Expr::Str { value, .. } if value == "a\nb"));
    }

    #[test]
    fn test_if_else_chain_and_while() {
        let stmts =
            parse_program("if x > 1 { y = 1 } else if x == 1 { y = 2 } else { y = 3 }\nwhile false {}")
                .unwrap();
        assert!(matches!(&stmts[0], Stmt::If { else_b: Some(b), .. } if b.len() == 1));
        assert!(matches!(&stmts[1], Stmt::While { body, .. } if body.is_empty()));
    }

    #[test]
    fn test_syntax_error_has_location() {
        let err = parse_program("x = \n  )").unwrap_err();
        let diag = err.to_diagnostic();
        assert_eq!(diag.line, 1);
        assert!(diag.message.starts_with("syntax error"));
    }

    #[test]
    fn test_long_operator_chains_are_bounded() {
        let within = vec!["1"; 100].join(" + ");
        assert!(parse_program(&within).is_ok());

        let beyond = vec!["1"; 500].join(" + ");
        let err = parse_program(&beyond).unwrap_err();
        assert!(err.message().contains("nests too deeply"));
    }

    #[test]
    fn test_prefix_operator_runs_are_bounded() {
        let err = parse_program(&format!("{}1", "-".repeat(MAX_NESTING + 1))).unwrap_err();
        assert!(err.message().contains("nests too deeply"));
        assert!(parse_program(&format!("{}1", "!".repeat(20))).is_ok());
    }

    #[test]
    fn test_nested_blocks_parse() {
        let source = format!("{}1{}", "if true { ".repeat(10), " }".repeat(10));
        assert!(parse_program(&source).is_ok());
    }

    #[test]
    fn test_comments_are_ignored() {
        let stmts = parse_program("// a comment\n1 // trailing").unwrap();
        assert_eq!(stmts.len(), 1);
    }
}
