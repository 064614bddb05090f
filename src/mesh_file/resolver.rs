use super::Position;
use crate::mesh::marker::Marker;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit0, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{cut, map, map_res, opt, recognize, value},
    error::{context, ContextError, ErrorKind, FromExternalError, ParseError},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("{pos}: syntax error: {message}")]
    Syntax { pos: Position, message: String },
    #[error("{pos}: name error: \"{name}\" is not defined")]
    Name { pos: Position, name: String },
    #[error("{pos}: type error: expected {expected}, found {found}")]
    Type {
        pos: Position,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{pos}: \"{name}\" is already defined")]
    Redefined { pos: Position, name: String },
}

impl ResolveError {
    pub fn position(&self) -> Position {
        match self {
            Self::Syntax { pos, .. }
            | Self::Name { pos, .. }
            | Self::Type { pos, .. }
            | Self::Redefined { pos, .. } => *pos,
        }
    }

    fn syntax(pos: Position, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Number(f64),
    Str(String),
    List(Vec<Value>),
}

/// A resolved value along with the position it was written at
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub pos: Position,
    pub kind: ValueKind,
}

impl Value {
    pub fn number(pos: Position, value: f64) -> Self {
        Self {
            pos,
            kind: ValueKind::Number(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Number(_) => "number",
            ValueKind::Str(_) => "string",
            ValueKind::List(_) => "list",
        }
    }

    fn type_error(&self, expected: &'static str) -> ResolveError {
        ResolveError::Type {
            pos: self.pos,
            expected,
            found: self.type_name(),
        }
    }

    pub fn as_number(&self) -> Result<f64, ResolveError> {
        match self.kind {
            ValueKind::Number(value) => Ok(value),
            _ => Err(self.type_error("number")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], ResolveError> {
        match &self.kind {
            ValueKind::List(items) => Ok(items),
            _ => Err(self.type_error("list")),
        }
    }

    pub fn as_str(&self) -> Result<&str, ResolveError> {
        match &self.kind {
            ValueKind::Str(text) => Ok(text),
            _ => Err(self.type_error("string")),
        }
    }

    pub fn as_integer(&self) -> Result<i64, ResolveError> {
        match self.kind {
            ValueKind::Number(value) if value.fract() == 0.0 && value.is_finite() => {
                Ok(value as i64)
            }
            ValueKind::Number(_) => Err(ResolveError::Type {
                pos: self.pos,
                expected: "integer",
                found: "fractional number",
            }),
            _ => Err(self.type_error("integer")),
        }
    }

    /// Interpret the value as an index into a list (a non-negative integer)
    pub fn as_index(&self) -> Result<usize, ResolveError> {
        match self.as_integer()? {
            index if index >= 0 => Ok(index as usize),
            _ => Err(ResolveError::Type {
                pos: self.pos,
                expected: "non-negative integer",
                found: "negative integer",
            }),
        }
    }

    /// Markers are either integers or strings
    pub fn as_marker(&self) -> Result<Marker, ResolveError> {
        match &self.kind {
            ValueKind::Str(name) => Ok(Marker::Name(name.clone())),
            ValueKind::Number(_) => self.as_integer().map(Marker::Integer),
            ValueKind::List(_) => Err(self.type_error("marker")),
        }
    }
}

/// The variables defined by a mesh file, in definition order
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    end: Position,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|idx| &self.values[*idx].1)
    }

    /// Bind a new variable; names can only be bound once
    pub fn define(
        &mut self,
        name: impl Into<String>,
        pos: Position,
        value: Value,
    ) -> Result<(), ResolveError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ResolveError::Redefined { pos, name });
        }

        self.index.insert(name.clone(), self.values.len());
        self.values.push((name, value));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position just past the end of the resolved source
    pub fn end(&self) -> Position {
        self.end
    }

    fn lookup(&self, name: &str, pos: Position) -> Result<Value, ResolveError> {
        match self.get(name) {
            Some(value) => Ok(Value {
                pos,
                kind: value.kind.clone(),
            }),
            None if name == "pi" => Ok(Value::number(pos, std::f64::consts::PI)),
            None => Err(ResolveError::Name {
                pos,
                name: name.to_string(),
            }),
        }
    }
}

/// Resolve a sequence of `name = value` bindings
///
/// Values are numbers, strings, arithmetic expressions over previously defined numbers, or
/// (nested) lists of values delimited by `[]` or `{}`. `#` starts a comment and `;` may terminate a binding.
pub fn resolve(source: &str) -> Result<Bindings, ResolveError> {
    let source_map = SourceMap::new(source, Position::default());
    let mut bindings = Bindings::new();
    let mut rest = source;

    loop {
        let (next, _) = separators(rest).map_err(|err| source_map.syntax_error(err))?;
        if next.is_empty() {
            bindings.end = source_map.position(next);
            break;
        }

        let (next, (at, name, expr)) =
            binding(next).map_err(|err| source_map.syntax_error(err))?;
        let value = source_map.eval(&expr, &bindings)?;
        bindings.define(name, source_map.position(at), value)?;
        rest = next;
    }

    Ok(bindings)
}

/// Evaluate a single value (typically an XML attribute) against a set of bindings
///
/// `base` is the position of the first character of `source`, so errors point into the enclosing file.
pub fn evaluate(source: &str, bindings: &Bindings, base: Position) -> Result<Value, ResolveError> {
    let source_map = SourceMap::new(source, base);
    let (rest, expr) =
        terminated(value_expr, ws)(source).map_err(|err| source_map.syntax_error(err))?;
    if !rest.is_empty() {
        return Err(ResolveError::syntax(
            source_map.position(rest),
            format!("unexpected {} after value", describe(rest)),
        ));
    }
    source_map.eval(&expr, bindings)
}

// ----------------------------------------------------------------------------------------------------
// grammar
// ----------------------------------------------------------------------------------------------------

/// A parsed value. Each node keeps the input remaining at its first character, which locates it in the source.
#[derive(Debug, Clone, PartialEq)]
enum Expr<'a> {
    Number(&'a str, f64),
    Str(&'a str, &'a str),
    Name(&'a str, &'a str),
    Call(&'a str, &'a str, Box<Expr<'a>>),
    List(&'a str, Vec<Expr<'a>>),
    Unary(&'a str, char, Box<Expr<'a>>),
    Binary(char, Box<Expr<'a>>, Box<Expr<'a>>),
}

/// Where the grammar stopped matching and what it was looking for there
#[derive(Debug, Clone, PartialEq)]
struct GrammarError<'a> {
    rest: &'a str,
    expected: Option<&'static str>,
}

impl<'a> ParseError<&'a str> for GrammarError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Self {
            rest: input,
            expected: None,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    // report the alternative that got furthest
    fn or(self, other: Self) -> Self {
        if other.rest.len() <= self.rest.len() {
            other
        } else {
            self
        }
    }
}

impl<'a> ContextError<&'a str> for GrammarError<'a> {
    fn add_context(_input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.expected.get_or_insert(ctx);
        other
    }
}

impl<'a, E> FromExternalError<&'a str, E> for GrammarError<'a> {
    fn from_external_error(input: &'a str, kind: ErrorKind, _e: E) -> Self {
        Self::from_error_kind(input, kind)
    }
}

type PResult<'a, T> = IResult<&'a str, T, GrammarError<'a>>;

/// Skip whitespace and comments
fn ws(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((multispace1, preceded(char('#'), not_line_ending)))),
    )(input)
}

/// Whitespace, comments and `;` between bindings
fn separators(input: &str) -> PResult<()> {
    value(
        (),
        many0(alt((
            multispace1,
            preceded(char('#'), not_line_ending),
            tag(";"),
        ))),
    )(input)
}

fn symbol<'a>(c: char, expected: &'static str) -> impl FnMut(&'a str) -> PResult<'a, char> {
    context(expected, preceded(ws, char(c)))
}

fn identifier(input: &str) -> PResult<&str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// `12`, `1.5`, `.5`, `2.`, `1e-3`
fn number(input: &str) -> PResult<Expr> {
    let literal = recognize(pair(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    ));
    map_res(literal, |text: &str| {
        text.parse::<f64>().map(|value| Expr::Number(input, value))
    })(input)
}

/// A string on a single line, delimited by matching `"` or `'`
fn string(input: &str) -> PResult<Expr> {
    map(alt((quoted('"'), quoted('\''))), |text| Expr::Str(input, text))(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    delimited(
        char(quote),
        take_till(move |c| c == quote || c == '\n'),
        cut(context("a closing quote", char(quote))),
    )
}

fn name_or_call(input: &str) -> PResult<Expr> {
    let (rest, name) = identifier(input)?;
    let (rest, argument) = opt(preceded(
        symbol('(', "`(`"),
        cut(terminated(sum, symbol(')', "`)`"))),
    ))(rest)?;

    let expr = match argument {
        Some(argument) => Expr::Call(input, name, Box::new(argument)),
        None => Expr::Name(input, name),
    };
    Ok((rest, expr))
}

fn parenthesized(input: &str) -> PResult<Expr> {
    preceded(char('('), cut(terminated(sum, symbol(')', "`)`"))))(input)
}

fn atom(input: &str) -> PResult<Expr> {
    let (input, _) = ws(input)?;
    context("a value", alt((number, string, name_or_call, parenthesized)))(input)
}

/// `^` is right associative and binds tighter than a leading sign: `-2 ^ 2 == -4`
fn power(input: &str) -> PResult<Expr> {
    let (rest, base) = atom(input)?;
    let (rest, exponent) = opt(preceded(symbol('^', "`^`"), cut(unary)))(rest)?;

    let expr = match exponent {
        Some(exponent) => Expr::Binary('^', Box::new(base), Box::new(exponent)),
        None => base,
    };
    Ok((rest, expr))
}

fn unary(input: &str) -> PResult<Expr> {
    let (input, _) = ws(input)?;
    let (rest, sign) = opt(one_of::<_, _, GrammarError>("+-"))(input)?;
    match sign {
        Some(sign) => map(cut(unary), |operand| {
            Expr::Unary(input, sign, Box::new(operand))
        })(rest),
        None => power(input),
    }
}

/// Left associative chain of `operand (op operand)*`
fn chain<'a>(
    operand: fn(&'a str) -> PResult<'a, Expr<'a>>,
    operators: &'static str,
    input: &'a str,
) -> PResult<'a, Expr<'a>> {
    let (rest, first) = operand(input)?;
    let (rest, tail) = many0(pair(preceded(ws, one_of(operators)), cut(operand)))(rest)?;

    let expr = tail.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    });
    Ok((rest, expr))
}

fn product(input: &str) -> PResult<Expr> {
    chain(unary, "*/", input)
}

fn sum(input: &str) -> PResult<Expr> {
    chain(product, "+-", input)
}

/// `[a, b, ...]` or `{a, b, ...}`; blank entries are skipped
fn list(input: &str) -> PResult<Expr> {
    let (rest, open) = one_of::<_, _, GrammarError>("[{")(input)?;
    let (close, expected) = match open {
        '[' => (']', "`,` or `]`"),
        _ => ('}', "`,` or `}`"),
    };

    map(
        cut(terminated(
            separated_list0(symbol(',', "`,`"), opt(value_expr)),
            symbol(close, expected),
        )),
        |entries| Expr::List(input, entries.into_iter().flatten().collect()),
    )(rest)
}

fn value_expr(input: &str) -> PResult<Expr> {
    let (input, _) = ws(input)?;
    alt((list, sum))(input)
}

/// `name = value`, returning the input at the name along with the parts
fn binding(input: &str) -> PResult<(&str, &str, Expr)> {
    let (rest, name) = context("a variable name", identifier)(input)?;
    let (rest, value) = cut(preceded(symbol('=', "`=`"), value_expr))(rest)?;
    Ok((rest, (input, name, value)))
}

fn describe(rest: &str) -> String {
    match rest.chars().next() {
        None => String::from("end of input"),
        Some('\n') => String::from("end of line"),
        Some(c) => format!("'{}'", c),
    }
}

// ----------------------------------------------------------------------------------------------------
// evaluation
// ----------------------------------------------------------------------------------------------------

/// Maps the input remaining at a syntax node back to its Position in the source
struct SourceMap<'a> {
    source: &'a str,
    base: Position,
    line_starts: Vec<usize>,
}

impl<'a> SourceMap<'a> {
    fn new(source: &'a str, base: Position) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self {
            source,
            base,
            line_starts,
        }
    }

    /// `rest` must be a suffix of the mapped source
    fn position(&self, rest: &str) -> Position {
        let offset = self.source.len() - rest.len();
        let line = self.line_starts.partition_point(|start| *start <= offset) - 1;
        let column = self.source[self.line_starts[line]..offset].chars().count();

        if line == 0 {
            Position::new(self.base.line, self.base.column + column)
        } else {
            Position::new(self.base.line + line, column + 1)
        }
    }

    fn syntax_error(&self, err: nom::Err<GrammarError>) -> ResolveError {
        match err {
            nom::Err::Error(err) | nom::Err::Failure(err) => ResolveError::syntax(
                self.position(err.rest),
                format!(
                    "expected {}, found {}",
                    err.expected.unwrap_or("a value"),
                    describe(err.rest)
                ),
            ),
            nom::Err::Incomplete(_) => {
                ResolveError::syntax(self.position(""), "unexpected end of input")
            }
        }
    }

    fn eval(&self, expr: &Expr, scope: &Bindings) -> Result<Value, ResolveError> {
        Ok(match expr {
            Expr::Number(at, value) => Value::number(self.position(at), *value),
            Expr::Str(at, text) => Value {
                pos: self.position(at),
                kind: ValueKind::Str(text.to_string()),
            },
            Expr::Name(at, name) => scope.lookup(name, self.position(at))?,
            Expr::Call(at, name, argument) => {
                let pos = self.position(at);
                let x = self.eval(argument, scope)?.as_number()?;
                let value = apply_function(name, x).ok_or_else(|| ResolveError::Name {
                    pos,
                    name: name.to_string(),
                })?;
                Value::number(pos, value)
            }
            Expr::List(at, entries) => Value {
                pos: self.position(at),
                kind: ValueKind::List(
                    entries
                        .iter()
                        .map(|entry| self.eval(entry, scope))
                        .collect::<Result<_, _>>()?,
                ),
            },
            Expr::Unary(at, sign, operand) => {
                let x = self.eval(operand, scope)?.as_number()?;
                Value::number(self.position(at), if *sign == '-' { -x } else { x })
            }
            Expr::Binary(op, lhs, rhs) => {
                arithmetic(*op, self.eval(lhs, scope)?, self.eval(rhs, scope)?)?
            }
        })
    }
}

fn arithmetic(op: char, lhs: Value, rhs: Value) -> Result<Value, ResolveError> {
    let [a, b] = [lhs.as_number()?, rhs.as_number()?];
    let result = match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' => a / b,
        _ => a.powf(b),
    };
    Ok(Value::number(lhs.pos, result))
}

fn apply_function(name: &str, x: f64) -> Option<f64> {
    Some(match name {
        "sqrt" => x.sqrt(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "asin" => x.asin(),
        "acos" => x.acos(),
        "atan" => x.atan(),
        "exp" => x.exp(),
        "log" => x.ln(),
        "abs" => x.abs(),
        _ => return None,
    })
}
