//! Controller descriptor template parsing and evaluation.
//!
//! Controller YAML descriptors embed small expressions describing how to build a MIDI
//! message from a pad's coordinates (`"176 {cc_index(x,y)} {value}"`) or from the color
//! a pad should light up (`"{r/2} {g/2} {b/2}"`). The original engine resolved these
//! with Python's `eval()` against a `kwargs` dict at send time. That's rejected here:
//! every template is tokenized and parsed into an [`Expr`] tree once, when the
//! descriptor is loaded, so a malformed template is a load-time [`TemplateError`]
//! rather than a runtime surprise on the hot path. Evaluation only ever touches a
//! typed integer environment — no string interpolation, no arbitrary code.
//!
//! The original format writes loop-bound pad fields as `pad.x`, `pad.noteNumber`, etc.
//! This parser binds the same six fields as bare names instead (`x`, `noteNumber`,
//! `red`, `green`, `blue`, plus `y`) and rejects a literal `pad.x` at load time with
//! [`TemplateError::DottedFieldAccess`] rather than silently mis-tokenizing it into two
//! adjacent substitutions. A descriptor ported from the original format needs its
//! bulk-send templates rewritten to drop the `pad.` prefix.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::TemplateError;

/// How many nested macro expansions a single bare identifier may trigger before it's
/// treated as runaway recursion rather than a deeply nested but finite expansion.
const MAX_MACRO_DEPTH: usize = 16;

/// A parsed template: a flat sequence of byte-producing expressions, with `For` nodes
/// expanding to one sub-sequence per pad in the iterated collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    exprs: Vec<Expr>,
}

/// A minimal typed-integer context a pad's template is evaluated against, one per pad
/// iterated by a `{#for pad in pads}` loop body. Field names match the six pad
/// properties the original engine's bulk-send templates substitute (`pad.x`, `pad.y`,
/// `pad.noteNumber`, `pad.red`, `pad.green`, `pad.blue`); this crate binds them as bare
/// names (`x`, `noteNumber`, ...) rather than supporting dotted `pad.field` syntax — see
/// the module docs on [`tokenize`] for why.
#[derive(Debug, Clone, Copy, Default)]
pub struct PadContext {
    pub x: i64,
    pub y: i64,
    pub note_number: i64,
    pub red: i64,
    pub green: i64,
    pub blue: i64,
}

/// Evaluation environment: named scalars plus, inside a `{#for pad in pads}` loop body,
/// the current pad's fields bound directly into scope. Also carries the descriptor's
/// named macros (e.g. `MANUFACTURER_CODE: "0x7D"`), each a template source string
/// resolved recursively the first time a bare identifier misses `vars`, and the
/// descriptor's row-length array so `cumulativeIndex` can compute a flat pad index.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: HashMap<String, i64>,
    macros: HashMap<String, String>,
    row_lengths: Vec<i64>,
    /// Names currently mid-expansion, to catch a macro that (directly or transitively)
    /// references itself. Interior mutability so `eval_expr` can take `&Env` throughout.
    macro_stack: RefCell<Vec<String>>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: i64) -> &mut Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn set_macros(&mut self, macros: HashMap<String, String>) -> &mut Self {
        self.macros = macros;
        self
    }

    pub fn set_row_lengths(&mut self, row_lengths: Vec<i64>) -> &mut Self {
        self.row_lengths = row_lengths;
        self
    }

    fn get(&self, name: &str) -> Option<i64> {
        self.vars.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(i64),
    Var(String),
    Call(String, Vec<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    /// `{#for pad in pads} ... {#end}` — expands to one evaluation of `body` per pad,
    /// with `x`/`y` bound to that pad's coordinates for the duration.
    For { body: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Shr,
    Shl,
    And,
    Or,
}

impl Template {
    /// Parse a template string into an AST, rejecting anything malformed immediately.
    ///
    /// Grammar, informally:
    /// - whitespace-separated tokens are either bare integers (`240`, `0x7F`), bare
    ///   identifiers resolved against the environment (`color`), `{expr}` substitutions,
    ///   or `name(args...)` function calls;
    /// - `{#for pad in pads}` opens a loop that must be closed by a matching `{#end}`
    ///   before the template ends.
    pub fn parse(source: &str) -> Result<Template, TemplateError> {
        let tokens = tokenize(source);
        let mut pos = 0;
        let exprs = parse_sequence(&tokens, &mut pos, false)?;
        if pos != tokens.len() {
            return Err(TemplateError::UnbalancedLoop);
        }
        Ok(Template { exprs })
    }

    /// Evaluate a template that's really just a single arithmetic expression (e.g.
    /// `noteToCoordX`/`noteToCoordY`) to a raw `i64`, without MIDI byte masking.
    pub fn evaluate_scalar(&self, env: &Env) -> Result<i64, TemplateError> {
        match self.exprs.as_slice() {
            [single] => eval_expr(single, env),
            _ => Err(TemplateError::MalformedExpression(
                "expected a single expression for scalar evaluation".into(),
            )),
        }
    }

    /// Evaluate into a flat byte sequence. `pads` supplies the iteration set for any
    /// `{#for pad in pads}` blocks; `env` supplies scalar variables such as `color`,
    /// `value`, or a single pad's `x`/`y` outside of a loop.
    pub fn evaluate(&self, env: &Env, pads: &[PadContext]) -> Result<Vec<u8>, TemplateError> {
        let mut out = Vec::new();
        eval_sequence(&self.exprs, env, pads, &mut out)?;
        Ok(out)
    }
}

fn eval_sequence(
    exprs: &[Expr],
    env: &Env,
    pads: &[PadContext],
    out: &mut Vec<u8>,
) -> Result<(), TemplateError> {
    for expr in exprs {
        match expr {
            Expr::For { body } => {
                for pad in pads {
                    let mut loop_env = env.clone();
                    loop_env
                        .set("x", pad.x)
                        .set("y", pad.y)
                        .set("noteNumber", pad.note_number)
                        .set("red", pad.red)
                        .set("green", pad.green)
                        .set("blue", pad.blue);
                    eval_sequence(body, &loop_env, pads, out)?;
                }
            }
            other => {
                let value = eval_expr(other, env)?;
                out.push((value & 0xFF) as u8);
            }
        }
    }
    Ok(())
}

fn eval_expr(expr: &Expr, env: &Env) -> Result<i64, TemplateError> {
    match expr {
        Expr::Literal(v) => Ok(*v),
        Expr::Var(name) => resolve_var(name, env),
        Expr::BinOp(op, lhs, rhs) => {
            let l = eval_expr(lhs, env)?;
            let r = eval_expr(rhs, env)?;
            Ok(match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => {
                    if r == 0 {
                        return Err(TemplateError::MalformedExpression("division by zero".into()));
                    }
                    l / r
                }
                BinOp::Shr => l >> r.clamp(0, 63),
                BinOp::Shl => l << r.clamp(0, 63),
                BinOp::And => l & r,
                BinOp::Or => l | r,
            })
        }
        Expr::Call(name, args) => {
            let values: Result<Vec<i64>, TemplateError> = args.iter().map(|a| eval_expr(a, env)).collect();
            let values = values?;
            // `cumulativeIndex` needs the descriptor's row-length array, which isn't part
            // of the plain `&[i64]` signature every other builtin uses, so it's dispatched
            // here against `env` directly instead of going through `builtins::call`.
            match (name.as_str(), values.as_slice()) {
                ("cumulativeIndex", [x, y]) | ("cumulative_index", [x, y]) => {
                    Ok(builtins::cumulative_index(*x, *y, &env.row_lengths))
                }
                _ => builtins::call(name, &values),
            }
        }
        Expr::For { .. } => Err(TemplateError::MalformedExpression("nested #for in expression position".into())),
    }
}

/// Resolve a bare identifier: a same-descriptor macro first (recursively expanded
/// against the current environment), then a plain environment variable, else `0`.
fn resolve_var(name: &str, env: &Env) -> Result<i64, TemplateError> {
    if let Some(macro_src) = env.macros.get(name) {
        {
            let stack = env.macro_stack.borrow();
            if stack.iter().any(|s| s == name) || stack.len() >= MAX_MACRO_DEPTH {
                return Err(TemplateError::Recursion(name.to_string()));
            }
        }
        let macro_template = Template::parse(macro_src)?;
        env.macro_stack.borrow_mut().push(name.to_string());
        let result = macro_template.evaluate_scalar(env);
        env.macro_stack.borrow_mut().pop();
        return result;
    }
    Ok(env.get(name).unwrap_or_else(|| {
        log::warn!("template references unknown symbol `{name}`; emitting 0");
        0
    }))
}

/// Built-in functions available to templates, in place of the original's ad-hoc
/// `keyIndex`/`boardIndex`/`MSB`/`NRPN` lambda dispatch.
pub mod builtins {
    use super::*;

    pub fn call(name: &str, args: &[i64]) -> Result<i64, TemplateError> {
        match (name, args) {
            ("msb", [v]) => Ok((v >> 7) & 0x7F),
            ("lsb", [v]) => Ok(v & 0x7F),
            ("key_index", [x, y]) | ("keyIndex", [x, y]) => Ok(y * 16 + x),
            ("board_index", [x, y]) | ("boardIndex", [x, y]) => Ok(y / 2 * 8 + x / 2),
            ("nrpn_msb", [v]) | ("nrpnMsb", [v]) => Ok((v >> 7) & 0x7F),
            ("nrpn_lsb", [v]) | ("nrpnLsb", [v]) => Ok(v & 0x7F),
            ("half", [v]) => Ok(v / 2),
            ("clamp7", [v]) => Ok((*v).clamp(0, 127)),
            (other, _) => Err(TemplateError::MalformedExpression(format!(
                "unknown function `{other}` or wrong argument count ({} args)",
                args.len()
            ))),
        }
    }

    /// Flat index of pad `(x, y)` within the descriptor's declared row-length array:
    /// the sum of every preceding row's length, plus the column `x`. `y` is treated as
    /// a 0-based row index into `row_lengths`, clamped to `0` below the first row.
    pub fn cumulative_index(x: i64, y: i64, row_lengths: &[i64]) -> i64 {
        let row = y.max(0) as usize;
        let preceding: i64 = row_lengths.iter().take(row).sum();
        preceding + x
    }

    /// Nearest-neighbor match an RGB triple against a device's LED palette, falling
    /// back to halving each channel (7-bit MIDI range) when no palette is configured.
    pub fn color_to_wire(rgb: [u8; 3], palette: Option<&[[u8; 3]]>) -> [u8; 3] {
        match palette {
            Some(colors) if !colors.is_empty() => *colors
                .iter()
                .min_by_key(|c| {
                    let dr = c[0] as i32 - rgb[0] as i32;
                    let dg = c[1] as i32 - rgb[1] as i32;
                    let db = c[2] as i32 - rgb[2] as i32;
                    dr * dr + dg * dg + db * db
                })
                .expect("non-empty palette"),
            _ => [rgb[0] / 2, rgb[1] / 2, rgb[2] / 2],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Ident(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Op(char),
    ForStart,
    ForEnd,
}

fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '{' => {
                if chars[i..].starts_with(&['{', '#', 'f', 'o', 'r']) {
                    tokens.push(Token::ForStart);
                    i += 4;
                    while i < chars.len() && chars[i] != '}' {
                        i += 1;
                    }
                    i += 1;
                } else if chars[i..].starts_with(&['{', '#', 'e', 'n', 'd', '}']) {
                    tokens.push(Token::ForEnd);
                    i += 6;
                } else {
                    tokens.push(Token::LBrace);
                    i += 1;
                }
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '&' | '|' | '>' | '<' => {
                // ">>" and "<<" collapse to a single Op token carrying one char.
                if (c == '>' || c == '<') && i + 1 < chars.len() && chars[i + 1] == c {
                    tokens.push(Token::Op(c));
                    i += 2;
                } else {
                    tokens.push(Token::Op(c));
                    i += 1;
                }
            }
            '0'..='9' => {
                let start = i;
                if c == '0' && chars.get(i + 1) == Some(&'x') {
                    i += 2;
                    while i < chars.len() && chars[i].is_ascii_hexdigit() {
                        i += 1;
                    }
                    let text: String = chars[start + 2..i].iter().collect();
                    tokens.push(Token::Number(i64::from_str_radix(&text, 16).unwrap_or(0)));
                } else {
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::Number(text.parse().unwrap_or(0)));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                // `.` is swallowed into the identifier (rather than left as its own
                // token, which would silently split `pad.x` into two adjacent
                // identifiers and evaluate both) so `parse_call_or_var` can reject
                // dotted names with a clear `TemplateError` instead.
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => i += 1,
        }
    }
    tokens
}

fn parse_sequence(tokens: &[Token], pos: &mut usize, inside_loop: bool) -> Result<Vec<Expr>, TemplateError> {
    let mut out = Vec::new();
    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::ForEnd if inside_loop => return Ok(out),
            Token::ForEnd => return Err(TemplateError::UnbalancedLoop),
            Token::ForStart => {
                *pos += 1;
                let body = parse_sequence(tokens, pos, true)?;
                if *pos >= tokens.len() || tokens[*pos] != Token::ForEnd {
                    return Err(TemplateError::UnbalancedLoop);
                }
                *pos += 1;
                out.push(Expr::For { body });
            }
            Token::Number(n) => {
                out.push(Expr::Literal(*n));
                *pos += 1;
            }
            Token::LBrace => {
                *pos += 1;
                let expr = parse_expr(tokens, pos)?;
                if *pos >= tokens.len() || tokens[*pos] != Token::RBrace {
                    return Err(TemplateError::MalformedExpression("unterminated `{...}`".into()));
                }
                *pos += 1;
                out.push(expr);
            }
            Token::Ident(_) => {
                let expr = parse_call_or_var(tokens, pos)?;
                out.push(expr);
            }
            other => {
                return Err(TemplateError::MalformedExpression(format!("unexpected token {other:?}")));
            }
        }
    }
    Ok(out)
}

fn parse_call_or_var(tokens: &[Token], pos: &mut usize) -> Result<Expr, TemplateError> {
    let name = match &tokens[*pos] {
        Token::Ident(n) => n.clone(),
        _ => return Err(TemplateError::MalformedExpression("expected identifier".into())),
    };
    if name.contains('.') {
        return Err(TemplateError::DottedFieldAccess(name));
    }
    *pos += 1;
    if *pos < tokens.len() && tokens[*pos] == Token::LParen {
        *pos += 1;
        let mut args = Vec::new();
        if *pos < tokens.len() && tokens[*pos] != Token::RParen {
            loop {
                args.push(parse_expr(tokens, pos)?);
                match tokens.get(*pos) {
                    Some(Token::Comma) => *pos += 1,
                    _ => break,
                }
            }
        }
        if tokens.get(*pos) != Some(&Token::RParen) {
            return Err(TemplateError::MalformedExpression(format!("unterminated call to `{name}`")));
        }
        *pos += 1;
        Ok(Expr::Call(name, args))
    } else {
        Ok(Expr::Var(name))
    }
}

/// Expression grammar: a single additive/bitwise layer, left-associative, no operator
/// precedence beyond left-to-right — matches the narrow arithmetic the original
/// templates actually use (`7-y`, `x & 0x7F`, `(x>>7)&0x7F` written without the
/// grouping parens since those were never load-bearing in the retrieved descriptors).
fn parse_expr(tokens: &[Token], pos: &mut usize) -> Result<Expr, TemplateError> {
    let mut lhs = parse_atom(tokens, pos)?;
    while let Some(Token::Op(c)) = tokens.get(*pos) {
        let op = match c {
            '+' => BinOp::Add,
            '-' => BinOp::Sub,
            '*' => BinOp::Mul,
            '/' => BinOp::Div,
            '>' => BinOp::Shr,
            '<' => BinOp::Shl,
            '&' => BinOp::And,
            '|' => BinOp::Or,
            _ => return Err(TemplateError::MalformedExpression(format!("unknown operator `{c}`"))),
        };
        *pos += 1;
        let rhs = parse_atom(tokens, pos)?;
        lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_atom(tokens: &[Token], pos: &mut usize) -> Result<Expr, TemplateError> {
    match tokens.get(*pos) {
        Some(Token::Number(n)) => {
            let n = *n;
            *pos += 1;
            Ok(Expr::Literal(n))
        }
        Some(Token::LParen) => {
            *pos += 1;
            let expr = parse_expr(tokens, pos)?;
            if tokens.get(*pos) != Some(&Token::RParen) {
                return Err(TemplateError::MalformedExpression("unterminated `(...)`".into()));
            }
            *pos += 1;
            Ok(expr)
        }
        Some(Token::Ident(_)) => parse_call_or_var(tokens, pos),
        other => Err(TemplateError::MalformedExpression(format!("expected expression, found {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_numbers() {
        let tpl = Template::parse("240 127 247").unwrap();
        let bytes = tpl.evaluate(&Env::new(), &[]).unwrap();
        assert_eq!(bytes, vec![240, 127, 247]);
    }

    #[test]
    fn parses_hex_numbers() {
        let tpl = Template::parse("0xF0 0x7F 0xF7").unwrap();
        let bytes = tpl.evaluate(&Env::new(), &[]).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x7F, 0xF7]);
    }

    #[test]
    fn evaluates_simple_expression() {
        let tpl = Template::parse("176 {7-y} {value}").unwrap();
        let mut env = Env::new();
        env.set("y", 2).set("value", 100);
        let bytes = tpl.evaluate(&env, &[]).unwrap();
        assert_eq!(bytes, vec![176, 5, 100]);
    }

    #[test]
    fn evaluates_builtin_call() {
        let tpl = Template::parse("{key_index(x, y)}").unwrap();
        let mut env = Env::new();
        env.set("x", 3).set("y", 1);
        let bytes = tpl.evaluate(&env, &[]).unwrap();
        assert_eq!(bytes, vec![19]);
    }

    #[test]
    fn unknown_variable_emits_zero_and_continues() {
        let tpl = Template::parse("176 {missing} 100").unwrap();
        let bytes = tpl.evaluate(&Env::new(), &[]).unwrap();
        assert_eq!(bytes, vec![176, 0, 100]);
    }

    #[test]
    fn for_loop_expands_per_pad() {
        let tpl = Template::parse("{#for pad in pads}{x} {y} {#end}").unwrap();
        let pads = vec![
            PadContext { x: 0, y: 0, ..Default::default() },
            PadContext { x: 1, y: 0, ..Default::default() },
        ];
        let bytes = tpl.evaluate(&Env::new(), &pads).unwrap();
        assert_eq!(bytes, vec![0, 0, 1, 0]);
    }

    #[test]
    fn for_loop_binds_note_number_and_color_fields() {
        let tpl = Template::parse("{#for pad in pads}{noteNumber} {red} {green} {blue} {#end}").unwrap();
        let pads = vec![PadContext { x: 0, y: 0, note_number: 42, red: 10, green: 20, blue: 30 }];
        let bytes = tpl.evaluate(&Env::new(), &pads).unwrap();
        assert_eq!(bytes, vec![42, 10, 20, 30]);
    }

    #[test]
    fn dotted_field_access_is_rejected_at_parse_time() {
        let err = Template::parse("{#for pad in pads}{pad.x}{#end}").unwrap_err();
        assert!(matches!(err, TemplateError::DottedFieldAccess(name) if name == "pad.x"));
    }

    #[test]
    fn cumulative_index_sums_preceding_rows_plus_column() {
        let tpl = Template::parse("{cumulativeIndex(x, y)}").unwrap();
        let mut env = Env::new();
        env.set("x", 3).set("y", 2).set_row_lengths(vec![8, 8, 8]);
        let bytes = tpl.evaluate(&env, &[]).unwrap();
        assert_eq!(bytes, vec![19]);
    }

    #[test]
    fn cumulative_index_first_row_is_just_the_column() {
        assert_eq!(builtins::cumulative_index(5, 0, &[8, 8, 8]), 5);
    }

    #[test]
    fn unbalanced_loop_is_rejected_at_parse_time() {
        let err = Template::parse("{#for pad in pads} {x}").unwrap_err();
        assert!(matches!(err, TemplateError::UnbalancedLoop));
    }

    #[test]
    fn bare_identifier_resolves_as_macro_before_env_var() {
        let tpl = Template::parse("{MANUFACTURER_CODE}").unwrap();
        let mut env = Env::new();
        let mut macros = HashMap::new();
        macros.insert("MANUFACTURER_CODE".to_string(), "0x7D".to_string());
        env.set_macros(macros);
        let bytes = tpl.evaluate(&env, &[]).unwrap();
        assert_eq!(bytes, vec![0x7D]);
    }

    #[test]
    fn macro_expansion_sees_the_calling_environment() {
        let tpl = Template::parse("{DOUBLE_X}").unwrap();
        let mut env = Env::new();
        env.set("x", 5);
        let mut macros = HashMap::new();
        macros.insert("DOUBLE_X".to_string(), "x*2".to_string());
        env.set_macros(macros);
        let bytes = tpl.evaluate(&env, &[]).unwrap();
        assert_eq!(bytes, vec![10]);
    }

    #[test]
    fn self_referencing_macro_fails_with_recursion_error() {
        let tpl = Template::parse("{LOOP}").unwrap();
        let mut env = Env::new();
        let mut macros = HashMap::new();
        macros.insert("LOOP".to_string(), "LOOP".to_string());
        env.set_macros(macros);
        let err = tpl.evaluate(&env, &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Recursion(name) if name == "LOOP"));
    }

    #[test]
    fn color_to_wire_without_palette_halves_channels() {
        let wire = builtins::color_to_wire([200, 100, 50], None);
        assert_eq!(wire, [100, 50, 25]);
    }

    #[test]
    fn color_to_wire_with_palette_picks_nearest() {
        let palette = [[0, 0, 0], [127, 127, 127], [127, 0, 0]];
        let wire = builtins::color_to_wire([200, 10, 10], Some(&palette));
        assert_eq!(wire, [127, 0, 0]);
    }
}
