// ABOUTME: LLQ surface syntax parser and the LLQ-to-AST conversion step

use std::rc::Rc;

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, none_of, one_of},
    combinator::{map, opt, recognize, value, verify},
    multi::many0,
    sequence::preceded,
    IResult, Parser,
};

use crate::error::EvalError;
use crate::value::Value;

const SEPARATE_SYMBOLS: &str = "`,;(){}*/<>@~+-%\\";

fn ws_and_comments(input: &str) -> IResult<&str, ()> {
    many0(alt((
        value((), multispace1),
        value((), block_comment),
        value((), line_comment),
    )))
    .map(|_| ())
    .parse(input)
}

fn block_comment(input: &str) -> IResult<&str, &str> {
    let (input, _) = tag("/*")(input)?;
    let mut depth = 1usize;
    let mut rest = input;
    loop {
        if let Some(stripped) = rest.strip_prefix("/*") {
            depth += 1;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("*/") {
            depth -= 1;
            rest = stripped;
            if depth == 0 {
                break;
            }
        } else if let Some(ch) = rest.chars().next() {
            rest = &rest[ch.len_utf8()..];
        } else {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Eof,
            )));
        }
    }
    let consumed_len = input.len() - rest.len();
    Ok((rest, &input[..consumed_len]))
}

fn line_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = tag("//")(input)?;
    let (input, _) = take_while(|c| c != '\n')(input)?;
    Ok((input, ()))
}

/// Integers have no leading zero when more than one digit; decimals always
/// carry a fractional part. Both store as 64-bit float.
fn parse_number(input: &str) -> IResult<&str, Value> {
    let integer_part = verify(digit1, |s: &str| s == "0" || !s.starts_with('0'));
    recognize((
        opt(char('-')),
        integer_part,
        opt((char('.'), digit1)),
    ))
    .map(|text: &str| Value::Number(text.parse().expect("validated by the combinator above")))
    .parse(input)
}

fn parse_bool(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Boolean(true), tag("true")),
        value(Value::Boolean(false), tag("false")),
    ))
    .parse(input)
}

fn parse_unit(input: &str) -> IResult<&str, Value> {
    value(Value::Unit, tag("unit")).parse(input)
}

/// `c"x"`: a single-character payload between the c-prefixed quotes.
fn parse_char_literal(input: &str) -> IResult<&str, Value> {
    let (input, _) = tag("c\"")(input)?;
    let (input, ch) = alt((preceded(char('\\'), escape_char), none_of("\"\\")))(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, Value::Char(ch)))
}

fn escape_char(input: &str) -> IResult<&str, char> {
    alt((
        value('\n', char('n')),
        value('\t', char('t')),
        value('\r', char('r')),
        value('"', char('"')),
        value('\'', char('\'')),
        value('\\', char('\\')),
    ))
    .parse(input)
}

/// `"…"` desugars to `(list c"…" c"…" …)`, a List of Chars built by an
/// ordinary sExpression rather than a dedicated data constructor.
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (input, _) = char('"')(input)?;
    let (input, content) =
        escaped_transform(none_of("\"\\"), '\\', escape_char_as_str).parse(input)?;
    let (input, _) = char('"')(input)?;
    let chars: Vec<Value> = content.chars().map(Value::Char).collect();
    let mut items = vec![Value::QuotedName("list".to_string())];
    items.extend(chars);
    Ok((input, Value::List(Rc::new(items))))
}

fn escape_char_as_str(input: &str) -> IResult<&str, String> {
    map(escape_char, |c| c.to_string()).parse(input)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn parse_identifier(input: &str) -> IResult<&str, Value> {
    alt((
        map(take_while1(is_identifier_char), |s: &str| {
            Value::QuotedName(s.to_string())
        }),
        map(one_of(SEPARATE_SYMBOLS), |c: char| {
            Value::QuotedName(c.to_string())
        }),
    ))
    .parse(input)
}

/// `[ a b c ]`. An empty list `[ ]` is `Value::List` of nothing.
fn parse_list(input: &str) -> IResult<&str, Value> {
    let (input, _) = char('[')(input)?;
    let (input, _) = ws_and_comments(input)?;

    let mut items = Vec::new();
    let mut remaining = input;
    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<_>>(']')(remaining) {
            return Ok((rest, Value::List(Rc::new(items))));
        }
        let (rest, item) = parse_expr(remaining)?;
        items.push(item);
        let (rest, _) = ws_and_comments(rest)?;
        remaining = rest;
    }
}

fn parse_expr(input: &str) -> IResult<&str, Value> {
    let (input, _) = ws_and_comments(input)?;
    alt((
        parse_list,
        parse_char_literal,
        parse_string,
        parse_bool,
        parse_unit,
        parse_number,
        parse_identifier,
    ))
    .parse(input)
}

/// Parses one top-level LLQ expression, failing on trailing unconsumed input.
pub fn parse_one(input: &str) -> Result<Value, EvalError> {
    let (rest, value) = parse_expr(input).map_err(|e| EvalError::ParseError(e.to_string()))?;
    let (rest, _) = ws_and_comments(rest).unwrap_or((rest, ()));
    if !rest.is_empty() {
        return Err(EvalError::ParseError(format!(
            "unexpected trailing input: '{rest}'"
        )));
    }
    Ok(value)
}

/// Parses zero or more top-level LLQ expressions, as a source file holds:
/// one per top-level form, evaluated in sequence by the caller.
pub fn parse_program(input: &str) -> Result<Vec<Value>, EvalError> {
    let mut remaining = input;
    let mut forms = Vec::new();
    loop {
        let (rest, _) = ws_and_comments(remaining).unwrap_or((remaining, ()));
        if rest.is_empty() {
            return Ok(forms);
        }
        let (rest, form) = parse_expr(rest).map_err(|e| EvalError::ParseError(e.to_string()))?;
        forms.push(form);
        remaining = rest;
    }
}

/// Converts a parsed LLQ tree (code-as-data: Lists and QuotedNames) into the
/// executable AST the evaluator runs (sExpressions and References). Runs
/// after demacro, which itself operates on the LLQ form directly.
pub fn llq_to_ast(value: &Value) -> Value {
    match value {
        Value::List(items) => {
            let converted: Vec<Value> = items.iter().map(llq_to_ast).collect();
            Value::SExpression(Rc::new(converted))
        }
        Value::QuotedName(name) => Value::Reference(name.clone()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integers_and_decimals() {
        assert!(matches!(parse_one("42"), Ok(Value::Number(n)) if n == 42.0));
        assert!(matches!(parse_one("-42"), Ok(Value::Number(n)) if n == -42.0));
        assert!(matches!(parse_one("3.5"), Ok(Value::Number(n)) if n == 3.5));
        assert!(matches!(parse_one("0"), Ok(Value::Number(n)) if n == 0.0));
    }

    #[test]
    fn rejects_leading_zero_on_multi_digit_integers() {
        assert!(parse_one("007").is_err());
    }

    #[test]
    fn parses_booleans_and_unit() {
        assert!(matches!(parse_one("true"), Ok(Value::Boolean(true))));
        assert!(matches!(parse_one("false"), Ok(Value::Boolean(false))));
        assert!(matches!(parse_one("unit"), Ok(Value::Unit)));
    }

    #[test]
    fn parses_char_literal() {
        assert!(matches!(parse_one("c\"x\""), Ok(Value::Char('x'))));
    }

    #[test]
    fn parses_string_as_a_list_call() {
        match parse_one("\"hi\"").unwrap() {
            Value::List(items) => {
                assert!(matches!(&items[0], Value::QuotedName(n) if n == "list"));
                assert!(matches!(&items[1], Value::Char('h')));
                assert!(matches!(&items[2], Value::Char('i')));
            }
            _ => panic!("expected a list call"),
        }
    }

    #[test]
    fn parses_nested_lists_of_identifiers() {
        match parse_one("[ lambda [ x ] x ]").unwrap() {
            Value::List(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(&items[0], Value::QuotedName(n) if n == "lambda"));
            }
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn parses_separate_symbols_as_single_char_identifiers() {
        match parse_one("[ + x y ]").unwrap() {
            Value::List(items) => {
                assert!(matches!(&items[0], Value::QuotedName(n) if n == "+"));
            }
            _ => panic!("expected a list"),
        }
    }

    #[test]
    fn skips_block_and_line_comments() {
        assert!(matches!(parse_one("/* hi */ 1"), Ok(Value::Number(n)) if n == 1.0));
        assert!(matches!(parse_one("1 // trailing\n"), Ok(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn converts_llq_list_to_sexpression_and_quoted_name_to_reference() {
        let llq = parse_one("[ f x ]").unwrap();
        match llq_to_ast(&llq) {
            Value::SExpression(items) => {
                assert!(matches!(&items[0], Value::Reference(n) if n == "f"));
                assert!(matches!(&items[1], Value::Reference(n) if n == "x"));
            }
            _ => panic!("expected an sExpression"),
        }
    }

    #[test]
    fn parse_program_reads_multiple_top_level_forms() {
        let forms = parse_program("1 2 3").unwrap();
        assert_eq!(forms.len(), 3);
    }
}
