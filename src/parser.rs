// ABOUTME: Lexes and parses a UTF-8 source string into Raw AST using nom combinators, the same
// parser-combinator style the rest of this codebase's reader grew up with.

use crate::error::ParseError;
use crate::value::RawExpr;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag, take_while, take_while1};
use nom::character::complete::{char, none_of, one_of};
use nom::combinator::{map, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use nom::Parser;

/// Whitespace in this reader includes commas (comma = whitespace, per Clojure convention).
fn is_ws(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn line_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = char(';')(input)?;
    let (input, _) = take_while(|c| c != '\n')(input)?;
    Ok((input, ()))
}

/// Skips any mixture of whitespace and line comments.
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    let (input, _) = many0(alt((map(take_while1(is_ws), |_| ()), line_comment))).parse(input)?;
    Ok((input, ()))
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic() || "+-*/%<>=!?_&".contains(c)
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || "+-*/%<>=!?_.&".contains(c)
}

fn raw_symbol_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        nom::combinator::verify(nom::character::complete::anychar, |c| is_symbol_start(*c)),
        take_while(is_symbol_char),
    )).parse(input)
}

fn parse_nil(input: &str) -> IResult<&str, RawExpr> {
    value(RawExpr::Nil, tag("nil")).parse(input)
}

fn parse_bool(input: &str) -> IResult<&str, RawExpr> {
    alt((value(RawExpr::Bool(true), tag("true")), value(RawExpr::Bool(false), tag("false")))).parse(input)
}

fn parse_special_float(input: &str) -> IResult<&str, RawExpr> {
    alt((
        value(RawExpr::Float(f64::INFINITY), tag("##Inf")),
        value(RawExpr::Float(f64::NEG_INFINITY), tag("##-Inf")),
        value(RawExpr::Float(f64::NAN), tag("##NaN")),
    )).parse(input)
}

fn parse_number(input: &str) -> IResult<&str, RawExpr> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
        opt(pair(char('.'), take_while(|c: char| c.is_ascii_digit()))),
        opt(tuple((one_of("eE"), opt(one_of("+-")), take_while1(|c: char| c.is_ascii_digit())))),
    ))).parse(input)?;

    let is_float = text.contains('.') || text.contains('e') || text.contains('E');
    if is_float {
        let (_, f) = double(text)?;
        Ok((rest, RawExpr::Float(f)))
    } else {
        match text.parse::<i64>() {
            Ok(n) => Ok((rest, RawExpr::Int(n))),
            Err(_) => {
                let (_, f) = double(text)?;
                Ok((rest, RawExpr::Float(f)))
            }
        }
    }
}

fn parse_string(input: &str) -> IResult<&str, RawExpr> {
    let (input, _) = char('"')(input)?;
    // escaped_transform rejects empty input, so the empty-string case is handled up front.
    if let Some(rest) = input.strip_prefix('"') {
        return Ok((rest, RawExpr::StringLit(String::new())));
    }
    let (input, s) = escaped_transform(
        none_of("\"\\"),
        '\\',
        alt((
            value("\n", char('n')),
            value("\t", char('t')),
            value("\r", char('r')),
            value("\\", char('\\')),
            value("\"", char('"')),
            value("\0", char('0')),
        )),
    )(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, RawExpr::StringLit(s)))
}

fn parse_keyword(input: &str) -> IResult<&str, RawExpr> {
    let (input, _) = char(':')(input)?;
    let (input, name) = recognize(pair(
        take_while1(|c: char| c.is_alphanumeric() || "+-*/%<>=!?_.".contains(c)),
        opt(pair(char('/'), take_while1(|c: char| c.is_alphanumeric() || "+-*/%<>=!?_.".contains(c)))),
    )).parse(input)?;
    Ok((input, RawExpr::KeywordLit(name.to_string())))
}

fn parse_symbol(input: &str) -> IResult<&str, RawExpr> {
    let (input, first) = raw_symbol_name(input)?;
    if let Some(rest) = input.strip_prefix('/') {
        if let Ok((rest2, second)) = raw_symbol_name(rest) {
            return Ok((rest2, RawExpr::NsSymbol(first.to_string(), second.to_string())));
        }
    }
    Ok((input, RawExpr::Symbol(first.to_string())))
}

fn parse_regex(input: &str) -> IResult<&str, RawExpr> {
    let (input, _) = tag("#\"")(input)?;
    let (input, s) = take_while(|c| c != '"')(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, RawExpr::List(vec![RawExpr::Symbol("re-pattern".to_string()), RawExpr::StringLit(s.to_string())])))
}

fn parse_short_fn(input: &str) -> IResult<&str, RawExpr> {
    let (input, body) = delimited(
        tag("#("),
        preceded(skip_trivia, many0(preceded(skip_trivia, parse_expr))),
        preceded(skip_trivia, char(')')),
    ).parse(input)?;
    Ok((
        input,
        RawExpr::ShortFn(Box::new(RawExpr::List(
            std::iter::once(RawExpr::Symbol("do".to_string())).chain(body).collect(),
        ))),
    ))
}

fn parse_set(input: &str) -> IResult<&str, RawExpr> {
    let (input, items) = delimited(
        tag("#{"),
        preceded(skip_trivia, separated_list0(skip_trivia, parse_expr)),
        preceded(skip_trivia, char('}')),
    ).parse(input)?;
    Ok((input, RawExpr::Set(items)))
}

fn parse_list(input: &str) -> IResult<&str, RawExpr> {
    let (input, items) = delimited(
        char('('),
        preceded(skip_trivia, separated_list0(skip_trivia, parse_expr)),
        preceded(skip_trivia, char(')')),
    ).parse(input)?;
    Ok((input, RawExpr::List(items)))
}

fn parse_vector(input: &str) -> IResult<&str, RawExpr> {
    let (input, items) = delimited(
        char('['),
        preceded(skip_trivia, separated_list0(skip_trivia, parse_expr)),
        preceded(skip_trivia, char(']')),
    ).parse(input)?;
    Ok((input, RawExpr::Vector(items)))
}

fn parse_map(input: &str) -> IResult<&str, RawExpr> {
    let (input, flat) = delimited(
        char('{'),
        preceded(skip_trivia, separated_list0(skip_trivia, parse_expr)),
        preceded(skip_trivia, char('}')),
    ).parse(input)?;
    if flat.len() % 2 != 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify)));
    }
    let pairs = flat.chunks(2).map(|c| (c[0].clone(), c[1].clone())).collect();
    Ok((input, RawExpr::Map(pairs)))
}

fn parse_quote(input: &str) -> IResult<&str, RawExpr> {
    let (input, _) = char('\'')(input)?;
    let (input, expr) = parse_expr(input)?;
    Ok((input, RawExpr::List(vec![RawExpr::Symbol("quote".to_string()), expr])))
}

fn parse_expr(input: &str) -> IResult<&str, RawExpr> {
    alt((
        parse_short_fn,
        parse_set,
        parse_regex,
        parse_list,
        parse_vector,
        parse_map,
        parse_quote,
        parse_special_float,
        parse_nil,
        parse_bool,
        parse_number,
        parse_string,
        parse_keyword,
        parse_symbol,
    )).parse(input)
}

/// Converts a byte offset in `source` to a 1-based (line, column) pair, for error reporting only.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let consumed = &source[..offset.min(source.len())];
    let line = consumed.matches('\n').count() + 1;
    let column = match consumed.rfind('\n') {
        Some(idx) => consumed[idx + 1..].chars().count() + 1,
        None => consumed.chars().count() + 1,
    };
    (line, column)
}

/// Parses exactly one top-level form, returning the remaining (unconsumed) source. Used by
/// script mode, which runs many top-level forms from one file.
pub fn parse_one(source: &str) -> Result<(RawExpr, &str), ParseError> {
    let (rest, _) = skip_trivia(source).unwrap_or((source, ()));
    if rest.is_empty() {
        return Err(ParseError { message: "unexpected end of input".to_string(), line: 1, column: 1 });
    }
    match parse_expr(rest) {
        Ok((remaining, expr)) => Ok((expr, remaining)),
        Err(_) => {
            let offset = source.len() - rest.len();
            let (line, column) = line_col(source, offset);
            Err(ParseError { message: format!("unexpected input near {:?}", &rest[..rest.len().min(20)]), line, column })
        }
    }
}

/// Parses a single complete expression from `source`, failing if trailing non-trivia input
/// remains. This is the entry point `run`/`run_loop` use for one turn's program text.
pub fn parse(source: &str) -> Result<RawExpr, ParseError> {
    let (expr, rest) = parse_one(source)?;
    let (trailing, _) = skip_trivia(rest).unwrap_or((rest, ()));
    if !trailing.is_empty() {
        let offset = source.len() - trailing.len();
        let (line, column) = line_col(source, offset);
        return Err(ParseError {
            message: format!("unexpected trailing input: {:?}", &trailing[..trailing.len().min(20)]),
            line,
            column,
        });
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals() {
        assert_eq!(parse("nil").unwrap(), RawExpr::Nil);
        assert_eq!(parse("true").unwrap(), RawExpr::Bool(true));
        assert_eq!(parse("42").unwrap(), RawExpr::Int(42));
        assert_eq!(parse("-3").unwrap(), RawExpr::Int(-3));
        assert_eq!(parse("3.14").unwrap(), RawExpr::Float(3.14));
        assert_eq!(parse("##Inf").unwrap(), RawExpr::Float(f64::INFINITY));
    }

    #[test]
    fn parses_string_with_escapes() {
        assert_eq!(parse(r#""a\nb""#).unwrap(), RawExpr::StringLit("a\nb".to_string()));
        assert_eq!(parse(r#""""#).unwrap(), RawExpr::StringLit(String::new()));
    }

    #[test]
    fn parses_keyword_and_namespaced_symbol() {
        assert_eq!(parse(":active").unwrap(), RawExpr::KeywordLit("active".to_string()));
        assert_eq!(parse("ctx/x").unwrap(), RawExpr::NsSymbol("ctx".to_string(), "x".to_string()));
    }

    #[test]
    fn parses_collections() {
        assert_eq!(parse("(1 2)").unwrap(), RawExpr::List(vec![RawExpr::Int(1), RawExpr::Int(2)]));
        assert_eq!(parse("[1 2]").unwrap(), RawExpr::Vector(vec![RawExpr::Int(1), RawExpr::Int(2)]));
        assert_eq!(
            parse("{:a 1}").unwrap(),
            RawExpr::Map(vec![(RawExpr::KeywordLit("a".to_string()), RawExpr::Int(1))])
        );
        assert!(parse("{:a}").is_err());
    }

    #[test]
    fn parses_quote_sugar() {
        assert_eq!(
            parse("'x").unwrap(),
            RawExpr::List(vec![RawExpr::Symbol("quote".to_string()), RawExpr::Symbol("x".to_string())])
        );
    }

    #[test]
    fn rejects_multiple_top_level_forms() {
        assert!(parse("1 2").is_err());
    }

    #[test]
    fn unbalanced_paren_is_parse_error() {
        let err = parse("(+ 1 2").unwrap_err();
        assert!(!err.message.is_empty());
    }
}
