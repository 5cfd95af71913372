//! Target parser
//!
//! Parses query-language target strings into [`ParseNode`] trees.
//!
//! # Supported Syntax
//!
//! ```text
//! function(arg, arg, name=arg)        nested calls allowed
//! dotted.path.with.*.wildcards
//! servers.{web,db}*.cpu               braces may nest
//! 'string' "literals" 1 2.5 -3e4 true
//! template(inner, positional..., name=value...)
//! ```
//!
//! The symbol set `(){},=.'"\` is reserved inside path expressions and
//! must be backslash-escaped to appear literally. Keyword-argument
//! detection looks ahead past `=` so that a keyword is never misparsed
//! as a bare expression; number and boolean literals only match when
//! followed by `,`, `)` or end of input, so path segments with leading
//! digits keep parsing as paths.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map, not, opt, recognize},
    multi::{many1, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::query::ast::ParseNode;
use crate::query::error::{QueryError, QueryResult};

/// Characters reserved by the grammar inside path expressions.
const SYMBOLS: &str = "(){},=.'\"\\";

/// Parse a target string into a parse tree.
pub fn parse_target(input: &str) -> QueryResult<ParseNode> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Syntax("empty target".to_string()));
    }
    match expression(trimmed) {
        Ok((remaining, node)) => {
            if remaining.trim().is_empty() {
                Ok(node)
            } else {
                Err(QueryError::Syntax(format!(
                    "unexpected input after expression: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Syntax(format!("{:?}", e))),
    }
}

/// An expression is a template, a call or a path, in that order of
/// preference.
fn expression(input: &str) -> IResult<&str, ParseNode> {
    map(alt((template, call, path_expression)), |node| {
        ParseNode::Expression(Box::new(node))
    })(input)
}

/// Parse `name(args...)`.
fn call(input: &str) -> IResult<&str, ParseNode> {
    let (input, name) = identifier(input)?;
    let (input, _) = preceded(multispace0, char('('))(input)?;
    let (input, (args, kwargs)) = call_arguments(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    Ok((
        input,
        ParseNode::Call {
            name: name.to_string(),
            args,
            kwargs,
        },
    ))
}

/// Positional arguments first, then keyword arguments; either part may
/// be absent, but keywords never precede positionals.
#[allow(clippy::type_complexity)]
fn call_arguments(input: &str) -> IResult<&str, (Vec<ParseNode>, Vec<(String, ParseNode)>)> {
    match separated_list1(ws_comma, positional_arg)(input) {
        Ok((input, args)) => {
            let (input, kwargs) = opt(preceded(ws_comma, kwarg_list))(input)?;
            Ok((input, (args, kwargs.unwrap_or_default())))
        }
        Err(_) => Ok((input, (Vec::new(), Vec::new()))),
    }
}

/// A positional argument: lookahead rejects anything shaped like a
/// keyword argument.
fn positional_arg(input: &str) -> IResult<&str, ParseNode> {
    preceded(not(kwarg_probe), argument)(input)
}

/// Cheap probe for `name =` without consuming input on failure.
fn kwarg_probe(input: &str) -> IResult<&str, char> {
    preceded(
        preceded(multispace0, identifier),
        preceded(multispace0, char('=')),
    )(input)
}

fn kwarg_list(input: &str) -> IResult<&str, Vec<(String, ParseNode)>> {
    separated_list1(ws_comma, kwarg)(input)
}

fn kwarg(input: &str) -> IResult<&str, (String, ParseNode)> {
    let (input, name) = preceded(multispace0, identifier)(input)?;
    let (input, _) = preceded(multispace0, char('='))(input)?;
    let (input, value) = argument(input)?;
    Ok((input, (name.to_string(), value)))
}

/// One argument: boolean, number, string, or a nested expression.
fn argument(input: &str) -> IResult<&str, ParseNode> {
    preceded(
        multispace0,
        alt((boolean_literal, number_literal, string_literal, expression)),
    )(input)
}

fn ws_comma(input: &str) -> IResult<&str, char> {
    preceded(multispace0, char(','))(input)
}

/// Parse `template(inner, literal-substitutions...)`.
///
/// Substitution arguments must be literal numbers or strings. A
/// `template(...)` that does not fit this production falls through to
/// the ordinary call grammar and is rejected by the evaluator.
fn template(input: &str) -> IResult<&str, ParseNode> {
    let (input, _) = tag("template")(input)?;
    let (input, _) = preceded(multispace0, char('('))(input)?;
    let (input, inner) = preceded(multispace0, alt((call, path_expression)))(input)?;
    let (input, bindings) = opt(preceded(ws_comma, template_bindings))(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    let (args, kwargs) = bindings.unwrap_or_default();
    Ok((
        input,
        ParseNode::Template {
            inner: Box::new(inner),
            args,
            kwargs,
        },
    ))
}

#[allow(clippy::type_complexity)]
fn template_bindings(input: &str) -> IResult<&str, (Vec<ParseNode>, Vec<(String, ParseNode)>)> {
    alt((
        lit_args_then_kwargs,
        map(lit_kwarg_list, |kwargs| (Vec::new(), kwargs)),
    ))(input)
}

#[allow(clippy::type_complexity)]
fn lit_args_then_kwargs(input: &str) -> IResult<&str, (Vec<ParseNode>, Vec<(String, ParseNode)>)> {
    let (input, args) = separated_list1(ws_comma, lit_positional)(input)?;
    let (input, kwargs) = opt(preceded(ws_comma, lit_kwarg_list))(input)?;
    Ok((input, (args, kwargs.unwrap_or_default())))
}

fn lit_positional(input: &str) -> IResult<&str, ParseNode> {
    preceded(not(kwarg_probe), lit_arg)(input)
}

fn lit_arg(input: &str) -> IResult<&str, ParseNode> {
    preceded(multispace0, alt((number_literal, string_literal)))(input)
}

fn lit_kwarg_list(input: &str) -> IResult<&str, Vec<(String, ParseNode)>> {
    separated_list1(ws_comma, lit_kwarg)(input)
}

fn lit_kwarg(input: &str) -> IResult<&str, (String, ParseNode)> {
    let (input, name) = preceded(multispace0, identifier)(input)?;
    let (input, _) = preceded(multispace0, char('='))(input)?;
    let (input, value) = lit_arg(input)?;
    Ok((input, (name.to_string(), value)))
}

/// Function and keyword names: letters or `_`, then alphanumerics.
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Integer, decimal or scientific literal, only when followed by `,`,
/// `)` or end of input.
fn number_literal(input: &str) -> IResult<&str, ParseNode> {
    let (rest, text) = alt((scientific, float, integer))(input)?;
    let (rest, _) = literal_boundary(rest)?;
    match text.parse::<f64>() {
        Ok(value) => Ok((rest, ParseNode::Number(value))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn integer(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1))(input)
}

fn float(input: &str) -> IResult<&str, &str> {
    recognize(tuple((opt(char('-')), digit1, char('.'), digit1)))(input)
}

fn scientific(input: &str) -> IResult<&str, &str> {
    recognize(tuple((alt((float, integer)), one_of("eE"), integer)))(input)
}

fn boolean_literal(input: &str) -> IResult<&str, ParseNode> {
    let (rest, word) = alt((tag_no_case("true"), tag_no_case("false")))(input)?;
    let (rest, _) = literal_boundary(rest)?;
    Ok((rest, ParseNode::Bool(word.eq_ignore_ascii_case("true"))))
}

/// Lookahead ensuring a number/boolean literal is not the prefix of a
/// path segment.
fn literal_boundary(input: &str) -> IResult<&str, ()> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() || trimmed.starts_with(',') || trimmed.starts_with(')') {
        Ok((input, ()))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )))
    }
}

/// Single- or double-quoted string with backslash escapes.
fn string_literal(input: &str) -> IResult<&str, ParseNode> {
    let (input, quote) = one_of("'\"")(input)?;
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((&input[i + c.len_utf8()..], ParseNode::Str(value)));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            }
        } else {
            value.push(c);
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// A dotted path expression, captured verbatim.
fn path_expression(input: &str) -> IResult<&str, ParseNode> {
    map(
        recognize(separated_list1(char('.'), path_element)),
        |s: &str| ParseNode::Path(s.to_string()),
    )(input)
}

/// One path segment: literal runs, escaped symbols and brace groups in
/// any order.
fn path_element(input: &str) -> IResult<&str, &str> {
    recognize(many1(alt((match_enum, partial_path_elem))))(input)
}

fn partial_path_elem(input: &str) -> IResult<&str, &str> {
    recognize(many1(alt((escaped_symbol, metric_chars))))(input)
}

fn escaped_symbol(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('\\'), one_of(SYMBOLS)))(input)
}

fn metric_chars(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_graphic() && !SYMBOLS.contains(c))(input)
}

/// A brace alternation group; groups may nest.
fn match_enum(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('{'),
        separated_list1(char(','), path_element),
        char('}'),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> ParseNode {
        parse_target(input).unwrap().unwrap_expression().clone()
    }

    fn path(s: &str) -> ParseNode {
        ParseNode::Path(s.to_string())
    }

    fn expr(node: ParseNode) -> ParseNode {
        ParseNode::Expression(Box::new(node))
    }

    #[test]
    fn test_parse_bare_path() {
        assert_eq!(parse("servers.web01.cpu"), path("servers.web01.cpu"));
    }

    #[test]
    fn test_parse_wildcard_path() {
        assert_eq!(parse("servers.web*.cpu[0-3]"), path("servers.web*.cpu[0-3]"));
        assert_eq!(parse("a.?.c"), path("a.?.c"));
    }

    #[test]
    fn test_parse_braces_kept_verbatim() {
        assert_eq!(parse("servers.{web,db}.cpu"), path("servers.{web,db}.cpu"));
        assert_eq!(parse("a.{b,c{d,e}}"), path("a.{b,c{d,e}}"));
    }

    #[test]
    fn test_parse_escaped_symbols() {
        assert_eq!(parse("a.weird\\{name"), path("a.weird\\{name"));
        assert_eq!(parse("a\\=b.c"), path("a\\=b.c"));
    }

    #[test]
    fn test_parse_simple_call() {
        assert_eq!(
            parse("sumSeries(a.b, c.d)"),
            ParseNode::Call {
                name: "sumSeries".to_string(),
                args: vec![expr(path("a.b")), expr(path("c.d"))],
                kwargs: vec![],
            }
        );
    }

    #[test]
    fn test_parse_empty_call() {
        assert_eq!(
            parse("randomWalk()"),
            ParseNode::Call {
                name: "randomWalk".to_string(),
                args: vec![],
                kwargs: vec![],
            }
        );
    }

    #[test]
    fn test_parse_nested_call() {
        let node = parse("scale(sumSeries(a.b), 2)");
        match node {
            ParseNode::Call { name, args, .. } => {
                assert_eq!(name, "scale");
                assert_eq!(args.len(), 2);
                assert!(matches!(
                    args[0].unwrap_expression(),
                    ParseNode::Call { name, .. } if name == "sumSeries"
                ));
                assert_eq!(args[1], ParseNode::Number(2.0));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_number_literals() {
        let node = parse("f(1, -2.5, 3e2, -1.5e-2)");
        match node {
            ParseNode::Call { args, .. } => {
                assert_eq!(args[0], ParseNode::Number(1.0));
                assert_eq!(args[1], ParseNode::Number(-2.5));
                assert_eq!(args[2], ParseNode::Number(300.0));
                assert_eq!(args[3], ParseNode::Number(-0.015));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_number_prefixed_segment_stays_a_path() {
        // A segment that merely starts with digits is a path, not a
        // number literal.
        let node = parse("f(1xx.count)");
        match node {
            ParseNode::Call { args, .. } => {
                assert_eq!(args[0], expr(path("1xx.count")));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_string_literals() {
        let node = parse("alias(a.b, \"nice name\")");
        match node {
            ParseNode::Call { args, .. } => {
                assert_eq!(args[1], ParseNode::Str("nice name".to_string()));
            }
            other => panic!("expected call, got {:?}", other),
        }
        let node = parse("alias(a.b, 'it\\'s')");
        match node {
            ParseNode::Call { args, .. } => {
                assert_eq!(args[1], ParseNode::Str("it's".to_string()));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_booleans() {
        let node = parse("f(true, FALSE)");
        match node {
            ParseNode::Call { args, .. } => {
                assert_eq!(args[0], ParseNode::Bool(true));
                assert_eq!(args[1], ParseNode::Bool(false));
            }
            other => panic!("expected call, got {:?}", other),
        }
        // "true" as a path prefix is still a path.
        let node = parse("f(truestuff.total)");
        match node {
            ParseNode::Call { args, .. } => {
                assert_eq!(args[0], expr(path("truestuff.total")));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_kwargs() {
        let node = parse("movingAverage(a.b, 10, windowTolerance=0.5)");
        match node {
            ParseNode::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(kwargs, vec![("windowTolerance".to_string(), ParseNode::Number(0.5))]);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_kwarg_value_may_be_expression() {
        let node = parse("f(a.b, total=sumSeries(c.*))");
        match node {
            ParseNode::Call { kwargs, .. } => {
                assert_eq!(kwargs.len(), 1);
                assert_eq!(kwargs[0].0, "total");
                assert!(matches!(
                    kwargs[0].1.unwrap_expression(),
                    ParseNode::Call { name, .. } if name == "sumSeries"
                ));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_kwargs_must_follow_args() {
        assert!(parse_target("f(n=1, a.b)").is_err());
    }

    #[test]
    fn test_parse_template_with_positional() {
        let node = parse("template(constantLine($1), 12)");
        match node {
            ParseNode::Template { inner, args, kwargs } => {
                assert!(matches!(*inner, ParseNode::Call { ref name, .. } if name == "constantLine"));
                assert_eq!(args, vec![ParseNode::Number(12.0)]);
                assert!(kwargs.is_empty());
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_template_with_kwargs_only() {
        let node = parse("template(servers.$env.cpu, env='prod')");
        match node {
            ParseNode::Template { inner, args, kwargs } => {
                assert_eq!(*inner, path("servers.$env.cpu"));
                assert!(args.is_empty());
                assert_eq!(kwargs, vec![("env".to_string(), ParseNode::Str("prod".to_string()))]);
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_template_with_nonliteral_args_degrades_to_call() {
        // Structural template recognition requires literal
        // substitution arguments; anything else is an ordinary call
        // named "template" (rejected later by the evaluator).
        let node = parse("template(constantLine($1), other.path)");
        assert!(matches!(node, ParseNode::Call { ref name, .. } if name == "template"));
    }

    #[test]
    fn test_path_named_template_is_a_path() {
        assert_eq!(parse("template.cache.hits"), path("template.cache.hits"));
    }

    #[test]
    fn test_parse_error_cases() {
        assert!(parse_target("").is_err());
        assert!(parse_target("f(").is_err());
        assert!(parse_target("f(a.b").is_err());
        assert!(parse_target("f(a.b,)").is_err());
        assert!(parse_target("a.b.").is_err());
        assert!(parse_target("a..b").is_err());
        assert!(parse_target("f(a.b) extra").is_err());
        assert!(parse_target("{a,b").is_err());
    }

    #[test]
    fn test_whitespace_tolerated_around_arguments() {
        let node = parse("f( a.b , 1 , n = 2 )");
        match node {
            ParseNode::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(kwargs.len(), 1);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }
}
