//! Command Parser
//!
//! Parses the textual command surface into [`Command`] values.
//!
//! # Supported Syntax
//!
//! ```text
//! create group `name` for <expression>
//! alter group `name` set name `new` | "new"
//! alter group `name` set expression <expression>
//! drop group `name`
//! count groups
//! count series [<set expression>]
//! list groups [name|series|expression, ...]
//! list series [<set expression>] [limit n]
//! ```
//!
//! Keywords are case-sensitive. Group expressions run to the end of the
//! command and are handed to the pattern compiler untouched.
//!
//! # Set Expressions
//!
//! ```text
//! `a`, `two` - "c2"
//! `a` & /.*2/ | "b1"
//! `a` symmetric_difference `two`
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till},
    character::complete::{alpha0, char, digit1, multispace0, multispace1},
    combinator::{cut, map, map_res, opt, rest, value, verify},
    error::{Error, ErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};

/// Parse a command string into a [`Command`]
pub fn parse_command(input: &str) -> QueryResult<Command> {
    let input = input.trim();
    finish(input, command(input))
}

/// Parse a standalone set expression
pub fn parse_set_expression(input: &str) -> QueryResult<SetExpr> {
    let input = input.trim();
    finish(input, set_expr(input))
}

fn finish<T>(input: &str, result: IResult<&str, T>) -> QueryResult<T> {
    match result {
        Ok((remaining, parsed)) => {
            if remaining.trim().is_empty() {
                Ok(parsed)
            } else {
                Err(QueryError::syntax(
                    input,
                    remaining,
                    format!("Unexpected input '{}'", remaining.trim()),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(QueryError::syntax(input, e.input, describe(e.input)))
        }
        Err(nom::Err::Incomplete(_)) => Err(QueryError::syntax(input, "", "Unexpected end of query")),
    }
}

fn describe(at: &str) -> String {
    if at.trim().is_empty() {
        return "Unexpected end of query".to_string();
    }
    let near: String = at.chars().take(24).collect();
    format!("Cannot parse query near '{}'", near)
}

fn command(input: &str) -> IResult<&str, Command> {
    alt((create_group, alter_group, drop_group, count, list))(input)
}

/// create group `name` for <expression>
fn create_group(input: &str) -> IResult<&str, Command> {
    let (input, _) = tuple((tag("create"), multispace1, tag("group"), multispace1))(input)?;
    cut(create_group_body)(input)
}

fn create_group_body(input: &str) -> IResult<&str, Command> {
    let (input, name) = quoted('`')(input)?;
    let (input, _) = tuple((multispace1, tag("for"), multispace1))(input)?;
    let (input, expression) = expression_text(input)?;
    Ok((input, Command::CreateGroup { name, expression }))
}

/// alter group `name` set name|expression ...
fn alter_group(input: &str) -> IResult<&str, Command> {
    let (input, _) = tuple((tag("alter"), multispace1, tag("group"), multispace1))(input)?;
    cut(alter_group_body)(input)
}

fn alter_group_body(input: &str) -> IResult<&str, Command> {
    let (input, name) = quoted('`')(input)?;
    let (input, _) = tuple((multispace1, tag("set"), multispace1))(input)?;

    if let Ok((input, new_name)) =
        preceded(pair(tag("name"), multispace1), alt((quoted('`'), quoted('"'))))(input)
    {
        return Ok((input, Command::RenameGroup { name, new_name }));
    }

    let (input, expression) =
        preceded(pair(tag("expression"), multispace1), expression_text)(input)?;
    Ok((input, Command::SetGroupExpression { name, expression }))
}

/// drop group `name`
fn drop_group(input: &str) -> IResult<&str, Command> {
    let (input, _) = tuple((tag("drop"), multispace1, tag("group"), multispace1))(input)?;
    cut(map(quoted('`'), |name| Command::DropGroup { name }))(input)
}

/// count groups | count series [<set expression>]
fn count(input: &str) -> IResult<&str, Command> {
    let (input, _) = pair(tag("count"), multispace1)(input)?;
    cut(alt((
        value(Command::CountGroups, tag("groups")),
        map(
            preceded(tag("series"), opt(preceded(multispace1, set_expr))),
            |filter| Command::CountSeries { filter },
        ),
    )))(input)
}

/// list groups [...] | list series [...]
fn list(input: &str) -> IResult<&str, Command> {
    let (input, _) = pair(tag("list"), multispace1)(input)?;
    cut(alt((list_groups, list_series)))(input)
}

fn list_groups(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag("groups")(input)?;
    let (input, columns) = opt(preceded(
        multispace1,
        separated_list1(delimited(multispace0, char(','), multispace0), group_column),
    ))(input)?;

    Ok((
        input,
        Command::ListGroups {
            columns: columns.unwrap_or_else(|| vec![GroupColumn::Name]),
        },
    ))
}

fn list_series(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag("series")(input)?;
    let (input, filter) = opt(preceded(multispace1, set_expr))(input)?;
    let (input, limit) = opt(preceded(multispace1, limit_clause))(input)?;
    Ok((input, Command::ListSeries { filter, limit }))
}

fn group_column(input: &str) -> IResult<&str, GroupColumn> {
    alt((
        value(GroupColumn::Name, tag("name")),
        value(GroupColumn::Series, tag("series")),
        value(GroupColumn::Expression, tag("expression")),
    ))(input)
}

fn limit_clause(input: &str) -> IResult<&str, usize> {
    preceded(
        pair(tag("limit"), multispace1),
        map_res(digit1, |digits: &str| digits.parse::<usize>()),
    )(input)
}

/// Everything up to the end of the command, trimmed and non-empty
fn expression_text(input: &str) -> IResult<&str, String> {
    map(verify(rest, |s: &str| !s.trim().is_empty()), |s: &str| {
        s.trim().to_string()
    })(input)
}

/// `operand (operator operand)*`
fn set_expr(input: &str) -> IResult<&str, SetExpr> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(
        delimited(multispace0, set_operator, multispace0),
        operand,
    ))(input)?;
    Ok((input, SetExpr { first, rest }))
}

fn set_operator(input: &str) -> IResult<&str, SetOperator> {
    alt((
        value(SetOperator::Union, alt((tag("|"), tag("union")))),
        value(SetOperator::Intersection, alt((tag("&"), tag("intersection")))),
        value(
            SetOperator::SymmetricDifference,
            alt((tag("^"), tag("symmetric_difference"))),
        ),
        value(SetOperator::Difference, alt((tag("-"), tag("difference")))),
        value(SetOperator::Merge, tag(",")),
    ))(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(quoted('`'), Operand::Group),
        map(quoted('"'), Operand::Series),
        regex_operand,
    ))(input)
}

/// Delimited token where a doubled delimiter stands for itself
fn quoted(delim: char) -> impl Fn(&str) -> IResult<&str, String> {
    move |input: &str| {
        let (mut input, _) = char(delim)(input)?;
        let mut out = String::new();
        loop {
            let (rest, chunk) = take_till(|c| c == delim)(input)?;
            out.push_str(chunk);
            let (rest, _) = char(delim)(rest)?;
            match char::<&str, Error<&str>>(delim)(rest) {
                Ok((rest, _)) => {
                    out.push(delim);
                    input = rest;
                }
                Err(_) => return Ok((rest, out)),
            }
        }
    }
}

/// `/body/flags`, returned raw for the pattern compiler
fn regex_operand(input: &str) -> IResult<&str, Operand> {
    let (body, _) = char('/')(input)?;

    let mut escaped = false;
    for (idx, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '/' => {
                let (rest, _) = alpha0(&body[idx + 1..])?;
                let raw = &input[..input.len() - rest.len()];
                return Ok((rest, Operand::Pattern(raw.to_string())));
            }
            _ => {}
        }
    }

    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}
