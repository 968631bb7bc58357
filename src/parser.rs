use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, verify},
    multi::separated_list0,
    number::complete::float,
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::server::DEFAULT_TOP_K;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Upsert { id: Option<String>, vector: Option<Vec<f32>>, text: Option<String> },
    Get { id: String },
    Delete { id: String },
    Search { vector: Vec<f32>, limit: usize },
    Stats,
    Flush,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_vector(input: &str) -> IResult<&str, Vec<f32>> {
    delimited(
        tuple((char('['), multispace0)),
        separated_list0(tuple((multispace0, char(','), multispace0)), float),
        tuple((multispace0, char(']'))),
    )(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_single_quoted(input: &str) -> IResult<&str, String> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = take_until("'")(input)?;
    let (input, _) = char('\'')(input)?;
    Ok((input, content.to_string()))
}

/// `'any id'` or a bare token that cannot be mistaken for a vector, text or
/// the `NONE` keyword.
fn parse_id(input: &str) -> IResult<&str, String> {
    alt((
        parse_single_quoted,
        map(
            verify(
                take_while1(|c: char| !c.is_whitespace() && c != '[' && c != '"' && c != '\''),
                |token: &str| !token.eq_ignore_ascii_case("NONE"),
            ),
            str::to_string,
        ),
    ))(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_upsert(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("UPSERT"), tag_ci("INSERT")))(input)?;
    let (input, id) = opt(preceded(multispace1, parse_id))(input)?;

    let (input, vector) = opt(preceded(multispace0, alt((
        map(parse_vector, Some),
        map(tag_ci("NONE"), |_| None),
    ))))(input)?;

    let (input, text) = opt(preceded(multispace0, parse_quoted_string))(input)?;
    Ok((input, Command::Upsert { id, vector: vector.flatten(), text }))
}

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, vector) = preceded(multispace1, parse_vector)(input)?;
    let (input, limit) = opt(preceded(
        ws(tag_ci("LIMIT")),
                                      map_res(digit1, |s: &str| s.parse::<usize>())
    ))(input)?;
    Ok((input, Command::Search { vector, limit: limit.unwrap_or(DEFAULT_TOP_K) }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, id) = preceded(multispace1, parse_id)(input)?;
    Ok((input, Command::Get { id }))
}

fn parse_delete(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("DELETE")(input)?;
    let (input, id) = preceded(multispace1, parse_id)(input)?;
    Ok((input, Command::Delete { id }))
}

fn parse_keyword(input: &str) -> IResult<&str, Command> {
    alt((
        map(tag_ci("STATS"), |_| Command::Stats),
        map(tag_ci("FLUSH"), |_| Command::Flush),
        map(tag_ci("HELP"), |_| Command::Help),
        map(alt((tag_ci("EXIT"), tag_ci("QUIT"))), |_| Command::Exit),
    ))(input)
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_upsert,
        parse_search,
        parse_get,
        parse_delete,
        parse_keyword,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            // e.input contains the slice where parsing failed
            let context: String = e.input.chars().take(20).collect();
            let ellipsis = if e.input.chars().count() > 20 { "..." } else { "" };
            Err(format!("Invalid syntax near: '{}{}'", context, ellipsis))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
