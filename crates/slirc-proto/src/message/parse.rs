//! Nom-based IRC message parser.
//!
//! Produces borrowed slices into the input; [`super::Message`] owns them.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::ErrorKind,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

use crate::error::MessageParseError;

fn parse_tags(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_until(" "))(input)
}

fn parse_prefix(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

/// `1*letter / 3digit`
fn parse_command(input: &str) -> IResult<&str, &str> {
    let (rest, cmd) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;

    let is_all_letters = cmd.chars().all(|c| c.is_ascii_alphabetic());
    let is_three_digits = cmd.len() == 3 && cmd.chars().all(|c| c.is_ascii_digit());

    if is_all_letters || is_three_digits {
        Ok((rest, cmd))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::AlphaNumeric,
        )))
    }
}

/// Parameters after the command. Runs of spaces separate; at most 15 are kept.
fn parse_params(input: &str) -> SmallVec<[&str; 15]> {
    let mut params: SmallVec<[&str; 15]> = SmallVec::new();
    let mut rest = input;

    while rest.starts_with(' ') {
        if params.len() >= 15 {
            break;
        }
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }

        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }

        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(&rest[..end]);
        rest = &rest[end..];
    }

    params
}

pub(super) struct ParsedMessage<'a> {
    pub tags: Option<&'a str>,
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: SmallVec<[&'a str; 15]>,
}

fn message(input: &str) -> IResult<&str, (Option<&str>, Option<&str>, &str)> {
    let (input, tags) = opt(parse_tags)(input)?;
    let (input, _) = space0(input)?;
    let (input, prefix) = opt(parse_prefix)(input)?;
    let (input, _) = space0(input)?;
    let (input, command) = parse_command(input)?;
    Ok((input, (tags, prefix, command)))
}

/// Parse one line (without CR/LF).
pub(super) fn parse_message(input: &str) -> Result<ParsedMessage<'_>, MessageParseError> {
    match message(input) {
        Ok((rest, (tags, prefix, command))) => Ok(ParsedMessage {
            tags,
            prefix,
            command,
            params: parse_params(rest),
        }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            if input.starts_with(':') && input[1..].starts_with([' ', '\0']) {
                return Err(MessageParseError::InvalidPrefix);
            }
            Err(MessageParseError::InvalidCommand {
                position: input.len() - e.input.len(),
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(MessageParseError::InvalidCommand {
            position: input.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_spaces_between_params() {
        let parsed = parse_message("MODE  #chan   +o  nick").unwrap();
        assert_eq!(parsed.command, "MODE");
        assert_eq!(parsed.params.as_slice(), ["#chan", "+o", "nick"]);
    }

    #[test]
    fn test_trailing_keeps_spaces_and_colons() {
        let parsed = parse_message("PRIVMSG #c :a :b  c").unwrap();
        assert_eq!(parsed.params.as_slice(), ["#c", "a :b  c"]);
    }

    #[test]
    fn test_fifteen_param_cap() {
        let line = format!("CMD{}", " x".repeat(20));
        assert_eq!(parse_message(&line).unwrap().params.len(), 15);
    }

    #[test]
    fn test_bad_command() {
        assert!(matches!(
            parse_message(":srv 12 foo"),
            Err(MessageParseError::InvalidCommand { .. })
        ));
        assert_eq!(parse_message(": PING").err(), Some(MessageParseError::InvalidPrefix));
    }
}
