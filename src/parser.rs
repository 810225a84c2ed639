//! Nom-based parser for jump codes
//!
//! Grammar:
//!
//! ```text
//! command    := "@" identifier [":" paramlist]
//! paramlist  := param ("," param)*
//! param      := key "=" value | key
//! identifier := (letter | "_") (letter | digit | "_")*
//! ```
//!
//! Values run up to the next comma and may contain spaces; surrounding
//! whitespace is trimmed. Every value is coerced with [`coerce_value`].
//! The parser never touches the registry.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{alpha1, alphanumeric1, char},
    combinator::{all_consuming, cut, opt, recognize},
    error::{context, ContextError, ParseError as NomParseError, VerboseError},
    multi::{many0, separated_list1},
    sequence::{pair, preceded},
    IResult,
};

use jump_types::{CommandInvocation, ParamValue, Params};

use crate::error::DispatchError;

/// Prefix every jump code starts with
pub const COMMAND_SIGIL: char = '@';

// ============================================================================
// Public API
// ============================================================================

/// Parse a jump code into a [`CommandInvocation`]
///
/// # Example
/// ```
/// use jumpcode::parser::parse_command;
///
/// let inv = parse_command("@create_agent:role=dev,goal=write code").unwrap();
/// assert_eq!(inv.name(), "create_agent");
/// assert_eq!(inv.params().get_str("goal"), Some("write code"));
/// ```
pub fn parse_command(input: &str) -> Result<CommandInvocation, DispatchError> {
    let trimmed = input.trim();
    if !trimmed.starts_with(COMMAND_SIGIL) {
        return Err(DispatchError::parse(format!(
            "Jump code must start with '{}': {:?}",
            COMMAND_SIGIL, trimmed
        )));
    }

    let (name, raw_params) = match all_consuming(jump_code::<VerboseError<&str>>)(trimmed) {
        Ok((_, parsed)) => parsed,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(DispatchError::parse(nom::error::convert_error(trimmed, e)));
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(DispatchError::parse("Incomplete input"));
        }
    };

    let mut params = Params::new();
    for token in raw_params {
        let (key, value) = split_param(token)?;
        params.insert(key, value);
    }

    Ok(CommandInvocation::new(name, params, trimmed))
}

/// Whether `name` is a valid command, alias or macro identifier
pub fn is_identifier(name: &str) -> bool {
    matches!(
        all_consuming(identifier::<nom::error::Error<&str>>)(name),
        Ok(_)
    )
}

/// Deterministic scalar coercion; first match wins:
///
/// 1. `true` / `false`, any case -> bool
/// 2. all ASCII digits -> integer (too large for i64 -> float)
/// 3. digits with exactly one `.` -> float
/// 4. anything else -> string
pub fn coerce_value(raw: &str) -> ParamValue {
    if raw.eq_ignore_ascii_case("true") {
        return ParamValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return ParamValue::Bool(false);
    }

    if all_digits(raw) {
        return match raw.parse::<i64>() {
            Ok(i) => ParamValue::Int(i),
            Err(_) => raw
                .parse::<f64>()
                .map(ParamValue::Float)
                .unwrap_or_else(|_| ParamValue::Str(raw.to_string())),
        };
    }

    if let Some((whole, frac)) = raw.split_once('.') {
        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !(whole.is_empty() && frac.is_empty()) && digits_only(whole) && digits_only(frac) {
            if let Ok(f) = raw.parse::<f64>() {
                return ParamValue::Float(f);
            }
        }
    }

    ParamValue::Str(raw.to_string())
}

// ============================================================================
// Internal Parsers
// ============================================================================

fn jump_code<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, (&'a str, Vec<&'a str>), E> {
    let (input, _) = char(COMMAND_SIGIL)(input)?;
    let (input, name) = context("command name", cut(identifier))(input)?;
    let (input, params) = opt(preceded(
        char(':'),
        context("parameter list", cut(separated_list1(char(','), param_token))),
    ))(input)?;
    Ok((input, (name, params.unwrap_or_default())))
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn param_token<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    is_not(",")(input)
}

fn split_param(token: &str) -> Result<(String, ParamValue), DispatchError> {
    match token.split_once('=') {
        Some((key, value)) => {
            let key = key.trim();
            if key.is_empty() {
                return Err(DispatchError::parse(format!(
                    "Parameter is missing a key: {:?}",
                    token
                )));
            }
            Ok((key.to_string(), coerce_value(value.trim())))
        }
        None => {
            let flag = token.trim();
            if flag.is_empty() {
                return Err(DispatchError::parse("Empty parameter"));
            }
            Ok((flag.to_string(), ParamValue::Bool(true)))
        }
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jump_types::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bare_command() {
        let inv = parse_command("@status").unwrap();
        assert_eq!(inv.name(), "status");
        assert!(inv.params().is_empty());
        assert_eq!(inv.raw(), "@status");
    }

    #[test]
    fn test_string_params_keep_spaces() {
        let inv = parse_command("@create_agent:role=dev,goal=write code").unwrap();
        assert_eq!(inv.params().get_str("role"), Some("dev"));
        assert_eq!(inv.params().get_str("goal"), Some("write code"));
    }

    #[test]
    fn test_type_coercion() {
        let inv = parse_command("@x:flag=true,count=3,ratio=1.5,name=foo").unwrap();
        let p = inv.params();
        assert_eq!(p.get("flag"), Some(&ParamValue::Bool(true)));
        assert_eq!(p.get("count"), Some(&ParamValue::Int(3)));
        assert_eq!(p.get("ratio"), Some(&ParamValue::Float(1.5)));
        assert_eq!(p.get("name"), Some(&ParamValue::Str("foo".into())));
    }

    #[test]
    fn test_bare_token_is_true_flag() {
        let inv = parse_command("@deploy:force,env=prod").unwrap();
        assert_eq!(inv.params().get_bool("force"), Some(true));
        assert_eq!(inv.params().get_str("env"), Some("prod"));
    }

    #[test]
    fn test_whitespace_around_tokens_is_trimmed() {
        let inv = parse_command("  @x: a = 1 , b = FALSE  ").unwrap();
        assert_eq!(inv.params().get_i64("a"), Some(1));
        assert_eq!(inv.params().get_bool("b"), Some(false));
        assert_eq!(inv.raw(), "@x: a = 1 , b = FALSE");
    }

    #[test]
    fn test_coercion_edge_cases() {
        assert_eq!(coerce_value("TRUE"), ParamValue::Bool(true));
        assert_eq!(coerce_value("007"), ParamValue::Int(7));
        assert_eq!(coerce_value(".5"), ParamValue::Float(0.5));
        assert_eq!(coerce_value("5."), ParamValue::Float(5.0));
        assert_eq!(coerce_value("1.2.3"), ParamValue::Str("1.2.3".into()));
        assert_eq!(coerce_value("-3"), ParamValue::Str("-3".into()));
        assert_eq!(coerce_value("."), ParamValue::Str(".".into()));
        assert_eq!(coerce_value(""), ParamValue::Str(String::new()));
        assert_eq!(
            coerce_value("99999999999999999999"),
            ParamValue::Float(99999999999999999999.0)
        );
    }

    #[test]
    fn test_value_may_contain_equals() {
        let inv = parse_command("@q:expr=a=b").unwrap();
        assert_eq!(inv.params().get_str("expr"), Some("a=b"));
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let inv = parse_command("@x:n=1,n=2").unwrap();
        assert_eq!(inv.params().get_i64("n"), Some(2));
    }

    #[test]
    fn test_params_keep_written_order() {
        let inv = parse_command("@x:zeta=1,alpha=2,mid=3").unwrap();
        assert_eq!(inv.params().keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(
            serde_json::to_string(&inv.params().to_json()).unwrap(),
            r#"{"zeta":1,"alpha":2,"mid":3}"#
        );
    }

    #[test]
    fn test_missing_sigil_is_parse_error() {
        let err = parse_command("status").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_malformed_inputs() {
        for input in ["@", "@1abc", "@x:", "@x:a,,b", "@x:=v", "@bad-name", "@x y", ""] {
            let result = parse_command(input);
            assert!(result.is_err(), "expected parse error for {:?}", input);
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Parse);
        }
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("deploy_v2"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("has space"));
        assert!(!is_identifier(""));
    }
}
