use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_till, take_while};
use nom::character::complete::{char, digit0, digit1, one_of};
use nom::combinator::{map_res, opt, recognize};
use nom::sequence::{pair, preceded, terminated, tuple};
use nom::IResult;

use crate::master::{InvalidNumberSnafu, MalformedFrameSnafu, NumberParsing, ResponseError};
use snafu::{ensure, OptionExt};

type Char = u8;
type Buf = [u8];

/// Extract the measurement from a completed response frame.
///
/// Everything up to the first colon is ignored. The value is the longest
/// floating-point prefix after it, leading whitespace skipped. With
/// [`NumberParsing::Lenient`] a missing number reads as 0.0, like C `atof`.
pub(crate) fn parse_frame(frame: &Buf, parsing: NumberParsing) -> Result<f32, ResponseError> {
    let (payload, _prefix) = separator(frame)
        .ok()
        .context(MalformedFrameSnafu)?;

    match preceded(c_space0, number)(payload) {
        Ok((rest, value)) => {
            if parsing == NumberParsing::Strict {
                ensure!(rest.iter().all(|&c| is_c_space(c)), InvalidNumberSnafu);
            }
            Ok(value)
        }
        Err(_) => {
            ensure!(parsing == NumberParsing::Lenient, InvalidNumberSnafu);
            Ok(0.0)
        }
    }
}

fn separator(buf: &Buf) -> IResult<&Buf, &Buf> {
    terminated(take_till(|c: Char| c == b':'), char(':'))(buf)
}

// Same set as C isspace()
fn is_c_space(c: Char) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

fn c_space0(buf: &Buf) -> IResult<&Buf, &Buf> {
    take_while(is_c_space)(buf)
}

fn number(buf: &Buf) -> IResult<&Buf, f32> {
    map_res(alt((decimal, special)), |s: &Buf| {
        core::str::from_utf8(s)
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .ok_or(())
    })(buf)
}

fn decimal(buf: &Buf) -> IResult<&Buf, &Buf> {
    recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        // an incomplete exponent isn't part of the number
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(buf)
}

fn special(buf: &Buf) -> IResult<&Buf, &Buf> {
    recognize(pair(
        opt(one_of("+-")),
        alt((
            tag_no_case("infinity"),
            tag_no_case("inf"),
            tag_no_case("nan"),
        )),
    ))(buf)
}
