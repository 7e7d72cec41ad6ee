//! Harness steps
//!
//! A step is one call on the device, written as `op[:arg[:arg]]`:
//!
//! | step | call |
//! |---|---|
//! | `read:N` | read N bytes |
//! | `write:TEXT` | write the bytes of TEXT |
//! | `seek:OFF[:set\|cur\|end]` | seek, whence defaults to `set` |
//! | `inc:D` | `PSEUDO_INC` with signed byte D |
//! | `ioctl:CODE:BYTE` | raw control call, CODE decimal or `0x` hex |

use std::str::FromStr;

use pseudodev::{Whence, PSEUDO_INC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Read(usize),
    Write(Vec<u8>),
    Seek { offset: i64, whence: Whence },
    Inc(i8),
    Ioctl { cmd: u32, arg: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("empty step")]
    Empty,

    #[error("unknown step {0:?}")]
    Unknown(String),

    #[error("step {0:?} is missing an argument")]
    MissingArg(String),

    #[error("step {step:?}: invalid {what} {value:?}")]
    Invalid {
        step: String,
        what: &'static str,
        value: String,
    },
}

fn invalid(step: &str, what: &'static str, value: &str) -> StepError {
    StepError::Invalid {
        step: step.to_string(),
        what,
        value: value.to_string(),
    }
}

/// Parse `set`/`cur`/`end` (or the raw `SEEK_*` numbers)
#[must_use]
pub fn parse_whence(s: &str) -> Option<Whence> {
    match s.to_ascii_lowercase().as_str() {
        "set" | "start" => Some(Whence::Start),
        "cur" | "current" => Some(Whence::Current),
        "end" => Some(Whence::End),
        raw => raw.parse::<i32>().ok().and_then(|n| Whence::try_from(n).ok()),
    }
}

/// Parse a control code: `PSEUDO_INC`, decimal, or `0x` hex
#[must_use]
pub fn parse_code(s: &str) -> Option<u32> {
    if s.eq_ignore_ascii_case("PSEUDO_INC") {
        return Some(PSEUDO_INC);
    }
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl FromStr for Step {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(StepError::Empty);
        }
        let (op, rest) = match s.split_once(':') {
            Some((op, rest)) => (op, Some(rest)),
            None => (s, None),
        };
        let arg = || rest.ok_or_else(|| StepError::MissingArg(s.to_string()));

        match op {
            "read" => {
                let raw = arg()?;
                let count = raw.parse().map_err(|_| invalid(s, "count", raw))?;
                Ok(Self::Read(count))
            }
            // Text may itself contain ':'
            "write" => Ok(Self::Write(arg()?.as_bytes().to_vec())),
            "seek" => {
                let raw = arg()?;
                let (offset, whence) = match raw.split_once(':') {
                    Some((offset, whence)) => (offset, Some(whence)),
                    None => (raw, None),
                };
                let offset = offset.parse().map_err(|_| invalid(s, "offset", offset))?;
                let whence = match whence {
                    Some(w) => parse_whence(w).ok_or_else(|| invalid(s, "whence", w))?,
                    None => Whence::Start,
                };
                Ok(Self::Seek { offset, whence })
            }
            "inc" => {
                let raw = arg()?;
                let delta = raw.parse().map_err(|_| invalid(s, "delta", raw))?;
                Ok(Self::Inc(delta))
            }
            "ioctl" => {
                let raw = arg()?;
                let (code, byte) = raw
                    .split_once(':')
                    .ok_or_else(|| StepError::MissingArg(s.to_string()))?;
                let cmd = parse_code(code).ok_or_else(|| invalid(s, "code", code))?;
                let byte: i16 = byte.parse().map_err(|_| invalid(s, "argument", byte))?;
                let arg = match u8::try_from(byte) {
                    Ok(b) => b,
                    Err(_) => i8::try_from(byte)
                        .map(|b| b.to_ne_bytes()[0])
                        .map_err(|_| invalid(s, "argument", &byte.to_string()))?,
                };
                Ok(Self::Ioctl {
                    cmd,
                    arg: vec![arg],
                })
            }
            other => Err(StepError::Unknown(other.to_string())),
        }
    }
}
