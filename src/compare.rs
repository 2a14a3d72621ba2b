//! Line ordering policies.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{self, Display};

/// Line format error. Raised when a line does not have the shape an ordering policy expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFormatError {
    /// Line has no `.` separating the number from the text.
    MissingNumber(String),
    /// Number prefix is not an integer.
    InvalidNumber(String),
    /// Nothing follows the `.` separator.
    MissingText(String),
}

impl Error for LineFormatError {}

impl Display for LineFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineFormatError::MissingNumber(line) => write!(f, "line {:?} has no number prefix", line),
            LineFormatError::InvalidNumber(line) => write!(f, "line {:?} number prefix is not an integer", line),
            LineFormatError::MissingText(line) => write!(f, "line {:?} has no text after the number", line),
        }
    }
}

/// Total ordering over line values. Lines are passed without their trailing delimiter.
pub trait LineComparator: Send + Sync {
    /// Compares two lines.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Checks that a line can be ordered by this comparator.
    /// Every line is validated once before it takes part in any comparison.
    fn validate(&self, _line: &[u8]) -> Result<(), LineFormatError> {
        Ok(())
    }
}

impl<F> LineComparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Orders lines shaped as `<number>. <text>`.
///
/// Lines are ordered by `<text>` first (plain byte order, which for UTF-8 is code point order),
/// then by `<number>` ascending, then by the raw line bytes so that distinct lines never compare
/// equal. The number is everything before the first `.`, the text starts two bytes after it.
///
/// Well-formed input is a precondition: [`LineComparator::validate`] rejects lines lacking the
/// `<number>.` prefix. If unvalidated lines are compared anyway, malformed lines are ordered after
/// well-formed ones and bytewise among themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumberedLineComparator;

impl NumberedLineComparator {
    fn parse(line: &[u8]) -> Result<(i64, &[u8]), LineFormatError> {
        let dot = match line.iter().position(|&b| b == b'.') {
            Some(dot) => dot,
            None => return Err(LineFormatError::MissingNumber(lossy(line))),
        };

        let number = std::str::from_utf8(&line[..dot])
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c.is_ascii_whitespace()).parse::<i64>().ok())
            .ok_or_else(|| LineFormatError::InvalidNumber(lossy(line)))?;

        let text = line
            .get(dot + 2..)
            .ok_or_else(|| LineFormatError::MissingText(lossy(line)))?;

        return Ok((number, text));
    }
}

impl LineComparator for NumberedLineComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (Self::parse(a), Self::parse(b)) {
            (Ok((num_a, text_a)), Ok((num_b, text_b))) => text_a
                .cmp(text_b)
                .then(num_a.cmp(&num_b))
                // differently spelled equal numbers, e.g. "1" and "01"
                .then_with(|| a.cmp(b)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    }

    fn validate(&self, line: &[u8]) -> Result<(), LineFormatError> {
        Self::parse(line).map(|_| ())
    }
}

/// Orders lines by their raw bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl LineComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Reverses the order of the wrapped comparator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reversed<C>(pub C);

impl<C: LineComparator> LineComparator for Reversed<C> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.0.compare(a, b).reverse()
    }

    fn validate(&self, line: &[u8]) -> Result<(), LineFormatError> {
        self.0.validate(line)
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}
