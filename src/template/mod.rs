use chrono::{Datelike, Duration, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*\}\}").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Invalid argument '{argument}' for placeholder '{name}' - expected an integer")]
    InvalidArgument { name: String, argument: String },
    #[error("Argument '{argument}' for placeholder '{name}' is out of range")]
    ArgumentOutOfRange { name: String, argument: i64 },
}

/// Replaces `{{ energomera_prev_month (N) }}` and `{{ energomera_prev_day (N) }}`
/// placeholders with dates in the meter's format, relative to `reference`.
///
/// An absent or empty argument means N=1. Placeholders with names not known
/// here are left verbatim so newer configurations keep working against older
/// binaries.
pub fn evaluate(input: &str, reference: NaiveDate) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(input) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];

        let n = match name {
            "energomera_prev_month" | "energomera_prev_day" => parse_argument(name, &caps)?,
            // Unrecognized placeholder, keep it as-is
            _ => continue,
        };
        let expanded = match name {
            "energomera_prev_month" => prev_month(reference, n),
            _ => prev_day(reference, n),
        }
        // Date arithmetic left the representable range
        .ok_or_else(|| TemplateError::ArgumentOutOfRange {
            name: name.to_string(),
            argument: n,
        })?;

        out.push_str(&input[last..whole.start()]);
        out.push_str(&expanded);
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}

fn parse_argument(name: &str, caps: &regex::Captures) -> Result<i64, TemplateError> {
    let argument = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    if argument.is_empty() {
        return Ok(1);
    }

    argument.parse().map_err(|_| TemplateError::InvalidArgument {
        name: name.to_string(),
        argument: argument.to_string(),
    })
}

/// Reference date minus `n` whole months, formatted as `<month>.<year>`
/// (e.g. `03.24`) - the format the meter expects for monthly registers.
/// `None` when the month arithmetic overflows.
fn prev_month(reference: NaiveDate, n: i64) -> Option<String> {
    let months = (reference.year() as i64)
        .checked_mul(12)?
        .checked_add(reference.month0() as i64)?
        .checked_sub(n)?;
    let year = months.div_euclid(12);
    let month = months.rem_euclid(12) as u32 + 1;
    Some(format!("{:02}.{:02}", month, year.rem_euclid(100)))
}

/// Reference date minus `n` whole days, formatted as `<day>.<month>.<year>`.
/// `None` when the offset is not representable.
fn prev_day(reference: NaiveDate, n: i64) -> Option<String> {
    let date = reference.checked_sub_signed(Duration::try_days(n)?)?;
    Some(date.format("%d.%m.%y").to_string())
}
