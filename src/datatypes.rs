//! Built-in XML Schema datatypes and constraining facets.

use std::cmp::Ordering;

use log::warn;
use regex::Regex;
use time::Month;

use crate::xml::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteSpace {
    Preserve,
    Replace,
    Collapse,
}

impl WhiteSpace {
    pub fn normalize(self, value: &str) -> String {
        match self {
            WhiteSpace::Preserve => value.to_string(),
            WhiteSpace::Replace => value
                .chars()
                .map(|c| if is_xml_space(c) { ' ' } else { c })
                .collect(),
            WhiteSpace::Collapse => value
                .split(is_xml_space)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    AnySimpleType,
    String,
    NormalizedString,
    Token,
    Language,
    Name,
    NcName,
    QName,
    NmToken,
    NmTokens,
    NcNames,
    Boolean,
    Decimal,
    Integer { min: Option<i128>, max: Option<i128> },
    Float,
    Duration,
    DateTime,
    Time,
    Date,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
    HexBinary,
    Base64Binary,
    AnyUri,
}

/// Built-in datatype by its local name, e.g. `integer` for `xs:integer`.
pub fn lookup(name: &str) -> Option<Builtin> {
    let integer = |min: Option<i128>, max: Option<i128>| Builtin::Integer { min, max };
    Some(match name {
        "anySimpleType" => Builtin::AnySimpleType,
        "string" => Builtin::String,
        "normalizedString" => Builtin::NormalizedString,
        "token" => Builtin::Token,
        "language" => Builtin::Language,
        "Name" => Builtin::Name,
        "NCName" | "ID" | "IDREF" | "ENTITY" => Builtin::NcName,
        "QName" | "NOTATION" => Builtin::QName,
        "NMTOKEN" => Builtin::NmToken,
        "NMTOKENS" => Builtin::NmTokens,
        "IDREFS" | "ENTITIES" => Builtin::NcNames,
        "boolean" => Builtin::Boolean,
        "decimal" => Builtin::Decimal,
        "integer" => integer(None, None),
        "nonPositiveInteger" => integer(None, Some(0)),
        "negativeInteger" => integer(None, Some(-1)),
        "long" => integer(Some(i64::MIN.into()), Some(i64::MAX.into())),
        "int" => integer(Some(i32::MIN.into()), Some(i32::MAX.into())),
        "short" => integer(Some(i16::MIN.into()), Some(i16::MAX.into())),
        "byte" => integer(Some(i8::MIN.into()), Some(i8::MAX.into())),
        "nonNegativeInteger" => integer(Some(0), None),
        "unsignedLong" => integer(Some(0), Some(u64::MAX.into())),
        "unsignedInt" => integer(Some(0), Some(u32::MAX.into())),
        "unsignedShort" => integer(Some(0), Some(u16::MAX.into())),
        "unsignedByte" => integer(Some(0), Some(u8::MAX.into())),
        "positiveInteger" => integer(Some(1), None),
        "float" | "double" => Builtin::Float,
        "duration" => Builtin::Duration,
        "dateTime" => Builtin::DateTime,
        "time" => Builtin::Time,
        "date" => Builtin::Date,
        "gYearMonth" => Builtin::GYearMonth,
        "gYear" => Builtin::GYear,
        "gMonthDay" => Builtin::GMonthDay,
        "gDay" => Builtin::GDay,
        "gMonth" => Builtin::GMonth,
        "hexBinary" => Builtin::HexBinary,
        "base64Binary" => Builtin::Base64Binary,
        "anyURI" => Builtin::AnyUri,
        _ => return None,
    })
}

impl Builtin {
    pub fn white_space(self) -> WhiteSpace {
        match self {
            Builtin::AnySimpleType | Builtin::String => WhiteSpace::Preserve,
            Builtin::NormalizedString => WhiteSpace::Replace,
            _ => WhiteSpace::Collapse,
        }
    }

    /// Whether an already whitespace-normalized value is in the lexical space.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Builtin::AnySimpleType | Builtin::String | Builtin::NormalizedString | Builtin::Token => true,
            Builtin::Language => is_language(value),
            Builtin::Name => is_name(value),
            Builtin::NcName => is_ncname(value),
            Builtin::QName => is_qname(value),
            Builtin::NmToken => is_nmtoken(value),
            Builtin::NmTokens => is_list_of(value, is_nmtoken),
            Builtin::NcNames => is_list_of(value, is_ncname),
            Builtin::Boolean => matches!(value, "true" | "false" | "1" | "0"),
            Builtin::Decimal => is_decimal(value),
            Builtin::Integer { min, max } => is_integer(value, min, max),
            Builtin::Float => is_float(value),
            Builtin::Duration => is_duration(value),
            Builtin::DateTime => without_timezone(value)
                .and_then(|v| v.split_once('T'))
                .is_some_and(|(date, time)| date_part(date).is_some() && time_part(time).is_some()),
            Builtin::Time => without_timezone(value).and_then(time_part).is_some(),
            Builtin::Date => without_timezone(value).and_then(date_part).is_some(),
            Builtin::GYearMonth => without_timezone(value)
                .and_then(|v| v.rsplit_once('-'))
                .is_some_and(|(year, month)| {
                    parse_year(year).is_some() && two_digits(month).is_some_and(|m| (1..=12).contains(&m))
                }),
            Builtin::GYear => without_timezone(value).and_then(parse_year).is_some(),
            Builtin::GMonthDay => without_timezone(value)
                .and_then(|v| v.strip_prefix("--"))
                .and_then(|v| v.split_once('-'))
                .and_then(|(month, day)| {
                    let day = two_digits(day)?;
                    (day >= 1 && day <= days_in(2000, two_digits(month)?)?).then_some(())
                })
                .is_some(),
            Builtin::GDay => without_timezone(value)
                .and_then(|v| v.strip_prefix("---"))
                .and_then(two_digits)
                .is_some_and(|day| (1..=31).contains(&day)),
            Builtin::GMonth => without_timezone(value)
                .and_then(|v| v.strip_prefix("--"))
                .and_then(two_digits)
                .is_some_and(|month| (1..=12).contains(&month)),
            Builtin::HexBinary => value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit()),
            Builtin::Base64Binary => base64_length(value).is_some(),
            Builtin::AnyUri => is_uri_reference(value),
        }
    }

    /// Length as measured by the length facets: octets for binary types,
    /// items for list types, characters otherwise.
    pub fn length(self, value: &str) -> usize {
        match self {
            Builtin::HexBinary => value.len() / 2,
            Builtin::Base64Binary => base64_length(value).unwrap_or(0),
            Builtin::NmTokens | Builtin::NcNames => list_items(value).count(),
            _ => value.chars().count(),
        }
    }

    /// Order used by the range facets. Temporal values are compared
    /// lexically, which holds for values written in the same form.
    pub fn compare(self, a: &str, b: &str) -> Option<Ordering> {
        match self {
            Builtin::Integer { .. } => match (a.parse::<i128>(), b.parse::<i128>()) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => numeric_compare(a, b),
            },
            Builtin::Decimal | Builtin::Float => numeric_compare(a, b),
            Builtin::DateTime
            | Builtin::Time
            | Builtin::Date
            | Builtin::GYearMonth
            | Builtin::GYear
            | Builtin::GMonthDay
            | Builtin::GDay
            | Builtin::GMonth => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn numeric_compare(a: &str, b: &str) -> Option<Ordering> {
    a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?)
}

fn list_items(value: &str) -> impl Iterator<Item = &str> {
    value.split(is_xml_space).filter(|item| !item.is_empty())
}

fn is_list_of(value: &str, item: fn(&str) -> bool) -> bool {
    let mut items = list_items(value).peekable();
    items.peek().is_some() && items.all(item)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || matches!(c, '-' | '.' | '\u{B7}')
}

fn is_name(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(is_name_start) && chars.all(is_name_char)
}

fn is_ncname(value: &str) -> bool {
    !value.contains(':') && is_name(value)
}

fn is_qname(value: &str) -> bool {
    match value.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(value),
    }
}

fn is_nmtoken(value: &str) -> bool {
    !value.is_empty() && value.chars().all(is_name_char)
}

fn is_language(value: &str) -> bool {
    let subtag = |part: &str, first: bool| {
        (1..=8).contains(&part.len())
            && part.bytes().all(|b| {
                if first {
                    b.is_ascii_alphabetic()
                } else {
                    b.is_ascii_alphanumeric()
                }
            })
    };
    let mut parts = value.split('-');
    parts.next().is_some_and(|p| subtag(p, true)) && parts.all(|p| subtag(p, false))
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_unsigned_decimal(value: &str) -> bool {
    let (int, frac) = value.split_once('.').unwrap_or((value, ""));
    (!int.is_empty() || !frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal(value: &str) -> bool {
    is_unsigned_decimal(value.strip_prefix(['+', '-']).unwrap_or(value))
}

fn is_integer(value: &str, min: Option<i128>, max: Option<i128>) -> bool {
    if !is_digits(value.strip_prefix(['+', '-']).unwrap_or(value)) {
        return false;
    }
    if min.is_none() && max.is_none() {
        return true;
    }
    match value.parse::<i128>() {
        Ok(n) => min.map_or(true, |min| n >= min) && max.map_or(true, |max| n <= max),
        Err(_) => false,
    }
}

fn is_float(value: &str) -> bool {
    if matches!(value, "INF" | "-INF" | "+INF" | "NaN") {
        return true;
    }
    match value.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => {
            is_decimal(mantissa) && is_digits(exponent.strip_prefix(['+', '-']).unwrap_or(exponent))
        }
        None => is_decimal(value),
    }
}

fn is_duration(value: &str) -> bool {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    let Some(rest) = unsigned.strip_prefix('P') else {
        return false;
    };
    let (date, time) = match rest.split_once('T') {
        Some((_, "")) => return false,
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };
    let mut fields = 0;
    if !duration_fields(date, &['Y', 'M', 'D'], &mut fields) {
        return false;
    }
    if let Some(time) = time {
        if !duration_fields(time, &['H', 'M', 'S'], &mut fields) {
            return false;
        }
    }
    fields > 0
}

fn duration_fields(mut rest: &str, designators: &[char], fields: &mut usize) -> bool {
    let mut allowed = designators;
    while !rest.is_empty() {
        let Some(end) = rest.find(|c: char| c.is_ascii_alphabetic()) else {
            return false;
        };
        let (number, tail) = rest.split_at(end);
        let designator = tail.as_bytes()[0] as char;
        let Some(pos) = allowed.iter().position(|d| *d == designator) else {
            return false;
        };
        let number_ok = if designator == 'S' {
            is_unsigned_decimal(number)
        } else {
            is_digits(number)
        };
        if !number_ok {
            return false;
        }
        allowed = &allowed[pos + 1..];
        rest = &tail[1..];
        *fields += 1;
    }
    true
}

/// The value with a well-formed timezone suffix removed; `None` when the
/// suffix is out of range.
fn without_timezone(value: &str) -> Option<&str> {
    if let Some(rest) = value.strip_suffix('Z') {
        return Some(rest);
    }
    let Some(split) = value.len().checked_sub(6).filter(|i| value.is_char_boundary(*i)) else {
        return Some(value);
    };
    let (rest, zone) = value.split_at(split);
    let bytes = zone.as_bytes();
    if !matches!(bytes[0], b'+' | b'-') || bytes[3] != b':' {
        return Some(value);
    }
    let hours = two_digits(&zone[1..3])?;
    let minutes = two_digits(&zone[4..6])?;
    (minutes < 60 && u32::from(hours) * 60 + u32::from(minutes) <= 14 * 60).then_some(rest)
}

fn two_digits(value: &str) -> Option<u8> {
    if value.len() == 2 && is_digits(value) {
        value.parse().ok()
    } else {
        None
    }
}

fn parse_year(value: &str) -> Option<i32> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.len() < 4 || !is_digits(digits) || (digits.len() > 4 && digits.starts_with('0')) {
        return None;
    }
    let year: i32 = digits.parse().ok()?;
    if year == 0 {
        return None;
    }
    Some(if value.starts_with('-') { -year } else { year })
}

fn days_in(year: i32, month: u8) -> Option<u8> {
    let month = Month::try_from(month).ok()?;
    // same leap-year pattern, inside the calendar range
    Some(time::util::days_in_year_month(2000 + year.rem_euclid(400), month))
}

fn date_part(value: &str) -> Option<()> {
    let mut parts = value.rsplitn(3, '-');
    let day = two_digits(parts.next()?)?;
    let month = two_digits(parts.next()?)?;
    let year = parse_year(parts.next()?)?;
    (day >= 1 && day <= days_in(year, month)?).then_some(())
}

fn time_part(value: &str) -> Option<()> {
    let (hms, fraction) = match value.split_once('.') {
        Some((hms, fraction)) => (hms, Some(fraction)),
        None => (value, None),
    };
    if fraction.is_some_and(|f| !is_digits(f)) {
        return None;
    }
    let mut parts = hms.split(':');
    let hours = two_digits(parts.next()?)?;
    let minutes = two_digits(parts.next()?)?;
    let seconds = two_digits(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    let midnight = hours == 24
        && minutes == 0
        && seconds == 0
        && fraction.map_or(true, |f| f.bytes().all(|b| b == b'0'));
    ((hours < 24 || midnight) && minutes < 60 && seconds < 60).then_some(())
}

/// Decoded octet count of a base64 value.
fn base64_length(value: &str) -> Option<usize> {
    let compact: Vec<u8> = value.bytes().filter(|b| *b != b' ').collect();
    if compact.len() % 4 != 0 {
        return None;
    }
    let padding = compact.iter().rev().take_while(|b| **b == b'=').count();
    let body = &compact[..compact.len() - padding.min(compact.len())];
    let valid = padding <= 2
        && body
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/');
    valid.then(|| compact.len() / 4 * 3 - padding)
}

fn is_uri_reference(value: &str) -> bool {
    !value.chars().any(char::is_control)
        && value.match_indices('%').all(|(i, _)| {
            value
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
        })
}

/// Total and fractional digit counts of a decimal literal.
fn digit_counts(value: &str) -> Option<(usize, usize)> {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let int = int.trim_start_matches('0');
    let frac = frac.trim_end_matches('0');
    Some((int.len() + frac.len(), frac.len()))
}

#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

/// Anchors an XML Schema regular expression and rewrites the constructs
/// that differ from the `regex` crate syntax.
fn translate_pattern(pattern: &str) -> String {
    let mut out = String::from("^(?:");
    let mut chars = pattern.chars().peekable();
    let mut class_depth = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('i') => out.push_str(r"[\p{L}_:]"),
                Some('I') => out.push_str(r"[^\p{L}_:]"),
                Some('c') => out.push_str(r"[\p{L}\p{N}._:\-]"),
                Some('C') => out.push_str(r"[^\p{L}\p{N}._:\-]"),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push_str(r"\\"),
            },
            '[' => {
                class_depth += 1;
                out.push(c);
            }
            ']' if class_depth > 0 => {
                class_depth -= 1;
                out.push(c);
            }
            '-' if class_depth > 0 && chars.peek() == Some(&'[') => out.push_str("--"),
            '^' | '$' if class_depth == 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push_str(")$");
    out
}

/// Constraining facets declared at one restriction step.
#[derive(Debug, Clone, Default)]
pub struct Facets {
    pub enumeration: Vec<String>,
    patterns: Vec<Pattern>,
    length: Option<usize>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_inclusive: Option<String>,
    max_inclusive: Option<String>,
    min_exclusive: Option<String>,
    max_exclusive: Option<String>,
    total_digits: Option<usize>,
    fraction_digits: Option<usize>,
    pub white_space: Option<WhiteSpace>,
}

fn read_count(facet: &str, value: &str) -> Option<usize> {
    match value.trim().parse() {
        Ok(count) => Some(count),
        Err(_) => {
            warn!("Facet '{}' has an invalid value '{}' and is ignored", facet, value);
            None
        }
    }
}

impl Facets {
    pub fn is_empty(&self) -> bool {
        self.enumeration.is_empty()
            && self.patterns.is_empty()
            && self.length.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.min_inclusive.is_none()
            && self.max_inclusive.is_none()
            && self.min_exclusive.is_none()
            && self.max_exclusive.is_none()
            && self.total_digits.is_none()
            && self.fraction_digits.is_none()
            && self.white_space.is_none()
    }

    /// Records `el` when it is a facet element. Returns false otherwise.
    pub fn read(&mut self, el: &Element) -> bool {
        let facet = el.local_name();
        let value = el.attribute("value").unwrap_or_default();
        match facet {
            "enumeration" => self.enumeration.push(value.to_string()),
            "pattern" => match Regex::new(&translate_pattern(value)) {
                Ok(regex) => self.patterns.push(Pattern {
                    source: value.to_string(),
                    regex,
                }),
                Err(e) => warn!("Pattern '{}' is not supported and will not be checked: {}", value, e),
            },
            "length" => self.length = read_count(facet, value),
            "minLength" => self.min_length = read_count(facet, value),
            "maxLength" => self.max_length = read_count(facet, value),
            "totalDigits" => self.total_digits = read_count(facet, value),
            "fractionDigits" => self.fraction_digits = read_count(facet, value),
            "minInclusive" => self.min_inclusive = Some(value.trim().to_string()),
            "maxInclusive" => self.max_inclusive = Some(value.trim().to_string()),
            "minExclusive" => self.min_exclusive = Some(value.trim().to_string()),
            "maxExclusive" => self.max_exclusive = Some(value.trim().to_string()),
            "whiteSpace" => {
                self.white_space = match value.trim() {
                    "preserve" => Some(WhiteSpace::Preserve),
                    "replace" => Some(WhiteSpace::Replace),
                    "collapse" => Some(WhiteSpace::Collapse),
                    other => {
                        warn!("Facet 'whiteSpace' has an invalid value '{}' and is ignored", other);
                        None
                    }
                }
            }
            _ => return false,
        }
        true
    }

    /// Every facet `value` breaks. `length` is the value's length in the
    /// units of its type; `builtin` orders the range facets.
    pub fn violations(&self, value: &str, builtin: Option<Builtin>, length: usize) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.enumeration.is_empty() && !self.enumeration.iter().any(|e| e == value) {
            let set = self
                .enumeration
                .iter()
                .map(|e| format!("'{}'", e))
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(format!(
                "[facet 'enumeration'] The value '{}' is not an element of the set {{{}}}.",
                value, set
            ));
        }

        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.regex.is_match(value)) {
            let sources = self
                .patterns
                .iter()
                .map(|p| p.source.as_str())
                .collect::<Vec<_>>()
                .join("|");
            errors.push(format!(
                "[facet 'pattern'] The value '{}' is not accepted by the pattern '{}'.",
                value, sources
            ));
        }

        if let Some(expected) = self.length.filter(|l| *l != length) {
            errors.push(format!(
                "[facet 'length'] The value '{}' has a length of '{}'; this differs from the allowed length of '{}'.",
                value, length, expected
            ));
        }
        if let Some(min) = self.min_length.filter(|m| length < *m) {
            errors.push(format!(
                "[facet 'minLength'] The value '{}' has a length of '{}'; this underruns the allowed minimum length of '{}'.",
                value, length, min
            ));
        }
        if let Some(max) = self.max_length.filter(|m| length > *m) {
            errors.push(format!(
                "[facet 'maxLength'] The value '{}' has a length of '{}'; this exceeds the allowed maximum length of '{}'.",
                value, length, max
            ));
        }

        let order = |bound: &str| match builtin {
            Some(builtin) => builtin.compare(value, bound),
            None => numeric_compare(value, bound),
        };
        if let Some(min) = &self.min_inclusive {
            if order(min) == Some(Ordering::Less) {
                errors.push(format!(
                    "[facet 'minInclusive'] The value '{}' is less than the minimum value allowed ('{}').",
                    value, min
                ));
            }
        }
        if let Some(max) = &self.max_inclusive {
            if order(max) == Some(Ordering::Greater) {
                errors.push(format!(
                    "[facet 'maxInclusive'] The value '{}' is greater than the maximum value allowed ('{}').",
                    value, max
                ));
            }
        }
        if let Some(min) = &self.min_exclusive {
            if matches!(order(min), Some(Ordering::Less | Ordering::Equal)) {
                errors.push(format!(
                    "[facet 'minExclusive'] The value '{}' must be greater than '{}'.",
                    value, min
                ));
            }
        }
        if let Some(max) = &self.max_exclusive {
            if matches!(order(max), Some(Ordering::Greater | Ordering::Equal)) {
                errors.push(format!(
                    "[facet 'maxExclusive'] The value '{}' must be less than '{}'.",
                    value, max
                ));
            }
        }

        if self.total_digits.is_some() || self.fraction_digits.is_some() {
            if let Some((total, fraction)) = digit_counts(value) {
                if let Some(max) = self.total_digits.filter(|m| total > *m) {
                    errors.push(format!(
                        "[facet 'totalDigits'] The value '{}' has more digits than are allowed ('{}').",
                        value, max
                    ));
                }
                if let Some(max) = self.fraction_digits.filter(|m| fraction > *m) {
                    errors.push(format!(
                        "[facet 'fractionDigits'] The value '{}' has more fractional digits than are allowed ('{}').",
                        value, max
                    ));
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepts(name: &str, value: &str) -> bool {
        let builtin = lookup(name).unwrap();
        builtin.accepts(&builtin.white_space().normalize(value))
    }

    #[test]
    fn numeric_types() {
        assert!(accepts("integer", " -42 "));
        assert!(!accepts("integer", "4.2"));
        assert!(!accepts("integer", "not-a-number"));
        assert!(accepts("positiveInteger", "1"));
        assert!(!accepts("positiveInteger", "0"));
        assert!(accepts("byte", "-128"));
        assert!(!accepts("byte", "128"));
        assert!(!accepts("unsignedInt", "-1"));
        assert!(accepts("decimal", "+.5"));
        assert!(accepts("decimal", "12."));
        assert!(!accepts("decimal", "."));
        assert!(accepts("double", "1.5E-3"));
        assert!(accepts("float", "INF"));
        assert!(!accepts("float", "1e"));
        assert!(accepts("boolean", "1"));
        assert!(!accepts("boolean", "yes"));
    }

    #[test]
    fn calendar_types() {
        assert!(accepts("date", "2020-02-29"));
        assert!(!accepts("date", "2019-02-29"));
        assert!(!accepts("date", "2019-13-01"));
        assert!(accepts("date", "2019-03-12Z"));
        assert!(accepts("date", "2019-03-12-03:00"));
        assert!(!accepts("date", "2019-03-12+15:00"));
        assert!(!accepts("date", "12/03/2019"));
        assert!(accepts("dateTime", "2019-03-12T10:30:00.5+01:00"));
        assert!(!accepts("dateTime", "2019-03-12T25:00:00"));
        assert!(accepts("time", "24:00:00"));
        assert!(accepts("gYear", "2019"));
        assert!(!accepts("gYear", "19"));
        assert!(!accepts("gYear", "0000"));
        assert!(accepts("gYearMonth", "2019-03"));
        assert!(accepts("gMonthDay", "--02-29"));
        assert!(accepts("gDay", "---31"));
        assert!(accepts("gMonth", "--12"));
        assert!(accepts("duration", "P1Y2M3DT4H5M6.5S"));
        assert!(accepts("duration", "-PT1M"));
        assert!(!accepts("duration", "P"));
        assert!(!accepts("duration", "P1D2Y"));
        assert!(!accepts("duration", "P1DT"));
    }

    #[test]
    fn name_and_text_types() {
        assert!(accepts("language", "pt-BR"));
        assert!(!accepts("language", "toolonglanguage"));
        assert!(accepts("NCName", "article-1"));
        assert!(!accepts("NCName", "xs:article"));
        assert!(!accepts("ID", "1abc"));
        assert!(accepts("QName", "xs:article"));
        assert!(accepts("NMTOKENS", " a  b "));
        assert!(!accepts("NMTOKENS", "  "));
        assert!(accepts("anyURI", "http://example.org/a%20b"));
        assert!(!accepts("anyURI", "http://example.org/%zz"));
        assert!(accepts("hexBinary", "0fA1"));
        assert!(!accepts("hexBinary", "0fA"));
        assert!(accepts("base64Binary", "aGVsbG8="));
        assert!(!accepts("base64Binary", "aGVsbG8"));
        assert!(accepts("string", "  anything \n"));
        assert!(lookup("nonsense").is_none());
    }

    #[test]
    fn whitespace_modes() {
        assert_eq!(WhiteSpace::Preserve.normalize(" a\tb "), " a\tb ");
        assert_eq!(WhiteSpace::Replace.normalize(" a\tb "), " a b ");
        assert_eq!(WhiteSpace::Collapse.normalize("\n a \t b \n"), "a b");
    }

    #[test]
    fn patterns_are_anchored() {
        let translated = translate_pattern(r"\d{4}-\d{3}[\dX]");
        let regex = Regex::new(&translated).unwrap();
        assert!(regex.is_match("0001-037X"));
        assert!(!regex.is_match("x0001-037X"));
        assert!(!regex.is_match("0001-037X1"));
        assert!(Regex::new(&translate_pattern("[a-z-[aeiou]]+")).unwrap().is_match("xyz"));
        assert!(!Regex::new(&translate_pattern("[a-z-[aeiou]]+")).unwrap().is_match("xaz"));
        assert!(Regex::new(&translate_pattern("^a$")).unwrap().is_match("^a$"));
        assert!(Regex::new(&translate_pattern(r"\i\c*")).unwrap().is_match("_a1"));
    }

    #[test]
    fn digit_facets_count_significant_digits() {
        assert_eq!(digit_counts("0012.3400"), Some((4, 2)));
        assert_eq!(digit_counts("-5"), Some((1, 0)));
        assert_eq!(digit_counts("1e3"), None);
    }
}
