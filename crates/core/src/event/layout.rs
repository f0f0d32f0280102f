//! 참조 시각 기반 시간 레이아웃
//!
//! 레이아웃은 참조 시각 `Mon Jan 2 15:04:05 MST 2006`을 원하는 형태로 적은
//! 문자열입니다 (예: `2006-01-02T15:04:05Z07:00`). 이를 chrono 포맷 항목으로
//! 변환해 포맷과 파싱 양쪽에 사용합니다.

use chrono::format::{Fixed, Item, Numeric, Pad, Parsed};
use chrono::{DateTime, Datelike, Offset, TimeDelta, TimeZone, Utc};

/// 컴파일된 시간 레이아웃
#[derive(Debug, Clone)]
pub struct Layout {
    source: String,
    items: Vec<Item<'static>>,
}

/// 레이아웃 토큰 표. 앞쪽 항목이 우선합니다.
const TOKENS: &[(&str, Token)] = &[
    ("January", Token::Fixed(Fixed::LongMonthName)),
    ("Jan", Token::Fixed(Fixed::ShortMonthName)),
    ("Monday", Token::Fixed(Fixed::LongWeekdayName)),
    ("Mon", Token::Fixed(Fixed::ShortWeekdayName)),
    ("MST", Token::Fixed(Fixed::TimezoneName)),
    ("002", Token::Numeric(Numeric::Ordinal, Pad::Zero)),
    ("01", Token::Numeric(Numeric::Month, Pad::Zero)),
    ("02", Token::Numeric(Numeric::Day, Pad::Zero)),
    ("03", Token::Numeric(Numeric::Hour12, Pad::Zero)),
    ("04", Token::Numeric(Numeric::Minute, Pad::Zero)),
    ("05", Token::Numeric(Numeric::Second, Pad::Zero)),
    ("06", Token::Numeric(Numeric::YearMod100, Pad::Zero)),
    ("2006", Token::Numeric(Numeric::Year, Pad::Zero)),
    ("15", Token::Numeric(Numeric::Hour, Pad::Zero)),
    ("1", Token::Numeric(Numeric::Month, Pad::None)),
    ("2", Token::Numeric(Numeric::Day, Pad::None)),
    ("__2", Token::Numeric(Numeric::Ordinal, Pad::Space)),
    ("_2", Token::Numeric(Numeric::Day, Pad::Space)),
    ("3", Token::Numeric(Numeric::Hour12, Pad::None)),
    ("4", Token::Numeric(Numeric::Minute, Pad::None)),
    ("5", Token::Numeric(Numeric::Second, Pad::None)),
    ("PM", Token::Fixed(Fixed::UpperAmPm)),
    ("pm", Token::Fixed(Fixed::LowerAmPm)),
    ("-07:00:00", Token::Fixed(Fixed::TimezoneOffsetColon)),
    ("-070000", Token::Fixed(Fixed::TimezoneOffset)),
    ("-07:00", Token::Fixed(Fixed::TimezoneOffsetColon)),
    ("-0700", Token::Fixed(Fixed::TimezoneOffset)),
    ("-07", Token::Fixed(Fixed::TimezoneOffset)),
    ("Z07:00:00", Token::Fixed(Fixed::TimezoneOffsetColonZ)),
    ("Z070000", Token::Fixed(Fixed::TimezoneOffsetZ)),
    ("Z07:00", Token::Fixed(Fixed::TimezoneOffsetColonZ)),
    ("Z0700", Token::Fixed(Fixed::TimezoneOffsetZ)),
    ("Z07", Token::Fixed(Fixed::TimezoneOffsetZ)),
];

#[derive(Debug, Clone)]
enum Token {
    Fixed(Fixed),
    Numeric(Numeric, Pad),
}

impl Token {
    fn item(self) -> Item<'static> {
        match self {
            Self::Fixed(fixed) => Item::Fixed(fixed),
            Self::Numeric(numeric, pad) => Item::Numeric(numeric, pad),
        }
    }
}

impl Layout {
    /// 레이아웃 문자열을 변환합니다. 토큰이 아닌 문자는 모두 리터럴이 됩니다.
    pub fn new(layout: &str) -> Self {
        let mut items = Vec::new();
        let mut literal = String::new();
        let mut rest = layout;

        while let Some(ch) = rest.chars().next() {
            if let Some((consumed, item)) = next_token(rest) {
                flush_literal(&mut literal, &mut items);
                items.push(item);
                rest = &rest[consumed..];
                continue;
            }
            literal.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        flush_literal(&mut literal, &mut items);

        Self {
            source: layout.to_owned(),
            items,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 시각을 레이아웃대로 포맷합니다.
    pub fn format<Tz: TimeZone>(&self, ts: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        ts.format_with_items(self.items.iter()).to_string()
    }

    /// 문자열을 레이아웃대로 파싱합니다.
    ///
    /// 레이아웃에 연도가 없으면 `now`의 연도를, 날짜가 없으면 1월 1일을,
    /// 시간이 없으면 자정을 사용합니다. 오프셋이 없으면 UTC로 간주합니다.
    pub fn parse(&self, value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, chrono::ParseError> {
        let mut parsed = Parsed::new();
        chrono::format::parse(&mut parsed, value, self.items.iter())?;

        if parsed.to_naive_date().is_err() {
            let _ = parsed.set_year(i64::from(now.year()));
        }
        if parsed.to_naive_date().is_err() {
            let _ = parsed.set_month(1);
            let _ = parsed.set_day(1);
        }
        if parsed.to_naive_time().is_err() {
            let _ = parsed.set_ampm(false);
        }
        if parsed.to_naive_time().is_err() {
            let _ = parsed.set_hour(0);
            let _ = parsed.set_minute(0);
        }

        let date = parsed.to_naive_date()?;
        let time = parsed.to_naive_time()?;
        let offset = parsed.to_fixed_offset().unwrap_or_else(|_| Utc.fix());
        let local = date.and_time(time);
        let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
        Ok(Utc.from_utc_datetime(&utc))
    }
}

fn next_token(rest: &str) -> Option<(usize, Item<'static>)> {
    if let Some(fraction) = fraction_token(rest) {
        return Some(fraction);
    }
    TOKENS
        .iter()
        .find(|(token, _)| rest.starts_with(token))
        .map(|(token, kind)| (token.len(), kind.clone().item()))
}

/// `.000`, `.000000`, `.000000000`, `.999...` 형태의 소수 초
fn fraction_token(rest: &str) -> Option<(usize, Item<'static>)> {
    let digits = rest.strip_prefix('.')?;
    let fill = digits.chars().next().filter(|c| *c == '0' || *c == '9')?;
    let count = digits.chars().take_while(|c| *c == fill).count();
    if digits[count..].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let fixed = match (fill, count) {
        ('0', 3) => Fixed::Nanosecond3,
        ('0', 6) => Fixed::Nanosecond6,
        ('0', 9) => Fixed::Nanosecond9,
        _ => Fixed::Nanosecond,
    };
    Some((count + 1, Item::Fixed(fixed)))
}

fn flush_literal(literal: &mut String, items: &mut Vec<Item<'static>>) {
    if literal.is_empty() {
        return;
    }
    let text = std::mem::take(literal);
    if text.chars().all(char::is_whitespace) {
        items.push(Item::OwnedSpace(text.into_boxed_str()));
    } else {
        items.push(Item::OwnedLiteral(text.into_boxed_str()));
    }
}
