//! 필드 경로 파싱
//!
//! 경로는 식별자 하나에 대괄호 하위 키가 이어지는 형태입니다:
//! `user_agent[os][family]`, `[@metadata][beat]`.
//!
//! 역슬래시는 다음 문자를 그대로 키에 넣습니다. `headers[x\[1\]]`의 두 번째
//! 세그먼트는 `x[1]`입니다. 이스케이프가 없는 세그먼트는 원본을 빌려 씁니다.

use std::borrow::Cow;

use crate::error::EventError;

/// 경로를 세그먼트로 분리합니다.
///
/// 첫 세그먼트는 대괄호 없이 또는 대괄호로 감싸 쓸 수 있고, 이후 세그먼트는
/// 모두 `[key]` 형태로 빈틈없이 이어져야 합니다.
pub fn split_path(path: &str) -> Result<Vec<Cow<'_, str>>, EventError> {
    let invalid = || EventError::InvalidPath {
        path: path.to_owned(),
    };

    let mut segments = Vec::new();
    let mut rest = path;

    if !rest.starts_with('[') {
        let (head, after) = scan_segment(rest, false).ok_or_else(invalid)?;
        if head.is_empty() {
            return Err(invalid());
        }
        segments.push(head);
        rest = after;
    }

    while !rest.is_empty() {
        let inner = rest.strip_prefix('[').ok_or_else(invalid)?;
        let (key, after) = scan_segment(inner, true).ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }
        segments.push(key);
        rest = after;
    }

    Ok(segments)
}

/// 세그먼트 하나를 읽고 나머지 입력을 돌려줍니다.
///
/// `bracketed`이면 닫는 `]`까지 읽고 그것을 소비합니다. 아니면 다음 `[` 앞에서
/// 멈춥니다. 이스케이프되지 않은 대괄호가 엉뚱한 곳에 있으면 `None`.
fn scan_segment(input: &str, bracketed: bool) -> Option<(Cow<'_, str>, &str)> {
    let mut unescaped: Option<String> = None;
    let mut chars = input.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                unescaped
                    .get_or_insert_with(|| input[..index].to_owned())
                    .push(escaped);
                continue;
            }
            ']' if bracketed => {
                return Some((finish(input, index, unescaped), &input[index + 1..]));
            }
            '[' if !bracketed => return Some((finish(input, index, unescaped), &input[index..])),
            '[' | ']' => return None,
            _ => {}
        }
        if let Some(buffer) = unescaped.as_mut() {
            buffer.push(c);
        }
    }
    if bracketed {
        return None;
    }
    Some((finish(input, input.len(), unescaped), ""))
}

fn finish(input: &str, end: usize, unescaped: Option<String>) -> Cow<'_, str> {
    unescaped.map_or(Cow::Borrowed(&input[..end]), Cow::Owned)
}
