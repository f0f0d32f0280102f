//! grok 패턴 엔진
//!
//! 이름 붙은 정규식 조각을 `%{NAME:capture:type}` 참조로 조합합니다.
//! 아직 등록되지 않은 패턴을 참조하는 정의는 실패하지 않고 보류되며,
//! 빠진 패턴이 나중에 등록되면 작업 큐를 통해 이어서 컴파일됩니다.
//! 따라서 패턴 파일은 어떤 순서로 읽어도 됩니다.
//!
//! 정규식은 선형 시간 엔진(`regex` 크레이트)으로 컴파일되므로 후방/전방
//! 탐색과 소유 한정자는 지원하지 않습니다.

mod defaults;
pub mod pattern;

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub use defaults::DEFAULT_PATTERNS;
pub use pattern::{ApplyError, Pattern, TypeHint};

/// grok 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum GrokError {
    /// 알 수 없는 타입 힌트
    #[error("invalid type hint '{hint}', expected one of string, int, float")]
    InvalidTypeHint { hint: String },

    /// 조합된 정규식 컴파일 실패
    #[error("failed to compile pattern '{pattern}': {reason}")]
    Regex { pattern: String, reason: String },

    /// 패턴 파일의 형식이 잘못된 줄
    #[error("{origin}: Invalid pattern definition: {line}")]
    InvalidDefinition { origin: String, line: String },

    /// 패턴 파일의 정의 등록 실패
    #[error("{origin}: Invalid pattern definition ({source}): {line}")]
    Definition {
        origin: String,
        line: String,
        #[source]
        source: Box<GrokError>,
    },

    /// 참조한 패턴이 등록되지 않음
    #[error("pattern '{pattern}' references unknown pattern '{missing}'")]
    MissingPattern { pattern: String, missing: String },

    /// 패턴 파일 읽기 실패
    #[error("failed to read pattern file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 컴파일이 끝난 이름 있는 패턴의 정규식 소스
#[derive(Debug, Clone)]
struct Compiled {
    source: String,
    types: HashMap<String, TypeHint>,
}

/// 패턴 본문 안의 `%{...}` 참조 하나
#[derive(Debug, Clone)]
struct Reference {
    start: usize,
    end: usize,
    name: String,
    capture: Option<String>,
    hint: TypeHint,
}

/// 진행 중인 컴파일 상태
///
/// 참조를 앞에서부터 인라인하다가 빠진 패턴을 만나면 그 자리에서 멈춥니다.
#[derive(Debug, Clone)]
struct CompileState {
    name: String,
    pattern: String,
    refs: Vec<Reference>,
    index: usize,
    last_offset: usize,
    output: String,
    types: HashMap<String, TypeHint>,
}

enum Step {
    Done(String, Compiled),
    Blocked(String, CompileState),
}

impl CompileState {
    fn new(name: &str, pattern: &str) -> Result<Self, GrokError> {
        Ok(Self {
            name: name.to_owned(),
            pattern: pattern.to_owned(),
            refs: parse_references(pattern)?,
            index: 0,
            last_offset: 0,
            output: String::with_capacity(pattern.len()),
            types: HashMap::new(),
        })
    }

    /// 등록된 패턴으로 가능한 만큼 참조를 인라인합니다.
    fn advance(mut self, compiled: &HashMap<String, Compiled>) -> Step {
        while self.index < self.refs.len() {
            let reference = &self.refs[self.index];
            let Some(target) = compiled.get(&reference.name) else {
                let missing = reference.name.clone();
                return Step::Blocked(missing, self);
            };

            self.output
                .push_str(&self.pattern[self.last_offset..reference.start]);
            match &reference.capture {
                Some(capture) => {
                    self.output.push_str("(?P<");
                    self.output.push_str(capture);
                    self.output.push('>');
                    self.types.insert(capture.clone(), reference.hint);
                }
                None => self.output.push_str("(?:"),
            }
            self.output.push_str(&target.source);
            self.output.push(')');
            for (capture, hint) in &target.types {
                self.types.entry(capture.clone()).or_insert(*hint);
            }

            self.last_offset = reference.end;
            self.index += 1;
        }

        self.output.push_str(&self.pattern[self.last_offset..]);
        Step::Done(self.name, Compiled {
            source: self.output,
            types: self.types,
        })
    }
}

/// `%{NAME}`, `%{NAME:capture}`, `%{NAME:capture:type}` 참조를 찾습니다.
fn parse_references(pattern: &str) -> Result<Vec<Reference>, GrokError> {
    let mut refs = Vec::new();
    let mut offset = 0;
    while let Some(found) = pattern[offset..].find("%{") {
        let start = offset + found;
        let body_start = start + 2;
        let Some(len) = pattern[body_start..].find('}') else {
            break;
        };
        let body = &pattern[body_start..body_start + len];
        let end = body_start + len + 1;
        if body.is_empty() {
            offset = end;
            continue;
        }

        let mut parts = body.splitn(3, ':');
        let name = parts.next().unwrap_or_default().to_owned();
        let capture = parts
            .next()
            .filter(|capture| !capture.is_empty())
            .map(str::to_owned);
        let hint = match parts.next() {
            Some(hint) => hint.parse()?,
            None => TypeHint::default(),
        };

        refs.push(Reference {
            start,
            end,
            name,
            capture,
            hint,
        });
        offset = end;
    }
    Ok(refs)
}

/// grok 패턴 라이브러리
#[derive(Debug, Clone, Default)]
pub struct Grok {
    compiled: HashMap<String, Compiled>,
    pending: HashMap<String, Vec<CompileState>>,
}

impl Grok {
    /// 빈 라이브러리를 만듭니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 내장 패턴이 등록된 라이브러리를 만듭니다.
    pub fn with_defaults() -> Self {
        let mut grok = Self::new();
        grok.load_defaults();
        grok
    }

    /// 내장 패턴을 등록합니다.
    pub fn load_defaults(&mut self) {
        for (name, pattern) in DEFAULT_PATTERNS {
            if let Err(e) = self.add_pattern(name, pattern) {
                tracing::error!(pattern = name, error = %e, "built-in grok pattern is invalid");
            }
        }
    }

    /// 이름 있는 패턴을 등록합니다.
    ///
    /// 참조한 패턴이 아직 없으면 컴파일을 보류하고, 빠진 이름이 등록될 때
    /// 이어서 진행합니다. 같은 이름을 다시 등록하면 덮어씁니다.
    pub fn add_pattern(&mut self, name: &str, pattern: &str) -> Result<(), GrokError> {
        let state = CompileState::new(name, pattern)?;

        let mut ready = VecDeque::new();
        self.settle(state, &mut ready);
        while let Some(done) = ready.pop_front() {
            for waiter in self.pending.remove(&done).unwrap_or_default() {
                self.settle(waiter, &mut ready);
            }
        }
        Ok(())
    }

    fn settle(&mut self, state: CompileState, ready: &mut VecDeque<String>) {
        match state.advance(&self.compiled) {
            Step::Done(name, compiled) => {
                self.compiled.insert(name.clone(), compiled);
                ready.push_back(name);
            }
            Step::Blocked(missing, state) => {
                tracing::trace!(pattern = %state.name, missing = %missing, "deferring grok pattern");
                self.pending.entry(missing).or_default().push(state);
            }
        }
    }

    /// 참조되었지만 등록되지 않은 패턴 이름 (정렬됨)
    pub fn missing_patterns(&self) -> Vec<String> {
        let mut missing: Vec<String> = self.pending.keys().cloned().collect();
        missing.sort();
        missing
    }

    /// 등록이 끝난 패턴인지 확인합니다.
    pub fn contains(&self, name: &str) -> bool {
        self.compiled.contains_key(name)
    }

    /// 컴파일이 끝난 패턴 수
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// `NAME pattern` 형식의 정의를 줄 단위로 읽어 등록합니다.
    ///
    /// 빈 줄과 `#`으로 시작하는 줄은 무시합니다. `origin`은 에러 메시지에
    /// 표시할 출처(보통 파일 경로)입니다.
    pub fn load_patterns_from_reader<R: Read>(
        &mut self,
        origin: &str,
        reader: R,
    ) -> Result<usize, GrokError> {
        let mut loaded = 0;
        for line in BufReader::new(reader).lines() {
            let line = line.map_err(|source| GrokError::Io {
                path: origin.to_owned(),
                source,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((name, pattern)) = trimmed.split_once(' ') else {
                return Err(GrokError::InvalidDefinition {
                    origin: origin.to_owned(),
                    line: line.clone(),
                });
            };
            let pattern = pattern.trim_start();
            if pattern.is_empty() {
                return Err(GrokError::InvalidDefinition {
                    origin: origin.to_owned(),
                    line: line.clone(),
                });
            }

            self.add_pattern(name, pattern)
                .map_err(|e| GrokError::Definition {
                    origin: origin.to_owned(),
                    line: line.clone(),
                    source: Box::new(e),
                })?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// 패턴 파일을 읽어 등록합니다.
    pub fn load_patterns_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize, GrokError> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let file = File::open(path).map_err(|source| GrokError::Io {
            path: origin.clone(),
            source,
        })?;
        let loaded = self.load_patterns_from_reader(&origin, file)?;
        tracing::debug!(path = %origin, patterns = loaded, "loaded grok pattern file");
        Ok(loaded)
    }

    /// 패턴을 적용 가능한 정규식으로 컴파일합니다.
    ///
    /// `local`의 정의는 이번 컴파일에서만 보이며 라이브러리에 남지 않습니다.
    /// 참조가 끝내 풀리지 않으면 [`GrokError::MissingPattern`]을 반환합니다.
    pub fn compile_pattern(
        &self,
        pattern: &str,
        local: &[(String, String)],
    ) -> Result<Pattern, GrokError> {
        let state = CompileState::new("", pattern)?;

        let scoped;
        let library = if local.is_empty() {
            self
        } else {
            let mut copy = self.clone();
            for (name, definition) in local {
                copy.add_pattern(name, definition)?;
            }
            scoped = copy;
            &scoped
        };

        match state.advance(&library.compiled) {
            Step::Done(_, compiled) => Pattern::new(&compiled.source, compiled.types),
            Step::Blocked(missing, _) => Err(GrokError::MissingPattern {
                pattern: pattern.to_owned(),
                missing,
            }),
        }
    }
}
