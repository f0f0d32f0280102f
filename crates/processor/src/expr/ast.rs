//! 표현식 구문 트리

use std::fmt;

use regex::Regex;

use logforge_core::Value;

/// 표현식이 참조할 수 있는 유일한 변수
pub const EVENT_VARIABLE: &str = "event";

/// 단항 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// 이항 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 내장 함수
///
/// 대부분 `target.function(args)` 형태의 멤버 호출과 `function(target, args)`
/// 형태의 전역 호출을 모두 지원합니다. `base64.`, `hex.`, `json.` 접두어를 가진
/// 함수는 전역 호출만 가능합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Size,
    String,
    Int,
    Uint,
    Double,
    Bool,
    Bytes,
    Timestamp,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Replace,
    Trim,
    LowerAscii,
    UpperAscii,
    Split,
    Substring,
    IndexOf,
    LastIndexOf,
    Join,
    Base64Encode,
    Base64Decode,
    HexEncode,
    HexDecode,
    JsonEncode,
    JsonDecode,
}

impl Function {
    /// 이름으로 함수를 찾습니다.
    pub fn lookup(name: &str) -> Option<Self> {
        let function = match name {
            "size" => Self::Size,
            "string" => Self::String,
            "int" => Self::Int,
            "uint" => Self::Uint,
            "double" => Self::Double,
            "bool" => Self::Bool,
            "bytes" => Self::Bytes,
            "timestamp" => Self::Timestamp,
            "contains" => Self::Contains,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            "matches" => Self::Matches,
            "replace" => Self::Replace,
            "trim" => Self::Trim,
            "lowerAscii" | "toLower" => Self::LowerAscii,
            "upperAscii" | "toUpper" => Self::UpperAscii,
            "split" => Self::Split,
            "substring" => Self::Substring,
            "indexOf" => Self::IndexOf,
            "lastIndexOf" => Self::LastIndexOf,
            "join" => Self::Join,
            "base64.encode" => Self::Base64Encode,
            "base64.decode" => Self::Base64Decode,
            "hex.encode" => Self::HexEncode,
            "hex.decode" => Self::HexDecode,
            "json.encode" => Self::JsonEncode,
            "json.decode" => Self::JsonDecode,
            _ => return None,
        };
        Some(function)
    }

    /// 함수 네임스페이스 (`base64.encode`의 `base64`)
    pub fn is_namespace(name: &str) -> bool {
        matches!(name, "base64" | "hex" | "json")
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::String => "string",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
            Self::Timestamp => "timestamp",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Matches => "matches",
            Self::Replace => "replace",
            Self::Trim => "trim",
            Self::LowerAscii => "lowerAscii",
            Self::UpperAscii => "upperAscii",
            Self::Split => "split",
            Self::Substring => "substring",
            Self::IndexOf => "indexOf",
            Self::LastIndexOf => "lastIndexOf",
            Self::Join => "join",
            Self::Base64Encode => "base64.encode",
            Self::Base64Decode => "base64.decode",
            Self::HexEncode => "hex.encode",
            Self::HexDecode => "hex.decode",
            Self::JsonEncode => "json.encode",
            Self::JsonDecode => "json.decode",
        }
    }

    /// 대상(receiver)을 포함한 허용 인자 수 범위
    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::Size
            | Self::String
            | Self::Int
            | Self::Uint
            | Self::Double
            | Self::Bool
            | Self::Bytes
            | Self::Timestamp
            | Self::Trim
            | Self::LowerAscii
            | Self::UpperAscii
            | Self::Base64Encode
            | Self::Base64Decode
            | Self::HexEncode
            | Self::HexDecode
            | Self::JsonEncode
            | Self::JsonDecode => (1, 1),
            Self::Contains
            | Self::StartsWith
            | Self::EndsWith
            | Self::Matches
            | Self::IndexOf
            | Self::LastIndexOf => (2, 2),
            Self::Join => (1, 2),
            Self::Split | Self::Substring => (2, 3),
            Self::Replace => (3, 4),
        }
    }

    /// 멤버 호출(`x.f()`)로 쓸 수 있는지 여부
    pub fn allows_receiver(self) -> bool {
        !matches!(
            self,
            Self::Base64Encode
                | Self::Base64Decode
                | Self::HexEncode
                | Self::HexDecode
                | Self::JsonEncode
                | Self::JsonDecode
        )
    }
}

/// 표현식 노드
#[derive(Debug, Clone)]
pub enum Expr {
    /// 상수 (파싱 시 접힌 결과 포함)
    Literal(Value),
    /// 변수 참조
    Ident(String),
    /// 목록 생성 `[a, b]`
    List(Vec<Expr>),
    /// 맵 생성 `{k: v}`
    Map(Vec<(Expr, Expr)>),
    /// 필드 선택 `a.b`
    Select { operand: Box<Expr>, field: String },
    /// 색인 `a[i]`
    Index { operand: Box<Expr>, index: Box<Expr> },
    /// `has(a.b)` 매크로
    Has { operand: Box<Expr>, field: String },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// 삼항 `c ? a : b`
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// 함수 호출. 멤버 호출이면 대상이 `args[0]`입니다.
    Call { function: Function, args: Vec<Expr> },
    /// 패턴이 상수인 `matches` (정규식 미리 컴파일)
    Matches { target: Box<Expr>, regex: Regex },
}

impl Expr {
    /// `event` 변수를 참조하지 않는지 여부
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Ident(_) | Self::Has { .. } => false,
            Self::List(items) => items.iter().all(Self::is_constant),
            Self::Map(entries) => entries
                .iter()
                .all(|(key, value)| key.is_constant() && value.is_constant()),
            Self::Select { operand, .. } => operand.is_constant(),
            Self::Index { operand, index } => operand.is_constant() && index.is_constant(),
            Self::Unary { operand, .. } => operand.is_constant(),
            Self::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => condition.is_constant() && then.is_constant() && otherwise.is_constant(),
            Self::Call { args, .. } => args.iter().all(Self::is_constant),
            Self::Matches { target, .. } => target.is_constant(),
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }
}
