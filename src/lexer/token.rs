use colored::Colorize;
use serde::{Deserialize, Serialize};

/// A single point in the source text. `line` and `col` are 0-based,
/// `index` is the byte offset into the original input.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcPoint {
    pub line: usize,
    pub col: usize,
    pub index: usize,
}

/// Cache of line-start byte offsets for fast point-from-index lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    line_starts: Vec<usize>,
}

impl SourceInfo {
    pub fn new(input: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in input.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }

        Self { line_starts }
    }

    /// Convert a byte offset into a full source point.
    pub fn point_at(&self, index: usize) -> SrcPoint {
        let line = match self.line_starts.binary_search(&index) {
            Ok(line) => line,
            Err(next_line) => next_line - 1,
        };

        SrcPoint {
            line,
            col: index - self.line_starts[line],
            index,
        }
    }
}

/// Source provenance of a syntax node. Nodes created by the parser carry a
/// `Real` span into the original input; nodes synthesized by later phases
/// (prelude entries, generated memory functions, ownership rewrites) carry
/// `Synthetic` so that tooling never tries to point at source text for them.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum Span {
    Real {
        start: SrcPoint,
        end: SrcPoint,
        source: String,
    },
    Synthetic,
}

impl Default for Span {
    fn default() -> Self {
        Span::Real {
            start: SrcPoint::default(),
            end: SrcPoint::default(),
            source: String::new(),
        }
    }
}

impl PartialEq<Span> for Span {
    fn eq(&self, _other: &Span) -> bool {
        // Spans never participate in structural equality of AST nodes;
        // re-parsed and rewritten trees must compare equal position-free.
        true
    }
}

impl Span {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Span::Synthetic)
    }

    pub fn start(&self) -> Option<SrcPoint> {
        match self {
            Span::Real { start, .. } => Some(*start),
            Span::Synthetic => None,
        }
    }

    pub fn end(&self) -> Option<SrcPoint> {
        match self {
            Span::Real { end, .. } => Some(*end),
            Span::Synthetic => None,
        }
    }

    /// Merge two spans into one covering both. Synthetic spans are
    /// contagious: merging with one yields the other side unchanged, and
    /// two synthetic spans stay synthetic.
    pub fn merge(&self, other: &Span) -> Span {
        match (self, other) {
            (
                Span::Real { start, source, .. },
                Span::Real { end, .. },
            ) => Span::Real {
                start: *start,
                end: *end,
                source: source.clone(),
            },
            (Span::Synthetic, real) => real.clone(),
            (real, Span::Synthetic) => real.clone(),
        }
    }

    /// Render this span with the attached message, pointing into the
    /// original source with colored markers.
    pub fn to_string(&self, msg: impl ToString) -> String {
        let Span::Real { start, end, source } = self else {
            return msg.to_string();
        };

        let lines = source.lines().collect::<Vec<_>>();
        let Some(line_str) = lines.get(start.line) else {
            return msg.to_string();
        };

        let prev_line = if start.line > 0 {
            lines[start.line - 1]
        } else {
            ""
        };

        let left_margin = format!("{}", end.line + 1).len();
        let left_margin_fill = " ".repeat(left_margin);

        let (left, right) = line_str.split_at(start.col.min(line_str.len()));
        let line_str = if start.line == end.line {
            let split = (end.col - start.col).min(right.len());
            let (err_str, after_err) = right.split_at(split);
            format!("{left}{}{after_err}", err_str.red())
        } else {
            format!("{left}{}", right.red())
        };

        let mut rendered = format!(
            "{left_margin_fill} |\n{left_margin_fill} |{prev_line}\n{line} |{line_str}",
            line = start.line + 1
        );

        for line_number in (start.line + 1)..=(end.line.min(lines.len().saturating_sub(1))) {
            rendered = format!(
                "{rendered}\n{left_margin_fill} |{}",
                lines[line_number].red()
            );
        }

        let left_padding_fill = " ".repeat(start.col);
        format!(
            "{rendered}\n{left_margin_fill} |{left_padding_fill}^--- {}\n{left_margin_fill} |",
            msg.to_string()
        )
    }
}

pub trait GetPosition {
    fn position(&self) -> Span;
}

/// Tokens of the MinnieML surface language. Every token carries the span it
/// was lexed from.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Id { value: String, position: Span },
    Integer { value: i64, position: Span },
    FloatingPoint { value: f64, position: Span },
    StringLiteral { value: String, position: Span },
    BoolLiteral { value: bool, position: Span },
    /// A run of operator symbols that is not one of the reserved
    /// punctuation terminals, e.g. `+`, `++`, `==`, `+.`.
    OperatorSymbol { value: String, position: Span },
    DocComment { value: String, position: Span },
    LetKeyword { position: Span },
    FnKeyword { position: Span },
    OpKeyword { position: Span },
    StructKeyword { position: Span },
    TypeKeyword { position: Span },
    IfKeyword { position: Span },
    ThenKeyword { position: Span },
    ElifKeyword { position: Span },
    ElseKeyword { position: Span },
    AtNative { position: Span },
    LParen { position: Span },
    RParen { position: Span },
    LBrace { position: Span },
    RBrace { position: Span },
    LBracket { position: Span },
    RBracket { position: Span },
    Comma { position: Span },
    Semicolon { position: Span },
    Colon { position: Span },
    Assign { position: Span },
    SmallRightArrow { position: Span },
    Tilde { position: Span },
    Dot { position: Span },
    Underscore { position: Span },
    HoleMark { position: Span },
}

impl Token {
    pub fn terminal(&self) -> Terminal {
        match self {
            Token::Id { .. } => Terminal::Id,
            Token::Integer { .. } => Terminal::Integer,
            Token::FloatingPoint { .. } => Terminal::FloatingPoint,
            Token::StringLiteral { .. } => Terminal::StringLiteral,
            Token::BoolLiteral { .. } => Terminal::BoolLiteral,
            Token::OperatorSymbol { .. } => Terminal::OperatorSymbol,
            Token::DocComment { .. } => Terminal::DocComment,
            Token::LetKeyword { .. } => Terminal::LetKeyword,
            Token::FnKeyword { .. } => Terminal::FnKeyword,
            Token::OpKeyword { .. } => Terminal::OpKeyword,
            Token::StructKeyword { .. } => Terminal::StructKeyword,
            Token::TypeKeyword { .. } => Terminal::TypeKeyword,
            Token::IfKeyword { .. } => Terminal::IfKeyword,
            Token::ThenKeyword { .. } => Terminal::ThenKeyword,
            Token::ElifKeyword { .. } => Terminal::ElifKeyword,
            Token::ElseKeyword { .. } => Terminal::ElseKeyword,
            Token::AtNative { .. } => Terminal::AtNative,
            Token::LParen { .. } => Terminal::LParen,
            Token::RParen { .. } => Terminal::RParen,
            Token::LBrace { .. } => Terminal::LBrace,
            Token::RBrace { .. } => Terminal::RBrace,
            Token::LBracket { .. } => Terminal::LBracket,
            Token::RBracket { .. } => Terminal::RBracket,
            Token::Comma { .. } => Terminal::Comma,
            Token::Semicolon { .. } => Terminal::Semicolon,
            Token::Colon { .. } => Terminal::Colon,
            Token::Assign { .. } => Terminal::Assign,
            Token::SmallRightArrow { .. } => Terminal::SmallRightArrow,
            Token::Tilde { .. } => Terminal::Tilde,
            Token::Dot { .. } => Terminal::Dot,
            Token::Underscore { .. } => Terminal::Underscore,
            Token::HoleMark { .. } => Terminal::HoleMark,
        }
    }
}

impl GetPosition for Token {
    fn position(&self) -> Span {
        match self {
            Token::Id { position, .. }
            | Token::Integer { position, .. }
            | Token::FloatingPoint { position, .. }
            | Token::StringLiteral { position, .. }
            | Token::BoolLiteral { position, .. }
            | Token::OperatorSymbol { position, .. }
            | Token::DocComment { position, .. }
            | Token::LetKeyword { position }
            | Token::FnKeyword { position }
            | Token::OpKeyword { position }
            | Token::StructKeyword { position }
            | Token::TypeKeyword { position }
            | Token::IfKeyword { position }
            | Token::ThenKeyword { position }
            | Token::ElifKeyword { position }
            | Token::ElseKeyword { position }
            | Token::AtNative { position }
            | Token::LParen { position }
            | Token::RParen { position }
            | Token::LBrace { position }
            | Token::RBrace { position }
            | Token::LBracket { position }
            | Token::RBracket { position }
            | Token::Comma { position }
            | Token::Semicolon { position }
            | Token::Colon { position }
            | Token::Assign { position }
            | Token::SmallRightArrow { position }
            | Token::Tilde { position }
            | Token::Dot { position }
            | Token::Underscore { position }
            | Token::HoleMark { position } => position.clone(),
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Id { value, .. } => f.debug_struct("Id").field("value", value).finish(),
            Token::Integer { value, .. } => {
                f.debug_struct("Integer").field("value", value).finish()
            }
            Token::FloatingPoint { value, .. } => f
                .debug_struct("FloatingPoint")
                .field("value", value)
                .finish(),
            Token::StringLiteral { value, .. } => f
                .debug_struct("StringLiteral")
                .field("value", value)
                .finish(),
            Token::BoolLiteral { value, .. } => {
                f.debug_struct("BoolLiteral").field("value", value).finish()
            }
            Token::OperatorSymbol { value, .. } => f
                .debug_struct("OperatorSymbol")
                .field("value", value)
                .finish(),
            Token::DocComment { value, .. } => {
                f.debug_struct("DocComment").field("value", value).finish()
            }
            other => write!(f, "{:?}", other.terminal()),
        }
    }
}

/// Terminal classes of the token stream, used by the combinators to match
/// single tokens without comparing their payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Id,
    Integer,
    FloatingPoint,
    StringLiteral,
    BoolLiteral,
    OperatorSymbol,
    DocComment,
    LetKeyword,
    FnKeyword,
    OpKeyword,
    StructKeyword,
    TypeKeyword,
    IfKeyword,
    ThenKeyword,
    ElifKeyword,
    ElseKeyword,
    AtNative,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Assign,
    SmallRightArrow,
    Tilde,
    Dot,
    Underscore,
    HoleMark,
}

impl PartialEq<Token> for Terminal {
    fn eq(&self, other: &Token) -> bool {
        *self == other.terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_info_points() {
        let info = SourceInfo::new("let a = 1;\nlet b = 2;\n");

        assert_eq!(
            info.point_at(0),
            SrcPoint {
                line: 0,
                col: 0,
                index: 0
            }
        );
        assert_eq!(
            info.point_at(4),
            SrcPoint {
                line: 0,
                col: 4,
                index: 4
            }
        );
        assert_eq!(
            info.point_at(11),
            SrcPoint {
                line: 1,
                col: 0,
                index: 11
            }
        );
        assert_eq!(
            info.point_at(15),
            SrcPoint {
                line: 1,
                col: 4,
                index: 15
            }
        );
    }

    #[test]
    fn test_span_equality_ignores_positions() {
        let real = Span::Real {
            start: SrcPoint {
                line: 3,
                col: 7,
                index: 42,
            },
            end: SrcPoint {
                line: 3,
                col: 9,
                index: 44,
            },
            source: "let a = 1;".into(),
        };

        assert_eq!(real, Span::default());
        assert_eq!(real, Span::Synthetic);
    }

    #[test]
    fn test_terminal_matches_token() {
        let token = Token::LetKeyword {
            position: Span::default(),
        };

        assert!(Terminal::LetKeyword == token);
        assert!(Terminal::FnKeyword != token);
    }
}
