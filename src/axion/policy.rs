//! Policy S-expression parser.
//!
//! Grammar: `(policy (tier N) CLAUSE*)`, where `CLAUSE` is one of
//! `(max-stack N)`, `(loop ...)`, `(require-match-guard ...)`,
//! `(require-segment-event ...)`, `(require-axion-event ...)`. Unknown
//! clauses are skipped with balanced-paren scanning rather than rejected,
//! so the grammar stays forward-compatible with newer policy-producing
//! tooling.

use crate::error::PolicyParseError;

/// How many instructions a `LoopHint` is expected to run, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoopBound {
    /// The loop never terminates by construction.
    Infinite,
    /// A statically known trip count.
    Static(i64),
    /// No bound could be determined.
    Unknown,
}

/// A single declared loop, expected to have left a matching
/// `loop hint file=... line=... column=... bound=...` reason in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopHint {
    /// Declaration-site id, informational only.
    pub id: i64,
    /// Source file name.
    pub file: String,
    /// Source line.
    pub line: i64,
    /// Source column.
    pub column: i64,
    /// `true` if the compiler annotated this loop explicitly.
    pub annotated: bool,
    /// Nesting depth, informational only.
    pub depth: i64,
    /// Expected trip-count bound.
    pub bound: LoopBound,
}

impl LoopHint {
    /// The canonical substring a trace reason must contain to satisfy
    /// this hint.
    pub fn expected_reason(&self) -> String {
        let bound = match &self.bound {
            LoopBound::Infinite => "infinite".to_string(),
            LoopBound::Static(n) => n.to_string(),
            LoopBound::Unknown => "unknown".to_string(),
        };
        format!(
            "loop hint file={} line={} column={} bound={}",
            self.file, self.line, self.column, bound
        )
    }
}

/// Required match-guard outcome for a `require-match-guard` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The guard must have matched.
    Pass,
    /// The guard must have failed.
    Fail,
}

/// A required enum guard event, checked only on the program's final
/// instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchGuard {
    /// Enum type name.
    pub enum_name: String,
    /// Variant name.
    pub variant_name: String,
    /// Expected payload type name, if the clause names one.
    pub payload: Option<String>,
    /// Expected pass/fail outcome.
    pub result: MatchResult,
}

/// A required memory-segment event, checked only on the program's final
/// instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEventReq {
    /// Segment name: `stack`, `heap`, `tensor`, `meta`, `code`, or
    /// `unknown`.
    pub segment: String,
    /// Action substring the reason must contain (e.g. `"allocated"`).
    pub action: String,
    /// Expected address, if the clause names one.
    pub addr: Option<i64>,
}

/// A required raw substring somewhere in the trace, checked only on the
/// program's final instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxionEventReq {
    /// The substring that must appear in some prior reason.
    pub reason: String,
}

/// A fully parsed policy document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Policy {
    /// Declared tier, defaulting to 1 if the clause is absent.
    pub tier: i64,
    /// Maximum stack depth, if declared.
    pub max_stack: Option<i64>,
    /// Declared loop hints, in declaration order.
    pub loops: Vec<LoopHint>,
    /// Declared match-guard requirements, in declaration order.
    pub match_guards: Vec<MatchGuard>,
    /// Declared segment-event requirements, in declaration order.
    pub segment_requirements: Vec<SegmentEventReq>,
    /// Declared raw-reason requirements, in declaration order.
    pub axion_event_requirements: Vec<AxionEventReq>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Integer(i64),
    Symbol(String),
    Str(String),
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src: src.as_bytes(), pos: 0 }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && (self.src[self.pos] as char).is_whitespace() {
            self.pos += 1;
        }
    }

    fn next(&mut self) -> Option<Token> {
        self.skip_ws();
        if self.pos >= self.src.len() {
            return None;
        }
        let c = self.src[self.pos] as char;
        if c == '(' {
            self.pos += 1;
            return Some(Token::LParen);
        }
        if c == ')' {
            self.pos += 1;
            return Some(Token::RParen);
        }
        if c == '"' {
            let start = self.pos + 1;
            let mut end = start;
            while end < self.src.len() && self.src[end] as char != '"' {
                end += 1;
            }
            let text = String::from_utf8_lossy(&self.src[start..end]).into_owned();
            self.pos = (end + 1).min(self.src.len());
            return Some(Token::Str(text));
        }
        if c.is_ascii_digit() || ((c == '-' || c == '+') && self.peek_digit_after_sign()) {
            let start = self.pos;
            self.pos += 1;
            while self.pos < self.src.len() && (self.src[self.pos] as char).is_ascii_digit() {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            return Some(Token::Integer(text.parse().ok()?));
        }
        if c.is_alphabetic() || c == '-' || c == '_' {
            let start = self.pos;
            self.pos += 1;
            while self.pos < self.src.len() {
                let ch = self.src[self.pos] as char;
                if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap().to_string();
            return Some(Token::Symbol(text));
        }
        self.pos = self.src.len();
        None
    }

    fn peek_digit_after_sign(&self) -> bool {
        self.src.get(self.pos + 1).map(|b| (*b as char).is_ascii_digit()).unwrap_or(false)
    }

    /// Skips one balanced-paren form, assuming the opening `(` was already
    /// consumed.
    fn skip_form(&mut self) -> Result<(), PolicyParseError> {
        let mut depth = 1;
        loop {
            match self.next() {
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return Err(PolicyParseError::new("unterminated policy clause")),
            }
        }
    }
}

struct Parser<'a> {
    lex: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn expect(&mut self, tok: Token) -> Result<(), PolicyParseError> {
        match self.lex.next() {
            Some(t) if t == tok => Ok(()),
            other => Err(PolicyParseError::new(format!("expected {tok:?}, got {other:?}"))),
        }
    }

    fn expect_symbol(&mut self) -> Result<String, PolicyParseError> {
        match self.lex.next() {
            Some(Token::Symbol(s)) => Ok(s),
            other => Err(PolicyParseError::new(format!("expected symbol, got {other:?}"))),
        }
    }

    fn expect_integer(&mut self) -> Result<i64, PolicyParseError> {
        match self.lex.next() {
            Some(Token::Integer(n)) => Ok(n),
            other => Err(PolicyParseError::new(format!("expected integer, got {other:?}"))),
        }
    }

    fn expect_string_or_symbol(&mut self) -> Result<String, PolicyParseError> {
        match self.lex.next() {
            Some(Token::Str(s)) | Some(Token::Symbol(s)) => Ok(s),
            other => Err(PolicyParseError::new(format!("expected string or symbol, got {other:?}"))),
        }
    }

    /// Parses one `(key ...)` field inside a clause body, returning the
    /// key symbol and leaving the reader positioned right after the
    /// matching `)`. Callers pull the value(s) between key and close.
    fn parse_field_integer(&mut self, expected_key: &str) -> Result<i64, PolicyParseError> {
        self.expect(Token::LParen)?;
        let key = self.expect_symbol()?;
        if key != expected_key {
            return Err(PolicyParseError::new(format!("expected field `{expected_key}`, got `{key}`")));
        }
        let value = self.expect_integer()?;
        self.expect(Token::RParen)?;
        Ok(value)
    }

    fn parse_field_string(&mut self, expected_key: &str) -> Result<String, PolicyParseError> {
        self.expect(Token::LParen)?;
        let key = self.expect_symbol()?;
        if key != expected_key {
            return Err(PolicyParseError::new(format!("expected field `{expected_key}`, got `{key}`")));
        }
        let value = self.expect_string_or_symbol()?;
        self.expect(Token::RParen)?;
        Ok(value)
    }

    fn parse_loop_hint(&mut self) -> Result<LoopHint, PolicyParseError> {
        let id = self.parse_field_integer("id")?;
        let file = self.parse_field_string("file")?;
        let line = self.parse_field_integer("line")?;
        let column = self.parse_field_integer("column")?;
        let annotated = self.parse_field_string("annotated")? == "true";
        let depth = self.parse_field_integer("depth")?;

        self.expect(Token::LParen)?;
        let key = self.expect_symbol()?;
        if key != "bound" {
            return Err(PolicyParseError::new(format!("expected field `bound`, got `{key}`")));
        }
        let bound = match self.lex.next() {
            Some(Token::Symbol(s)) if s == "infinite" => LoopBound::Infinite,
            Some(Token::Symbol(s)) if s == "unknown" => LoopBound::Unknown,
            Some(Token::Integer(n)) => LoopBound::Static(n),
            other => return Err(PolicyParseError::new(format!("invalid loop bound: {other:?}"))),
        };
        self.expect(Token::RParen)?;
        self.expect(Token::RParen)?; // closes the `(loop ...)` clause

        Ok(LoopHint { id, file, line, column, annotated, depth, bound })
    }

    fn parse_match_guard(&mut self) -> Result<MatchGuard, PolicyParseError> {
        let enum_name = self.parse_field_string("enum")?;
        let variant_name = self.parse_field_string("variant")?;

        // `(payload SYM)` is optional; peek by trying to parse it and
        // falling back if the next field is `result` instead.
        self.expect(Token::LParen)?;
        let key = self.expect_symbol()?;
        let (payload, result) = if key == "payload" {
            let payload = self.expect_string_or_symbol()?;
            self.expect(Token::RParen)?;
            let result_str = self.parse_field_string("result")?;
            (Some(payload), result_str)
        } else if key == "result" {
            let result_str = self.expect_string_or_symbol()?;
            self.expect(Token::RParen)?;
            (None, result_str)
        } else {
            return Err(PolicyParseError::new(format!("expected `payload` or `result`, got `{key}`")));
        };
        self.expect(Token::RParen)?; // closes `(require-match-guard ...)`

        let result = match result.as_str() {
            "pass" => MatchResult::Pass,
            "fail" => MatchResult::Fail,
            other => return Err(PolicyParseError::new(format!("invalid match-guard result: {other}"))),
        };
        Ok(MatchGuard { enum_name, variant_name, payload, result })
    }

    fn parse_segment_event_req(&mut self) -> Result<SegmentEventReq, PolicyParseError> {
        let segment = self.parse_field_string("segment")?;
        let action = self.parse_field_string("action")?;

        // Optional trailing `(addr N)`.
        let addr = match self.lex.next() {
            Some(Token::LParen) => {
                let addr_key = self.expect_symbol()?;
                if addr_key != "addr" {
                    return Err(PolicyParseError::new(format!("expected `addr`, got `{addr_key}`")));
                }
                let value = self.expect_integer()?;
                self.expect(Token::RParen)?;
                self.expect(Token::RParen)?; // closes `(require-segment-event ...)`
                Some(value)
            }
            Some(Token::RParen) => None,
            other => return Err(PolicyParseError::new(format!("unexpected token: {other:?}"))),
        };
        Ok(SegmentEventReq { segment, action, addr })
    }

    fn parse_axion_event_req(&mut self) -> Result<AxionEventReq, PolicyParseError> {
        let reason = self.parse_field_string("reason")?;
        self.expect(Token::RParen)?; // closes `(require-axion-event ...)`
        Ok(AxionEventReq { reason })
    }
}

/// Parses a policy document. Returns `Ok(None)` only never; an absent
/// policy is represented at a higher layer as `Option<Policy>`, this
/// function always either parses one or reports why it couldn't.
pub fn parse_policy(text: &str) -> Result<Policy, PolicyParseError> {
    let mut parser = Parser { lex: Lexer::new(text) };
    parser.expect(Token::LParen)?;
    let root = parser.expect_symbol()?;
    if root != "policy" {
        return Err(PolicyParseError::new("root symbol must be `policy`"));
    }

    let mut policy = Policy { tier: 1, ..Policy::default() };
    loop {
        match parser.lex.next() {
            Some(Token::RParen) => break,
            Some(Token::LParen) => {}
            other => return Err(PolicyParseError::new(format!("expected `(` inside policy body, got {other:?}"))),
        }
        let key = parser.expect_symbol()?;
        match key.as_str() {
            "tier" => {
                policy.tier = parser.expect_integer()?;
                parser.expect(Token::RParen)?;
            }
            "max-stack" => {
                policy.max_stack = Some(parser.expect_integer()?);
                parser.expect(Token::RParen)?;
            }
            "loop" => policy.loops.push(parser.parse_loop_hint()?),
            "require-match-guard" => policy.match_guards.push(parser.parse_match_guard()?),
            "require-segment-event" => {
                policy.segment_requirements.push(parser.parse_segment_event_req()?)
            }
            "require-axion-event" => {
                policy.axion_event_requirements.push(parser.parse_axion_event_req()?)
            }
            _ => parser.lex.skip_form()?,
        }
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tier_and_max_stack() {
        let policy = parse_policy("(policy (tier 2) (max-stack 64))").unwrap();
        assert_eq!(policy.tier, 2);
        assert_eq!(policy.max_stack, Some(64));
    }

    #[test]
    fn parses_loop_hint_with_infinite_bound() {
        let text = "(policy (tier 1) (loop (id 1) (file main.t81) (line 4) (column 2) \
                     (annotated true) (depth 0) (bound infinite)))";
        let policy = parse_policy(text).unwrap();
        assert_eq!(policy.loops.len(), 1);
        assert_eq!(policy.loops[0].bound, LoopBound::Infinite);
        assert_eq!(
            policy.loops[0].expected_reason(),
            "loop hint file=main.t81 line=4 column=2 bound=infinite"
        );
    }

    #[test]
    fn parses_match_guard_without_payload() {
        let text = r#"(policy (tier 1) (require-match-guard (enum Shape) (variant Circle) (result pass)))"#;
        let policy = parse_policy(text).unwrap();
        assert_eq!(policy.match_guards.len(), 1);
        assert_eq!(policy.match_guards[0].payload, None);
        assert_eq!(policy.match_guards[0].result, MatchResult::Pass);
    }

    #[test]
    fn skips_unknown_clauses() {
        let text = "(policy (tier 1) (future-clause (nested (deep 1)) other) (max-stack 8))";
        let policy = parse_policy(text).unwrap();
        assert_eq!(policy.max_stack, Some(8));
    }

    #[test]
    fn rejects_missing_root_symbol() {
        assert!(parse_policy("(nope)").is_err());
    }
}
