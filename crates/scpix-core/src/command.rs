//! AT command specifications.
//!
//! A [`CommandSpec`] is one line to send to the modem, how long to wait for
//! it, and which [`Pattern`]s count as an answer. Specs come either from
//! code (the socket transport, the unlock procedure, the built-in scripts)
//! or from script files with one `command[;timeout[;expect]]` per line.

use std::fmt;
use std::time::Duration;

/// What a response is searched for.
///
/// Built-in tokens are literal bytes. Expects read from script files are
/// regular expressions over the raw response bytes.
#[derive(Clone)]
pub enum Pattern {
    Literal(Vec<u8>),
    Regex(regex::bytes::Regex),
}

impl Pattern {
    /// Create a pattern matching `text` verbatim.
    pub fn literal(text: impl Into<Vec<u8>>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Compile a regular expression pattern.
    ///
    /// `\r`, `\n` and `\t` escapes are understood by the regex syntax itself,
    /// so script files can name control characters.
    pub fn regex(expr: &str) -> std::result::Result<Self, ParseSpecError> {
        regex::bytes::Regex::new(expr)
            .map(Pattern::Regex)
            .map_err(|e| ParseSpecError(format!("bad expect {expr:?}: {e}")))
    }

    /// Create a pattern from script-file text.
    pub fn from_script(text: &str) -> std::result::Result<Self, ParseSpecError> {
        Self::regex(text)
    }

    /// Byte offset of the first occurrence of this pattern in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        match self {
            Pattern::Literal(needle) => find(haystack, needle),
            Pattern::Regex(re) => re.find(haystack).map(|m| m.start()),
        }
    }

    /// Whether `haystack` contains this pattern.
    pub fn is_found_in(&self, haystack: &[u8]) -> bool {
        match self {
            Pattern::Literal(needle) => find(haystack, needle).is_some(),
            Pattern::Regex(re) => re.is_match(haystack),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Pattern::Literal(a), Pattern::Literal(b)) => a == b,
            (Pattern::Regex(a), Pattern::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(bytes) => {
                write!(f, "Literal({:?})", String::from_utf8_lossy(bytes))
            }
            Pattern::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(bytes) => {
                write!(f, "{}", String::from_utf8_lossy(bytes).escape_debug())
            }
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

impl From<&[u8]> for Pattern {
    fn from(bytes: &[u8]) -> Self {
        Pattern::literal(bytes)
    }
}

/// Find the first occurrence of `needle` in `haystack`.
///
/// An empty needle matches at offset 0.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// One AT command, its timeout, and the patterns that complete it.
///
/// `timeout` is measured from the last received byte, not from issuance.
/// An empty `expect` list means "don't care": the command completes when
/// the line goes quiet for `timeout` and always reports success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub timeout: Duration,
    pub expect: Vec<Pattern>,
}

impl CommandSpec {
    /// Create a spec with no expected patterns.
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        CommandSpec {
            command: command.into(),
            timeout,
            expect: Vec::new(),
        }
    }

    /// Add one expected pattern.
    pub fn expect(mut self, pattern: impl Into<Pattern>) -> Self {
        self.expect.push(pattern.into());
        self
    }

    /// Add several expected patterns, in order.
    pub fn expect_any<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Pattern>,
    {
        self.expect.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// The patterns a script line gets when it names none.
    pub fn default_script_expect() -> Vec<Pattern> {
        vec![Pattern::literal("OK\r\n"), Pattern::literal("ERROR\r\n")]
    }

    /// Parse one script-file line of the form `command[;timeout_ms[;expect]]`.
    ///
    /// Returns `Ok(None)` for blank lines. A missing or empty timeout falls
    /// back to `default_timeout`; a missing expect falls back to
    /// [`default_script_expect`](Self::default_script_expect).
    pub fn parse_script_line(
        line: &str,
        default_timeout: Duration,
    ) -> std::result::Result<Option<Self>, ParseSpecError> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let mut fields = line.splitn(3, ';');
        let command = fields.next().unwrap_or_default().trim();
        if command.is_empty() {
            return Err(ParseSpecError(format!("missing command in {line:?}")));
        }

        let timeout = match fields.next().map(str::trim) {
            None | Some("") => default_timeout,
            Some(ms) => {
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| ParseSpecError(format!("bad timeout {ms:?}")))?;
                if ms == 0 {
                    return Err(ParseSpecError("timeout must be positive".into()));
                }
                Duration::from_millis(ms)
            }
        };

        let expect = match fields.next() {
            Some(text) => vec![Pattern::from_script(text.trim())?],
            None => Self::default_script_expect(),
        };

        Ok(Some(CommandSpec {
            command: command.to_string(),
            timeout,
            expect,
        }))
    }
}

/// Error returned when a script line cannot be parsed into a [`CommandSpec`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid script line: {0}")]
pub struct ParseSpecError(String);
