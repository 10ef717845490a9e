//! Command line tokenising and the closed set of supported codes.

use std::fmt;
use std::str::FromStr;

/// Every code the interpreter executes. Anything else is logged and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Rapid linear move.
    G00,
    /// Linear move.
    G01,
    /// Clockwise arc, executed as a linear move to its end point.
    G02,
    /// Counter-clockwise arc, executed as a linear move to its end point.
    G03,
    /// Inch units.
    G20,
    /// Millimetre units.
    G21,
    /// Home.
    G28,
    /// Absolute positioning.
    G90,
    /// Relative positioning.
    G91,
    /// Select file.
    M23,
    /// Execute selected file.
    M24,
    /// Select and execute file.
    M32,
    /// Execute macro.
    M98,
    /// Emergency stop.
    M112,
    /// Restart after emergency stop.
    M999,
}

impl CommandCode {
    pub const ALL: [CommandCode; 15] = [
        CommandCode::G00,
        CommandCode::G01,
        CommandCode::G02,
        CommandCode::G03,
        CommandCode::G20,
        CommandCode::G21,
        CommandCode::G28,
        CommandCode::G90,
        CommandCode::G91,
        CommandCode::M23,
        CommandCode::M24,
        CommandCode::M32,
        CommandCode::M98,
        CommandCode::M112,
        CommandCode::M999,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            CommandCode::G00 => "G00",
            CommandCode::G01 => "G01",
            CommandCode::G02 => "G02",
            CommandCode::G03 => "G03",
            CommandCode::G20 => "G20",
            CommandCode::G21 => "G21",
            CommandCode::G28 => "G28",
            CommandCode::G90 => "G90",
            CommandCode::G91 => "G91",
            CommandCode::M23 => "M23",
            CommandCode::M24 => "M24",
            CommandCode::M32 => "M32",
            CommandCode::M98 => "M98",
            CommandCode::M112 => "M112",
            CommandCode::M999 => "M999",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandCode {
    type Err = String;

    /// Parse a normalised token (`G01`, not `G1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Zero-pad two-character codes after their letter: `G1` → `G01`.
///
/// Variable tokens (`#name`) are returned unchanged.
pub fn normalize(token: &str) -> String {
    let mut chars = token.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(letter), Some(digit), None) if letter != '#' => format!("{letter}0{digit}"),
        _ => token.to_string(),
    }
}

/// One non-blank line split into its command token and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Normalised command token.
    pub token: String,
    /// Raw parameters, in order.
    pub params: Vec<String>,
}

impl ParsedLine {
    /// Variable name if this line defines one.
    pub fn variable(&self) -> Option<&str> {
        self.token.strip_prefix('#')
    }
}

/// Split a line on whitespace. Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut words = line.split_whitespace();
    let token = normalize(words.next()?);
    Some(ParsedLine {
        token,
        params: words.map(str::to_string).collect(),
    })
}

/// Value of the `letter` word in `params` (`X12.5` → `12.5`).
///
/// A repeated word overrides the earlier ones. Returns `Ok(None)` if no
/// such word exists.
pub fn word(params: &[String], letter: char) -> Result<Option<f64>, String> {
    let mut value = None;
    for param in params.iter().filter(|p| p.starts_with(letter)) {
        let parsed = param[letter.len_utf8()..]
            .parse::<f64>()
            .map_err(|_| param.clone())?;
        value = Some(parsed);
    }
    Ok(value)
}
