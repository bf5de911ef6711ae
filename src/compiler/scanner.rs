use crate::compiler::diagnostics::{Loc, Result, lex_error};
use crate::parse::parse_tag_literal;

/// Every token the schema language knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    Unknown,
    EndOfFile,
    /// Lower- or uppercase word, including the builtin names `#`, `##`,
    /// `#<`, `#<=` and special `!`-prefixed constructor names.
    Identifier,
    /// Unsigned decimal literal fitting 31 bits.
    NumericLiteral,
    /// `#<hex>[_]` or `$<bin>[_]` constructor tag.
    TagLiteral,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    PlusToken,
    AsteriskToken,
    DotToken,
    EqualsToken,
    LessThanToken,
    GreaterThanToken,
    LessThanEqualsToken,
    GreaterThanEqualsToken,
    EqualsEqualsToken,
    ExclamationEqualsToken,
    TildeToken,
    ColonToken,
    SemicolonToken,
    QuestionToken,
    CaretToken,
    UnderscoreToken,
}

/// Case class of an identifier; the first alphabetic character decides,
/// and a leading `!` before a lowercase word marks a special constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentClass {
    Undefined,
    Lowercase,
    Uppercase,
    SpecialLowercase,
}

/// Computes the case class of an identifier.
pub fn ident_class(text: &str) -> IdentClass {
    let mut special = false;
    for (i, c) in text.chars().enumerate() {
        if i == 0 && c == '!' {
            special = true;
            continue;
        }
        if c.is_lowercase() {
            return if special {
                IdentClass::SpecialLowercase
            } else {
                IdentClass::Lowercase
            };
        }
        if c.is_uppercase() {
            return IdentClass::Uppercase;
        }
    }
    IdentClass::Undefined
}

/// Snapshot of the scanner position, used to peek ahead and rewind.
#[derive(Clone)]
pub struct ScannerState {
    pos: usize,
    token_start: usize,
    token: SyntaxKind,
    token_value: String,
    number_value: u32,
    tag_value: u64,
    line: u32,
    line_start: usize,
    token_loc: Loc,
}

/// Hand-written scanner over the schema text.
///
/// Trivia (spaces, line breaks, `//` line comments and non-nesting
/// `/* ... */` block comments) is skipped before every token.
pub struct Scanner {
    text: String,
    state: ScannerState,
}

impl Scanner {
    pub fn new(text: String) -> Self {
        Scanner {
            text,
            state: ScannerState {
                pos: 0,
                token_start: 0,
                token: SyntaxKind::Unknown,
                token_value: String::new(),
                number_value: 0,
                tag_value: 0,
                line: 1,
                line_start: 0,
                token_loc: Loc::new(1, 1),
            },
        }
    }

    /// Gets the current token.
    pub fn token(&self) -> SyntaxKind {
        self.state.token
    }

    /// Gets the current token's text.
    pub fn token_text(&self) -> &str {
        &self.text[self.state.token_start..self.state.pos]
    }

    /// Gets the current identifier's text (leading `!` included).
    pub fn token_value(&self) -> &str {
        &self.state.token_value
    }

    /// Value of the current `NumericLiteral`.
    pub fn number_value(&self) -> u32 {
        self.state.number_value
    }

    /// Packed prefix word of the current `TagLiteral`.
    pub fn tag_value(&self) -> u64 {
        self.state.tag_value
    }

    /// Source location of the current token.
    pub fn token_loc(&self) -> Loc {
        self.state.token_loc
    }

    /// Marks the current scanner state.
    pub fn mark(&self) -> ScannerState {
        self.state.clone()
    }

    /// Rewinds to a previously marked scanner state.
    pub fn rewind(&mut self, state: ScannerState) {
        self.state = state;
    }

    fn char(&self) -> Option<char> {
        self.text[self.state.pos..].chars().next()
    }

    fn char_at(&self, offset: usize) -> Option<char> {
        let mut chars = self.text[self.state.pos..].chars();
        for _ in 0..offset {
            chars.next()?;
        }
        chars.next()
    }

    fn advance(&mut self, ch: char) {
        self.state.pos += ch.len_utf8();
    }

    fn loc_here(&self) -> Loc {
        Loc::new(
            self.state.line,
            (self.state.pos - self.state.line_start) as u32 + 1,
        )
    }

    /// Scans the next token.
    pub fn scan(&mut self) -> Result<SyntaxKind> {
        self.skip_trivia()?;
        self.state.token_start = self.state.pos;
        self.state.token_loc = self.loc_here();

        let Some(ch) = self.char() else {
            self.state.token = SyntaxKind::EndOfFile;
            return Ok(self.state.token);
        };

        let kind = match ch {
            '(' => self.punct(SyntaxKind::OpenParen),
            ')' => self.punct(SyntaxKind::CloseParen),
            '{' => self.punct(SyntaxKind::OpenBrace),
            '}' => self.punct(SyntaxKind::CloseBrace),
            '[' => self.punct(SyntaxKind::OpenBracket),
            ']' => self.punct(SyntaxKind::CloseBracket),
            '+' => self.punct(SyntaxKind::PlusToken),
            '*' => self.punct(SyntaxKind::AsteriskToken),
            '.' => self.punct(SyntaxKind::DotToken),
            '~' => self.punct(SyntaxKind::TildeToken),
            ':' => self.punct(SyntaxKind::ColonToken),
            ';' => self.punct(SyntaxKind::SemicolonToken),
            '?' => self.punct(SyntaxKind::QuestionToken),
            '^' => self.punct(SyntaxKind::CaretToken),
            '=' => {
                self.state.pos += 1;
                if self.char() == Some('=') {
                    self.state.pos += 1;
                    SyntaxKind::EqualsEqualsToken
                } else {
                    SyntaxKind::EqualsToken
                }
            }
            '<' => {
                self.state.pos += 1;
                if self.char() == Some('=') {
                    self.state.pos += 1;
                    SyntaxKind::LessThanEqualsToken
                } else {
                    SyntaxKind::LessThanToken
                }
            }
            '>' => {
                self.state.pos += 1;
                if self.char() == Some('=') {
                    self.state.pos += 1;
                    SyntaxKind::GreaterThanEqualsToken
                } else {
                    SyntaxKind::GreaterThanToken
                }
            }
            '!' => {
                if self.char_at(1) == Some('=') {
                    self.state.pos += 2;
                    SyntaxKind::ExclamationEqualsToken
                } else if self.char_at(1).is_some_and(is_identifier_start) {
                    self.scan_identifier()
                } else {
                    return Err(lex_error(self.state.token_loc, "stray `!`"));
                }
            }
            '_' => {
                if self.char_at(1).is_some_and(is_identifier_part) {
                    self.scan_identifier()
                } else {
                    self.punct(SyntaxKind::UnderscoreToken)
                }
            }
            '#' => match self.char_at(1) {
                Some('#') => {
                    self.state.pos += 2;
                    self.state.token_value = "##".to_string();
                    SyntaxKind::Identifier
                }
                Some('<') => {
                    self.state.pos += 2;
                    if self.char() == Some('=') {
                        self.state.pos += 1;
                        self.state.token_value = "#<=".to_string();
                    } else {
                        self.state.token_value = "#<".to_string();
                    }
                    SyntaxKind::Identifier
                }
                Some(c) if c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == '_' => {
                    self.scan_tag_literal()?
                }
                _ => {
                    self.state.pos += 1;
                    self.state.token_value = "#".to_string();
                    SyntaxKind::Identifier
                }
            },
            '$' => self.scan_tag_literal()?,
            '0'..='9' => self.scan_number()?,
            c if is_identifier_start(c) => self.scan_identifier(),
            c => {
                return Err(lex_error(
                    self.state.token_loc,
                    format!("unexpected character `{}`", c),
                ));
            }
        };

        self.state.token = kind;
        Ok(kind)
    }

    fn punct(&mut self, kind: SyntaxKind) -> SyntaxKind {
        self.state.pos += 1;
        kind
    }

    /// Skip whitespace and comments, tracking line starts.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let Some(ch) = self.char() else {
                return Ok(());
            };
            match ch {
                ' ' | '\t' | '\x0B' | '\x0C' | '\r' => self.advance(ch),
                '\n' => {
                    self.advance(ch);
                    self.state.line += 1;
                    self.state.line_start = self.state.pos;
                }
                '/' if self.char_at(1) == Some('/') => {
                    self.state.pos += 2;
                    while let Some(c) = self.char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance(c);
                    }
                }
                '/' if self.char_at(1) == Some('*') => {
                    let open_loc = self.loc_here();
                    self.state.pos += 2;
                    // Block comments do not nest; the first `*/` closes.
                    loop {
                        match self.char() {
                            None => {
                                return Err(lex_error(open_loc, "unterminated block comment"));
                            }
                            Some('*') if self.char_at(1) == Some('/') => {
                                self.state.pos += 2;
                                break;
                            }
                            Some('\n') => {
                                self.state.pos += 1;
                                self.state.line += 1;
                                self.state.line_start = self.state.pos;
                            }
                            Some(c) => self.advance(c),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn scan_identifier(&mut self) -> SyntaxKind {
        let start = self.state.pos;
        if self.char() == Some('!') {
            self.state.pos += 1;
        }
        while let Some(c) = self.char() {
            if !is_identifier_part(c) {
                break;
            }
            self.advance(c);
        }
        self.state.token_value = self.text[start..self.state.pos].to_string();
        SyntaxKind::Identifier
    }

    fn scan_number(&mut self) -> Result<SyntaxKind> {
        let start = self.state.pos;
        while let Some(c) = self.char() {
            if !c.is_ascii_digit() {
                break;
            }
            self.state.pos += 1;
        }
        if self.char().is_some_and(is_identifier_part) {
            return Err(lex_error(self.state.token_loc, "malformed number"));
        }
        let text = &self.text[start..self.state.pos];
        let value: u64 = text
            .parse()
            .map_err(|_| lex_error(self.state.token_loc, "malformed number"))?;
        if value >= 1 << 31 {
            return Err(lex_error(
                self.state.token_loc,
                "integer constant does not fit in an unsigned 31-bit integer",
            ));
        }
        self.state.number_value = value as u32;
        Ok(SyntaxKind::NumericLiteral)
    }

    fn scan_tag_literal(&mut self) -> Result<SyntaxKind> {
        let start = self.state.pos;
        // Sigil.
        self.state.pos += 1;
        while let Some(c) = self.char() {
            if c.is_ascii_hexdigit() && !c.is_ascii_uppercase() {
                self.state.pos += 1;
            } else {
                break;
            }
        }
        if self.char() == Some('_') {
            self.state.pos += 1;
        }
        if self.char().is_some_and(is_identifier_part) {
            return Err(lex_error(self.state.token_loc, "bad tag literal"));
        }
        let text = &self.text[start..self.state.pos];
        match parse_tag_literal(text) {
            Ok(value) => {
                self.state.tag_value = value;
                Ok(SyntaxKind::TagLiteral)
            }
            Err(_) => Err(lex_error(
                self.state.token_loc,
                format!("bad tag literal `{}`", text),
            )),
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_kinds(src: &str) -> Vec<SyntaxKind> {
        let mut scanner = Scanner::new(src.to_string());
        let mut kinds = Vec::new();
        loop {
            let kind = scanner.scan().expect("scan failed");
            if kind == SyntaxKind::EndOfFile {
                break;
            }
            kinds.push(kind);
        }
        kinds
    }

    #[test]
    fn scans_constructor_declaration() {
        use SyntaxKind::*;
        let kinds = collect_kinds("bool_false$0 = Bool;");
        assert_eq!(
            kinds,
            vec![Identifier, TagLiteral, EqualsToken, Identifier, SemicolonToken]
        );
    }

    #[test]
    fn scans_builtin_nat_names() {
        let mut scanner = Scanner::new("# ## #< #<= #5".to_string());
        for expected in ["#", "##", "#<", "#<="] {
            assert_eq!(scanner.scan().unwrap(), SyntaxKind::Identifier);
            assert_eq!(scanner.token_value(), expected);
        }
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::TagLiteral);
    }

    #[test]
    fn skips_comments_and_tracks_lines() {
        let mut scanner =
            Scanner::new("// header\n/* block\ncomment */ unit$_\n= Unit;".to_string());
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::Identifier);
        assert_eq!(scanner.token_loc(), Loc::new(3, 12));
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::TagLiteral);
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::EqualsToken);
        assert_eq!(scanner.token_loc().line, 4);
    }

    #[test]
    fn special_constructor_names_keep_the_bang() {
        let mut scanner = Scanner::new("!merkle_update".to_string());
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::Identifier);
        assert_eq!(scanner.token_value(), "!merkle_update");
        assert_eq!(ident_class("!merkle_update"), IdentClass::SpecialLowercase);
        assert_eq!(ident_class("Hashmap"), IdentClass::Uppercase);
        assert_eq!(ident_class("hm_edge"), IdentClass::Lowercase);
        assert_eq!(ident_class("#"), IdentClass::Undefined);
    }

    #[test]
    fn rejects_oversized_numbers() {
        let mut scanner = Scanner::new("2147483648".to_string());
        assert!(scanner.scan().is_err());
        let mut scanner = Scanner::new("2147483647".to_string());
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::NumericLiteral);
        assert_eq!(scanner.number_value(), 2147483647);
    }

    #[test]
    fn rewind_restores_position() {
        let mut scanner = Scanner::new("x : #".to_string());
        scanner.scan().unwrap();
        let mark = scanner.mark();
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::ColonToken);
        scanner.rewind(mark);
        assert_eq!(scanner.token(), SyntaxKind::Identifier);
        assert_eq!(scanner.scan().unwrap(), SyntaxKind::ColonToken);
    }
}
