//! Render AI-generated Markdown into Telegram MarkdownV2.
//!
//! Models answer in loose GitHub-flavoured Markdown while Telegram's
//! MarkdownV2 rejects the whole message on a single unescaped character.
//! [`render`] converts one into the other:
//!
//! 1. normalize loose syntax (`**x**` -> `*x*`, `~~x~~` -> `~x~`, list bullets -> `•`)
//! 2. protect code, links, spoilers, emphasis and quote markers behind tokens,
//!    escaping their interiors by construct-specific rules
//! 3. escape every remaining special character
//! 4. restore the protected spans
//! 5. escape the last of an odd number of `*`, `_` or `~` markers
//! 6. truncate to [`TELEGRAM_TEXT_LIMIT`] without splitting an escape; a span
//!    that does not fit is cut inside (code) or degraded to plain text
//!
//! Send the result with `parse_mode = MarkdownV2`.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Maximum message length accepted by Telegram, in Unicode code points.
pub const TELEGRAM_TEXT_LIMIT: usize = 4096;

/// Appended when the text had to be cut.
const ELLIPSIS: char = '…';

/// Room kept free when truncating: the ellipsis plus one escape per delimiter kind.
const TRUNCATION_RESERVE: usize = 4;

/// Characters that must be escaped outside of code and link destinations.
const ESCAPE_SET: [char; 19] = [
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Delimiters that must appear in pairs.
const PAIRED_DELIMITERS: [char; 3] = ['*', '_', '~'];

// Private-use code points delimit placeholder tokens; they are stripped from
// input before any token is issued.
const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';

/// Render raw model output into MarkdownV2-safe text.
///
/// Total and deterministic: malformed markup is escaped rather than rejected.
pub fn render(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let sanitized: String = raw
        .chars()
        .filter(|c| *c != TOKEN_OPEN && *c != TOKEN_CLOSE)
        .collect();

    let normalized = normalize(&sanitized);
    let mut spans = ProtectedSpans::default();
    let protected = protect(&normalized, &mut spans);
    let escaped = escape_all(&protected);

    let full = balance_delimiters(&spans.restore(&escaped));
    if full.chars().count() <= TELEGRAM_TEXT_LIMIT {
        return full;
    }

    let budget = TELEGRAM_TEXT_LIMIT - TRUNCATION_RESERVE;
    let cut = take_atomic(&escaped, &spans, budget);
    let mut truncated = balance_delimiters(&spans.restore(&cut));
    truncated.push(ELLIPSIS);
    truncated
}

/// Escape every special character of `text`.
pub fn escape_all(text: &str) -> String {
    escape_with(text, &ESCAPE_SET)
}

fn escape_code(text: &str) -> String {
    escape_with(text, &['\\', '`'])
}

fn escape_url(text: &str) -> String {
    escape_with(text, &['\\', ')'])
}

fn escape_with(text: &str, set: &[char]) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if set.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("markdown pattern must compile"))
}

/// Collapse loose Markdown into the strict dialect.
fn normalize(text: &str) -> String {
    static DOUBLE_BOLD: OnceLock<Regex> = OnceLock::new();
    static DOUBLE_STRIKE: OnceLock<Regex> = OnceLock::new();
    static BULLET: OnceLock<Regex> = OnceLock::new();

    let text = cached(&DOUBLE_BOLD, r"(?s)\*\*(.+?)\*\*").replace_all(text, "*${1}*");
    let text = cached(&DOUBLE_STRIKE, r"(?s)~~(.+?)~~").replace_all(&text, "~${1}~");
    cached(&BULLET, r"(?m)^[ \t]*[-*+][ \t]+")
        .replace_all(&text, "• ")
        .into_owned()
}

/// How a protected span is shortened when it does not fit.
#[derive(Debug)]
enum SpanKind {
    /// Escaped code between two `fence`s; cut between escape pairs and re-closed.
    Code {
        fence: &'static str,
        interior: String,
    },
    /// Any other construct; replaced by its escaped plain text.
    Markup { plain: String },
}

#[derive(Debug)]
struct Span {
    rendered: String,
    kind: SpanKind,
}

/// Placeholder table for spans that must bypass the general escape pass.
#[derive(Debug, Default)]
struct ProtectedSpans {
    spans: Vec<Span>,
}

impl ProtectedSpans {
    /// Record a code span from its escaped interior and return its token.
    fn protect_code(&mut self, fence: &'static str, interior: String) -> String {
        let rendered = format!("{fence}{interior}{fence}");
        self.push(Span {
            rendered,
            kind: SpanKind::Code { fence, interior },
        })
    }

    /// Record an already-escaped span with its plain-text fallback.
    fn protect_markup(&mut self, rendered: String, plain: String) -> String {
        self.push(Span {
            rendered,
            kind: SpanKind::Markup { plain },
        })
    }

    fn push(&mut self, span: Span) -> String {
        let token = format!("{TOKEN_OPEN}{}{TOKEN_CLOSE}", self.spans.len());
        self.spans.push(span);
        token
    }

    fn lookup(&self, token: &str) -> Option<&Span> {
        token
            .trim_start_matches(TOKEN_OPEN)
            .trim_end_matches(TOKEN_CLOSE)
            .parse::<usize>()
            .ok()
            .and_then(|i| self.spans.get(i))
    }

    /// The span behind `token` shortened to at most `budget` rendered chars.
    ///
    /// May still contain tokens; `None` when nothing useful fits.
    fn shorten(&self, token: &str, budget: usize) -> Option<String> {
        let cut = match &self.lookup(token)?.kind {
            SpanKind::Code { fence, interior } => {
                let fences = 2 * fence.chars().count();
                let inner = take_escape_units(&self.restore(interior), budget.checked_sub(fences)?);
                (!inner.is_empty()).then(|| format!("{fence}{inner}{fence}"))?
            }
            SpanKind::Markup { plain } => take_atomic(plain, self, budget),
        };
        (!cut.is_empty()).then_some(cut)
    }

    /// Substitute tokens back, including tokens nested inside recorded spans.
    fn restore(&self, text: &str) -> String {
        static TOKEN: OnceLock<Regex> = OnceLock::new();
        let token = cached(&TOKEN, "\u{E000}([0-9]+)\u{E001}");

        let mut out = text.to_string();
        // Each pass peels one nesting level; nesting never exceeds the span count.
        for _ in 0..=self.spans.len() {
            if !out.contains(TOKEN_OPEN) {
                break;
            }
            out = token
                .replace_all(&out, |caps: &Captures| {
                    caps[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| self.spans.get(i))
                        .map(|span| span.rendered.clone())
                        .unwrap_or_default()
                })
                .into_owned();
        }
        out
    }
}

/// Replace every supported construct with a token, in precedence order.
fn protect(text: &str, spans: &mut ProtectedSpans) -> String {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    static INLINE_CODE: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    static SPOILER: OnceLock<Regex> = OnceLock::new();
    static UNDERLINE: OnceLock<Regex> = OnceLock::new();
    static QUOTE: OnceLock<Regex> = OnceLock::new();

    let text = cached(&FENCED, r"(?s)```(.*?)```").replace_all(text, |caps: &Captures| {
        spans.protect_code("```", escape_code(&caps[1]))
    });

    let text = cached(&INLINE_CODE, r"`([^`]+)`").replace_all(&text, |caps: &Captures| {
        spans.protect_code("`", escape_code(&caps[1]))
    });

    let text = cached(&LINK, r"(?s)\[([^\]]+)\]\(([^)]+)\)").replace_all(&text, |caps: &Captures| {
        let label = escape_all(&caps[1]);
        let rendered = format!("[{label}]({})", escape_url(&caps[2]));
        spans.protect_markup(rendered, label)
    });

    let text = cached(&SPOILER, r"(?s)\|\|(.+?)\|\|").replace_all(&text, |caps: &Captures| {
        let inner = escape_all(&caps[1]);
        spans.protect_markup(format!("||{inner}||"), inner)
    });

    let text = cached(&UNDERLINE, r"__([^_]+)__").replace_all(&text, |caps: &Captures| {
        let inner = escape_all(&caps[1]);
        spans.protect_markup(format!("__{inner}__"), inner)
    });

    let text = protect_pair(&text, '_', PairRule::CLOSE_UNDOUBLED, spans);
    let text = protect_pair(&text, '*', PairRule::STRICT, spans);
    let text = protect_pair(&text, '~', PairRule::LOOSE, spans);

    cached(&QUOTE, r"(?m)^([ \t]*>+)")
        .replace_all(&text, |caps: &Captures| {
            spans.protect_markup(caps[1].to_string(), escape_all(&caps[1]))
        })
        .into_owned()
}

/// Where a single-character emphasis pair may not touch another delimiter.
#[derive(Debug, Clone, Copy)]
struct PairRule {
    /// Opening delimiter must not follow the same delimiter.
    open_undoubled: bool,
    /// Closing delimiter must not precede the same delimiter.
    close_undoubled: bool,
}

impl PairRule {
    const LOOSE: Self = Self {
        open_undoubled: false,
        close_undoubled: false,
    };
    const CLOSE_UNDOUBLED: Self = Self {
        open_undoubled: false,
        close_undoubled: true,
    };
    const STRICT: Self = Self {
        open_undoubled: true,
        close_undoubled: true,
    };
}

/// Protect `d…d` spans on a single line with non-empty interiors free of `d`.
fn protect_pair(text: &str, delim: char, rule: PairRule, spans: &mut ProtectedSpans) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let opens = chars[i] == delim && !(rule.open_undoubled && i > 0 && chars[i - 1] == delim);
        if opens {
            let mut j = i + 1;
            while j < chars.len() && chars[j] != delim && chars[j] != '\n' {
                j += 1;
            }
            let closes = j < chars.len()
                && chars[j] == delim
                && j > i + 1
                && !(rule.close_undoubled && chars.get(j + 1) == Some(&delim));
            if closes {
                let inner: String = chars[i + 1..j].iter().collect();
                let inner = escape_all(&inner);
                out.push_str(&spans.protect_markup(format!("{delim}{inner}{delim}"), inner));
                i = j + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Escape the last unescaped occurrence of each delimiter that appears an odd number of times.
pub fn balance_delimiters(text: &str) -> String {
    let mut out = text.to_string();
    for delim in PAIRED_DELIMITERS {
        let positions = markup_positions(&out, delim);
        if positions.len() % 2 == 1 {
            if let Some(&last) = positions.last() {
                out.insert(last, '\\');
            }
        }
    }
    out
}

/// Byte offsets of unescaped `delim` characters that act as markup.
///
/// Code spans and link destinations are skipped.
fn markup_positions(text: &str, delim: char) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut escaped = false;
    let mut in_code = false;
    let mut in_url = false;
    let mut prev: Option<char> = None;

    for (idx, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            prev = None;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if in_url {
            // a backtick is literal in a destination
            in_url = ch != ')';
        } else if ch == '`' {
            in_code = !in_code;
        } else if in_code {
            // code content is never markup
        } else if ch == '(' && prev == Some(']') {
            in_url = true;
        } else if ch == delim {
            positions.push(idx);
        }
        prev = Some(ch);
    }
    positions
}

/// Take whole pieces of `escaped` while their rendered width fits `budget`.
///
/// A piece is a token (measured fully restored), an escape pair, or a plain
/// character, so the cut never lands after a lone `\`. The first token that
/// does not fit is shortened into the remaining budget and ends the cut.
fn take_atomic(escaped: &str, spans: &ProtectedSpans, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    let mut chars = escaped.chars();

    while let Some(ch) = chars.next() {
        let mut piece = String::from(ch);
        let width = match ch {
            TOKEN_OPEN => {
                for next in chars.by_ref() {
                    piece.push(next);
                    if next == TOKEN_CLOSE {
                        break;
                    }
                }
                spans.restore(&piece).chars().count()
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    piece.push(next);
                }
                piece.chars().count()
            }
            _ => 1,
        };

        if used + width > budget {
            if ch == TOKEN_OPEN {
                if let Some(short) = spans.shorten(&piece, budget - used) {
                    out.push_str(&short);
                }
            }
            break;
        }
        used += width;
        out.push_str(&piece);
    }
    out
}

/// Longest prefix of `text` within `budget` chars that keeps `\x` pairs whole.
fn take_escape_units(text: &str, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        let mut unit = String::from(ch);
        if ch == '\\' {
            if let Some(next) = chars.next() {
                unit.push(next);
            }
        }
        let width = unit.chars().count();
        if used + width > budget {
            break;
        }
        used += width;
        out.push_str(&unit);
    }
    out
}
