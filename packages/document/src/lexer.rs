//! Lexer for editor-surface HTML using logos
//!
//! Only the coarse shape of the markup matters here: tags, text and
//! declarations. Attributes are kept inside the raw tag slice and ignored
//! by the parser.

use logos::Logos;

/// Token types for HTML markup
#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token<'src> {
    // Comments, doctype and other <!...> declarations
    #[regex(r"<![^>]*>", |lex| lex.slice())]
    Declaration(&'src str),

    #[regex(r"</[a-zA-Z][a-zA-Z0-9]*[ \t\r\n]*>", |lex| lex.slice())]
    CloseTag(&'src str),

    #[regex(r"<[a-zA-Z][a-zA-Z0-9]*([ \t\r\n/][^>]*)?>", |lex| lex.slice())]
    OpenTag(&'src str),

    #[regex(r"[^<]+", |lex| lex.slice())]
    Text(&'src str),

    // A '<' that does not start a tag is literal text
    #[token("<")]
    StrayAngle,
}

/// Span information for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

/// A token with its span
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken<'src> {
    pub token: Token<'src>,
    pub span: TokenSpan,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub span: TokenSpan,
    pub message: String,
}

/// Lex markup into tokens with spans
pub fn lex(source: &str) -> impl Iterator<Item = Result<SpannedToken<'_>, LexError>> + '_ {
    Token::lexer(source).spanned().map(|(result, span)| {
        let span = TokenSpan {
            start: span.start,
            end: span.end,
        };
        match result {
            Ok(token) => Ok(SpannedToken { token, span }),
            Err(_) => Err(LexError {
                span,
                message: "Unexpected character".to_string(),
            }),
        }
    })
}

/// Lowercased tag name of an open or close tag slice
pub fn tag_name(raw: &str) -> String {
    raw.trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Whether an open tag slice is written in self-closing form (`<br/>`)
pub fn is_self_closing(raw: &str) -> bool {
    raw.trim_end_matches('>').trim_end().ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token<'_>> {
        lex(source).filter_map(|r| r.ok()).map(|t| t.token).collect()
    }

    #[test]
    fn test_lex_tags_and_text() {
        let toks = tokens("<p class=\"x\">Hi</p>");
        assert_eq!(
            toks,
            vec![
                Token::OpenTag("<p class=\"x\">"),
                Token::Text("Hi"),
                Token::CloseTag("</p>"),
            ]
        );
    }

    #[test]
    fn test_lex_stray_angle() {
        let toks = tokens("a < b");
        assert_eq!(
            toks,
            vec![Token::Text("a "), Token::StrayAngle, Token::Text(" b")]
        );
    }

    #[test]
    fn test_lex_comment() {
        let toks = tokens("<!-- note --><br/>");
        assert_eq!(toks.len(), 2);
        assert!(matches!(toks[0], Token::Declaration(_)));
        assert_eq!(toks[1], Token::OpenTag("<br/>"));
    }

    #[test]
    fn test_tag_name_helpers() {
        assert_eq!(tag_name("<STRONG>"), "strong");
        assert_eq!(tag_name("</h2 >"), "h2");
        assert!(is_self_closing("<br />"));
        assert!(!is_self_closing("<p>"));
    }
}
