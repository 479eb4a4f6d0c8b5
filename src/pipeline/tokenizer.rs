//! T1 — Tokenizer: splits a raw SHDR line on `|`, honoring quoted and
//! braced spans so a value may itself contain `|` (spec.md §4.5 T1), as a
//! hand-rolled scanner rather than a regex engine.

use super::{PipelineContext, PipelineEntity, Transform};

/// T1: splits raw adapter text into pipe-delimited tokens.
#[derive(Debug, Default)]
pub struct Tokenizer;

impl Tokenizer {
    /// Builds the tokenizer stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for Tokenizer {
    fn name(&self) -> &str {
        "Tokenizer"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::RawText(_))
    }

    fn apply(&mut self, entity: PipelineEntity, _ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        match entity {
            PipelineEntity::RawText(text) => Some(PipelineEntity::Tokens(tokenize(&text))),
            other => Some(other),
        }
    }
}

/// Splits `line` on `|`, treating `"…"`, `'…'`, and `{…}` as quoted spans
/// whose matching terminator may be escaped with a backslash and whose
/// interior `|` does not split the token (spec.md §4.5 T1, §6).
pub fn tokenize(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(term) => {
                if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        if next == term || next == '\\' {
                            current.push(next);
                            chars.next();
                            continue;
                        }
                    }
                    current.push(c);
                } else if c == term {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '|' => {
                    tokens.push(std::mem::take(&mut current));
                }
                '"' | '\'' => {
                    quote = Some(c);
                }
                '{' => {
                    quote = Some('}');
                }
                _ => current.push(c),
            },
        }
    }
    tokens.push(current);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_pipe() {
        assert_eq!(
            tokenize("2021-01-01T00:00:00Z|Xact|100"),
            vec!["2021-01-01T00:00:00Z", "Xact", "100"]
        );
    }

    #[test]
    fn quoted_span_protects_interior_pipes() {
        assert_eq!(
            tokenize(r#"ts|msg|"hello | world""#),
            vec!["ts", "msg", "hello | world"]
        );
    }

    #[test]
    fn braced_span_protects_interior_pipes() {
        assert_eq!(tokenize("ts|vals|{1|2|3}"), vec!["ts", "vals", "1|2|3"]);
    }

    #[test]
    fn backslash_escapes_the_matching_terminator() {
        assert_eq!(
            tokenize(r#"ts|msg|"say \"hi\"""#),
            vec!["ts", "msg", "say \"hi\""]
        );
    }

    #[test]
    fn trailing_crlf_is_stripped() {
        assert_eq!(tokenize("ts|Xact|100\r\n"), vec!["ts", "Xact", "100"]);
    }
}
