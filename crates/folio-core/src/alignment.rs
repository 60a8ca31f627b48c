// ABOUTME: Alignment engine reconciling a provider's word tokens with the paragraph's own original text.
// ABOUTME: Produces an interleaving of plain and translated spans with character offsets into the original.

use serde::{Deserialize, Serialize};

use crate::model::SentenceWordTranslation;
use crate::translation::TranslatedWord;

/// Tokens of this many characters or fewer must match exactly (ignoring case).
const EXACT_MATCH_MAX_LEN: usize = 2;

/// Longer tokens match when the case-insensitive edit distance is below this.
const MAX_EDIT_DISTANCE: usize = 2;

/// Anything that can be aligned against original text.
pub trait AlignToken {
    fn surface(&self) -> &str;
    fn is_punctuation(&self) -> bool;
}

impl AlignToken for TranslatedWord {
    fn surface(&self) -> &str {
        &self.original
    }

    fn is_punctuation(&self) -> bool {
        self.is_punctuation
    }
}

impl AlignToken for SentenceWordTranslation {
    fn surface(&self) -> &str {
        &self.original
    }

    fn is_punctuation(&self) -> bool {
        self.is_punctuation
    }
}

/// Position of a token in the provider's sentence/word structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub sentence: usize,
    pub word: usize,
}

/// A contiguous run of the original text. `start` and `end` are character
/// (not byte) offsets, end-exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Span {
    Plain {
        start: usize,
        end: usize,
        text: String,
    },
    Word {
        start: usize,
        end: usize,
        text: String,
        token: TokenRef,
        /// Characters skipped between the previous cursor and this match.
        offset: usize,
    },
}

impl Span {
    pub fn start(&self) -> usize {
        match self {
            Span::Plain { start, .. } | Span::Word { start, .. } => *start,
        }
    }

    pub fn end(&self) -> usize {
        match self {
            Span::Plain { end, .. } | Span::Word { end, .. } => *end,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Span::Plain { text, .. } | Span::Word { text, .. } => text,
        }
    }
}

/// Result of aligning one paragraph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    pub spans: Vec<Span>,
    /// Non-punctuation tokens that found no match in the remaining text.
    /// They contribute no span; alignment continues from the same cursor.
    pub unmatched: Vec<TokenRef>,
}

impl Alignment {
    /// Concatenation of every span; equals the original text.
    pub fn rendered(&self) -> String {
        self.spans.iter().map(Span::text).collect()
    }

    pub fn word_spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter().filter(|s| matches!(s, Span::Word { .. }))
    }
}

/// Align `sentences` (in provider order) against `original`.
///
/// Walks the original with a cursor. For every non-punctuation token, the
/// shortest forward offset whose window matches the token wins; the skipped
/// text becomes a plain span and the window a word span. Punctuation tokens
/// advance the token bookkeeping only.
pub fn align<W: AlignToken>(original: &str, sentences: &[&[W]]) -> Alignment {
    let chars: Vec<char> = original.chars().collect();
    let mut cursor = 0usize;
    let mut alignment = Alignment::default();

    for (sentence_idx, words) in sentences.iter().enumerate() {
        for (word_idx, word) in words.iter().enumerate() {
            if word.is_punctuation() {
                continue;
            }
            let token = TokenRef {
                sentence: sentence_idx,
                word: word_idx,
            };
            let needle: Vec<char> = word.surface().trim().chars().collect();
            if needle.is_empty() {
                alignment.unmatched.push(token);
                continue;
            }

            match find_match(&chars, cursor, &needle) {
                Some(offset) => {
                    let start = cursor + offset;
                    let end = start + needle.len();
                    if offset > 0 {
                        alignment.spans.push(Span::Plain {
                            start: cursor,
                            end: start,
                            text: chars[cursor..start].iter().collect(),
                        });
                    }
                    alignment.spans.push(Span::Word {
                        start,
                        end,
                        text: chars[start..end].iter().collect(),
                        token,
                        offset,
                    });
                    cursor = end;
                }
                None => {
                    tracing::debug!(
                        sentence = sentence_idx,
                        word = word_idx,
                        token = %word.surface(),
                        cursor,
                        "token not found in remaining original text"
                    );
                    alignment.unmatched.push(token);
                }
            }
        }
    }

    if cursor < chars.len() {
        alignment.spans.push(Span::Plain {
            start: cursor,
            end: chars.len(),
            text: chars[cursor..].iter().collect(),
        });
    }

    alignment
}

/// Shortest offset from `cursor` at which `needle` matches, if any.
fn find_match(haystack: &[char], cursor: usize, needle: &[char]) -> Option<usize> {
    let remaining = haystack.len().checked_sub(cursor)?;
    if needle.len() > remaining {
        return None;
    }
    let needle_lower = lowercase(needle);
    (0..=remaining - needle.len()).find(|&offset| {
        let window = &haystack[cursor + offset..cursor + offset + needle.len()];
        tokens_match(&lowercase(window), &needle_lower, needle.len())
    })
}

fn tokens_match(window: &[char], needle: &[char], needle_len: usize) -> bool {
    if needle_len <= EXACT_MATCH_MAX_LEN {
        window == needle
    } else {
        levenshtein(window, needle) < MAX_EDIT_DISTANCE
    }
}

fn lowercase(chars: &[char]) -> Vec<char> {
    chars.iter().flat_map(|c| c.to_lowercase()).collect()
}

/// Classic two-row edit distance over characters.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
