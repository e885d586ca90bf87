//! Heading-aware passage chunking.
//!
//! Each page is split into paragraph blocks on blank lines. A block that
//! fits within the word limit becomes one chunk as-is, which keeps
//! structured sections (a *Nidana* or *Chikitsa* block, a recipe) together.
//! Larger blocks are split on sentence boundaries into windows of at most
//! `max_words` words, where each new window is seeded with the trailing
//! sentences of the previous one that fit in the overlap budget.
//!
//! A single sentence longer than `max_words` is emitted as its own
//! oversized chunk; text is never truncated or dropped.
//!
//! ```
//! use vedarag::chunking::{Chunker, ChunkerConfig};
//! use vedarag::corpus::{Document, Page};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let doc = Document {
//!     doc_id: "doc1".into(),
//!     pages: vec![Page { page: 1, text: "Pitta is hot and sharp.".into() }],
//! };
//! let chunks = chunker.chunk(&doc);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc1__p1__c0");
//! ```

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    corpus::Document,
    error::{Error, Result},
    text_util::{content_hash, split_paragraphs, split_sentences, word_count},
};

/// Default upper bound on words per chunk.
pub const DEFAULT_MAX_WORDS: usize = 150;

/// Default overlap budget in words between consecutive windows.
pub const DEFAULT_OVERLAP_WORDS: usize = 80;

/// Structural section names of classical Ayurvedic texts and the generic
/// headings found in modern commentaries.
pub const AYURVEDA_HEADINGS: &[&str] = &[
    // classical structure
    "Nidana",
    "Hetu",
    "Purvarupa",
    "Rupa",
    "Samprapti",
    "Lakshana",
    "Chikitsa",
    "Pathya",
    "Apathya",
    "Upashaya",
    "Anupashaya",
    // doshas
    "Vata",
    "Pitta",
    "Kapha",
    "Tridosha",
    "Dosha",
    "Prakriti",
    "Vikriti",
    // dietetics and preparations
    "Ahara",
    "Vihara",
    "Bhojana",
    "Anna",
    "Peya",
    "Yusha",
    "Kadha",
    "Kwath",
    "Ghrita",
    "Taila",
    "Lepa",
    "Asava",
    "Arishta",
    "Churna",
    // properties
    "Rasa",
    "Guna",
    "Virya",
    "Vipaka",
    "Prabhava",
    // regimen
    "Dinacharya",
    "Ritucharya",
    "Sadvritta",
    "Achar Rasayana",
    // yoga
    "Yoga",
    "Asana",
    "Pranayama",
    "Dhyana",
    "Meditation",
    "Bandha",
    "Mudra",
    "Exercises",
    "Workouts",
    // diseases
    "Jwara",
    "Atisara",
    "Grahani",
    "Arsha",
    "Kasa",
    "Shwasa",
    "Prameha",
    "Amlapitta",
    // general
    "Introduction",
    "Overview",
    "Conclusion",
    "Summary",
    "Indications",
    "Contraindications",
];

/// The atomic retrieval unit.
///
/// Serialized as one line of `chunks_meta.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{doc_id}__p{page}__c{seq}`, stable while chunking parameters are.
    pub id: String,
    pub doc_id: String,
    #[serde(default)]
    pub page: u32,
    pub text: String,
    pub word_count: usize,
    /// SHA-256 of `text`, hex encoded.
    #[serde(rename = "hash")]
    pub content_hash: String,
    /// Domain heading the source block opened with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Chunk {
    pub fn new(
        doc_id: &str,
        page: u32,
        seq: usize,
        text: String,
        section: Option<String>,
    ) -> Self {
        Self {
            id: chunk_id(doc_id, page, seq),
            doc_id: doc_id.to_string(),
            page,
            word_count: word_count(&text),
            content_hash: content_hash(&text),
            text,
            section,
        }
    }
}

/// Build the deterministic chunk id for a page-local sequence number.
pub fn chunk_id(doc_id: &str, page: u32, seq: usize) -> String {
    format!("{doc_id}__p{page}__c{seq}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub max_words: usize,
    pub overlap_words: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
            overlap_words: DEFAULT_OVERLAP_WORDS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    headings: Vec<String>,
    heading_pattern: Option<Regex>,
}

impl Chunker {
    /// Chunker over the built-in Ayurveda heading vocabulary.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        Self::with_headings(config, AYURVEDA_HEADINGS.iter().copied())
    }

    /// Chunker with a custom heading vocabulary.
    ///
    /// A block is treated as a heading block when its leading text matches
    /// one of the headings case-insensitively at a word boundary.
    pub fn with_headings<'a>(
        config: ChunkerConfig,
        headings: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        if config.max_words == 0 {
            return Err(Error::Config("max_words must be at least 1".into()));
        }

        let headings: Vec<String> =
            headings.into_iter().map(str::to_string).collect();
        let heading_pattern = if headings.is_empty() {
            None
        } else {
            let alternation = headings
                .iter()
                .map(|h| regex::escape(h))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = RegexBuilder::new(&format!(r"^\s*({alternation})\b"))
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    Error::Config(format!("invalid heading vocabulary: {e}"))
                })?;
            Some(pattern)
        };

        Ok(Self {
            config,
            headings,
            heading_pattern,
        })
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Chunk every page of a document in order.
    ///
    /// Sequence numbers are page-local and continue across repeated page
    /// numbers, so a spread extracted as two records for one page still
    /// yields unique ids. Empty pages produce no chunks.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let mut next_seq: HashMap<u32, usize> = HashMap::new();
        let mut chunks = Vec::new();

        for page in &doc.pages {
            let seq = next_seq.entry(page.page).or_insert(0);
            for (text, section) in self.split_page(&page.text) {
                chunks.push(Chunk::new(&doc.doc_id, page.page, *seq, text, section));
                *seq += 1;
            }
        }

        chunks
    }

    /// Split one page into passage texts, each tagged with the heading
    /// its block opened with.
    pub fn split_page(&self, text: &str) -> Vec<(String, Option<String>)> {
        let mut out = Vec::new();

        for block in split_paragraphs(text) {
            let section = self.heading_of(&block);
            if word_count(&block) <= self.config.max_words {
                out.push((block, section));
                continue;
            }

            let sentences = split_sentences(&block);
            for window in sentence_windows(
                &sentences,
                self.config.max_words,
                self.config.overlap_words,
            ) {
                out.push((window.join(" "), section.clone()));
            }
        }

        out
    }

    /// The vocabulary heading `block` starts with, in its canonical form.
    pub fn heading_of(&self, block: &str) -> Option<String> {
        let caps = self.heading_pattern.as_ref()?.captures(block)?;
        let matched = caps.get(1)?.as_str();
        self.headings
            .iter()
            .find(|h| h.eq_ignore_ascii_case(matched))
            .cloned()
            .or_else(|| Some(matched.to_string()))
    }
}

/// Group sentences into windows of at most `max_words` words.
///
/// When the next sentence does not fit, the current window is closed and
/// the next one is seeded with the longest run of trailing sentences whose
/// total stays within `min(overlap_words, max_words - words(next))`. The
/// seed therefore never pushes a window past `max_words`. A sentence that
/// alone exceeds `max_words` ends up alone in its window.
pub fn sentence_windows(
    sentences: &[String],
    max_words: usize,
    overlap_words: usize,
) -> Vec<Vec<String>> {
    let mut windows = Vec::new();
    let mut current: Vec<&String> = Vec::new();
    let mut current_words = 0usize;

    for sentence in sentences {
        let words = word_count(sentence);

        if current_words + words <= max_words {
            current.push(sentence);
            current_words += words;
            continue;
        }

        if !current.is_empty() {
            windows.push(current.iter().map(|s| (*s).clone()).collect());
        }

        let budget = overlap_words.min(max_words.saturating_sub(words));
        let mut seed_len = 0;
        let mut seed_words = 0;
        for prev in current.iter().rev() {
            let w = word_count(prev);
            if seed_words + w > budget {
                break;
            }
            seed_words += w;
            seed_len += 1;
        }

        let keep_from = current.len() - seed_len;
        current.drain(..keep_from);
        current.push(sentence);
        current_words = seed_words + words;
    }

    if !current.is_empty() {
        windows.push(current.iter().map(|s| (*s).clone()).collect());
    }

    windows
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::corpus::Page;

    fn doc(pages: &[(u32, &str)]) -> Document {
        Document {
            doc_id: "doc1".into(),
            pages: pages
                .iter()
                .map(|(page, text)| Page {
                    page: *page,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    fn small_chunker(max_words: usize, overlap_words: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            max_words,
            overlap_words,
        })
        .unwrap()
    }

    fn sentence(tag: usize, words: usize) -> String {
        let body = (0..words.saturating_sub(1))
            .map(|i| format!("w{tag}x{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        if body.is_empty() {
            format!("s{tag}.")
        } else {
            format!("S{tag} {body}.")
        }
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = small_chunker(10, 4);
        assert!(chunker.chunk(&doc(&[])).is_empty());
        assert!(chunker.chunk(&doc(&[(1, ""), (2, "  \n\n ")])).is_empty());
    }

    #[test]
    fn short_blocks_stay_intact() {
        let chunker = small_chunker(50, 10);
        let text = "Nidana\nExcess spicy food aggravates Pitta.\n\nDrink cool water.";
        let chunks = chunker.chunk(&doc(&[(3, text)]));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "doc1__p3__c0");
        assert_eq!(chunks[0].text, "Nidana\nExcess spicy food aggravates Pitta.");
        assert_eq!(chunks[0].section.as_deref(), Some("Nidana"));
        assert_eq!(chunks[1].id, "doc1__p3__c1");
        assert_eq!(chunks[1].section, None);
        assert_eq!(chunks[1].word_count, 3);
        assert_eq!(chunks[1].content_hash, content_hash("Drink cool water."));
    }

    #[test]
    fn heading_match_is_case_insensitive_and_word_bounded() {
        let chunker = small_chunker(50, 10);
        assert_eq!(
            chunker.heading_of("  CHIKITSA: rest and fasting").as_deref(),
            Some("Chikitsa")
        );
        assert_eq!(
            chunker.heading_of("achar rasayana is conduct").as_deref(),
            Some("Achar Rasayana")
        );
        // "Vatasana" is not the heading "Vata".
        assert_eq!(chunker.heading_of("Vatasana pose"), None);
        assert_eq!(chunker.heading_of("Treatment of Vata"), None);
    }

    #[test]
    fn oversized_block_is_sentence_split_with_overlap() {
        let chunker = small_chunker(10, 4);
        let text = [sentence(1, 4), sentence(2, 4), sentence(3, 4), sentence(4, 4)]
            .join(" ");
        let chunks = chunker.chunk(&doc(&[(1, &text)]));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, format!("{} {}", sentence(1, 4), sentence(2, 4)));
        assert_eq!(chunks[1].text, format!("{} {}", sentence(2, 4), sentence(3, 4)));
        assert_eq!(chunks[2].text, format!("{} {}", sentence(3, 4), sentence(4, 4)));
        assert!(chunks.iter().all(|c| c.word_count <= 10));
    }

    #[test]
    fn single_long_sentence_is_its_own_chunk() {
        let chunker = small_chunker(5, 3);
        let text = [sentence(1, 2), sentence(2, 12), sentence(3, 2)].join(" ");
        let chunks = chunker.chunk(&doc(&[(1, &text)]));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, sentence(2, 12));
        assert_eq!(chunks[1].word_count, 12);
        let all: String = chunks.iter().map(|c| c.text.clone()).collect::<Vec<_>>().join(" ");
        assert!(all.contains(&sentence(1, 2)));
        assert!(all.contains(&sentence(3, 2)));
    }

    #[test]
    fn repeated_page_numbers_continue_sequence() {
        let chunker = small_chunker(50, 10);
        let chunks = chunker.chunk(&doc(&[(7, "Left half."), (7, "Right half.")]));
        let ids: Vec<_> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["doc1__p7__c0", "doc1__p7__c1"]);
    }

    #[test]
    fn chunk_ids_are_stable_across_runs() {
        let chunker = small_chunker(8, 3);
        let text = "Vata is dry. Vata is cold. Vata is light. Vata moves. Vata is rough.";
        let a = chunker.chunk(&doc(&[(2, text)]));
        let b = chunker.chunk(&doc(&[(2, text)]));
        assert_eq!(a, b);
    }

    #[test]
    fn zero_max_words_is_rejected() {
        let result = Chunker::new(ChunkerConfig {
            max_words: 0,
            overlap_words: 0,
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn chunk_serializes_hash_field() {
        let chunk = Chunk::new("doc1", 1, 0, "Ghee nourishes ojas.".into(), None);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["id"], "doc1__p1__c0");
        assert_eq!(json["hash"], content_hash("Ghee nourishes ojas."));
        assert!(json.get("section").is_none());
    }

    proptest! {
        #[test]
        fn windows_respect_size_limit(
            lens in prop::collection::vec(1usize..30, 0..40),
            max_words in 5usize..60,
            overlap_words in 0usize..40,
        ) {
            let sentences: Vec<String> =
                lens.iter().enumerate().map(|(i, n)| sentence(i, *n)).collect();
            for window in sentence_windows(&sentences, max_words, overlap_words) {
                let words: usize = window.iter().map(|s| word_count(s)).sum();
                prop_assert!(
                    words <= max_words || window.len() == 1,
                    "window of {} sentences has {} words", window.len(), words
                );
            }
        }

        #[test]
        fn windows_overlap_on_trailing_sentences(
            lens in prop::collection::vec(1usize..20, 1..40),
            max_words in 10usize..50,
            overlap_words in 0usize..30,
        ) {
            let sentences: Vec<String> =
                lens.iter().enumerate().map(|(i, n)| sentence(i, *n)).collect();
            let windows = sentence_windows(&sentences, max_words, overlap_words);

            for pair in windows.windows(2) {
                let (prev, next) = (&pair[0], &pair[1]);
                // The first sentence of `next` that is not carried over.
                let carried = next
                    .iter()
                    .take_while(|s| prev.contains(s))
                    .count();
                prop_assert!(carried < next.len());
                let incoming = word_count(&next[carried]);
                let budget = overlap_words.min(max_words.saturating_sub(incoming));

                // Carried sentences are exactly the trailing ones of `prev`.
                prop_assert_eq!(&next[..carried], &prev[prev.len() - carried..]);
                let carried_words: usize =
                    next[..carried].iter().map(|s| word_count(s)).sum();
                prop_assert!(carried_words <= budget);

                // And the carry is maximal: one more trailing sentence would
                // not have fit.
                if carried < prev.len() {
                    let extra = word_count(&prev[prev.len() - carried - 1]);
                    prop_assert!(carried_words + extra > budget);
                }
            }
        }

        #[test]
        fn every_sentence_is_emitted(
            lens in prop::collection::vec(1usize..25, 0..30),
            max_words in 5usize..40,
            overlap_words in 0usize..20,
        ) {
            let sentences: Vec<String> =
                lens.iter().enumerate().map(|(i, n)| sentence(i, *n)).collect();
            let windows = sentence_windows(&sentences, max_words, overlap_words);
            for s in &sentences {
                prop_assert!(windows.iter().any(|w| w.contains(s)));
            }
        }
    }
}
