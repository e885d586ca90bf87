use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};

use crate::{
    fuzzy::{partial_ratio, ratio},
    retriever::Candidate,
};

/// Words that mark a diet, remedy or lifestyle question.
pub const LIFESTYLE_TRIGGERS: &[&str] = &[
    "food", "diet", "eat", "eating", "meal", "breakfast", "lunch", "dinner",
    "snack", "recipe", "cook", "cooking", "prepare", "kadha", "decoction",
    "churna", "lehya", "yoga", "asana", "pranayama", "exercise", "workout",
    "vihara", "ahara", "balancing", "pacifying", "increase", "reduce",
    "remedy", "herb",
];

/// Named categories matched with a stricter threshold.
pub const DOSHAS: &[&str] = &["vata", "pitta", "kapha"];

/// Whole salutations. A query is a greeting only when all of it, not just a
/// word inside it, is close to one of these.
pub const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "namaste", "namaste ji", "hi there", "hello there",
    "good morning", "good evening",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    /// A bare salutation; answered without retrieval.
    Greeting,
    /// Diet and lifestyle questions, where varied answers are wanted.
    Exploratory,
    /// Everything else. Selection is deterministic.
    Factual,
}

/// Guidance handed to the answer generator with the selected passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Varied,
    Precise,
    /// Send the text as the reply, no generation needed.
    Greet,
    /// Nothing relevant was retrieved; send the text as the reply.
    NothingFound,
}

impl Instruction {
    pub fn text(self) -> &'static str {
        match self {
            Instruction::Varied => {
                "Suggest varied options. If the user asks for a specific number \
                 (e.g., 'only one'), strictly follow that quantity. If no quantity \
                 is mentioned, provide 2-3 diverse options. Keep food suggestions \
                 short but detailed and informative, but be very detailed and step \
                 wise for recipes."
            }
            Instruction::Precise => {
                "Answer accurately using only the provided context. Be precise, \
                 detailed, and compassionate."
            }
            Instruction::Greet => {
                "Namaste. I am your Ayurveda care assistant. How can I support your \
                 wellness today?"
            }
            Instruction::NothingFound => {
                "I'm sorry, I couldn't find specific Ayurvedic information on that. \
                 Could you share more details or ask something else?"
            }
        }
    }
}

/// How wide to retrieve and rerank for one query class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalBudget {
    pub top_k: usize,
    pub keep_n: usize,
}

/// Final passages plus the instruction for the answer generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub class: QueryClass,
    pub instruction: Instruction,
    pub passages: Vec<Candidate>,
}

/// Query classification thresholds and per-class retrieval widths.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    pub factual_top_k: usize,
    pub factual_keep_n: usize,
    pub factual_final: usize,
    pub exploratory_top_k: usize,
    pub exploratory_keep_n: usize,
    pub sample_min: usize,
    pub sample_max: usize,
    /// Minimum partial match (0-100) against a trigger word.
    pub trigger_threshold: f64,
    /// Minimum partial match (0-100) against a category name.
    pub category_threshold: f64,
    /// Whole-query match (0-100) a greeting must score strictly above.
    pub greeting_threshold: f64,
    pub triggers: Vec<String>,
    pub categories: Vec<String>,
    pub greetings: Vec<String>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            factual_top_k: 4,
            factual_keep_n: 4,
            factual_final: 4,
            exploratory_top_k: 15,
            exploratory_keep_n: 10,
            sample_min: 3,
            sample_max: 5,
            trigger_threshold: 75.0,
            category_threshold: 85.0,
            greeting_threshold: 88.0,
            triggers: owned(LIFESTYLE_TRIGGERS),
            categories: owned(DOSHAS),
            greetings: owned(GREETINGS),
        }
    }
}

impl SelectionPolicy {
    pub fn classify(&self, query: &str) -> QueryClass {
        if self.is_greeting(query) {
            QueryClass::Greeting
        } else if self.is_exploratory(query) {
            QueryClass::Exploratory
        } else {
            QueryClass::Factual
        }
    }

    /// Whether the query fuzzily mentions a trigger word or a category.
    pub fn is_exploratory(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.triggers
            .iter()
            .any(|t| partial_ratio(t, &q) >= self.trigger_threshold)
            || self
                .categories
                .iter()
                .any(|c| partial_ratio(c, &q) >= self.category_threshold)
    }

    /// Whether the whole query, punctuation aside, is a salutation.
    pub fn is_greeting(&self, query: &str) -> bool {
        let q = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        !q.is_empty()
            && self
                .greetings
                .iter()
                .any(|g| ratio(g, &q) > self.greeting_threshold)
    }

    pub fn budget(&self, class: QueryClass) -> RetrievalBudget {
        match class {
            QueryClass::Greeting => RetrievalBudget { top_k: 0, keep_n: 0 },
            QueryClass::Exploratory => RetrievalBudget {
                top_k: self.exploratory_top_k,
                keep_n: self.exploratory_keep_n,
            },
            QueryClass::Factual => RetrievalBudget {
                top_k: self.factual_top_k,
                keep_n: self.factual_keep_n,
            },
        }
    }

    /// Pick the passages handed to the answer generator.
    ///
    /// Factual queries take the top `factual_final` passages in rank order.
    /// Exploratory queries take a random subset of between `sample_min` and
    /// `sample_max` passages, kept in rank order, drawn from `rng`.
    pub fn select<R: Rng + ?Sized>(
        &self,
        reranked: Vec<Candidate>,
        class: QueryClass,
        rng: &mut R,
    ) -> Selection {
        if class == QueryClass::Greeting {
            return Selection {
                class,
                instruction: Instruction::Greet,
                passages: Vec::new(),
            };
        }
        if reranked.is_empty() {
            return Selection {
                class,
                instruction: Instruction::NothingFound,
                passages: reranked,
            };
        }

        match class {
            QueryClass::Exploratory => Selection {
                class,
                instruction: Instruction::Varied,
                passages: self.sample(reranked, rng),
            },
            _ => {
                let mut passages = reranked;
                passages.truncate(self.factual_final.max(1));
                Selection {
                    class,
                    instruction: Instruction::Precise,
                    passages,
                }
            }
        }
    }

    fn sample<R: Rng + ?Sized>(
        &self,
        pool: Vec<Candidate>,
        rng: &mut R,
    ) -> Vec<Candidate> {
        let lo = self.sample_min.min(self.sample_max).max(1);
        let hi = self.sample_max.max(lo);
        let k = rng.random_range(lo..=hi).min(pool.len());

        let mut picked = index::sample(rng, pool.len(), k).into_vec();
        picked.sort_unstable();

        let mut slots: Vec<Option<Candidate>> = pool.into_iter().map(Some).collect();
        picked
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{chunking::Chunk, retriever::RetrievalSource};

    fn pool(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let mut c = Candidate::new(
                    Chunk::new("doc", 1, i, format!("passage {i}"), None),
                    RetrievalSource::Lexical,
                    0.0,
                );
                c.rerank_score = Some(1.0 - i as f32 / 100.0);
                c
            })
            .collect()
    }

    fn ids(selection: &Selection) -> Vec<String> {
        selection.passages.iter().map(|c| c.chunk.id.clone()).collect()
    }

    #[test]
    fn classifies_lifestyle_queries() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.classify("foods for pitta"), QueryClass::Exploratory);
        assert_eq!(policy.classify("A good breakfast?"), QueryClass::Exploratory);
        assert_eq!(policy.classify("Kapha season tips"), QueryClass::Exploratory);
    }

    #[test]
    fn classifies_factual_queries() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.classify("what is ojas"), QueryClass::Factual);
        assert_eq!(policy.classify("define ojas"), QueryClass::Factual);
    }

    #[test]
    fn classifies_greetings() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.classify("Namaste"), QueryClass::Greeting);
        assert_eq!(policy.classify("hello there"), QueryClass::Greeting);
        assert_eq!(policy.classify("Good morning!"), QueryClass::Greeting);
        assert_eq!(policy.classify("helo"), QueryClass::Greeting);
        assert_ne!(
            policy.classify("hello, what is the cause of acidity in summer"),
            QueryClass::Greeting
        );
    }

    #[test]
    fn salutation_inside_a_question_is_not_a_greeting() {
        let policy = SelectionPolicy::default();
        for query in [
            "morning sickness",
            "chikitsa",
            "thin hair",
            "whey protein",
            "shirodhara therapy",
            "whey",
        ] {
            assert_ne!(policy.classify(query), QueryClass::Greeting, "{query}");
        }
    }

    #[test]
    fn thresholds_are_inclusive() {
        let score = partial_ratio("abcd", "abce");
        let mut policy = SelectionPolicy {
            triggers: vec!["abcd".into()],
            categories: vec![],
            trigger_threshold: score,
            ..SelectionPolicy::default()
        };
        assert!(policy.is_exploratory("abce"));

        policy.trigger_threshold = score + 0.01;
        assert!(!policy.is_exploratory("abce"));
    }

    #[test]
    fn budgets_follow_class() {
        let policy = SelectionPolicy::default();
        assert_eq!(policy.budget(QueryClass::Factual), RetrievalBudget {
            top_k: 4,
            keep_n: 4
        });
        assert_eq!(policy.budget(QueryClass::Exploratory), RetrievalBudget {
            top_k: 15,
            keep_n: 10
        });
    }

    #[test]
    fn factual_selection_is_deterministic() {
        let policy = SelectionPolicy::default();
        let mut rng = rand::rng();
        let a = policy.select(pool(10), QueryClass::Factual, &mut rng);
        let b = policy.select(pool(10), QueryClass::Factual, &mut rng);
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(ids(&a), vec![
            "doc__p1__c0",
            "doc__p1__c1",
            "doc__p1__c2",
            "doc__p1__c3"
        ]);
        assert_eq!(a.instruction, Instruction::Precise);
    }

    #[test]
    fn exploratory_selection_is_a_bounded_subset() {
        let policy = SelectionPolicy::default();
        let all: Vec<String> = pool(10).iter().map(|c| c.chunk.id.clone()).collect();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let s = policy.select(pool(10), QueryClass::Exploratory, &mut rng);
            let picked = ids(&s);
            assert!((3..=5).contains(&picked.len()));
            assert!(picked.iter().all(|id| all.contains(id)));
            // Rank order is kept.
            let positions: Vec<usize> = picked
                .iter()
                .map(|id| all.iter().position(|a| a == id).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(s.instruction, Instruction::Varied);
        }
    }

    #[test]
    fn exploratory_selection_varies_but_is_seed_stable() {
        let policy = SelectionPolicy::default();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            ids(&policy.select(pool(10), QueryClass::Exploratory, &mut rng))
        };
        assert_eq!(draw(42), draw(42));
        let distinct: std::collections::HashSet<Vec<String>> =
            (0..20).map(draw).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn small_pool_is_taken_whole() {
        let policy = SelectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        let s = policy.select(pool(2), QueryClass::Exploratory, &mut rng);
        assert_eq!(s.passages.len(), 2);
    }

    #[test]
    fn empty_pool_means_nothing_found() {
        let policy = SelectionPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        let s = policy.select(vec![], QueryClass::Factual, &mut rng);
        assert!(s.passages.is_empty());
        assert_eq!(s.instruction, Instruction::NothingFound);
    }
}
