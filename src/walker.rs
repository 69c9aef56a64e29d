//! Locates translatable leaves inside dictionary documents and writes
//! translations back into them.
//!
//! Leaves are addressed by JSON pointer, so a [`WorkUnit`] can be carried
//! through the worker pool without holding a borrow of the document.

use crate::error::{PipelineError, PipelineResult};
use crate::fingerprint::Fingerprint;
use serde_json::{Map, Value};
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Index of the definitions list inside a term-bank entry array.
const TERM_BANK_DEFINITIONS: usize = 5;
const STRUCTURED_CONTENT: &str = "structured-content";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Yomitan term banks: a root array of entry arrays whose sixth element
    /// holds structured-content definitions.
    TermBank,
    /// JMdict-style word lists: `{"words": [...]}` with `sense[*].gloss[*]`.
    WordList,
}

impl FromStr for Dialect {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "term-bank" | "termbank" => Ok(Dialect::TermBank),
            "word-list" | "wordlist" => Ok(Dialect::WordList),
            other => Err(PipelineError::Configuration(format!(
                "unknown dialect '{}', expected term-bank or word-list",
                other
            ))),
        }
    }
}

/// A translatable leaf and where to find it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub text: String,
    pub fingerprint: Fingerprint,
    /// JSON pointer to the leaf from the document root
    pub pointer: String,
}

impl WorkUnit {
    fn new(text: &str, pointer: String) -> Self {
        Self {
            text: text.to_string(),
            fingerprint: Fingerprint::of(text),
            pointer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeWalker {
    dialect: Dialect,
    /// Gloss language tag kept by the word-list dialect (e.g. "eng")
    gloss_lang: String,
}

impl TreeWalker {
    pub fn new(dialect: Dialect, gloss_lang: impl Into<String>) -> Self {
        Self {
            dialect,
            gloss_lang: gloss_lang.into(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn entries_pointer(&self) -> &'static str {
        match self.dialect {
            Dialect::TermBank => "",
            Dialect::WordList => "/words",
        }
    }

    /// The top-level entry collection, or a malformed-input error naming `source`.
    pub fn entries<'a>(&self, document: &'a Value, source: &Path) -> PipelineResult<&'a [Value]> {
        let entries = match self.dialect {
            Dialect::TermBank => document.as_array(),
            Dialect::WordList => document.get("words").and_then(Value::as_array),
        };

        entries.map(Vec::as_slice).ok_or_else(|| {
            let expected = match self.dialect {
                Dialect::TermBank => "a top-level array of term entries",
                Dialect::WordList => "an object with a \"words\" array",
            };
            PipelineError::malformed(source, format!("expected {}", expected))
        })
    }

    /// Every translatable-position leaf in the entries of `range`, in document order.
    ///
    /// Entries that do not have the dialect's shape contribute nothing.
    pub fn collect_leaves(&self, document: &Value, range: Range<usize>) -> Vec<WorkUnit> {
        let entries = match self.dialect {
            Dialect::TermBank => document.as_array(),
            Dialect::WordList => document.get("words").and_then(Value::as_array),
        };
        let Some(entries) = entries else {
            return Vec::new();
        };

        let mut units = Vec::new();
        let end = range.end.min(entries.len());
        for index in range.start..end {
            let pointer = format!("{}/{}", self.entries_pointer(), index);
            let before = units.len();
            match self.dialect {
                Dialect::TermBank => collect_term_entry(&entries[index], &pointer, &mut units),
                Dialect::WordList => {
                    collect_word_entry(&entries[index], &pointer, &self.gloss_lang, &mut units)
                }
            }
            if units.len() == before {
                debug!("Entry {} has no translatable leaves", index);
            }
        }
        units
    }

    /// Walk the entries of `range` again and overwrite each leaf for which
    /// `resolver` knows a translation. Returns how many leaves changed.
    pub fn apply_translations<F>(&self, document: &mut Value, range: Range<usize>, resolver: F) -> usize
    where
        F: Fn(&WorkUnit) -> Option<String>,
    {
        let units = self.collect_leaves(document, range);
        let mut changed = 0;
        for unit in &units {
            let Some(translated) = resolver(unit) else {
                continue;
            };
            if let Some(leaf) = document.pointer_mut(&unit.pointer) {
                if leaf.as_str() != Some(translated.as_str()) {
                    *leaf = Value::String(translated);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Reshape word entries `[0, end)` into `{kanji, kana, meaning}` records.
    ///
    /// `meaning` keeps the non-blank glosses in the gloss language, which by
    /// now hold the translated text. Term banks are returned unchanged.
    pub fn condense(&self, document: &Value, end: usize) -> Value {
        if self.dialect != Dialect::WordList {
            return document.clone();
        }

        let entries = document
            .get("words")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let condensed = entries
            .iter()
            .take(end)
            .map(|entry| {
                let mut record = Map::new();
                record.insert("kanji".into(), Value::Array(texts_of(entry.get("kanji"))));
                record.insert("kana".into(), Value::Array(texts_of(entry.get("kana"))));
                record.insert("meaning".into(), Value::Array(self.meanings_of(entry)));
                Value::Object(record)
            })
            .collect();
        Value::Array(condensed)
    }

    fn meanings_of(&self, entry: &Value) -> Vec<Value> {
        glosses(entry)
            .filter(|gloss| gloss.get("lang").and_then(Value::as_str) == Some(self.gloss_lang.as_str()))
            .filter_map(|gloss| gloss.get("text").and_then(Value::as_str))
            .filter(|text| !text.trim().is_empty())
            .map(|text| Value::String(text.to_string()))
            .collect()
    }
}

fn collect_term_entry(entry: &Value, pointer: &str, out: &mut Vec<WorkUnit>) {
    let Some(definitions) = entry
        .as_array()
        .and_then(|fields| fields.get(TERM_BANK_DEFINITIONS))
        .and_then(Value::as_array)
    else {
        return;
    };

    for (index, definition) in definitions.iter().enumerate() {
        let is_structured = definition.get("type").and_then(Value::as_str) == Some(STRUCTURED_CONTENT);
        if !is_structured {
            continue;
        }
        if let Some(content) = definition.get("content") {
            let content_pointer = format!("{}/{}/{}/content", pointer, TERM_BANK_DEFINITIONS, index);
            collect_content(content, &content_pointer, out);
        }
    }
}

/// Descend through `content` fields. A string at a content field, or inside
/// a content array, is a leaf.
fn collect_content(value: &Value, pointer: &str, out: &mut Vec<WorkUnit>) {
    match value {
        Value::String(text) => out.push(WorkUnit::new(text, pointer.to_string())),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_content(item, &format!("{}/{}", pointer, index), out);
            }
        }
        Value::Object(node) => {
            if let Some(inner) = node.get("content") {
                collect_content(inner, &format!("{}/content", pointer), out);
            }
        }
        _ => {}
    }
}

fn collect_word_entry(entry: &Value, pointer: &str, gloss_lang: &str, out: &mut Vec<WorkUnit>) {
    let Some(senses) = entry.get("sense").and_then(Value::as_array) else {
        return;
    };

    for (sense_index, sense) in senses.iter().enumerate() {
        let Some(glosses) = sense.get("gloss").and_then(Value::as_array) else {
            continue;
        };
        for (gloss_index, gloss) in glosses.iter().enumerate() {
            if gloss.get("lang").and_then(Value::as_str) != Some(gloss_lang) {
                continue;
            }
            if let Some(text) = gloss.get("text").and_then(Value::as_str) {
                out.push(WorkUnit::new(
                    text,
                    format!("{}/sense/{}/gloss/{}/text", pointer, sense_index, gloss_index),
                ));
            }
        }
    }
}

fn glosses(entry: &Value) -> impl Iterator<Item = &Value> {
    entry
        .get("sense")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|sense| sense.get("gloss").and_then(Value::as_array))
        .flatten()
}

fn texts_of(list: Option<&Value>) -> Vec<Value> {
    list.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("text").cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn term_bank() -> Value {
        json!([
            ["食べる", "たべる", "v1", "v1", 100, [
                {"type": "structured-content", "content": [
                    {"tag": "span", "content": "to eat"},
                    {"tag": "ul", "content": [
                        {"tag": "li", "content": "to live on"},
                        {"tag": "li", "content": [{"tag": "span", "content": "to consume"}, "plain"]}
                    ]}
                ]},
                "a plain string definition",
                {"type": "image", "path": "x.png"}
            ], 1, ""],
            ["水", "みず", "n", "", 50, [
                {"type": "structured-content", "content": "water"}
            ], 2, ""],
            ["broken"]
        ])
    }

    fn word_list() -> Value {
        json!({
            "version": "3.3.1",
            "words": [
                {
                    "id": "1",
                    "kanji": [{"text": "食べる"}],
                    "kana": [{"text": "たべる"}],
                    "sense": [
                        {"gloss": [
                            {"lang": "eng", "text": "to eat"},
                            {"lang": "ger", "text": "essen"}
                        ]},
                        {"gloss": [{"lang": "eng", "text": "to live on"}]}
                    ]
                },
                {
                    "id": "2",
                    "kanji": [],
                    "kana": [{"text": "みず"}],
                    "sense": [{"gloss": [{"lang": "eng", "text": "water"}]}]
                }
            ]
        })
    }

    fn texts(units: &[WorkUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text.as_str()).collect()
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("term-bank".parse::<Dialect>().unwrap(), Dialect::TermBank);
        assert_eq!("WORD-LIST".parse::<Dialect>().unwrap(), Dialect::WordList);
        assert!("xml".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_term_bank_leaves_at_any_depth() {
        let walker = TreeWalker::new(Dialect::TermBank, "eng");
        let doc = term_bank();
        let units = walker.collect_leaves(&doc, 0..3);

        assert_eq!(
            texts(&units),
            vec!["to eat", "to live on", "to consume", "plain", "water"]
        );
        assert_eq!(units[0].pointer, "/0/5/0/content/0/content");
        assert_eq!(units[2].pointer, "/0/5/0/content/1/content/1/content/0/content");
        assert_eq!(units[4].pointer, "/1/5/0/content");
        for unit in &units {
            assert_eq!(doc.pointer(&unit.pointer).and_then(Value::as_str), Some(unit.text.as_str()));
            assert_eq!(unit.fingerprint, Fingerprint::of(&unit.text));
        }
    }

    #[test]
    fn test_range_limits_entries() {
        let walker = TreeWalker::new(Dialect::TermBank, "eng");
        let doc = term_bank();
        assert_eq!(texts(&walker.collect_leaves(&doc, 1..2)), vec!["water"]);
        assert!(walker.collect_leaves(&doc, 2..10).is_empty());
    }

    #[test]
    fn test_word_list_filters_gloss_language() {
        let walker = TreeWalker::new(Dialect::WordList, "eng");
        let doc = word_list();
        let units = walker.collect_leaves(&doc, 0..2);

        assert_eq!(texts(&units), vec!["to eat", "to live on", "water"]);
        assert_eq!(units[1].pointer, "/words/0/sense/1/gloss/0/text");
    }

    #[test]
    fn test_entries_rejects_wrong_shape() {
        let path = Path::new("input.json");
        let term_walker = TreeWalker::new(Dialect::TermBank, "eng");
        let word_walker = TreeWalker::new(Dialect::WordList, "eng");

        assert_eq!(term_walker.entries(&term_bank(), path).unwrap().len(), 3);
        assert_eq!(word_walker.entries(&word_list(), path).unwrap().len(), 2);

        let err = term_walker.entries(&word_list(), path).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));
        assert!(word_walker.entries(&json!([1, 2]), path).is_err());
    }

    #[test]
    fn test_apply_translations_overwrites_resolved_leaves() {
        let walker = TreeWalker::new(Dialect::TermBank, "eng");
        let mut doc = term_bank();

        let changed = walker.apply_translations(&mut doc, 0..3, |unit| match unit.text.as_str() {
            "to eat" => Some("खाना".to_string()),
            "water" => Some("पानी".to_string()),
            _ => None,
        });

        assert_eq!(changed, 2);
        assert_eq!(doc.pointer("/0/5/0/content/0/content"), Some(&json!("खाना")));
        assert_eq!(doc.pointer("/1/5/0/content"), Some(&json!("पानी")));
        assert_eq!(doc.pointer("/0/5/0/content/1/content/0/content"), Some(&json!("to live on")));
        // Non-structured definitions are left alone
        assert_eq!(doc.pointer("/0/5/1"), Some(&json!("a plain string definition")));
    }

    #[test]
    fn test_apply_translations_respects_range() {
        let walker = TreeWalker::new(Dialect::WordList, "eng");
        let mut doc = word_list();

        let changed = walker.apply_translations(&mut doc, 1..2, |_| Some("X".to_string()));
        assert_eq!(changed, 1);
        assert_eq!(doc.pointer("/words/0/sense/0/gloss/0/text"), Some(&json!("to eat")));
        assert_eq!(doc.pointer("/words/1/sense/0/gloss/0/text"), Some(&json!("X")));
    }

    #[test]
    fn test_condense_word_entries() {
        let walker = TreeWalker::new(Dialect::WordList, "eng");
        let mut doc = word_list();
        walker.apply_translations(&mut doc, 0..2, |unit| match unit.text.as_str() {
            "to eat" => Some("खाना".to_string()),
            "to live on" => Some("  ".to_string()),
            _ => None,
        });

        let condensed = walker.condense(&doc, 1);
        assert_eq!(
            condensed,
            json!([{"kanji": ["食べる"], "kana": ["たべる"], "meaning": ["खाना"]}])
        );
    }

    #[test]
    fn test_deeply_nested_content() {
        let mut node = json!("deep");
        for _ in 0..60 {
            node = json!({"tag": "div", "content": [node]});
        }
        let doc = json!([["x", "", "", "", 0, [{"type": "structured-content", "content": node}], 0, ""]]);

        let walker = TreeWalker::new(Dialect::TermBank, "eng");
        let units = walker.collect_leaves(&doc, 0..1);
        assert_eq!(texts(&units), vec!["deep"]);
    }
}
