//! Pattern search over dataset records

use crate::manifest::{Contact, DatasetRecord, value_text};

/// Width of the context window returned for matching text fields
pub const DEFAULT_CONTEXT: usize = 60;

/// Marks a side of an excerpt where the field continues
pub const ELLIPSIS: &str = "...";

/// Widest snippet line printed by [`SearchHit`]'s `Display`
const PRINT_WIDTH: usize = 60;

/// Searchable fields of a [`DatasetRecord`], in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Description,
    SampleProcessing,
    DataProcessing,
    Contact,
    Formats,
    Keywords,
    Notes,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::SampleProcessing => "sample_processing",
            Field::DataProcessing => "data_processing",
            Field::Contact => "contact",
            Field::Formats => "formats",
            Field::Keywords => "keywords",
            Field::Notes => "notes",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a matching field contributes to a hit
#[derive(Debug, Clone, PartialEq)]
pub enum Snippet {
    /// Excerpt of a text field around the first match
    Text(String),
    /// Contact entries with at least one matching value
    Contacts(Vec<Contact>),
    /// The whole list, when any of its items matched
    Items(Vec<String>),
}

impl std::fmt::Display for Snippet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Snippet::Text(text) => f.write_str(text),
            Snippet::Contacts(contacts) => {
                let contacts: Vec<String> = contacts
                    .iter()
                    .map(|contact| {
                        contact
                            .values()
                            .map(value_text)
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .collect();
                f.write_str(&contacts.join("; "))
            }
            Snippet::Items(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Cut `text` down to about `context` characters around the first match of `pattern`
///
/// A match at least `context` characters long is returned as is, and so is a field no longer
/// than `context`. Otherwise the match is widened by the same number of characters on both
/// sides, with [`ELLIPSIS`] added on each side where the field was cut.
pub fn excerpt(text: &str, pattern: &regex::Regex, context: usize) -> Option<String> {
    let found = pattern.find(text)?;
    let match_len = found.as_str().chars().count();
    if match_len >= context {
        return Some(found.as_str().to_string());
    }
    let total = text.chars().count();
    if total <= context {
        return Some(text.to_string());
    }
    let margin = (context - match_len) / 2;
    let start = text[..found.start()].chars().count();
    let from = start.saturating_sub(margin);
    let to = (start + match_len + margin).min(total);
    let mut snippet = String::with_capacity(context + 2 * ELLIPSIS.len());
    if from > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(text.chars().skip(from).take(to - from));
    if to < total {
        snippet.push_str(ELLIPSIS);
    }
    Some(snippet)
}

/// A dataset with at least one field matching a search pattern
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub name: String,
    pub scope: String,
    pub group: String,
    pub title: String,
    pub pattern: String,
    /// Matching fields in [`Field`] order
    pub fields: Vec<(Field, Snippet)>,
}

impl SearchHit {
    /// Match `pattern` against every searchable field of `record`; `None` if nothing matched
    pub fn find(record: &DatasetRecord, pattern: &regex::Regex, context: usize) -> Option<Self> {
        let mut fields = Vec::new();
        let texts = [
            (Field::Title, &record.title),
            (Field::Description, &record.description),
            (Field::SampleProcessing, &record.sample_processing),
            (Field::DataProcessing, &record.data_processing),
        ];
        for (field, text) in texts {
            if let Some(snippet) = excerpt(text, pattern, context) {
                fields.push((field, Snippet::Text(snippet)));
            }
        }
        let contacts: Vec<Contact> = record
            .contact
            .iter()
            .filter(|contact| {
                contact
                    .values()
                    .any(|value| pattern.is_match(&value_text(value)))
            })
            .cloned()
            .collect();
        if !contacts.is_empty() {
            fields.push((Field::Contact, Snippet::Contacts(contacts)));
        }
        let lists = [
            (Field::Formats, &record.formats),
            (Field::Keywords, &record.keywords),
            (Field::Notes, &record.notes),
        ];
        for (field, items) in lists {
            if items.iter().any(|item| pattern.is_match(item)) {
                fields.push((field, Snippet::Items(items.clone())));
            }
        }
        if fields.is_empty() {
            return None;
        }
        Some(Self {
            name: record.name.clone(),
            scope: record.scope.clone(),
            group: record.group.clone(),
            title: record.title.clone(),
            pattern: pattern.as_str().to_string(),
            fields,
        })
    }

    pub fn snippet(&self, field: Field) -> Option<&Snippet> {
        self.fields
            .iter()
            .find(|(matched, _)| *matched == field)
            .map(|(_, snippet)| snippet)
    }
}

impl std::fmt::Display for SearchHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.title.is_empty() {
            writeln!(f, "{}: <Untitled>", self.name)?;
        } else {
            writeln!(f, "{}: {}", self.name, self.title)?;
        }
        writeln!(f, "  pattern: {}", self.pattern)?;
        writeln!(f, "  matches: {}", self.fields.len())?;
        writeln!(f, "  scope: {}", self.scope)?;
        writeln!(f, "  group: {}", self.group)?;
        for (field, snippet) in &self.fields {
            let mut text = snippet.to_string();
            if text.chars().count() > PRINT_WIDTH {
                text = text.chars().take(PRINT_WIDTH - 4).collect();
                text.push_str(ELLIPSIS);
            }
            writeln!(f, "  >{field}: {text}")?;
        }
        Ok(())
    }
}
