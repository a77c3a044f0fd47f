use anyhow::Context;
use tracing::instrument;

use crate::error::Error;
use crate::search::SearchHit;

/// One entry of a dataset's contact list, e.g. `{"name": ..., "email": ...}`
pub type Contact = serde_json::Map<String, serde_json::Value>;

/// Metadata of one dataset as listed in the manifest
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DatasetRecord {
    /// Key of the record in the manifest
    #[serde(skip)]
    pub name: String,
    pub scope: String,
    pub group: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "sample processing")]
    pub sample_processing: String,
    #[serde(rename = "data processing")]
    pub data_processing: String,
    pub contact: Vec<Contact>,
    pub date: serde_json::Value,
    pub formats: Vec<String>,
    pub keywords: Vec<String>,
    pub notes: Vec<String>,
}

/// Plain text of a JSON value as used for display and matching
pub(crate) fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn mapping_text(map: &serde_json::Map<String, serde_json::Value>) -> String {
    map.iter()
        .map(|(key, value)| format!("{key}: {}", value_text(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl std::fmt::Display for DatasetRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.title.is_empty() {
            writeln!(f, "<Untitled>")?;
        } else {
            writeln!(f, "{}", self.title)?;
        }
        writeln!(f, "  name: {}", self.name)?;
        writeln!(f, "  scope: {}", self.scope)?;
        writeln!(f, "  group: {}", self.group)?;
        writeln!(f, "  description: {}", self.description)?;
        writeln!(f, "  sample processing: {}", self.sample_processing)?;
        writeln!(f, "  data processing: {}", self.data_processing)?;
        for contact in &self.contact {
            writeln!(f, "  contact: {}", mapping_text(contact))?;
        }
        match &self.date {
            serde_json::Value::Object(date) => writeln!(f, "  date: {}", mapping_text(date))?,
            other => writeln!(f, "  date: {}", value_text(other))?,
        }
        writeln!(f, "  formats: {}", self.formats.join(", "))?;
        writeln!(f, "  keywords: {}", self.keywords.join(", "))?;
        for note in &self.notes {
            writeln!(f, "  note: {note}")?;
        }
        Ok(())
    }
}

/// Compile a user pattern as a case-insensitive regular expression
pub fn pattern(pattern: &str) -> Result<regex::Regex, Error> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| Error::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Scope/group restriction shared by listing and searching
///
/// Both patterns must match when given (they may match anywhere in the field); a missing
/// pattern matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    scope: Option<regex::Regex>,
    group: Option<regex::Regex>,
}

impl Filter {
    pub fn new(scope: Option<&str>, group: Option<&str>) -> Result<Self, Error> {
        Ok(Self {
            scope: scope.map(pattern).transpose()?,
            group: group.map(pattern).transpose()?,
        })
    }

    /// Matches everything
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, record: &DatasetRecord) -> bool {
        let scope_ok = self
            .scope
            .as_ref()
            .is_none_or(|scope| scope.is_match(&record.scope));
        let group_ok = self
            .group
            .as_ref()
            .is_none_or(|group| group.is_match(&record.group));
        scope_ok && group_ok
    }
}

/// All datasets of the manifest file, in file order
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    records: Vec<DatasetRecord>,
    index: std::collections::HashMap<String, usize>,
}

impl Manifest {
    /// Read and parse a manifest; any malformed record fails the whole load
    #[instrument]
    pub async fn load(path: &std::path::Path) -> Result<Self, Error> {
        tracing::info!("parsing '{}'", path.display());
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(Error::io(path))?;
        let manifest = Self::parse(&text).map_err(|source| Error::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("manifest is searchable ({} datasets)", manifest.len());
        Ok(manifest)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let entries: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).context("manifest must be a JSON object")?;
        let mut records = Vec::with_capacity(entries.len());
        let mut index = std::collections::HashMap::with_capacity(entries.len());
        for (name, value) in entries {
            let mut record: DatasetRecord = serde_json::from_value(value)
                .with_context(|| format!("invalid record for dataset '{name}'"))?;
            record.name.clone_from(&name);
            index.insert(name, records.len());
            records.push(record);
        }
        Ok(Self { records, index })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetRecord> {
        self.records.iter()
    }

    pub fn lookup(&self, name: &str) -> Option<&DatasetRecord> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    /// Look up several names at once; unknown names are paired with `None`
    pub fn lookup_many<'n, I>(&self, names: I) -> Vec<(&'n str, Option<&DatasetRecord>)>
    where
        I: IntoIterator<Item = &'n str>,
    {
        names
            .into_iter()
            .map(|name| (name, self.lookup(name)))
            .collect()
    }

    pub fn query(&self, filter: &Filter) -> Vec<&DatasetRecord> {
        self.records
            .iter()
            .filter(|record| filter.matches(record))
            .collect()
    }

    pub fn names(&self, filter: &Filter) -> Vec<&str> {
        self.query(filter)
            .into_iter()
            .map(|record| record.name.as_str())
            .collect()
    }

    /// Records passing `filter` with at least one field matching `pattern`
    pub fn search(
        &self,
        pattern: &regex::Regex,
        filter: &Filter,
        context: usize,
    ) -> Vec<SearchHit> {
        self.records
            .iter()
            .filter(|record| filter.matches(record))
            .filter_map(|record| SearchHit::find(record, pattern, context))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record_json(
        scope: &str,
        group: &str,
        title: &str,
        description: &str,
    ) -> serde_json::Value {
        serde_json::json!({
            "scope": scope,
            "group": group,
            "title": title,
            "description": description,
            "sample processing": "Sections were thaw-mounted on ITO slides.",
            "data processing": "Peaks were picked and aligned.",
            "contact": [{"name": "Jane Doe", "email": "jane@example.org"}],
            "date": {"received": "2020-01-01"},
            "formats": ["imzML"],
            "keywords": ["MALDI", "imaging"],
            "notes": ["Processed spectra"]
        })
    }

    pub(crate) fn sample_manifest() -> String {
        serde_json::json!({
            "PXD001": record_json("Public", "PRIDE", "Cancer Study", "Tissue samples to find cancer biomarkers."),
            "PXD002": record_json("Public", "MassIVE", "Mouse Brain", "Coronal sections of mouse brain."),
            "PXD003": record_json("Protected", "PRIDE", "Kidney", "Human kidney cohort."),
            "Example_Continuous_imzML": record_json("Private", "Examples", "", "Example file."),
        })
        .to_string()
    }

    #[test]
    fn lookup_every_key() {
        let text = sample_manifest();
        let manifest = Manifest::parse(&text).unwrap();
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(manifest.len(), raw.len());
        for (name, value) in raw {
            let mut expected: DatasetRecord = serde_json::from_value(value).unwrap();
            expected.name = name.clone();
            assert_eq!(manifest.lookup(&name), Some(&expected));
        }
        assert_eq!(manifest.lookup("PXD999"), None);
    }

    #[test]
    fn lookup_many_never_fails() {
        let manifest = Manifest::parse(&sample_manifest()).unwrap();
        let found = manifest.lookup_many(["PXD002", "nope"]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1.map(|r| r.title.as_str()), Some("Mouse Brain"));
        assert_eq!(found[1], ("nope", None));
    }

    #[test]
    fn file_order_is_kept() {
        let manifest = Manifest::parse(&sample_manifest()).unwrap();
        assert_eq!(
            manifest.names(&Filter::any()),
            vec!["PXD001", "PXD002", "PXD003", "Example_Continuous_imzML"]
        );
    }

    #[test]
    fn query_is_case_insensitive_and() {
        let manifest = Manifest::parse(&sample_manifest()).unwrap();
        let names = |scope, group| manifest.names(&Filter::new(scope, group).unwrap());
        assert_eq!(names(Some("public"), None), vec!["PXD001", "PXD002"]);
        assert_eq!(names(None, Some("pride")), vec!["PXD001", "PXD003"]);
        assert_eq!(names(Some("PUBLIC"), Some("pride")), vec!["PXD001"]);
        assert_eq!(names(Some("^Pro"), Some("massive")), Vec::<&str>::new());
        assert_eq!(names(Some("P(ublic|rivate)"), None).len(), 3);
    }

    #[test]
    fn malformed_record_fails_whole_load() {
        let mut raw: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&sample_manifest()).unwrap();
        if let Some(record) = raw.get_mut("PXD002").and_then(|r| r.as_object_mut()) {
            record.remove("data processing");
        }
        let error = Manifest::parse(&serde_json::Value::Object(raw).to_string()).unwrap_err();
        let message = format!("{error:#}");
        assert!(message.contains("PXD002"), "{message}");
        assert!(message.contains("data processing"), "{message}");
        assert!(Manifest::parse("[1, 2]").is_err());
        assert!(Manifest::parse("{").is_err());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(matches!(
            Filter::new(Some("("), None),
            Err(Error::Pattern { .. })
        ));
    }

    #[test]
    fn describe_lists_all_fields() {
        let manifest = Manifest::parse(&sample_manifest()).unwrap();
        let text = manifest.lookup("PXD001").unwrap().to_string();
        assert!(text.starts_with("Cancer Study\n"));
        assert!(text.contains("  scope: Public\n"));
        assert!(text.contains("  contact: name: Jane Doe, email: jane@example.org\n"));
        assert!(text.contains("  date: received: 2020-01-01\n"));
        let untitled = manifest.lookup("Example_Continuous_imzML").unwrap().to_string();
        assert!(untitled.starts_with("<Untitled>\n"));
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let error = Manifest::load(&tmp.path().join("manifest.json"))
            .await
            .unwrap_err();
        assert!(error.is_not_found());
    }
}
