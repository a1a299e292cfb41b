//! Index encoding and decoding
//!
//! Two schema variants exist because the index format evolved:
//!
//! - [`IndexSchema::Current`]: chart metadata is flattened into each
//!   version record, charts may declare `apiVersion: v1` or `v2`.
//! - [`IndexSchema::Legacy`]: the older layout. Records carry the typed
//!   `engine` and `tillerVersion` fields, and `apiVersion: v2` charts
//!   cannot be represented.
//!
//! Both variants map onto the same [`RepoIndex`]; a variant only supplies
//! its record layout through [`EntryLayout`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::chart::ChartMetadata;
use super::error::{RepoError, Result};
use super::index::{zero_time, IndexEntry, RepoIndex};

/// Supported index schema variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexSchema {
    Legacy,
    #[default]
    Current,
}

impl IndexSchema {
    /// Decode an index document
    pub fn decode(self, bytes: &[u8]) -> Result<RepoIndex> {
        match self {
            IndexSchema::Legacy => decode_with::<LegacyLayout>(bytes),
            IndexSchema::Current => decode_with::<CurrentLayout>(bytes),
        }
    }

    /// Encode an index document
    ///
    /// Entry order is written as-is; sort the index first for
    /// deterministic output.
    pub fn encode(self, index: &RepoIndex) -> Result<Vec<u8>> {
        match self {
            IndexSchema::Legacy => encode_with::<LegacyLayout>(index),
            IndexSchema::Current => encode_with::<CurrentLayout>(index),
        }
    }
}

impl fmt::Display for IndexSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSchema::Legacy => write!(f, "legacy"),
            IndexSchema::Current => write!(f, "current"),
        }
    }
}

impl FromStr for IndexSchema {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "v2" => Ok(IndexSchema::Legacy),
            "current" | "v3" => Ok(IndexSchema::Current),
            other => Err(format!(
                "Unknown index schema '{other}'. Expected 'current' or 'legacy'"
            )),
        }
    }
}

/// Per-variant mapping between [`IndexEntry`] and its serialized record
trait EntryLayout {
    type Record: Serialize + DeserializeOwned;

    fn to_record(entry: &IndexEntry) -> Result<Self::Record>;

    fn from_record(record: Self::Record) -> Result<IndexEntry>;
}

/// Top-level document shared by both variants
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument<R> {
    #[serde(default)]
    api_version: String,

    entries: Option<BTreeMap<String, Vec<R>>>,

    #[serde(default = "zero_time")]
    generated: DateTime<Utc>,

    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml_ng::Value>,
}

fn decode_with<L: EntryLayout>(bytes: &[u8]) -> Result<RepoIndex> {
    let document: IndexDocument<L::Record> =
        serde_yaml_ng::from_slice(bytes).map_err(RepoError::decode)?;

    if document.api_version.trim().is_empty() {
        return Err(RepoError::decode("no API version specified"));
    }

    let mut entries = BTreeMap::new();
    for (name, records) in document.entries.unwrap_or_default() {
        let versions = records
            .into_iter()
            .map(L::from_record)
            .collect::<Result<Vec<_>>>()?;
        entries.insert(name, versions);
    }

    Ok(RepoIndex {
        api_version: document.api_version,
        generated: document.generated,
        entries,
        extra: document.extra,
    })
}

fn encode_with<L: EntryLayout>(index: &RepoIndex) -> Result<Vec<u8>> {
    index
        .extra
        .iter()
        .try_for_each(|(key, value)| ensure_representable(key, value))?;

    let mut entries = BTreeMap::new();
    for (name, versions) in &index.entries {
        let records = versions
            .iter()
            .map(L::to_record)
            .collect::<Result<Vec<_>>>()?;
        entries.insert(name.clone(), records);
    }

    let document = IndexDocument {
        api_version: index.api_version.clone(),
        entries: Some(entries),
        generated: index.generated,
        extra: index.extra.clone(),
    };

    serde_yaml_ng::to_string(&document)
        .map(String::into_bytes)
        .map_err(RepoError::encode)
}

/// Values must be JSON-compatible: every mapping key a string
fn ensure_representable(path: &str, value: &serde_yaml_ng::Value) -> Result<()> {
    use serde_yaml_ng::Value;

    match value {
        Value::Mapping(mapping) => {
            for (key, nested) in mapping {
                let Value::String(key) = key else {
                    return Err(RepoError::encode(format!(
                        "field '{path}' has a non-string key {key:?}"
                    )));
                };
                ensure_representable(&format!("{path}.{key}"), nested)?;
            }
            Ok(())
        }
        Value::Sequence(items) => items
            .iter()
            .try_for_each(|item| ensure_representable(path, item)),
        Value::Tagged(tagged) => ensure_representable(path, &tagged.value),
        _ => Ok(()),
    }
}

fn ensure_metadata_representable(metadata: &ChartMetadata) -> Result<()> {
    metadata
        .extra
        .iter()
        .try_for_each(|(key, value)| ensure_representable(key, value))
}

/// Current record: chart metadata flattened next to the index fields
#[derive(Serialize, Deserialize)]
struct CurrentRecord {
    #[serde(default = "zero_time")]
    created: DateTime<Utc>,

    #[serde(default)]
    digest: String,

    #[serde(default)]
    urls: Vec<String>,

    #[serde(flatten)]
    metadata: ChartMetadata,
}

struct CurrentLayout;

impl EntryLayout for CurrentLayout {
    type Record = CurrentRecord;

    fn to_record(entry: &IndexEntry) -> Result<CurrentRecord> {
        ensure_metadata_representable(&entry.metadata)?;

        Ok(CurrentRecord {
            created: entry.created,
            digest: entry.digest.clone(),
            urls: entry.urls.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    fn from_record(record: CurrentRecord) -> Result<IndexEntry> {
        if let Some(api_version) = record.metadata.api_version.as_deref() {
            if api_version != "v1" && api_version != "v2" {
                return Err(RepoError::decode(format!(
                    "chart '{}' declares unsupported apiVersion '{api_version}'",
                    record.metadata.name
                )));
            }
        }

        Ok(IndexEntry {
            metadata: record.metadata,
            urls: record.urls,
            digest: record.digest,
            created: record.created,
        })
    }
}

const ENGINE_FIELD: &str = "engine";
const TILLER_VERSION_FIELD: &str = "tillerVersion";

/// Legacy record: typed engine fields, no `apiVersion: v2` charts
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    #[serde(default = "zero_time")]
    created: DateTime<Utc>,

    #[serde(default)]
    digest: String,

    #[serde(default)]
    urls: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    engine: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tiller_version: Option<String>,

    #[serde(flatten)]
    metadata: ChartMetadata,
}

struct LegacyLayout;

impl LegacyLayout {
    fn reject_v2(metadata: &ChartMetadata) -> Option<String> {
        (metadata.api_version.as_deref() == Some("v2")).then(|| {
            format!(
                "chart '{}' {} uses apiVersion v2, which the legacy index schema cannot represent",
                metadata.name, metadata.version
            )
        })
    }

    /// Move a typed field out of the metadata extras
    fn take_string(metadata: &mut ChartMetadata, field: &str) -> Result<Option<String>> {
        match metadata.extra.remove(field) {
            None | Some(serde_yaml_ng::Value::Null) => Ok(None),
            Some(serde_yaml_ng::Value::String(value)) => Ok(Some(value)),
            Some(other) => Err(RepoError::encode(format!(
                "chart '{}' {} has a non-string '{field}' value {other:?}, which the legacy index schema cannot represent",
                metadata.name, metadata.version
            ))),
        }
    }
}

impl EntryLayout for LegacyLayout {
    type Record = LegacyRecord;

    fn to_record(entry: &IndexEntry) -> Result<LegacyRecord> {
        if let Some(reason) = Self::reject_v2(&entry.metadata) {
            return Err(RepoError::encode(reason));
        }
        ensure_metadata_representable(&entry.metadata)?;

        let mut metadata = entry.metadata.clone();
        let engine = Self::take_string(&mut metadata, ENGINE_FIELD)?;
        let tiller_version = Self::take_string(&mut metadata, TILLER_VERSION_FIELD)?;

        Ok(LegacyRecord {
            created: entry.created,
            digest: entry.digest.clone(),
            urls: entry.urls.clone(),
            engine,
            tiller_version,
            metadata,
        })
    }

    fn from_record(record: LegacyRecord) -> Result<IndexEntry> {
        if let Some(reason) = Self::reject_v2(&record.metadata) {
            return Err(RepoError::decode(reason));
        }

        let mut metadata = record.metadata;
        if let Some(engine) = record.engine {
            metadata
                .extra
                .insert(ENGINE_FIELD.to_string(), serde_yaml_ng::Value::String(engine));
        }
        if let Some(tiller_version) = record.tiller_version {
            metadata.extra.insert(
                TILLER_VERSION_FIELD.to_string(),
                serde_yaml_ng::Value::String(tiller_version),
            );
        }

        Ok(IndexEntry {
            metadata,
            urls: record.urls,
            digest: record.digest,
            created: record.created,
        })
    }
}

#[cfg(test)]
mod codec_tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const SCHEMAS: [IndexSchema; 2] = [IndexSchema::Current, IndexSchema::Legacy];

    fn sample_index() -> RepoIndex {
        let mut index = RepoIndex::new();
        let mut described = ChartMetadata::new("example", "0.1.0");
        described.description = Some("An example chart".to_string());
        described.app_version = Some("1.25".to_string());
        described.extra.insert(
            "keywords".to_string(),
            serde_yaml_ng::Value::Sequence(vec!["web".into(), "nginx".into()]),
        );
        index
            .add_or_replace(described, "example-0.1.0.tgz", "https://example.com/charts", "sha256:0123456789")
            .unwrap();
        for (version, digest) in [("1.0.0", "sha256:1"), ("2.0.0", "sha256:2")] {
            index
                .add_or_replace(
                    ChartMetadata::new("multiple", version),
                    &format!("multiple-{version}.tgz"),
                    "",
                    digest,
                )
                .unwrap();
        }
        index.sort_entries();
        index
    }

    #[test]
    fn test_empty_index_canonical_form() {
        for schema in SCHEMAS {
            let bytes = schema.encode(&RepoIndex::new()).unwrap();
            let yaml = String::from_utf8(bytes).unwrap();

            assert!(yaml.starts_with("apiVersion: v1\n"), "{yaml}");
            assert!(yaml.contains("entries: {}"), "{yaml}");
            assert!(yaml.contains("generated:"), "{yaml}");
            assert!(yaml.contains("0001-01-01T00:00:00Z"), "{yaml}");
        }
    }

    #[test]
    fn test_round_trip_empty_single_and_many() {
        let mut single = RepoIndex::new();
        single
            .add_or_replace(ChartMetadata::new("foo", "1.2.3"), "foo-1.2.3.tgz", "file:///repo", "sha256:abc")
            .unwrap();

        for schema in SCHEMAS {
            for index in [RepoIndex::new(), single.clone(), sample_index()] {
                let bytes = schema.encode(&index).unwrap();
                let decoded = schema.decode(&bytes).unwrap();
                assert_eq!(decoded, index, "schema {schema}");
            }
        }
    }

    #[test]
    fn test_encoded_order_is_stable() {
        let index = sample_index();
        let yaml = String::from_utf8(IndexSchema::Current.encode(&index).unwrap()).unwrap();

        let example = yaml.find("  example:").unwrap();
        let multiple = yaml.find("  multiple:").unwrap();
        assert!(example < multiple);

        let v2 = yaml.find("version: 2.0.0").unwrap();
        let v1 = yaml.find("version: 1.0.0").unwrap();
        assert!(v2 < v1);
    }

    #[test]
    fn test_decode_accepts_null_entries() {
        let input = b"apiVersion: foo\nentries: null\ngenerated: 2018-01-01T00:00:00Z\n";

        for schema in SCHEMAS {
            let index = schema.decode(input).unwrap();
            assert_eq!(index.api_version, "foo");
            assert_eq!(
                index.generated,
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()
            );
            assert!(index.entries.is_empty());
        }
    }

    #[test]
    fn test_decode_accepts_missing_entries() {
        for schema in SCHEMAS {
            let index = schema.decode(b"apiVersion: v1\n").unwrap();
            assert!(index.entries.is_empty());
            assert_eq!(index.generated, zero_time());
        }
    }

    #[test]
    fn test_decode_rejects_missing_api_version() {
        let err = IndexSchema::Current.decode(b"entries: {}\n").unwrap_err();
        assert!(err.to_string().contains("no API version"));
    }

    #[test]
    fn test_decode_rejects_malformed_yaml() {
        let err = IndexSchema::Current
            .decode(b"apiVersion: v1\nentries: [unterminated\n")
            .unwrap_err();
        assert!(matches!(err, RepoError::Decode { .. }));
    }

    #[test]
    fn test_decode_existing_document() {
        let input = r#"
apiVersion: v1
entries:
  exampleChart:
  - created: "0001-01-01T00:00:00Z"
    digest: sha256:0123456789
    name: example
    urls:
    - https://example.com/charts
    version: 0.1.0
generated: "0001-01-01T00:00:00Z"
"#;
        let index = IndexSchema::Current.decode(input.as_bytes()).unwrap();
        let entry = &index.entries["exampleChart"][0];
        assert_eq!(entry.name(), "example");
        assert_eq!(entry.digest, "sha256:0123456789");
        assert_eq!(entry.created, zero_time());
    }

    #[test]
    fn test_legacy_rejects_v2_charts() {
        let input = r#"
apiVersion: v1
entries:
  foo:
  - apiVersion: v2
    name: foo
    version: 1.0.0
    digest: sha256:1
    urls: [foo-1.0.0.tgz]
"#;
        assert!(IndexSchema::Current.decode(input.as_bytes()).is_ok());
        let err = IndexSchema::Legacy.decode(input.as_bytes()).unwrap_err();
        assert!(matches!(err, RepoError::Decode { .. }));

        let index = IndexSchema::Current.decode(input.as_bytes()).unwrap();
        let err = IndexSchema::Legacy.encode(&index).unwrap_err();
        assert!(matches!(err, RepoError::Encode { .. }));
    }

    #[test]
    fn test_legacy_engine_fields_are_typed() {
        let mut metadata = ChartMetadata::new("foo", "1.0.0");
        metadata
            .extra
            .insert("engine".to_string(), serde_yaml_ng::Value::String("gotpl".to_string()));
        let mut index = RepoIndex::new();
        index.add_or_replace(metadata, "foo-1.0.0.tgz", "", "sha256:1").unwrap();

        let bytes = IndexSchema::Legacy.encode(&index).unwrap();
        let yaml = String::from_utf8(bytes.clone()).unwrap();
        assert!(yaml.contains("engine: gotpl"));

        let decoded = IndexSchema::Legacy.decode(&bytes).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_encode_rejects_non_string_keys() {
        let mut nested = serde_yaml_ng::Mapping::new();
        nested.insert(serde_yaml_ng::Value::Bool(false), "false".into());
        nested.insert(serde_yaml_ng::Value::Bool(true), "true".into());

        let mut metadata = ChartMetadata::new("foo", "1.0.0");
        metadata
            .extra
            .insert("invalid".to_string(), serde_yaml_ng::Value::Mapping(nested));
        let mut index = RepoIndex::new();
        index.add_or_replace(metadata, "foo-1.0.0.tgz", "", "sha256:1").unwrap();

        for schema in SCHEMAS {
            let err = schema.encode(&index).unwrap_err();
            assert!(matches!(err, RepoError::Encode { .. }));
            assert!(err.to_string().contains("invalid"));
        }
    }

    #[test]
    fn test_unknown_top_level_fields_survive_round_trip() {
        let input = "apiVersion: v1\nentries: {}\ngenerated: 2018-01-01T00:00:00Z\nserverInfo:\n  contextPath: /v1/helm\n";

        for schema in SCHEMAS {
            let index = schema.decode(input.as_bytes()).unwrap();
            assert!(index.extra.contains_key("serverInfo"));

            let yaml = String::from_utf8(schema.encode(&index).unwrap()).unwrap();
            assert!(yaml.contains("serverInfo:"), "{yaml}");
            assert!(yaml.contains("contextPath: /v1/helm"), "{yaml}");
            assert_eq!(schema.decode(yaml.as_bytes()).unwrap(), index);
        }
    }

    #[test]
    fn test_encode_rejects_non_string_keys_in_top_level_fields() {
        let mut server_info = serde_yaml_ng::Mapping::new();
        server_info.insert(serde_yaml_ng::Value::Bool(true), "true".into());

        let mut index = RepoIndex::new();
        index.extra.insert(
            "serverInfo".to_string(),
            serde_yaml_ng::Value::Mapping(server_info),
        );

        for schema in SCHEMAS {
            let err = schema.encode(&index).unwrap_err();
            assert!(matches!(err, RepoError::Encode { .. }));
            assert!(err.to_string().contains("serverInfo"));
        }
    }

    #[test]
    fn test_legacy_rejects_non_string_engine() {
        let mut metadata = ChartMetadata::new("foo", "1.0.0");
        metadata
            .extra
            .insert("engine".to_string(), serde_yaml_ng::Value::Number(serde_yaml_ng::Number::from(7_i64)));
        let mut index = RepoIndex::new();
        index.add_or_replace(metadata, "foo-1.0.0.tgz", "", "sha256:1").unwrap();

        assert!(IndexSchema::Current.encode(&index).is_ok());
        let err = IndexSchema::Legacy.encode(&index).unwrap_err();
        assert!(matches!(err, RepoError::Encode { .. }));
        assert!(err.to_string().contains("engine"));
    }

    #[test]
    fn test_schema_from_str() {
        assert_eq!("legacy".parse::<IndexSchema>().unwrap(), IndexSchema::Legacy);
        assert_eq!("v3".parse::<IndexSchema>().unwrap(), IndexSchema::Current);
        assert!("v4".parse::<IndexSchema>().is_err());
    }
}
