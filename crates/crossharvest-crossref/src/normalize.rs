//! Work record normalization: Crossref JSON → wide flat row, plus merge rules.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Resolver prefixes stripped from DOIs before keying and in relation lists
const RESOLVER_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

// === Row struct (deserialized from JSON) ===

/// Crossref work JSON structure (the subset with scalar meaning)
///
/// Every field decodes leniently: `null` or an unexpected type falls back to
/// the default instead of failing the whole work.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkRow {
    #[serde(rename = "DOI", deserialize_with = "text")]
    pub doi: Option<String>,
    #[serde(rename = "URL", deserialize_with = "text")]
    pub url: Option<String>,

    #[serde(deserialize_with = "texts")]
    pub title: Vec<String>,
    #[serde(deserialize_with = "texts")]
    pub original_title: Vec<String>,
    #[serde(deserialize_with = "texts")]
    pub short_title: Vec<String>,
    #[serde(deserialize_with = "texts")]
    pub subtitle: Vec<String>,
    #[serde(deserialize_with = "texts")]
    pub container_title: Vec<String>,
    #[serde(deserialize_with = "texts")]
    pub short_container_title: Vec<String>,

    #[serde(rename = "type", deserialize_with = "text")]
    pub work_type: Option<String>,
    #[serde(deserialize_with = "text")]
    pub subtype: Option<String>,
    #[serde(deserialize_with = "text")]
    pub prefix: Option<String>,
    #[serde(deserialize_with = "text")]
    pub publisher: Option<String>,
    #[serde(deserialize_with = "text")]
    pub member: Option<String>,
    #[serde(deserialize_with = "text")]
    pub group_title: Option<String>,
    #[serde(deserialize_with = "text")]
    pub source: Option<String>,
    #[serde(deserialize_with = "text")]
    pub language: Option<String>,
    #[serde(deserialize_with = "text")]
    pub update_policy: Option<String>,
    #[serde(rename = "abstract", deserialize_with = "text")]
    pub abstract_raw: Option<String>,

    #[serde(deserialize_with = "lenient")]
    pub score: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub reference_count: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub is_referenced_by_count: Option<i64>,

    #[serde(deserialize_with = "lenient")]
    pub created: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub posted: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub deposited: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub indexed: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub issued: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub published_online: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub published_print: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub accepted: Option<DateParts>,
    #[serde(deserialize_with = "lenient")]
    pub approved: Option<DateParts>,
}

/// Any shape decodes; a mismatch becomes `T::default()`
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Strings as-is, numbers as their decimal text (`"member": 246`)
fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// String elements of an array (others skipped); a bare string counts as one
fn texts<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

/// `{"date-parts": [[2024, 1, 5]]}`
#[derive(Debug, Default, Deserialize)]
pub struct DateParts {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i64>>>,
}

impl DateParts {
    /// `YYYY-MM-DD`; missing month or day default to 01
    pub fn to_iso(&self) -> Option<String> {
        let parts = self.date_parts.first()?;
        let year = (*parts.first()?)?;
        let month = parts.get(1).copied().flatten().unwrap_or(1);
        let day = parts.get(2).copied().flatten().unwrap_or(1);
        Some(format!("{year:04}-{month:02}-{day:02}"))
    }
}

// === Normalized output row ===

/// One deduplicated work, flattened. Nested sub-objects are kept as JSON text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub doi: String,
    pub url: Option<String>,
    pub primary_url: Option<String>,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub short_title: Option<String>,
    pub subtitle: Option<String>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub subtype: Option<String>,
    pub prefix: Option<String>,
    pub publisher: Option<String>,
    pub container_title: Option<String>,
    pub short_container_title: Option<String>,
    pub institution_name: Option<String>,

    pub created_date: Option<String>,
    pub posted_date: Option<String>,
    pub deposited_date: Option<String>,
    pub indexed_date: Option<String>,
    pub issued_date: Option<String>,
    pub published_online_date: Option<String>,
    pub published_print_date: Option<String>,
    pub accepted_date: Option<String>,
    pub approved_date: Option<String>,

    /// "Given Family; Given Family"
    pub authors: Option<String>,
    pub authors_json: Option<String>,
    pub editors_json: Option<String>,
    pub translators_json: Option<String>,
    pub chairs_json: Option<String>,
    pub contributors_json: Option<String>,

    pub license_url: Option<String>,
    pub licenses_json: Option<String>,
    pub links_json: Option<String>,
    pub subjects: Option<String>,
    pub subjects_json: Option<String>,
    pub language: Option<String>,
    pub issn_json: Option<String>,
    pub issn_type_json: Option<String>,
    pub isbn_type_json: Option<String>,
    pub alternative_id_json: Option<String>,
    pub funder_json: Option<String>,

    pub reference_count: Option<i64>,
    pub is_referenced_by_count: Option<i64>,
    pub references_json: Option<String>,

    #[serde(serialize_with = "join_dois")]
    pub is_preprint_of: Vec<String>,
    #[serde(serialize_with = "join_dois")]
    pub has_preprint: Vec<String>,
    #[serde(serialize_with = "join_dois")]
    pub is_version_of: Vec<String>,
    pub relation_json: Option<String>,

    pub update_type: Option<String>,
    pub update_policy: Option<String>,
    pub update_to_json: Option<String>,

    pub archive_json: Option<String>,
    pub content_domain_json: Option<String>,
    pub assertion_json: Option<String>,
    pub institution_json: Option<String>,

    pub group_title: Option<String>,
    pub member: Option<String>,
    pub source: Option<String>,
    pub score: Option<f64>,
    pub abstract_raw: Option<String>,
}

/// Sorted DOI set as `"a; b"`, null when empty
fn join_dois<S: Serializer>(dois: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    if dois.is_empty() {
        serializer.serialize_none()
    } else {
        serializer.serialize_str(&dois.join("; "))
    }
}

// === DOI handling ===

fn strip_resolver(doi: &str) -> &str {
    let trimmed = doi.trim();
    for prefix in RESOLVER_PREFIXES {
        if trimmed.len() >= prefix.len()
            && trimmed.is_char_boundary(prefix.len())
            && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return trimmed[prefix.len()..].trim();
        }
    }
    trimmed
}

/// Deduplication key: trimmed, lowercased, resolver prefix removed.
pub fn doi_key(doi: &str) -> String {
    strip_resolver(doi).to_lowercase()
}

// === Field helpers ===

fn first_text(values: Vec<String>) -> Option<String> {
    values.into_iter().next().and_then(non_empty)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Compact JSON text of a sub-object (keys sorted), `None` for absent/null
fn json_text(value: Option<&Value>) -> Option<String> {
    value.filter(|v| !v.is_null()).map(Value::to_string)
}

/// `key` of the first element of an array field
fn first_field(value: Option<&Value>, key: &str) -> Option<String> {
    value?
        .as_array()?
        .first()?
        .get(key)?
        .as_str()
        .map(str::to_string)
        .and_then(non_empty)
}

fn person_name(person: &Value) -> Option<String> {
    let parts: Vec<&str> = ["given", "family"]
        .iter()
        .filter_map(|k| person.get(*k)?.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if !parts.is_empty() {
        return Some(parts.join(" "));
    }
    ["name", "literal"].iter().find_map(|k| {
        person
            .get(*k)?
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn join_people(people: Option<&Value>) -> Option<String> {
    let names: Vec<String> = people?.as_array()?.iter().filter_map(person_name).collect();
    (!names.is_empty()).then(|| names.join("; "))
}

fn join_strings(values: Option<&Value>) -> Option<String> {
    let items: Vec<&str> = values?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .collect();
    (!items.is_empty()).then(|| items.join("; "))
}

/// Sorted, de-duplicated DOIs listed under `relation.<kind>`
fn relation_dois(relation: Option<&Value>, kind: &str) -> Vec<String> {
    let mut dois: Vec<String> = relation
        .and_then(|r| r.get(kind))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|it| it.get("id")?.as_str())
                .map(strip_resolver)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    dois.sort();
    dois.dedup();
    dois
}

// === Transformation ===

/// Flatten a raw work. `None` only when it has no DOI (or is not a JSON object).
pub fn normalize(raw: &Value) -> Option<NormalizedRecord> {
    let row = match WorkRow::deserialize(raw) {
        Ok(row) => row,
        Err(e) => {
            log::warn!("Skipping unparseable work record: {e}");
            return None;
        }
    };
    let doi = strip_resolver(row.doi.as_deref()?).to_string();
    if doi.is_empty() {
        return None;
    }

    let field = |key: &str| raw.get(key);
    let date = |d: &Option<DateParts>| d.as_ref().and_then(DateParts::to_iso);
    let relation = field("relation");

    Some(NormalizedRecord {
        doi,
        url: row.url.and_then(non_empty),
        primary_url: raw
            .pointer("/resource/primary/URL")
            .and_then(Value::as_str)
            .map(str::to_string)
            .and_then(non_empty),
        title: first_text(row.title),
        original_title: first_text(row.original_title),
        short_title: first_text(row.short_title),
        subtitle: first_text(row.subtitle),
        work_type: row.work_type.and_then(non_empty),
        subtype: row.subtype.and_then(non_empty),
        prefix: row.prefix.and_then(non_empty),
        publisher: row.publisher.and_then(non_empty),
        container_title: first_text(row.container_title),
        short_container_title: first_text(row.short_container_title),
        institution_name: first_field(field("institution"), "name"),

        created_date: date(&row.created),
        posted_date: date(&row.posted),
        deposited_date: date(&row.deposited),
        indexed_date: date(&row.indexed),
        issued_date: date(&row.issued),
        published_online_date: date(&row.published_online),
        published_print_date: date(&row.published_print),
        accepted_date: date(&row.accepted),
        approved_date: date(&row.approved),

        authors: join_people(field("author")),
        authors_json: json_text(field("author")),
        editors_json: json_text(field("editor")),
        translators_json: json_text(field("translator")),
        chairs_json: json_text(field("chair")),
        contributors_json: json_text(
            field("container-contributor")
                .filter(|v| v.as_array().is_some_and(|a| !a.is_empty()))
                .or_else(|| field("contributor")),
        ),

        license_url: first_field(field("license"), "URL"),
        licenses_json: json_text(field("license")),
        links_json: json_text(field("link")),
        subjects: join_strings(field("subject")),
        subjects_json: json_text(field("subject")),
        language: row.language.and_then(non_empty),
        issn_json: json_text(field("ISSN")),
        issn_type_json: json_text(field("issn-type")),
        isbn_type_json: json_text(field("isbn-type")),
        alternative_id_json: json_text(field("alternative-id")),
        funder_json: json_text(field("funder")),

        reference_count: row.reference_count,
        is_referenced_by_count: row.is_referenced_by_count,
        references_json: json_text(field("reference")),

        is_preprint_of: relation_dois(relation, "is-preprint-of"),
        has_preprint: relation_dois(relation, "has-preprint"),
        is_version_of: relation_dois(relation, "is-version-of"),
        relation_json: json_text(relation),

        update_type: first_field(field("update-to"), "type"),
        update_policy: row.update_policy.and_then(non_empty),
        update_to_json: json_text(field("update-to")),

        archive_json: json_text(field("archive")),
        content_domain_json: json_text(field("content-domain")),
        assertion_json: json_text(field("assertion")),
        institution_json: json_text(field("institution")),

        group_title: row.group_title.and_then(non_empty),
        member: row.member.and_then(non_empty),
        source: row.source.and_then(non_empty),
        score: row.score,
        abstract_raw: row.abstract_raw.and_then(non_empty),
    })
}

// === Merge ===

trait Populated {
    fn is_populated(&self) -> bool;
}

impl Populated for Option<String> {
    fn is_populated(&self) -> bool {
        self.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

impl Populated for Option<i64> {
    fn is_populated(&self) -> bool {
        self.is_some()
    }
}

impl Populated for Option<f64> {
    fn is_populated(&self) -> bool {
        self.is_some()
    }
}

/// Overwrite each listed field of `$base` with `$newer`'s value when populated.
macro_rules! prefer_populated {
    ($base:ident, $newer:ident; $($field:ident),+ $(,)?) => {
        $(
            if $newer.$field.is_populated() {
                $base.$field = $newer.$field;
            }
        )+
    };
}

fn union(mut base: Vec<String>, newer: Vec<String>) -> Vec<String> {
    base.extend(newer);
    base.sort();
    base.dedup();
    base
}

/// Fold a newer observation of the same work into an existing one.
///
/// Scalars take the incoming value unless it is empty; relation sets are
/// unioned. A populated field is never cleared.
pub fn merge(existing: NormalizedRecord, incoming: NormalizedRecord) -> NormalizedRecord {
    let mut merged = existing;
    if !incoming.doi.trim().is_empty() {
        merged.doi = incoming.doi;
    }
    prefer_populated!(merged, incoming;
        url, primary_url, title, original_title, short_title, subtitle,
        work_type, subtype, prefix, publisher, container_title, short_container_title,
        institution_name,
        created_date, posted_date, deposited_date, indexed_date, issued_date,
        published_online_date, published_print_date, accepted_date, approved_date,
        authors, authors_json, editors_json, translators_json, chairs_json, contributors_json,
        license_url, licenses_json, links_json, subjects, subjects_json, language,
        issn_json, issn_type_json, isbn_type_json, alternative_id_json, funder_json,
        reference_count, is_referenced_by_count, references_json, relation_json,
        update_type, update_policy, update_to_json,
        archive_json, content_domain_json, assertion_json, institution_json,
        group_title, member, source, score, abstract_raw,
    );
    merged.is_preprint_of = union(merged.is_preprint_of, incoming.is_preprint_of);
    merged.has_preprint = union(merged.has_preprint, incoming.has_preprint);
    merged.is_version_of = union(merged.is_version_of, incoming.is_version_of);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "DOI": "10.1101/2024.01.05.574321",
            "URL": "https://doi.org/10.1101/2024.01.05.574321",
            "title": ["Single-cell atlas of the developing cortex"],
            "subtitle": [],
            "type": "posted-content",
            "subtype": "preprint",
            "prefix": "10.1101",
            "member": "246",
            "publisher": "Cold Spring Harbor Laboratory",
            "group-title": "Neuroscience",
            "institution": [{"name": "bioRxiv"}],
            "posted": {"date-parts": [[2024, 1, 5]]},
            "created": {"date-parts": [[2024, 1, 6]], "timestamp": 1704499200000u64},
            "deposited": {"date-parts": [[2024, 1]]},
            "issued": {"date-parts": [[null]]},
            "author": [
                {"given": "Ada", "family": "Lovelace", "sequence": "first"},
                {"name": "Cortex Consortium"},
                {"family": "Turing"}
            ],
            "relation": {
                "is-preprint-of": [
                    {"id-type": "doi", "id": "https://doi.org/10.1038/s41586-024-0001", "asserted-by": "subject"},
                    {"id-type": "doi", "id": "10.1016/j.cell.2024.01.001", "asserted-by": "subject"}
                ],
                "has-version": [{"id-type": "doi", "id": "10.1101/x.v2"}]
            },
            "resource": {"primary": {"URL": "http://biorxiv.org/lookup/doi/10.1101/2024.01.05.574321"}},
            "license": [{"URL": "http://creativecommons.org/licenses/by/4.0/", "content-version": "vor"}],
            "subject": ["Neuroscience", "Developmental Biology"],
            "reference-count": 42,
            "is-referenced-by-count": 3,
            "score": 1.0,
            "abstract": "<jats:p>We map...</jats:p>"
        })
    }

    #[test]
    fn normalize_sample() {
        let r = normalize(&sample()).unwrap();
        assert_eq!(r.doi, "10.1101/2024.01.05.574321");
        assert_eq!(r.title.as_deref(), Some("Single-cell atlas of the developing cortex"));
        assert_eq!(r.subtitle, None);
        assert_eq!(r.work_type.as_deref(), Some("posted-content"));
        assert_eq!(r.institution_name.as_deref(), Some("bioRxiv"));
        assert_eq!(r.group_title.as_deref(), Some("Neuroscience"));
        assert_eq!(
            r.primary_url.as_deref(),
            Some("http://biorxiv.org/lookup/doi/10.1101/2024.01.05.574321")
        );
        assert_eq!(r.member.as_deref(), Some("246"));
        assert_eq!(r.reference_count, Some(42));
        assert_eq!(r.score, Some(1.0));
        assert_eq!(
            r.license_url.as_deref(),
            Some("http://creativecommons.org/licenses/by/4.0/")
        );
        assert_eq!(r.subjects.as_deref(), Some("Neuroscience; Developmental Biology"));
    }

    #[test]
    fn dates_default_missing_parts() {
        let r = normalize(&sample()).unwrap();
        assert_eq!(r.posted_date.as_deref(), Some("2024-01-05"));
        assert_eq!(r.created_date.as_deref(), Some("2024-01-06"));
        assert_eq!(r.deposited_date.as_deref(), Some("2024-01-01"));
        assert_eq!(r.issued_date, None);
        assert_eq!(r.indexed_date, None);
    }

    #[test]
    fn authors_pretty_joined() {
        let r = normalize(&sample()).unwrap();
        assert_eq!(
            r.authors.as_deref(),
            Some("Ada Lovelace; Cortex Consortium; Turing")
        );
        let blob: Value = serde_json::from_str(r.authors_json.as_deref().unwrap()).unwrap();
        assert_eq!(blob.as_array().unwrap().len(), 3);
    }

    #[test]
    fn relations_stripped_and_sorted() {
        let r = normalize(&sample()).unwrap();
        assert_eq!(
            r.is_preprint_of,
            vec!["10.1016/j.cell.2024.01.001", "10.1038/s41586-024-0001"]
        );
        assert!(r.has_preprint.is_empty());
        assert!(r.relation_json.as_deref().unwrap().contains("has-version"));
    }

    #[test]
    fn relations_serialize_joined() {
        let r = normalize(&sample()).unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v["is_preprint_of"],
            "10.1016/j.cell.2024.01.001; 10.1038/s41586-024-0001"
        );
        assert!(v["has_preprint"].is_null());
        assert_eq!(v["type"], "posted-content");
    }

    #[test]
    fn no_doi_no_record() {
        assert!(normalize(&json!({"title": ["orphan"]})).is_none());
        assert!(normalize(&json!({"DOI": "  "})).is_none());
        assert!(normalize(&json!("not an object")).is_none());
    }

    #[test]
    fn null_and_mistyped_fields_keep_the_record() {
        let r = normalize(&json!({"DOI": "10.1/x", "title": null})).unwrap();
        assert_eq!(r.doi, "10.1/x");
        assert_eq!(r.title, None);

        let r = normalize(&json!({
            "DOI": "10.1/y",
            "title": ["Kept", null],
            "subtitle": null,
            "container-title": "bioRxiv",
            "member": 246,
            "publisher": null,
            "reference-count": "many",
            "posted": null,
            "created": {"date-parts": "2024"},
            "deposited": {"date-parts": [[2024, 2, 9]]}
        }))
        .unwrap();
        assert_eq!(r.title.as_deref(), Some("Kept"));
        assert_eq!(r.subtitle, None);
        assert_eq!(r.container_title.as_deref(), Some("bioRxiv"));
        assert_eq!(r.member.as_deref(), Some("246"));
        assert_eq!(r.publisher, None);
        assert_eq!(r.reference_count, None);
        assert_eq!(r.posted_date, None);
        assert_eq!(r.created_date, None);
        assert_eq!(r.deposited_date.as_deref(), Some("2024-02-09"));
    }

    #[test]
    fn doi_key_normalizes() {
        assert_eq!(doi_key(" 10.1101/ABC "), "10.1101/abc");
        assert_eq!(doi_key("https://doi.org/10.1101/Abc"), "10.1101/abc");
        assert_eq!(doi_key("HTTPS://DX.DOI.ORG/10.1/x"), "10.1/x");
        assert_eq!(doi_key("doi:10.1/X"), "10.1/x");
    }

    #[test]
    fn merge_prefers_incoming_unless_empty() {
        let old = NormalizedRecord {
            doi: "10.1/a".into(),
            title: Some("Old title".into()),
            publisher: Some("Publisher".into()),
            reference_count: Some(3),
            ..Default::default()
        };
        let new = NormalizedRecord {
            doi: "10.1/a".into(),
            title: Some("New title".into()),
            publisher: Some("   ".into()),
            reference_count: None,
            ..Default::default()
        };
        let m = merge(old, new);
        assert_eq!(m.title.as_deref(), Some("New title"));
        assert_eq!(m.publisher.as_deref(), Some("Publisher"));
        assert_eq!(m.reference_count, Some(3));
    }

    #[test]
    fn merge_unions_relations() {
        let old = NormalizedRecord {
            doi: "10.1/a".into(),
            is_preprint_of: vec!["10.2/x".into()],
            ..Default::default()
        };
        let new = NormalizedRecord {
            doi: "10.1/a".into(),
            is_preprint_of: vec!["10.2/y".into(), "10.2/x".into()],
            has_preprint: vec!["10.3/z".into()],
            ..Default::default()
        };
        let m = merge(old, new);
        assert_eq!(m.is_preprint_of, vec!["10.2/x", "10.2/y"]);
        assert_eq!(m.has_preprint, vec!["10.3/z"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let r = normalize(&sample()).unwrap();
        assert_eq!(merge(r.clone(), r.clone()), r);
    }
}
