//! Checklist records as they move from the live list to the datastore.
//!
//! A row of the virtualized list carries a single label of the form
//! `"<id> - <name> - <type>"`. The harvester turns it into a
//! [`HarvestedRecord`], the phase-1 run folds those into [`AggregatedRecord`]s
//! (one per month and id), and both phases flatten records into [`WireRow`]s
//! for the ingest endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the parts of a row label.
pub const LABEL_SEPARATOR: &str = " - ";

/// Approval stage a checklist is filed under for days 1-20 of the month.
///
/// Variant order is the priority order: `Open < Submitted < Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhaseOneStatus {
    Open,
    Submitted,
    Approved,
}

impl PhaseOneStatus {
    pub const ALL: [Self; 3] = [Self::Open, Self::Submitted, Self::Approved];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
        }
    }
}

impl fmt::Display for PhaseOneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseOneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "SUBMITTED" => Ok(Self::Submitted),
            "APPROVED" => Ok(Self::Approved),
            other => Err(format!("unknown phase-1 status: {other}")),
        }
    }
}

/// Keeps the highest-priority status seen for a record so far.
///
/// The result does not depend on the order in which passes report statuses.
pub fn resolve_phase_one(current: Option<PhaseOneStatus>, observed: PhaseOneStatus) -> PhaseOneStatus {
    current.map_or(observed, |existing| existing.max(observed))
}

/// Result of the days 21-30 re-check performed by the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PhaseTwoStatus {
    /// Not checked yet.
    #[default]
    #[serde(rename = "NONE")]
    Unchecked,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "NOT APPROVED")]
    NotApproved,
    #[serde(rename = "NOT FOUND")]
    NotFound,
    #[serde(rename = "ERROR")]
    Error,
}

impl PhaseTwoStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unchecked => "NONE",
            Self::Approved => "APPROVED",
            Self::NotApproved => "NOT APPROVED",
            Self::NotFound => "NOT FOUND",
            Self::Error => "ERROR",
        }
    }

    /// `Approved` is the only terminal state; everything else is rechecked.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl FromStr for PhaseTwoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::Unchecked),
            "APPROVED" => Ok(Self::Approved),
            "NOT APPROVED" => Ok(Self::NotApproved),
            "NOT FOUND" => Ok(Self::NotFound),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown phase-2 status: {other}")),
        }
    }
}

impl fmt::Display for PhaseTwoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parts of a row label, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLabel {
    pub id: String,
    pub name: String,
    pub kind: String,
}

/// Parses `"id - name - type"`. Labels with fewer than two parts yield `None`;
/// a missing type becomes an empty string.
pub fn parse_row_label(text: &str) -> Option<RowLabel> {
    let parts: Vec<&str> = text.split(LABEL_SEPARATOR).collect();
    if parts.len() < 2 {
        return None;
    }

    let id = parts[0].trim();
    if id.is_empty() {
        return None;
    }

    Some(RowLabel {
        id: id.to_string(),
        name: parts[1].trim().to_string(),
        kind: parts.get(2).map(|s| s.trim().to_string()).unwrap_or_default(),
    })
}

/// Identity of a record across passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub month: String,
    pub id: String,
}

/// A row read from one facet pass of the live list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestedRecord {
    pub area: String,
    pub month: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl HarvestedRecord {
    pub fn from_label(area: &str, month: &str, label: RowLabel) -> Self {
        Self {
            area: area.to_string(),
            month: month.to_string(),
            id: label.id,
            name: label.name,
            kind: label.kind,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            month: self.month.clone(),
            id: self.id.clone(),
        }
    }
}

/// One record per (month, id) for the whole run, carrying both phase statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedRecord {
    pub area: String,
    pub month: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub phase_one: PhaseOneStatus,
    pub phase_two: PhaseTwoStatus,
}

impl AggregatedRecord {
    pub fn first_sighting(record: HarvestedRecord, status: PhaseOneStatus) -> Self {
        Self {
            area: record.area,
            month: record.month,
            id: record.id,
            name: record.name,
            kind: record.kind,
            phase_one: status,
            phase_two: PhaseTwoStatus::Unchecked,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            month: self.month.clone(),
            id: self.id.clone(),
        }
    }

    pub fn to_wire(&self) -> WireRow {
        WireRow {
            area: self.area.clone(),
            month: self.month.clone(),
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            period_1_20: self.phase_one,
            period_21_30: self.phase_two,
        }
    }
}

/// Flat row accepted by the ingest endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRow {
    #[serde(rename = "Area")]
    pub area: String,
    #[serde(rename = "Month")]
    pub month: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Period_1_20")]
    pub period_1_20: PhaseOneStatus,
    #[serde(rename = "Period_21_30")]
    pub period_21_30: PhaseTwoStatus,
}

/// Previously confirmed record returned by the approved-read endpoint.
///
/// Rows are read leniently: extra columns are ignored, a numeric
/// `id_gedung` is accepted and a status the crawler does not know decodes
/// as `None`, so one odd row never empties the whole work set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApprovedItem {
    #[serde(default)]
    pub area: String,
    pub month: String,
    #[serde(deserialize_with = "string_or_number")]
    pub id_gedung: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub period_1_20: Option<PhaseOneStatus>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub period_21_30: Option<PhaseTwoStatus>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected a building id, got {other}"))),
    }
}

fn lenient_status<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

impl ApprovedItem {
    /// Stored phase-2 status; a missing or null value counts as unchecked.
    pub fn phase_two(&self) -> PhaseTwoStatus {
        self.period_21_30.unwrap_or_default()
    }

    /// Row for this item with a freshly determined phase-2 status.
    pub fn with_phase_two(&self, status: PhaseTwoStatus) -> WireRow {
        WireRow {
            area: self.area.clone(),
            month: self.month.clone(),
            id: self.id_gedung.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            period_1_20: self.period_1_20.unwrap_or(PhaseOneStatus::Approved),
            period_21_30: status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_three_part_label() {
        let label = parse_row_label("101 - BldgA - T1").unwrap();
        assert_eq!(label.id, "101");
        assert_eq!(label.name, "BldgA");
        assert_eq!(label.kind, "T1");
    }

    #[test]
    fn two_part_label_has_empty_type() {
        let label = parse_row_label(" 7 -  Gudang ").unwrap();
        assert_eq!(label.id, "7");
        assert_eq!(label.name, "Gudang");
        assert_eq!(label.kind, "");
    }

    #[test]
    fn single_part_labels_are_dropped() {
        assert!(parse_row_label("101").is_none());
        assert!(parse_row_label("").is_none());
        assert!(parse_row_label("101-BldgA").is_none());
    }

    #[test]
    fn phase_one_order_is_open_submitted_approved() {
        assert!(PhaseOneStatus::Open < PhaseOneStatus::Submitted);
        assert!(PhaseOneStatus::Submitted < PhaseOneStatus::Approved);
        assert_eq!(resolve_phase_one(None, PhaseOneStatus::Open), PhaseOneStatus::Open);
        assert_eq!(
            resolve_phase_one(Some(PhaseOneStatus::Approved), PhaseOneStatus::Open),
            PhaseOneStatus::Approved
        );
    }

    #[test]
    fn phase_two_wire_names() {
        let json = serde_json::to_string(&PhaseTwoStatus::NotApproved).unwrap();
        assert_eq!(json, "\"NOT APPROVED\"");
        let parsed: PhaseTwoStatus = serde_json::from_str("\"NOT FOUND\"").unwrap();
        assert_eq!(parsed, PhaseTwoStatus::NotFound);
        assert!(PhaseTwoStatus::Approved.is_terminal());
        assert!(!PhaseTwoStatus::Error.is_terminal());
    }

    #[test]
    fn wire_row_uses_ingest_column_names() {
        let record = AggregatedRecord::first_sighting(
            HarvestedRecord {
                area: "BANDUNG".into(),
                month: "JUL".into(),
                id: "101".into(),
                name: "BldgA".into(),
                kind: "T1".into(),
            },
            PhaseOneStatus::Submitted,
        );
        let value = serde_json::to_value(record.to_wire()).unwrap();
        assert_eq!(value["ID"], "101");
        assert_eq!(value["Period_1_20"], "SUBMITTED");
        assert_eq!(value["Period_21_30"], "NONE");
    }

    #[test]
    fn approved_item_tolerates_null_phase_two() {
        let item: ApprovedItem = serde_json::from_str(
            r#"{"area":"BANDUNG","month":"JUL","id_gedung":"101","name":"A","type":"T1","period_1_20":"APPROVED","period_21_30":null}"#,
        )
        .unwrap();
        assert_eq!(item.phase_two(), PhaseTwoStatus::Unchecked);
    }

    #[test]
    fn approved_item_ignores_the_row_primary_key() {
        let item: ApprovedItem = serde_json::from_str(
            r#"{"id":42,"area":"BANDUNG","month":"JUL","id_gedung":"101","name":"A","type":"T1","period_1_20":"APPROVED","period_21_30":"NOT FOUND"}"#,
        )
        .unwrap();
        assert_eq!(item.id_gedung, "101");
        assert_eq!(item.phase_two(), PhaseTwoStatus::NotFound);
    }

    #[test]
    fn unknown_statuses_keep_the_item_outstanding() {
        let items: Vec<ApprovedItem> = serde_json::from_str(
            r#"[
                {"month":"JUL","id_gedung":"101","period_1_20":"APPROVED","period_21_30":"APPROVED"},
                {"month":"JUL","id_gedung":102,"period_1_20":"DONE","period_21_30":""}
            ]"#,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].phase_two().is_terminal());
        assert_eq!(items[1].id_gedung, "102");
        assert_eq!(items[1].period_1_20, None);
        assert_eq!(items[1].phase_two(), PhaseTwoStatus::Unchecked);
        assert!(!items[1].phase_two().is_terminal());
    }

    fn status_strategy() -> impl Strategy<Value = PhaseOneStatus> {
        prop::sample::select(PhaseOneStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn retained_status_is_max_regardless_of_pass_order(
            mut passes in prop::collection::vec(status_strategy(), 1..12)
        ) {
            let expected = *passes.iter().max().unwrap();
            let forward = passes.iter().fold(None, |acc, s| Some(resolve_phase_one(acc, *s)));
            passes.reverse();
            let backward = passes.iter().fold(None, |acc, s| Some(resolve_phase_one(acc, *s)));
            prop_assert_eq!(forward, Some(expected));
            prop_assert_eq!(backward, Some(expected));
        }
    }
}
