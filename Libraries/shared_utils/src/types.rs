use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Organ labels as produced by the segmentation model.
pub const ORGAN_NAMES: [&str; 10] = [
    "background",
    "spleen",
    "kidneys",
    "pancreas",
    "stomach",
    "heart",
    "duodenum",
    "tumsomething",
    "liver",
    "tumor",
];

pub const LIVER_LABEL: i32 = 8;
pub const TUMOR_LABEL: i32 = 9;

pub fn organ_name(label: i32) -> &'static str {
    usize::try_from(label)
        .ok()
        .and_then(|index| ORGAN_NAMES.get(index).copied())
        .unwrap_or("unknown")
}

/// Identity strings of the patient. The receiver never interprets them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PatientRecord {
    #[serde(rename = "ad", alias = "name", deserialize_with = "opaque_string")]
    pub name: String,
    #[serde(rename = "yas", alias = "age", deserialize_with = "opaque_string")]
    pub age: String,
    #[serde(rename = "cinsiyet", alias = "gender", deserialize_with = "opaque_string")]
    pub gender: String,
    #[serde(rename = "kronik_hastalik", alias = "chronic_disease", deserialize_with = "opaque_string")]
    pub chronic_condition: String,
    #[serde(rename = "doktor_notu", alias = "doctor_note", deserialize_with = "opaque_string")]
    pub doctor_note: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TumorMeasurement {
    pub id: i32,
    pub volume_ml: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AnalysisResult {
    pub liver_volume_ml: f64,
    pub tumor_count: i32,
    pub total_tumor_volume_ml: f64,
    #[serde(deserialize_with = "nullable_list")]
    pub tumors: Vec<TumorMeasurement>,
}

/// The JSON header of a session: patient identity plus the volume analysis.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PatientData {
    #[serde(rename = "hasta", alias = "patient")]
    pub patient: PatientRecord,
    #[serde(rename = "analiz", alias = "analysis")]
    pub analysis: AnalysisResult,
}

// Form fields arrive as strings, but a producer may send ages as numbers.
fn opaque_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn nullable_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_keys() {
        let json = r#"{
            "hasta": {"ad": "Ayse", "yas": "54", "cinsiyet": "K", "kronik_hastalik": "", "doktor_notu": "kontrol"},
            "analiz": {"liver_volume_ml": 1520.5, "tumor_count": 2, "total_tumor_volume_ml": 12.75,
                       "tumors": [{"id": 1, "volume_ml": 10.0}, {"id": 2, "volume_ml": 2.75}]}
        }"#;
        let data: PatientData = serde_json::from_str(json).unwrap();
        assert_eq!(data.patient.name, "Ayse");
        assert_eq!(data.patient.doctor_note, "kontrol");
        assert_eq!(data.analysis.tumor_count, 2);
        assert_eq!(data.analysis.tumors[1], TumorMeasurement { id: 2, volume_ml: 2.75 });
    }

    #[test]
    fn accepts_producer_aliases_and_numeric_age() {
        let json = r#"{"patient": {"name": "John", "age": 61, "chronic_disease": "diabetes"},
                       "analysis": {"liver_volume_ml": 900.0, "tumor_count": 0, "tumors": null}}"#;
        let data: PatientData = serde_json::from_str(json).unwrap();
        assert_eq!(data.patient.age, "61");
        assert_eq!(data.patient.chronic_condition, "diabetes");
        assert_eq!(data.patient.gender, "");
        assert!(data.analysis.tumors.is_empty());
    }

    #[test]
    fn empty_object_yields_defaults() {
        let data: PatientData = serde_json::from_str("{}").unwrap();
        assert_eq!(data, PatientData::default());
    }

    #[test]
    fn serializes_with_wire_keys() {
        let value = serde_json::to_value(PatientData::default()).unwrap();
        assert!(value.get("hasta").is_some());
        assert!(value["analiz"].get("tumors").is_some());
        assert!(value["hasta"].get("kronik_hastalik").is_some());
    }

    #[test]
    fn organ_names_cover_known_labels() {
        assert_eq!(organ_name(LIVER_LABEL), "liver");
        assert_eq!(organ_name(TUMOR_LABEL), "tumor");
        assert_eq!(organ_name(42), "unknown");
        assert_eq!(organ_name(-1), "unknown");
    }
}
