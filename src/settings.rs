use crate::calc::TermPolicy;
use crate::db;
use crate::discipline::DisciplineThresholds;
use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Averaging,
    Discipline,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [Self::Averaging, Self::Discipline];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "averaging" => Some(Self::Averaging),
            "discipline" => Some(Self::Discipline),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Averaging => "averaging",
            Self::Discipline => "discipline",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Averaging => "setup.averaging",
            Self::Discipline => "setup.discipline",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Averaging => json!({
            "termPolicy": TermPolicy::default().as_str(),
            "displayDecimals": 2
        }),
        SetupSection::Discipline => {
            serde_json::to_value(DisciplineThresholds::default()).unwrap_or_else(|_| json!({}))
        }
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Averaging => match k.as_str() {
                "termPolicy" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be string", k))?;
                    let Some(policy) = TermPolicy::parse(s.trim()) else {
                        return Err("termPolicy must be one of: equal, coefficientWeighted".into());
                    };
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "displayDecimals" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 2)?));
                }
                _ => return Err(format!("unknown averaging field: {}", k)),
            },
            SetupSection::Discipline => match k.as_str() {
                "warningAbsences" | "criticalAbsences" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 1000)?));
                }
                "warningAverageBelow" | "criticalAverageBelow" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 20.0)?));
                }
                _ => return Err(format!("unknown discipline field: {}", k)),
            },
        }
    }
    Ok(())
}

fn check_section(section: SetupSection, current: &Value) -> Result<(), String> {
    if section != SetupSection::Discipline {
        return Ok(());
    }
    let t: DisciplineThresholds =
        serde_json::from_value(current.clone()).map_err(|e| e.to_string())?;
    if t.warning_absences > t.critical_absences {
        return Err("warningAbsences must not exceed criticalAbsences".into());
    }
    if t.critical_average_below > t.warning_average_below {
        return Err("criticalAverageBelow must not exceed warningAverageBelow".into());
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> rusqlite::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a stale saved field must not block the engine.
            let mut merged = current.clone();
            if merge_section_patch(section, &mut merged, saved_obj).is_ok()
                && check_section(section, &merged).is_ok()
            {
                current = merged;
            }
        }
    }
    Ok(current)
}

pub fn load_all(conn: &Connection) -> rusqlite::Result<Value> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(section.name().to_string(), load_section(conn, section)?);
    }
    Ok(Value::Object(out))
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> EngineResult<Value> {
    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch).map_err(EngineError::validation)?;
    check_section(section, &current).map_err(EngineError::validation)?;
    db::settings_set_json(conn, section.key(), &current)?;
    tracing::info!(section = section.name(), "settings updated");
    Ok(current)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AveragingSettings {
    pub term_policy: TermPolicy,
    pub display_decimals: u32,
}

impl Default for AveragingSettings {
    fn default() -> Self {
        Self {
            term_policy: TermPolicy::default(),
            display_decimals: 2,
        }
    }
}

pub fn averaging(conn: &Connection) -> rusqlite::Result<AveragingSettings> {
    let v = load_section(conn, SetupSection::Averaging)?;
    Ok(serde_json::from_value(v).unwrap_or_default())
}

pub fn discipline_thresholds(conn: &Connection) -> rusqlite::Result<DisciplineThresholds> {
    let v = load_section(conn, SetupSection::Discipline)?;
    Ok(serde_json::from_value(v).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn averaging_patch_canonicalises_policy() {
        let mut cur = default_section(SetupSection::Averaging);
        merge_section_patch(
            SetupSection::Averaging,
            &mut cur,
            &patch(json!({ "termPolicy": "coefficientWeighted", "displayDecimals": 1 })),
        )
        .expect("merge");
        let parsed: AveragingSettings = serde_json::from_value(cur).expect("typed");
        assert_eq!(parsed.term_policy, TermPolicy::CoefficientWeighted);
        assert_eq!(parsed.display_decimals, 1);
    }

    #[test]
    fn rejects_unknown_fields_and_out_of_range() {
        let mut cur = default_section(SetupSection::Averaging);
        assert!(merge_section_patch(
            SetupSection::Averaging,
            &mut cur,
            &patch(json!({ "displayDecimals": 3 }))
        )
        .is_err());
        let mut cur = default_section(SetupSection::Discipline);
        assert!(merge_section_patch(
            SetupSection::Discipline,
            &mut cur,
            &patch(json!({ "lateCode": "L" }))
        )
        .is_err());
    }

    #[test]
    fn discipline_cross_field_check() {
        let mut cur = default_section(SetupSection::Discipline);
        merge_section_patch(
            SetupSection::Discipline,
            &mut cur,
            &patch(json!({ "warningAbsences": 30 })),
        )
        .expect("field is in range");
        assert!(check_section(SetupSection::Discipline, &cur).is_err());
    }

    #[test]
    fn defaults_deserialize_into_typed_settings() {
        let a: AveragingSettings =
            serde_json::from_value(default_section(SetupSection::Averaging)).expect("averaging");
        assert_eq!(a, AveragingSettings::default());
        let d: DisciplineThresholds =
            serde_json::from_value(default_section(SetupSection::Discipline)).expect("discipline");
        assert_eq!(d, DisciplineThresholds::default());
    }
}
