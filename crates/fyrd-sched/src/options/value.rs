//! Option values and coercion from loosely typed input.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OptionDefault, OptionKind, OptionSpec};
use crate::error::{SchedError, SchedResult};

/// A walltime limit, stored in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Walltime {
    seconds: u64,
}

impl Walltime {
    pub fn from_seconds(seconds: u64) -> Self {
        Self { seconds }
    }

    pub fn as_seconds(&self) -> u64 {
        self.seconds
    }

    fn parts(&self) -> (u64, u64, u64) {
        (
            self.seconds / 3600,
            (self.seconds % 3600) / 60,
            self.seconds % 60,
        )
    }

    /// SLURM time format, `D-HH:MM:SS` once the limit reaches a full day.
    pub fn to_slurm(&self) -> String {
        let (hours, minutes, seconds) = self.parts();
        if hours >= 24 {
            format!(
                "{}-{:02}:{:02}:{:02}",
                hours / 24,
                hours % 24,
                minutes,
                seconds
            )
        } else {
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        }
    }
}

impl fmt::Display for Walltime {
    /// Formats as `HH:MM:SS`, hours may exceed 24.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hours, minutes, seconds) = self.parts();
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl FromStr for Walltime {
    type Err = String;

    /// Accepts `[D-]HH:MM:SS`, `MM:SS` or a bare number of minutes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty walltime".to_string());
        }

        let parse = |part: &str| -> Result<u64, String> {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("invalid walltime component '{part}' in '{s}'"));
            }
            part.parse::<u64>().map_err(|e| e.to_string())
        };

        let (days, clock) = match s.split_once('-') {
            Some((days, clock)) => (parse(days)?, clock),
            None => (0, s),
        };

        let fields: Vec<&str> = clock.split(':').collect();
        let (hours, minutes, seconds) = match fields.as_slice() {
            [minutes] if days == 0 => (0, parse(minutes)?, 0),
            [hours] => (parse(hours)?, 0, 0),
            [minutes, seconds] => (0, parse(minutes)?, parse(seconds)?),
            [hours, minutes, seconds] => (parse(hours)?, parse(minutes)?, parse(seconds)?),
            _ => return Err(format!("expected [D-]HH:MM:SS, got '{s}'")),
        };

        // A bare minute count may exceed 59.
        if fields.len() > 1 && (minutes >= 60 || seconds >= 60) {
            return Err(format!("minutes and seconds must be below 60 in '{s}'"));
        }

        let total = days
            .checked_mul(24)
            .and_then(|h| h.checked_add(hours))
            .and_then(|h| h.checked_mul(60))
            .and_then(|m| m.checked_add(minutes))
            .and_then(|m| m.checked_mul(60))
            .and_then(|sec| sec.checked_add(seconds))
            .ok_or_else(|| format!("walltime too large: '{s}'"))?;
        if total == 0 {
            return Err("walltime must be positive".to_string());
        }
        Ok(Walltime::from_seconds(total))
    }
}

impl TryFrom<String> for Walltime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Walltime> for String {
    fn from(value: Walltime) -> Self {
        value.to_string()
    }
}

/// Parse a memory amount into MB.
///
/// Plain numbers are MB. Units `K/KB`, `M/MB`, `G/GB` and `T/TB` are accepted in any
/// case and use powers of 1024.
pub fn parse_memory_mb(raw: &str) -> Result<u64, String> {
    let s = raw.trim().to_ascii_lowercase();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid memory amount '{raw}'"))?;

    let factor = match unit.trim() {
        "" | "m" | "mb" => 1.0,
        "k" | "kb" => 1.0 / 1024.0,
        "g" | "gb" => 1024.0,
        "t" | "tb" => 1024.0 * 1024.0,
        other => return Err(format!("unknown memory unit '{other}' in '{raw}'")),
    };

    let mb = (number * factor).ceil();
    if mb < 1.0 {
        return Err(format!("memory must be at least 1MB, got '{raw}'"));
    }
    Ok(mb as u64)
}

/// A coerced option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum OptionValue {
    Int(u64),
    Str(String),
    List(Vec<String>),
    /// Memory in MB.
    Memory(u64),
    Time(Walltime),
    Bool(bool),
    Path(PathBuf),
}

impl OptionValue {
    /// Coerce a loosely typed value into the kind declared by `spec`.
    pub fn coerce(spec: &OptionSpec, value: Value) -> SchedResult<Self> {
        let name = spec.name;
        let fail = |message: String| SchedError::invalid_value(name, message);

        if value.is_null() {
            return Err(fail("a value is required".to_string()));
        }

        match spec.kind {
            OptionKind::Int => {
                let n = match &value {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse::<u64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| fail(format!("expected a positive integer, got {value}")))?;
                if n == 0 {
                    return Err(fail("must be at least 1".to_string()));
                }
                Ok(OptionValue::Int(n))
            }
            OptionKind::Str => match value {
                Value::String(s) if !s.trim().is_empty() => Ok(OptionValue::Str(s.trim().to_string())),
                Value::Number(n) => Ok(OptionValue::Str(n.to_string())),
                other => Err(fail(format!("expected a string, got {other}"))),
            },
            OptionKind::StrList => {
                let items = match value {
                    Value::Array(items) => items
                        .into_iter()
                        .map(|item| scalar_string(&item).ok_or_else(|| fail(format!("invalid list item {item}"))))
                        .collect::<SchedResult<Vec<_>>>()?,
                    Value::String(s) => s
                        .split([',', ';'])
                        .map(|part| part.trim().to_string())
                        .collect(),
                    other => vec![scalar_string(&other).ok_or_else(|| fail(format!("expected a list, got {other}")))?],
                };
                let mut seen = Vec::with_capacity(items.len());
                for item in items {
                    if !item.is_empty() && !seen.contains(&item) {
                        seen.push(item);
                    }
                }
                if seen.is_empty() {
                    return Err(fail("list is empty".to_string()));
                }
                Ok(OptionValue::List(seen))
            }
            OptionKind::Memory => match &value {
                Value::Number(n) => match n.as_u64() {
                    Some(mb) if mb > 0 => Ok(OptionValue::Memory(mb)),
                    _ => Err(fail(format!("expected a positive amount of MB, got {n}"))),
                },
                Value::String(s) => parse_memory_mb(s).map(OptionValue::Memory).map_err(fail),
                other => Err(fail(format!("expected memory like 4000 or 4GB, got {other}"))),
            },
            OptionKind::Time => match &value {
                Value::Number(n) => match n.as_u64().filter(|m| *m > 0) {
                    Some(minutes) => minutes
                        .checked_mul(60)
                        .map(|secs| OptionValue::Time(Walltime::from_seconds(secs)))
                        .ok_or_else(|| fail(format!("walltime too large: {n} minutes"))),
                    None => Err(fail(format!("expected minutes or HH:MM:SS, got {n}"))),
                },
                Value::String(s) => s.parse::<Walltime>().map(OptionValue::Time).map_err(fail),
                other => Err(fail(format!("expected a walltime, got {other}"))),
            },
            OptionKind::Bool => {
                let b = match &value {
                    Value::Bool(b) => Some(*b),
                    Value::Number(n) => match n.as_u64() {
                        Some(0) => Some(false),
                        Some(1) => Some(true),
                        _ => None,
                    },
                    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "true" | "yes" | "1" => Some(true),
                        "false" | "no" | "0" => Some(false),
                        _ => None,
                    },
                    _ => None,
                };
                b.map(OptionValue::Bool)
                    .ok_or_else(|| fail(format!("expected true or false, got {value}")))
            }
            OptionKind::Path => match value {
                Value::String(s) if !s.trim().is_empty() => Ok(OptionValue::Path(PathBuf::from(s.trim()))),
                other => Err(fail(format!("expected a path, got {other}"))),
            },
        }
    }

    /// Value of a table default, `None` when the option has no default.
    pub fn from_default(spec: &OptionSpec) -> Option<Self> {
        match (spec.kind, spec.default) {
            (_, OptionDefault::None) => None,
            (OptionKind::Int, OptionDefault::Int(n)) => Some(OptionValue::Int(n)),
            (OptionKind::Memory, OptionDefault::Int(n)) => Some(OptionValue::Memory(n)),
            (OptionKind::Time, OptionDefault::Str(s)) => s.parse().ok().map(OptionValue::Time),
            (OptionKind::Str, OptionDefault::Str(s)) => Some(OptionValue::Str(s.to_string())),
            (OptionKind::Path, OptionDefault::Str(s)) => Some(OptionValue::Path(PathBuf::from(s))),
            (OptionKind::Bool, OptionDefault::Bool(b)) => Some(OptionValue::Bool(b)),
            _ => None,
        }
    }

    /// Plain JSON form, as written to the config file.
    pub fn to_json(&self) -> Value {
        match self {
            OptionValue::Int(n) | OptionValue::Memory(n) => Value::from(*n),
            OptionValue::Str(s) => Value::from(s.as_str()),
            OptionValue::List(items) => Value::from(items.clone()),
            OptionValue::Time(t) => Value::from(t.to_string()),
            OptionValue::Bool(b) => Value::from(*b),
            OptionValue::Path(p) => Value::from(p.to_string_lossy().into_owned()),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Int(n) => write!(f, "{n}"),
            OptionValue::Str(s) => write!(f, "{s}"),
            OptionValue::List(items) => write!(f, "{}", items.join(",")),
            OptionValue::Memory(mb) => write!(f, "{mb}MB"),
            OptionValue::Time(t) => write!(f, "{t}"),
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionTable, spec};
    use proptest::prelude::*;
    use serde_json::json;

    fn coerce(name: &str, value: Value) -> SchedResult<OptionValue> {
        OptionValue::coerce(&spec(OptionTable::Function, name).unwrap(), value)
    }

    #[test]
    fn test_walltime_parse() {
        assert_eq!("12:00:00".parse::<Walltime>().unwrap().as_seconds(), 43_200);
        assert_eq!("1-02:03:04".parse::<Walltime>().unwrap().as_seconds(), 93_784);
        assert_eq!("30:15".parse::<Walltime>().unwrap().as_seconds(), 1_815);
        assert_eq!("90".parse::<Walltime>().unwrap().as_seconds(), 5_400);
        assert_eq!("2-12".parse::<Walltime>().unwrap().as_seconds(), 216_000);

        assert!("00:61:00".parse::<Walltime>().is_err());
        assert!("00:00:75".parse::<Walltime>().is_err());
        assert!("1:2:3:4".parse::<Walltime>().is_err());
        assert!("ab:cd:ef".parse::<Walltime>().is_err());
        assert!("00:00:00".parse::<Walltime>().is_err());
        assert!("".parse::<Walltime>().is_err());
    }

    #[test]
    fn test_walltime_too_large() {
        let err = "99999999999999999:00:00".parse::<Walltime>().unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert!("999999999999999999-00:00:00".parse::<Walltime>().is_err());
        assert!("999999999999999999999".parse::<Walltime>().is_err());

        let err = coerce("time", json!(u64::MAX)).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
        assert_eq!(
            coerce("time", json!(u64::MAX / 60)).unwrap(),
            OptionValue::Time(Walltime::from_seconds(u64::MAX / 60 * 60))
        );
    }

    #[test]
    fn test_walltime_format() {
        let t = Walltime::from_seconds(36 * 3600 + 5);
        assert_eq!(t.to_string(), "36:00:05");
        assert_eq!(t.to_slurm(), "1-12:00:05");

        let t = Walltime::from_seconds(2 * 3600);
        assert_eq!(t.to_slurm(), "02:00:00");
    }

    #[test]
    fn test_memory_units() {
        assert_eq!(parse_memory_mb("4000").unwrap(), 4000);
        assert_eq!(parse_memory_mb("4GB").unwrap(), 4096);
        assert_eq!(parse_memory_mb("4g").unwrap(), 4096);
        assert_eq!(parse_memory_mb("512mb").unwrap(), 512);
        assert_eq!(parse_memory_mb("1.5G").unwrap(), 1536);
        assert_eq!(parse_memory_mb("2048KB").unwrap(), 2);
        assert_eq!(parse_memory_mb("1T").unwrap(), 1_048_576);
        assert!(parse_memory_mb("4 parsecs").is_err());
        assert!(parse_memory_mb("GB").is_err());
        assert!(parse_memory_mb("0").is_err());
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(coerce("cores", json!(4)).unwrap(), OptionValue::Int(4));
        assert_eq!(coerce("cores", json!("8")).unwrap(), OptionValue::Int(8));
        assert!(coerce("cores", json!(0)).is_err());
        assert!(coerce("cores", json!(-2)).is_err());
        assert!(coerce("cores", json!("four")).is_err());
        assert!(coerce("threads", json!(1.5)).is_err());
    }

    #[test]
    fn test_coerce_list() {
        assert_eq!(
            coerce("modules", json!("python/3.11, gcc;python/3.11")).unwrap(),
            OptionValue::List(vec!["python/3.11".into(), "gcc".into()])
        );
        assert_eq!(
            coerce("depends", json!([101, "102"])).unwrap(),
            OptionValue::List(vec!["101".into(), "102".into()])
        );
        assert_eq!(
            coerce("depends", json!(7)).unwrap(),
            OptionValue::List(vec!["7".into()])
        );
        assert!(coerce("modules", json!(",,")).is_err());
        assert!(coerce("modules", json!({"a": 1})).is_err());
    }

    #[test]
    fn test_coerce_other_kinds() {
        assert_eq!(coerce("mem", json!("8GB")).unwrap(), OptionValue::Memory(8192));
        assert_eq!(coerce("mem", json!(2000)).unwrap(), OptionValue::Memory(2000));
        assert_eq!(
            coerce("time", json!("02:00:00")).unwrap(),
            OptionValue::Time(Walltime::from_seconds(7200))
        );
        assert_eq!(
            coerce("time", json!(30)).unwrap(),
            OptionValue::Time(Walltime::from_seconds(1800))
        );
        assert_eq!(coerce("clean_files", json!("yes")).unwrap(), OptionValue::Bool(true));
        assert_eq!(coerce("clean_files", json!(0)).unwrap(), OptionValue::Bool(false));
        assert!(coerce("clean_files", json!("maybe")).is_err());
        assert_eq!(
            coerce("dir", json!("/scratch/run")).unwrap(),
            OptionValue::Path(PathBuf::from("/scratch/run"))
        );
        assert!(coerce("partition", json!(null)).is_err());
        assert!(coerce("partition", json!("  ")).is_err());
    }

    #[test]
    fn test_option_value_json_form() {
        assert_eq!(OptionValue::Memory(4000).to_json(), json!(4000));
        assert_eq!(
            OptionValue::Time(Walltime::from_seconds(3600)).to_json(),
            json!("01:00:00")
        );
        assert_eq!(
            OptionValue::List(vec!["a".into(), "b".into()]).to_json(),
            json!(["a", "b"])
        );
    }

    proptest! {
        #[test]
        fn walltime_components_add_up(days in 0u64..30, hours in 0u64..24, minutes in 0u64..60, seconds in 0u64..60) {
            prop_assume!(days + hours + minutes + seconds > 0);
            let raw = format!("{days}-{hours:02}:{minutes:02}:{seconds:02}");
            let parsed: Walltime = raw.parse().unwrap();
            prop_assert_eq!(parsed.as_seconds(), days * 86_400 + hours * 3_600 + minutes * 60 + seconds);
            prop_assert_eq!(parsed.to_slurm().parse::<Walltime>().unwrap(), parsed);
        }

        #[test]
        fn walltime_rejects_out_of_range_minutes(hours in 0u64..100, minutes in 60u64..1000) {
            let raw = format!("{hours}:{minutes}:00");
            prop_assert!(raw.parse::<Walltime>().is_err());
        }
    }
}
