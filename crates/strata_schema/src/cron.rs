//! Scheduled jobs and the five-field cron schedules that drive them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use strata_common::TriggerName;
use strata_metadata::{CronTriggerMetadata, MetadataObjId};

use crate::context::CollectLog;
use crate::schema_cache::CronTriggerInfo;

/// A parsed cron schedule. Each field holds the values it matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CronSchedule {
    /// Minutes, 0 to 59.
    pub minutes: BTreeSet<u8>,
    /// Hours, 0 to 23.
    pub hours: BTreeSet<u8>,
    /// Days of the month, 1 to 31.
    pub days_of_month: BTreeSet<u8>,
    /// Months, 1 to 12.
    pub months: BTreeSet<u8>,
    /// Days of the week, 0 (Sunday) to 6.
    pub days_of_week: BTreeSet<u8>,
    source: String,
}

/// Why a schedule could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// Not exactly five whitespace-separated fields.
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    /// A field that does not parse.
    #[error("invalid {field} field \"{text}\"")]
    Syntax {
        /// Field name.
        field: &'static str,
        /// Offending text.
        text: String,
    },

    /// A value outside the field's bounds.
    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
        /// Smallest accepted value.
        min: u8,
        /// Largest accepted value.
        max: u8,
    },
}

struct FieldSpec {
    name: &'static str,
    min: u8,
    max: u8,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59 },
    FieldSpec { name: "hour", min: 0, max: 23 },
    FieldSpec { name: "day of month", min: 1, max: 31 },
    FieldSpec { name: "month", min: 1, max: 12 },
    FieldSpec { name: "day of week", min: 0, max: 6 },
];

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() != FIELDS.len() {
            return Err(CronError::FieldCount(parts.len()));
        }
        let field = |i: usize| parse_field(parts[i], &FIELDS[i]);
        Ok(CronSchedule {
            minutes: field(0)?,
            hours: field(1)?,
            days_of_month: field(2)?,
            months: field(3)?,
            days_of_week: field(4)?,
            source: parts.join(" "),
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(text: &str, spec: &FieldSpec) -> Result<BTreeSet<u8>, CronError> {
    let syntax = || CronError::Syntax {
        field: spec.name,
        text: text.to_string(),
    };
    let mut values = BTreeSet::new();
    for item in text.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| syntax())?;
                if step == 0 {
                    return Err(syntax());
                }
                (range, step)
            }
            None => (item, 1),
        };
        let (lo, hi) = if range == "*" {
            (u32::from(spec.min), u32::from(spec.max))
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo = bounded(lo.parse().map_err(|_| syntax())?, spec)?;
            let hi = bounded(hi.parse().map_err(|_| syntax())?, spec)?;
            if lo > hi {
                return Err(syntax());
            }
            (lo, hi)
        } else {
            let value = bounded(range.parse().map_err(|_| syntax())?, spec)?;
            // "5/15" means every 15 starting at 5.
            let hi = if step > 1 { u32::from(spec.max) } else { value };
            (value, hi)
        };
        values.extend(
            (lo..=hi)
                .step_by(step as usize)
                .filter_map(|v| u8::try_from(v).ok()),
        );
    }
    Ok(values)
}

fn bounded(value: u32, spec: &FieldSpec) -> Result<u32, CronError> {
    if value < u32::from(spec.min) || value > u32::from(spec.max) {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

/// Compiles a scheduled job.
pub fn compile_cron_trigger(
    name: &TriggerName,
    declared: &CronTriggerMetadata,
    log: &mut CollectLog,
) -> Option<CronTriggerInfo> {
    let id = MetadataObjId::CronTrigger { name: name.clone() };
    let compiled = if declared.webhook.trim().is_empty() {
        Err("webhook must not be empty".to_string())
    } else {
        declared
            .schedule
            .parse::<CronSchedule>()
            .map_err(|e| format!("invalid schedule \"{}\": {e}", declared.schedule))
    };
    match compiled {
        Ok(schedule) => {
            log.record(id, Vec::new(), Vec::new());
            Some(CronTriggerInfo {
                name: name.clone(),
                webhook: declared.webhook.clone(),
                schedule,
                payload: declared.payload.clone(),
            })
        }
        Err(reason) => {
            let definition = serde_json::to_value(declared).unwrap_or(Value::Null);
            log.reject(id, definition, reason);
            None
        }
    }
}
