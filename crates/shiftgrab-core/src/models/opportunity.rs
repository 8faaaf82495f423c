use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A claimable shift as returned by the `FindShiftsPage` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftOpportunity {
    /// Opportunity id; this is what gets claimed and what dedupe keys on
    pub id: String,
    pub skill: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_eligible: bool,
    pub unavailability_reasons: Vec<String>,
    /// Id of the underlying shift (distinct from the opportunity id)
    pub shift_id: Option<String>,
    pub duration_minutes: Option<i64>,
}

impl ShiftOpportunity {
    /// Eligible and nothing blocking it.
    pub fn is_available(&self) -> bool {
        self.is_eligible && self.unavailability_reasons.is_empty()
    }
}

impl std::fmt::Display for ShiftOpportunity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {} - {}",
            self.id,
            self.skill,
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityRaw {
    pub id: String,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub eligibility: Option<EligibilityApi>,
    #[serde(default)]
    pub unavailability: Option<UnavailabilityApi>,
    pub shift: ShiftApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityApi {
    #[serde(rename = "isEligible", default)]
    pub is_eligible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailabilityApi {
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftApi {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub duration: Option<DurationApi>,
    #[serde(rename = "timeRange")]
    pub time_range: TimeRangeApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationApi {
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRangeApi {
    pub start: String,
    pub end: String,
}

impl OpportunityRaw {
    /// Convert to the domain type. Fails when either timestamp is not RFC 3339.
    pub fn to_opportunity(&self) -> Result<ShiftOpportunity, chrono::ParseError> {
        let start = DateTime::parse_from_rfc3339(&self.shift.time_range.start)?.with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339(&self.shift.time_range.end)?.with_timezone(&Utc);
        Ok(ShiftOpportunity {
            id: self.id.clone(),
            skill: self.skill.clone().unwrap_or_default(),
            start,
            end,
            is_eligible: self.eligibility.as_ref().map(|e| e.is_eligible).unwrap_or(false),
            unavailability_reasons: self
                .unavailability
                .as_ref()
                .map(|u| u.reasons.clone())
                .unwrap_or_default(),
            shift_id: self.shift.id.clone(),
            duration_minutes: self.shift.duration.as_ref().and_then(|d| d.value),
        })
    }
}
