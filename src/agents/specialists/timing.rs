//! TimingPredictor - how soon the lead intends to transact

use async_trait::async_trait;
use serde_json::json;

use super::{number, Specialist, SpecialistError};
use crate::types::{Payload, Recommendation, SpecialistId, Urgency};

pub struct TimingPredictor;

#[async_trait]
impl Specialist for TimingPredictor {
    fn id(&self) -> SpecialistId {
        SpecialistId::TimingPredictor
    }

    async fn analyze(&self, payload: &Payload) -> Result<Recommendation, SpecialistError> {
        let months = number(payload, "timeline_months")
            .ok_or(SpecialistError::MissingData("timeline_months"))?
            .max(0.0);

        let (score, urgency, follow_up) = match months {
            m if m <= 1.0 => (95.0, Urgency::Critical, "today"),
            m if m <= 3.0 => (80.0, Urgency::High, "within_48h"),
            m if m <= 6.0 => (60.0, Urgency::Medium, "weekly"),
            m if m <= 12.0 => (35.0, Urgency::Low, "monthly"),
            _ => (15.0, Urgency::Low, "quarterly"),
        };

        let rec = Recommendation::new(
            self.id(),
            0.85,
            score,
            urgency,
            format!("Stated timeline of {months:.0} month(s)"),
        )?
        .with_action(json!({ "timing": follow_up }));

        Ok(rec)
    }
}
