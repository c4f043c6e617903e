//! FinancialAssessor - purchasing power and readiness
//!
//! Pre-approval dominates; a stated budget and the down-payment share refine
//! it. Without either `budget` or `pre_approved` there is nothing to assess.

use async_trait::async_trait;
use serde_json::json;

use super::{flag, number, Specialist, SpecialistError};
use crate::types::{Payload, Recommendation, SpecialistId, Urgency};

pub struct FinancialAssessor;

#[async_trait]
impl Specialist for FinancialAssessor {
    fn id(&self) -> SpecialistId {
        SpecialistId::FinancialAssessor
    }

    async fn analyze(&self, payload: &Payload) -> Result<Recommendation, SpecialistError> {
        let budget = number(payload, "budget").filter(|b| *b > 0.0);
        let pre_approved = flag(payload, "pre_approved");
        let down_payment_pct = number(payload, "down_payment_pct");

        if budget.is_none() && pre_approved.is_none() {
            return Err(SpecialistError::MissingData("budget or pre_approved"));
        }

        let mut score = 0.0;
        if pre_approved == Some(true) {
            score += 40.0;
        }
        if budget.is_some() {
            score += 25.0;
        }
        score += match down_payment_pct {
            Some(p) if p >= 20.0 => 35.0,
            Some(p) if p >= 10.0 => 25.0,
            Some(p) if p >= 3.5 => 15.0,
            _ => 0.0,
        };

        let urgency = match score {
            s if s >= 90.0 => Urgency::High,
            s if s >= 50.0 => Urgency::Medium,
            _ => Urgency::Low,
        };

        let confidence = match (budget, pre_approved) {
            (Some(_), Some(_)) => 0.9,
            _ => 0.7,
        };

        let rationale = match (budget, pre_approved) {
            (Some(b), Some(true)) => format!("Pre-approved with a ${b:.0} budget"),
            (Some(b), _) => format!("Budget ${b:.0}, not yet pre-approved"),
            (None, Some(true)) => "Pre-approved, budget not stated".to_string(),
            (None, _) => "Not pre-approved, budget not stated".to_string(),
        };

        let rec = Recommendation::new(self.id(), confidence, score, urgency, rationale)?.with_action(
            json!({
                "content": if pre_approved == Some(true) { "listings_in_budget" } else { "lender_referral" },
            }),
        );

        Ok(rec)
    }
}
