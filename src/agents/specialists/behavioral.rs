//! BehavioralProfiler - engagement volume and recency
//!
//! Reads `page_visits`, `email_opens` and `last_activity_hours`. At least one
//! must be present; confidence grows with the number of signals available.

use async_trait::async_trait;
use serde_json::json;

use super::{number, Specialist, SpecialistError};
use crate::types::{Payload, Recommendation, SpecialistId, Urgency};

/// Scores how actively a lead is engaging right now
pub struct BehavioralProfiler;

#[async_trait]
impl Specialist for BehavioralProfiler {
    fn id(&self) -> SpecialistId {
        SpecialistId::BehavioralProfiler
    }

    async fn analyze(&self, payload: &Payload) -> Result<Recommendation, SpecialistError> {
        let visits = number(payload, "page_visits");
        let opens = number(payload, "email_opens");
        let idle_hours = number(payload, "last_activity_hours");

        let signals = [visits, opens, idle_hours].iter().flatten().count();
        if signals == 0 {
            return Err(SpecialistError::MissingData(
                "page_visits, email_opens or last_activity_hours",
            ));
        }

        let visit_points = visits.map_or(0.0, |v| (v.max(0.0) * 4.0).min(40.0));
        let open_points = opens.map_or(0.0, |o| (o.max(0.0) * 5.0).min(30.0));
        let recency_points = match idle_hours {
            Some(h) if h <= 24.0 => 30.0,
            Some(h) if h <= 72.0 => 20.0,
            Some(h) if h <= 168.0 => 10.0,
            _ => 0.0,
        };
        let score = visit_points + open_points + recency_points;

        let recently_active = idle_hours.is_some_and(|h| h <= 24.0);
        let urgency = match score {
            s if s >= 80.0 && recently_active => Urgency::Critical,
            s if s >= 60.0 => Urgency::High,
            s if s >= 35.0 => Urgency::Medium,
            _ => Urgency::Low,
        };

        let confidence = 0.6 + 0.1 * signals as f64;
        let channel = if open_points >= visit_points { "email" } else { "sms" };

        let rec = Recommendation::new(
            self.id(),
            confidence,
            score,
            urgency,
            format!(
                "Engagement {score:.0}/100 ({} visits, {} opens, idle {})",
                visits.map_or("?".to_string(), |v| format!("{v:.0}")),
                opens.map_or("?".to_string(), |o| format!("{o:.0}")),
                idle_hours.map_or("unknown".to_string(), |h| format!("{h:.0}h")),
            ),
        )?
        .with_action(json!({
            "channel": channel,
            "timing": if recently_active { "within_1h" } else { "next_business_day" },
        }));

        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hot_recent_lead_is_critical() {
        let payload = json!({"page_visits": 12, "email_opens": 8, "last_activity_hours": 2});
        let rec = BehavioralProfiler.analyze(&payload).await.unwrap();
        assert_eq!(rec.score(), 100.0);
        assert_eq!(rec.urgency(), Urgency::Critical);
        assert!((rec.confidence() - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_partial_signals_lower_confidence() {
        let payload = json!({"page_visits": 3});
        let rec = BehavioralProfiler.analyze(&payload).await.unwrap();
        assert_eq!(rec.score(), 12.0);
        assert_eq!(rec.urgency(), Urgency::Low);
        assert!((rec.confidence() - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_behavioral_data_is_an_error() {
        let err = BehavioralProfiler.analyze(&json!({"budget": 1})).await.unwrap_err();
        assert!(matches!(err, SpecialistError::MissingData(_)));
    }
}
