//! IntentDetector - buying and hesitation phrases in lead messages

use async_trait::async_trait;
use serde_json::json;

use super::{texts, Specialist, SpecialistError};
use crate::types::{Payload, Recommendation, SpecialistId, Urgency};

const BUYING_SIGNALS: &[&str] = &[
    "pre-approved",
    "preapproved",
    "ready to buy",
    "make an offer",
    "schedule a showing",
    "cash buyer",
    "move quickly",
];

const HESITATION_SIGNALS: &[&str] = &[
    "just looking",
    "not sure",
    "maybe next year",
    "just browsing",
    "not ready",
];

/// Reads the `messages` array and weighs explicit intent against hesitation
pub struct IntentDetector;

fn count_hits(messages: &[String], phrases: &[&str]) -> usize {
    messages
        .iter()
        .map(|m| phrases.iter().filter(|p| m.contains(*p)).count())
        .sum()
}

#[async_trait]
impl Specialist for IntentDetector {
    fn id(&self) -> SpecialistId {
        SpecialistId::IntentDetector
    }

    async fn analyze(&self, payload: &Payload) -> Result<Recommendation, SpecialistError> {
        let messages = texts(payload, "messages");
        if messages.is_empty() {
            return Err(SpecialistError::MissingData("messages"));
        }

        let buying = count_hits(&messages, BUYING_SIGNALS);
        let hesitation = count_hits(&messages, HESITATION_SIGNALS);

        let score = (50.0 + 15.0 * buying as f64 - 15.0 * hesitation as f64).clamp(0.0, 100.0);
        let urgency = match (buying, hesitation) {
            (b, 0) if b >= 2 => Urgency::Critical,
            (b, h) if b > h => Urgency::High,
            (0, 0) => Urgency::Medium,
            _ => Urgency::Low,
        };

        // More conversation, more evidence
        let confidence = (0.6 + 0.07 * messages.len().min(5) as f64).min(0.95);

        let rec = Recommendation::new(
            self.id(),
            confidence,
            score,
            urgency,
            format!(
                "{buying} buying signal(s), {hesitation} hesitation signal(s) across {} message(s)",
                messages.len()
            ),
        )?
        .with_action(json!({
            "channel": "call",
            "content": if buying > hesitation { "book_showing" } else { "nurture" },
        }));

        Ok(rec)
    }
}
