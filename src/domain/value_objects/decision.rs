//! The three-field decision returned by the AI advisor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    #[serde(alias = "buy", alias = "Buy")]
    Buy,
    #[serde(alias = "sell", alias = "Sell")]
    Sell,
    #[serde(alias = "hold", alias = "Hold")]
    Hold,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::Buy => write!(f, "BUY"),
            Recommendation::Sell => write!(f, "SELL"),
            Recommendation::Hold => write!(f, "HOLD"),
        }
    }
}

/// Advisor confidence, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[serde(alias = "LOW", alias = "Low")]
    Low,
    #[serde(alias = "MEDIUM", alias = "Medium")]
    Medium,
    #[serde(alias = "HIGH", alias = "High")]
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecision {
    pub recommendation: Recommendation,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl AiDecision {
    /// Safe fallback used whenever the advisor cannot be reached
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            recommendation: Recommendation::Hold,
            confidence: Confidence::Low,
            reasoning: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_deserializes_wire_format() {
        let decision: AiDecision = serde_json::from_str(
            r#"{"recommendation":"BUY","confidence":"high","reasoning":"RSI oversold"}"#,
        )
        .unwrap();
        assert_eq!(decision.recommendation, Recommendation::Buy);
        assert_eq!(decision.confidence, Confidence::High);
        assert_eq!(decision.reasoning, "RSI oversold");
    }

    #[test]
    fn test_decision_accepts_mixed_case() {
        let decision: AiDecision = serde_json::from_str(
            r#"{"recommendation":"sell","confidence":"MEDIUM","reasoning":"trend broke"}"#,
        )
        .unwrap();
        assert_eq!(decision.recommendation, Recommendation::Sell);
        assert_eq!(decision.confidence, Confidence::Medium);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert_eq!("High".parse::<Confidence>(), Ok(Confidence::High));
    }

    #[test]
    fn test_degraded_is_hold() {
        let decision = AiDecision::degraded("quota exceeded");
        assert_eq!(decision.recommendation, Recommendation::Hold);
        assert_eq!(decision.confidence, Confidence::Low);
        assert_eq!(decision.reasoning, "quota exceeded");
    }
}
