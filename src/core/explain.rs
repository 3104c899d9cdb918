use crate::models::{Factor, MatchBreakdown};

/// Scores at or above this are called out as strengths
pub const STRONG_THRESHOLD: f64 = 8.0;
/// Scores at or below this are called out as drawbacks
pub const WEAK_THRESHOLD: f64 = 4.0;

pub const NEUTRAL_EXPLANATION: &str = "The property is about average on every criterion.";

/// Rule-based rationale for a breakdown
///
/// Lists strong factors and weak factors in factor order. Always produces
/// text, so it doubles as the fallback for assisted explanations.
pub fn explain(breakdown: &MatchBreakdown) -> String {
    let mut strengths = Vec::new();
    let mut drawbacks = Vec::new();

    for (factor, score) in breakdown {
        if *score >= STRONG_THRESHOLD {
            strengths.push(describe(factor, true));
        } else if *score <= WEAK_THRESHOLD {
            drawbacks.push(describe(factor, false));
        }
    }

    let mut parts = Vec::with_capacity(2);
    if !strengths.is_empty() {
        parts.push(format!("Strengths: {}.", strengths.join(", ")));
    }
    if !drawbacks.is_empty() {
        parts.push(format!("Drawbacks: {}.", drawbacks.join(", ")));
    }

    if parts.is_empty() {
        NEUTRAL_EXPLANATION.to_string()
    } else {
        parts.join("\n\n")
    }
}

fn describe(factor: &Factor, positive: bool) -> String {
    let (good, bad) = match factor {
        Factor::Transport => ("easy commute", "far from your key destinations"),
        Factor::Price => ("good price", "price outside your budget"),
        Factor::Schools => ("schools and kindergartens nearby", "few schools nearby"),
        Factor::Parks => ("plenty of green space", "few parks nearby"),
        Factor::Metro => ("metro within walking distance", "long walk to the metro"),
        Factor::Parking => ("parking available", "no parking"),
        Factor::Liquidity => ("easy to resell", "harder to resell"),
        Factor::ConstructionStage => ("construction nearly finished", "construction at an early stage"),
        Factor::Infrastructure => ("well-developed neighbourhood", "sparse neighbourhood amenities"),
        other => return other.as_str().to_string(),
    };
    let phrase = if positive { good } else { bad };
    phrase.to_string()
}
