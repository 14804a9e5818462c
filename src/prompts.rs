//! Instruction texts sent to the generation backend.

use crate::session::AnalysisKind;

/// Leading system instruction for a session of the given kind
pub fn system_prompt(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::Nutrition => {
            "You are a nutrition assistant. Identify the dishes and ingredients in the meal photo, \
             estimate the portion sizes and give calories, protein, fat and carbohydrates per \
             portion and in total. State your assumptions briefly. Answer in the user's language."
        }
        AnalysisKind::Recipe => {
            "You are a cooking assistant. Identify the dish in the meal photo and write a recipe \
             to reproduce it: an ingredient list with quantities, then numbered steps with times \
             and temperatures. Answer in the user's language."
        }
    }
}

/// User request that triggers an analysis of the given kind
pub fn kind_request(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::Nutrition => "Analyze the nutritional value of this meal.",
        AnalysisKind::Recipe => "Give me a recipe for this meal.",
    }
}

/// Combine the kind request with any text the user typed before choosing it
pub fn compose_request(kind: AnalysisKind, context: &[String]) -> String {
    let extra: Vec<&str> = context
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if extra.is_empty() {
        kind_request(kind).to_string()
    } else {
        format!("{}\n\nAdditional details: {}", kind_request(kind), extra.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_request() {
        assert_eq!(
            compose_request(AnalysisKind::Recipe, &[]),
            kind_request(AnalysisKind::Recipe)
        );

        let context = vec!["  it's vegan ".to_string(), String::new()];
        let request = compose_request(AnalysisKind::Nutrition, &context);
        assert!(request.starts_with(kind_request(AnalysisKind::Nutrition)));
        assert!(request.ends_with("Additional details: it's vegan"));
    }

    #[test]
    fn test_prompts_differ_by_kind() {
        assert_ne!(
            system_prompt(AnalysisKind::Nutrition),
            system_prompt(AnalysisKind::Recipe)
        );
    }
}
