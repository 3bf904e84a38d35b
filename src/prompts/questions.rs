//! Prompt for bulk multiple-choice practice sets.

use crate::task::{Language, QuantityConstraints, TopicMetadata};

/// Number of reference items embedded in the prompt.
const REFERENCE_ITEM_LIMIT: usize = 5;

/// Two model items showing the exact output format.
const EXAMPLE_ITEMS: &str = r#"[
  {
    "id": "adj_agr_p1",
    "type": "multiple_choice",
    "options": ["blanco", "blanca", "blancos", "blancas"],
    "question": "Choose the correct form: La mesa _____ (blanco)",
    "difficulty": "beginner",
    "explanation": "Mesa is feminine singular, so the adjective becomes 'blanca'.",
    "correct_answer": "blanca"
  },
  {
    "id": "adj_agr_p2",
    "type": "multiple_choice",
    "options": ["negro", "negra", "negros", "negras"],
    "question": "Select: Los gatos _____ (negro)",
    "difficulty": "beginner",
    "explanation": "Gatos is masculine plural, so the adjective becomes 'negros'.",
    "correct_answer": "negros"
  }
]"#;

pub fn build_system_prompt(language: Language, quantity: &QuantityConstraints) -> String {
    format!(
        "You are an expert {} language teacher. You must respond with valid JSON only. \
The response must be a JSON object with a \"questions\" array containing exactly {} question \
objects. NEVER repeat the same option twice in a single question.",
        language.display_name(),
        quantity.count
    )
}

/// Human-readable split of `count` items into thirds, 1-based and inclusive.
fn progression_ranges(count: usize) -> [(usize, usize); 3] {
    let bound = |segment: usize| segment * count / 3;
    [
        (1, bound(1)),
        (bound(1) + 1, bound(2)),
        (bound(2) + 1, count),
    ]
}

fn describe_range((start, end): (usize, usize)) -> String {
    if start >= end {
        format!("Question {}", end.max(start))
    } else {
        format!("Questions {}-{}", start, end)
    }
}

pub fn build_question_set_prompt(
    language: Language,
    topic: &TopicMetadata,
    reference_items: &[serde_json::Value],
    quantity: &QuantityConstraints,
) -> String {
    let language_name = language.display_name();
    let count = quantity.count;
    let options = quantity.options_per_item;
    let distractors = options.saturating_sub(1);

    let references = serde_json::to_string_pretty(
        &reference_items
            .iter()
            .take(REFERENCE_ITEM_LIMIT)
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".to_string());

    let [beginner, intermediate, advanced] = progression_ranges(count);

    format!(
        r#"You are an expert {language_name} language teacher creating practice exercises for students.

TOPIC: {topic_name}
CATEGORY: {category}
DIFFICULTY: {level}

I need you to create {count} HIGH-QUALITY practice questions for this grammar topic.

REFERENCE QUIZ QUESTIONS (for context about this topic):
{references}

EXAMPLE OF EXCELLENT PRACTICE QUESTIONS (format to follow):
{examples}

CRITICAL REQUIREMENTS:
1. Create EXACTLY {count} multiple-choice questions
2. Each question MUST have EXACTLY {options} options in the "options" array
3. The {distractors} INCORRECT options (distractors) MUST be PLAUSIBLE, UNIQUE, and based on COMMON ERRORS for this topic. All {options} options MUST be different words/phrases. DO NOT REUSE OPTIONS.
4. Questions should be SPECIFIC with real {language_name} sentences/examples (not generic)
5. Include clear explanations that teach the grammar rule
6. DIFFICULTY PROGRESSION (very important):
   - {beginner_range}: "beginner" difficulty (simple, basic concepts)
   - {intermediate_range}: "intermediate" difficulty (more complex)
   - {advanced_range}: "intermediate" or "advanced" difficulty (challenging)
7. Use the format: "Choose/Select/Complete: [sentence with blank] ([word in parentheses])"
8. First write {options} DIFFERENT options, THEN copy one of those EXACT options (character-for-character, including all accents) as the "correct_answer"
9. Each question needs a unique id like "{slug}_p1", "{slug}_p2", etc.
10. Use "type": "multiple_choice" for all questions
11. Vary the sentence topics (family, school, hobbies, travel, food, etc.)
12. If you are tempted to repeat an option, write a grammatically INCORRECT BUT PLAUSIBLE distractor instead

VALIDATION CHECKLIST (verify before returning):
- Exactly {count} questions
- Each question has exactly {options} UNIQUE options
- Each correct_answer is EXACTLY one of the options
- Each question has: id, type, question, options, correct_answer, explanation, difficulty

Return ONLY a valid JSON object with this exact structure: {{"questions": [array of exactly {count} question objects]}}. Do not use markdown code blocks."#,
        language_name = language_name,
        topic_name = topic.display_name(),
        category = topic.category,
        level = topic.level,
        count = count,
        references = references,
        examples = EXAMPLE_ITEMS,
        options = options,
        distractors = distractors,
        beginner_range = describe_range(beginner),
        intermediate_range = describe_range(intermediate),
        advanced_range = describe_range(advanced),
        slug = topic.slug,
    )
}
