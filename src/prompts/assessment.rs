//! Examiner prompts for rubric-scored spoken and written responses.
//!
//! Every template follows the same layout: examiner framing, section header,
//! reference material, the rubric written out band by band, tier-specific
//! expectations, the student's response, and finally the exact JSON shape to
//! return. Criterion lines are generated from the rubric so that overridden
//! rubrics are described with their own maxima.

use crate::rubric::{Criterion, RubricDefinition};
use crate::task::{AssessmentMaterial, Language, SpeakingSection, Tier, WritingSection};

/// System message sent with every assessment prompt.
pub const EXAMINER_SYSTEM_PROMPT: &str = "You are an expert GCSE language examiner. \
Always respond with valid JSON only, no markdown or explanation.";

/// Build the prompt for a spoken section.
pub fn build_spoken_prompt(
    section: SpeakingSection,
    language: Language,
    tier: Tier,
    material: &AssessmentMaterial,
    rubric: &RubricDefinition,
) -> String {
    let mut prompt = format!(
        "You are an experienced AQA examiner assessing {} tier {} speaking exams.\n\n",
        tier.display_name(),
        language.display_name()
    );

    let title = match section {
        SpeakingSection::Roleplay => {
            format!("Roleplay Question {}", material.question_number.unwrap_or(1))
        }
        SpeakingSection::ShortConversation => format!(
            "Short Conversation Question {}",
            material.question_number.unwrap_or(1)
        ),
        SpeakingSection::ReadingAloud => "Reading Aloud".to_string(),
        SpeakingSection::Photocard => "Photocard Discussion".to_string(),
        SpeakingSection::GeneralConversation => "General Conversation".to_string(),
    };
    prompt.push_str(&section_header(&title, tier, rubric));

    match section {
        SpeakingSection::Roleplay | SpeakingSection::ShortConversation => {
            push_question(&mut prompt, material);
        }
        SpeakingSection::ReadingAloud => {
            prompt.push_str(&format!(
                "ORIGINAL TEXT TO READ:\n\"{}\"\n\n",
                material.original_text.as_deref().unwrap_or_default()
            ));
            prompt.push_str(
                "Compare the student's transcription to the original text. Consider how \
accurately each word was pronounced (reflected in transcription accuracy) and whether \
natural flow and intonation were maintained.\n\n",
            );
        }
        SpeakingSection::Photocard => {
            prompt.push_str(&format!(
                "THEME: {}\n",
                material.theme.as_deref().unwrap_or("General")
            ));
            prompt.push_str(&format!(
                "BULLET POINTS PROVIDED:\n{}\n\n",
                numbered_or(&material.bullet_points, "No bullet points provided")
            ));
        }
        SpeakingSection::GeneralConversation => {
            prompt.push_str(&format!(
                "INFORMATION POINTS REQUIRED: {}\n",
                information_point_target(tier)
            ));
            prompt.push_str(&format!(
                "TOPIC: {}\n\n",
                material.topic.as_deref().unwrap_or("General")
            ));
        }
    }

    prompt.push_str(&criteria_block(rubric, |c| spoken_descriptors(section, c, tier)));
    prompt.push_str(&spoken_tier_expectations(section, tier));
    prompt.push_str(&format!(
        "STUDENT'S RESPONSE:\n\"{}\"\n\n",
        material.response_text
    ));
    prompt.push_str(&output_shape(
        rubric,
        &spoken_flags(section, tier),
        &spoken_extras(section, tier),
        if matches!(section, SpeakingSection::GeneralConversation) {
            "<3-4 sentence detailed constructive feedback>"
        } else {
            "<2-3 sentence constructive feedback>"
        },
    ));
    prompt
}

/// Build the prompt for a written section.
pub fn build_written_prompt(
    section: WritingSection,
    language: Language,
    tier: Tier,
    material: &AssessmentMaterial,
    rubric: &RubricDefinition,
) -> String {
    let mut prompt = format!(
        "You are an experienced {} language teacher marking an AQA GCSE {} tier writing \
task following the official mark scheme.\n\n",
        language.display_name(),
        tier.display_name()
    );

    let title = match section {
        WritingSection::PhotoDescription => "Photo Description",
        WritingSection::Translation => "Translation into English",
        WritingSection::ShortMessage => "Short Message",
        WritingSection::ExtendedWriting => "Extended Writing",
        WritingSection::AdvancedWriting => "Extended Writing (open response)",
    };
    prompt.push_str(&section_header(title, tier, rubric));
    push_question(&mut prompt, material);

    if let Some(original) = &material.original_text {
        prompt.push_str(&format!("ORIGINAL TEXT:\n\"{}\"\n\n", original));
    }
    if !material.bullet_points.is_empty() {
        prompt.push_str(&format!(
            "COMPULSORY BULLET POINTS:\n{}\n\n",
            numbered_or(&material.bullet_points, "")
        ));
    }

    prompt.push_str(&criteria_block(rubric, |c| written_descriptors(section, c)));
    prompt.push_str(
        "KEY PRINCIPLES:\n\
- Major error: adversely affects communication\n\
- Minor error: does not affect communication\n\
- A mark of 0 for communication or meaning results in 0 for the language criteria\n\
- Use a \"best fit\" approach when descriptors are not consistently demonstrated\n\n",
    );
    prompt.push_str(&written_tier_expectations(tier));

    prompt.push_str(&format!(
        "STUDENT'S WRITING:\n\"{}\"\n\n",
        material.response_text
    ));
    let target = material
        .word_count_target
        .or_else(|| section.default_word_target());
    match target {
        Some(target) => prompt.push_str(&format!(
            "Word count: {} words (target: ~{} words)\n\n",
            material.word_count(),
            target
        )),
        None => prompt.push_str(&format!("Word count: {} words\n\n", material.word_count())),
    }

    prompt.push_str(&output_shape(
        rubric,
        &written_flags(section),
        &written_extras(section),
        "<detailed feedback based on the mark scheme>",
    ));
    prompt
}

fn section_header(title: &str, tier: Tier, rubric: &RubricDefinition) -> String {
    let breakdown = rubric
        .criteria()
        .iter()
        .map(|c| format!("{} {}", c.max, c.title()))
        .collect::<Vec<_>>()
        .join(" + ");
    format!(
        "SECTION: {}\nMARKS AVAILABLE: {} ({})\nTIER: {}\n\n",
        title,
        rubric.max_score(),
        breakdown,
        tier.display_name()
    )
}

fn push_question(prompt: &mut String, material: &AssessmentMaterial) {
    if !material.question_text.is_empty() {
        prompt.push_str(&format!("QUESTION: \"{}\"\n", material.question_text));
    }
    if let Some(expected) = &material.expected_content {
        prompt.push_str(&format!("EXPECTED CONTENT: {}\n", expected));
    }
    if !material.question_text.is_empty() || material.expected_content.is_some() {
        prompt.push('\n');
    }
}

fn numbered_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn information_point_target(tier: Tier) -> u32 {
    match tier {
        Tier::Higher => 15,
        Tier::Foundation => 9,
    }
}

/// Band descriptors for one criterion: top mark, upper range, lower range, zero.
struct Descriptors {
    top: String,
    upper: String,
    lower: String,
    zero: String,
}

impl Descriptors {
    fn new(top: &str, upper: &str, lower: &str, zero: &str) -> Self {
        Self {
            top: top.to_string(),
            upper: upper.to_string(),
            lower: lower.to_string(),
            zero: zero.to_string(),
        }
    }

    fn generic(criterion: &Criterion) -> Self {
        let name = criterion.title().to_lowercase();
        Self::new(
            &format!("Excellent {}, consistently secure", name),
            &format!("Good {} with minor lapses", name),
            &format!("Limited {}, frequent lapses", name),
            "Does not meet the standard",
        )
    }
}

fn criteria_block(
    rubric: &RubricDefinition,
    descriptors: impl Fn(&Criterion) -> Descriptors,
) -> String {
    let mut block = String::from("ASSESSMENT CRITERIA:\n");
    for (i, criterion) in rubric.criteria().iter().enumerate() {
        block.push_str(&format!(
            "{}. {} (0-{} marks):\n",
            i + 1,
            criterion.title(),
            criterion.max
        ));
        block.push_str(&band_lines(criterion.max, &descriptors(criterion)));
        block.push('\n');
    }
    block
}

fn band_range(low: u32, high: u32) -> Option<String> {
    match low.cmp(&high) {
        std::cmp::Ordering::Less => Some(format!("{}-{}", low, high)),
        std::cmp::Ordering::Equal => Some(low.to_string()),
        std::cmp::Ordering::Greater => None,
    }
}

/// Spread the descriptors over `0..=max` (top mark, upper 60%, lower, zero).
fn band_lines(max: u32, descriptors: &Descriptors) -> String {
    let upper_start = (max * 3).div_ceil(5).max(1);
    let mut lines = vec![format!("   - {}: {}", max, descriptors.top)];
    if let Some(range) = band_range(upper_start, max.saturating_sub(1)) {
        lines.push(format!("   - {}: {}", range, descriptors.upper));
    }
    if let Some(range) = band_range(1, upper_start.saturating_sub(1).min(max.saturating_sub(1))) {
        lines.push(format!("   - {}: {}", range, descriptors.lower));
    }
    lines.push(format!("   - 0: {}", descriptors.zero));
    lines.join("\n") + "\n"
}

fn spoken_descriptors(section: SpeakingSection, criterion: &Criterion, tier: Tier) -> Descriptors {
    let higher = matches!(tier, Tier::Higher);
    match criterion.name.as_str() {
        "communication" if matches!(section, SpeakingSection::GeneralConversation) => {
            Descriptors::new(
                &format!(
                    "{} or more clear information points conveyed",
                    information_point_target(tier)
                ),
                "Most required information points conveyed, scaled proportionally",
                "Few information points, communication often unclear",
                "No relevant information conveyed",
            )
        }
        "communication" => Descriptors::new(
            "All tasks completed, clear communication",
            "Most tasks completed, generally clear",
            "Limited tasks completed, hesitant",
            "No relevant response",
        ),
        "language_quality" => Descriptors::new(
            if higher {
                "Accurate with complex structures and wide vocabulary"
            } else {
                "Generally accurate, good range of vocabulary"
            },
            if higher {
                "Generally accurate with good range"
            } else {
                "More accurate than inaccurate, reasonable vocabulary"
            },
            if higher {
                "Limited accuracy, limited vocabulary"
            } else {
                "Limited accuracy, basic vocabulary"
            },
            "No comprehensible language",
        ),
        "pronunciation" => Descriptors::new(
            "Excellent pronunciation, clear articulation of all words",
            "Good or acceptable pronunciation, most words clear",
            "Pronunciation issues affecting clarity",
            "Unintelligible",
        ),
        "fluency" => Descriptors::new(
            "Smooth, natural reading",
            "Good pace with some hesitations",
            "Slow or halting, frequent hesitations",
            "Could not complete",
        ),
        "description" => Descriptors::new(
            "Full, detailed description of the photo",
            "Good coverage of the main elements",
            "Limited description",
            "No relevant description",
        ),
        "discussion" => Descriptors::new(
            "All bullet points addressed with development",
            "Most bullet points addressed",
            "Some points touched on",
            "No relevant discussion",
        ),
        _ => Descriptors::generic(criterion),
    }
}

fn written_descriptors(section: WritingSection, criterion: &Criterion) -> Descriptors {
    match criterion.name.as_str() {
        "communication" if matches!(section, WritingSection::PhotoDescription) => {
            Descriptors::new(
                "Every sentence relevant to the photo, clear, with a conjugated verb",
                "Most sentences clear and relevant; some ambiguity or infinitives",
                "Frequent ambiguity, single words or irrelevant statements",
                "Irrelevant or unintelligible",
            )
        }
        "communication" => Descriptors::new(
            "All bullet points covered, clear communication, ideas regularly developed",
            "Bullet points mostly covered, generally clear, some development",
            "Few bullet points covered, communication often unclear",
            "Content does not meet the standard",
        ),
        "meaning" => Descriptors::new(
            "Nearly all meaning elements rendered; a native speaker understands without the original",
            "Most meaning elements rendered",
            "Few meaning elements rendered",
            "No meaning conveyed",
        ),
        "language_quality" | "linguistic_quality" => Descriptors::new(
            "Good variety of vocabulary, regular complex structures, mainly minor errors",
            "Some variety, references to at least two time frames, more accurate than inaccurate",
            "Narrow vocabulary, simple sentences, frequent major errors",
            "Language does not meet the standard",
        ),
        "range" => Descriptors::new(
            "Very good variety of vocabulary and structures, complex language often successful",
            "Some variety, occasional attempts at complex language",
            "Little variety, mainly short or simple structures",
            "Language does not meet the standard",
        ),
        "accuracy" => Descriptors::new(
            "Usually accurate, secure verbs and tense formations",
            "More accurate than inaccurate, often secure verbs",
            "Mostly inaccurate, frequent major errors",
            "Accuracy does not meet the standard",
        ),
        _ => Descriptors::generic(criterion),
    }
}

fn spoken_tier_expectations(section: SpeakingSection, tier: Tier) -> String {
    match (section, tier) {
        (SpeakingSection::ReadingAloud, _) => String::new(),
        (SpeakingSection::GeneralConversation, Tier::Higher) => "HIGHER TIER ASSESSMENT:\n\
- Count distinct information points (max 15)\n\
- Expect complex ideas and justifications\n\
- Look for: subjunctive, conditional, multiple tenses\n\
- Sophisticated vocabulary and discourse markers\n\n"
            .to_string(),
        (SpeakingSection::GeneralConversation, Tier::Foundation) => {
            "FOUNDATION TIER ASSESSMENT:\n\
- Count distinct information points (max 9)\n\
- Present tense primarily, with some past/future\n\
- Clear, accurate basic structures\n\n"
                .to_string()
        }
        (_, Tier::Foundation) => "FOUNDATION TIER REQUIREMENTS:\n\
- Every sentence must contain a verb\n\
- Present tense required unless past is specifically needed\n\
- Must answer the prompt fully\n\n"
            .to_string(),
        (_, Tier::Higher) => "HIGHER TIER EXPECTATIONS:\n\
- Complex sentence structures expected\n\
- Range of tenses (past, present, future, conditional)\n\
- Sophisticated vocabulary\n\
- Justifications and opinions where appropriate\n\n"
            .to_string(),
    }
}

fn written_tier_expectations(tier: Tier) -> String {
    match tier {
        Tier::Foundation => "FOUNDATION TIER EXPECTATIONS:\n\
- Present tense is aimed for, other tenses are accepted\n\
- Statements must use conjugated verbs\n\
- Minor errors do not reduce communication marks\n\n"
            .to_string(),
        Tier::Higher => "HIGHER TIER EXPECTATIONS:\n\
- References to past, present and future time frames\n\
- Regular attempts at complex language and structures\n\
- Opinions developed with justification\n\n"
            .to_string(),
    }
}

fn spoken_flags(section: SpeakingSection, tier: Tier) -> Vec<&'static str> {
    match section {
        SpeakingSection::Roleplay | SpeakingSection::ShortConversation => {
            let mut flags = vec![
                "has_verb",
                "correct_tense",
                "answers_question",
                "grammar_accurate",
            ];
            if matches!(tier, Tier::Higher) {
                flags.extend(["variety_of_tenses", "complex_structures", "provides_justification"]);
            }
            flags
        }
        SpeakingSection::ReadingAloud => vec![
            "all_words_attempted",
            "natural_intonation",
            "appropriate_pace",
        ],
        SpeakingSection::Photocard => vec![
            "described_photo",
            "addressed_theme",
            "gave_opinions",
            "used_variety_of_structures",
        ],
        SpeakingSection::GeneralConversation => vec![
            "minimum_points_achieved",
            "variety_of_tenses",
            "accurate_grammar",
            "relevant_to_topic",
        ],
    }
}

fn spoken_extras(section: SpeakingSection, tier: Tier) -> Vec<(&'static str, &'static str)> {
    match section {
        SpeakingSection::Roleplay | SpeakingSection::ShortConversation => Vec::new(),
        SpeakingSection::ReadingAloud => vec![
            ("accuracy_percentage", "<0-100>"),
            ("words_correct", "<number>"),
            ("words_total", "<number>"),
            ("mispronounced_words", "[\"<word1>\", \"<word2>\"]"),
        ],
        SpeakingSection::Photocard => vec![(
            "bullet_points_addressed",
            "[<boolean for each bullet point>]",
        )],
        SpeakingSection::GeneralConversation => {
            let mut extras = vec![
                ("information_points_count", "<number>"),
                ("information_points", "[\"<point 1>\", \"<point 2>\"]"),
            ];
            if matches!(tier, Tier::Higher) {
                extras.push(("complex_structures_used", "[\"<structure 1>\"]"));
            }
            extras.push(("tenses_used", "[\"<tense 1>\"]"));
            extras.push(("connectives_used", "[\"<connective 1>\"]"));
            extras
        }
    }
}

fn written_flags(section: WritingSection) -> Vec<&'static str> {
    match section {
        WritingSection::PhotoDescription => vec!["relevant_to_photo", "uses_conjugated_verbs"],
        WritingSection::Translation => vec!["meaning_preserved", "grammar_accurate"],
        WritingSection::ShortMessage | WritingSection::ExtendedWriting => vec![
            "all_bullet_points_covered",
            "multiple_time_frames",
            "ideas_developed",
        ],
        WritingSection::AdvancedWriting => vec![
            "both_bullet_points_covered",
            "complex_language_attempted",
            "ideas_developed",
        ],
    }
}

fn written_extras(section: WritingSection) -> Vec<(&'static str, &'static str)> {
    match section {
        WritingSection::PhotoDescription => vec![
            ("sentence_scores", "[<0-2 for each sentence>]"),
            ("sentence_analysis", "[\"<analysis for each sentence>\"]"),
        ],
        WritingSection::Translation => vec![
            ("meaning_elements_score", "<number>"),
            ("translation_analysis", "[\"<analysis for each sentence>\"]"),
        ],
        WritingSection::ShortMessage | WritingSection::ExtendedWriting => vec![
            ("bullet_points_covered", "<number>"),
            ("time_frames_used", "[\"past\", \"present\", \"future\"]"),
            ("vocabulary_feedback", "\"<assessment of vocabulary variety>\""),
        ],
        WritingSection::AdvancedWriting => vec![
            ("bullet_points_covered", "<number>"),
            ("vocabulary_feedback", "\"<assessment of vocabulary variety>\""),
        ],
    }
}

fn output_shape(
    rubric: &RubricDefinition,
    flags: &[&str],
    extras: &[(&str, &str)],
    feedback_hint: &str,
) -> String {
    let mut fields: Vec<String> = rubric
        .criteria()
        .iter()
        .map(|c| format!("  \"{}\": <0-{}>", c.score_key(), c.max))
        .collect();
    fields.push(format!("  \"total_score\": <0-{}>", rubric.max_score()));
    fields.extend(
        extras
            .iter()
            .map(|(name, value)| format!("  \"{}\": {}", name, value)),
    );

    let flag_lines = flags
        .iter()
        .map(|flag| format!("    \"{}\": <boolean>", flag))
        .collect::<Vec<_>>()
        .join(",\n");
    fields.push(format!("  \"criteria_met\": {{\n{}\n  }}", flag_lines));
    fields.push(
        "  \"errors\": [\n    {\"type\": \"grammar|vocabulary|pronunciation|structure\", \
\"issue\": \"<description>\", \"correction\": \"<correct form>\"}\n  ]"
            .to_string(),
    );
    fields.push(format!("  \"feedback\": \"{}\"", feedback_hint));
    fields.push("  \"suggestions\": [\"<improvement tip 1>\", \"<improvement tip 2>\"]".to_string());

    format!(
        "Assess this response and return ONLY a JSON object (no markdown, no explanation) \
with this exact structure:\n{{\n{}\n}}",
        fields.join(",\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::builtin_rubric;
    use crate::task::AssessmentVariant;

    fn rubric(section: SpeakingSection) -> RubricDefinition {
        builtin_rubric(AssessmentVariant::Spoken(section))
    }

    #[test]
    fn test_roleplay_prompt_contents() {
        let material = AssessmentMaterial::new("Quiero una mesa para dos.")
            .with_question("¿Qué desea?")
            .with_question_number(3)
            .with_expected_content("Ask for a table");
        let prompt = build_spoken_prompt(
            SpeakingSection::Roleplay,
            Language::Es,
            Tier::Foundation,
            &material,
            &rubric(SpeakingSection::Roleplay),
        );
        assert!(prompt.contains("Foundation tier Spanish speaking"));
        assert!(prompt.contains("SECTION: Roleplay Question 3"));
        assert!(prompt.contains("MARKS AVAILABLE: 10 (5 Communication + 5 Language Quality)"));
        assert!(prompt.contains("EXPECTED CONTENT: Ask for a table"));
        assert!(prompt.contains("Every sentence must contain a verb"));
        assert!(prompt.contains("\"communication_score\": <0-5>"));
        assert!(prompt.contains("\"total_score\": <0-10>"));
        assert!(!prompt.contains("provides_justification"));
        assert!(prompt.contains("Quiero una mesa para dos."));
    }

    #[test]
    fn test_higher_roleplay_adds_flags() {
        let prompt = build_spoken_prompt(
            SpeakingSection::ShortConversation,
            Language::De,
            Tier::Higher,
            &AssessmentMaterial::new("Ich spiele gern Fußball."),
            &rubric(SpeakingSection::ShortConversation),
        );
        assert!(prompt.contains("SECTION: Short Conversation Question 1"));
        assert!(prompt.contains("provides_justification"));
        assert!(prompt.contains("HIGHER TIER EXPECTATIONS"));
    }

    #[test]
    fn test_general_conversation_targets() {
        let prompt = build_spoken_prompt(
            SpeakingSection::GeneralConversation,
            Language::Fr,
            Tier::Foundation,
            &AssessmentMaterial::new("J'aime le sport.").with_topic("Free time"),
            &rubric(SpeakingSection::GeneralConversation),
        );
        assert!(prompt.contains("INFORMATION POINTS REQUIRED: 9"));
        assert!(prompt.contains("TOPIC: Free time"));
        assert!(prompt.contains("\"total_score\": <0-30>"));
        assert!(!prompt.contains("complex_structures_used"));
    }

    #[test]
    fn test_photocard_lists_bullets() {
        let material = AssessmentMaterial::new("Hay tres personas.")
            .with_theme("Holidays")
            .with_bullet_points(vec!["Describe the photo".into(), "Your last holiday".into()]);
        let prompt = build_spoken_prompt(
            SpeakingSection::Photocard,
            Language::Es,
            Tier::Higher,
            &material,
            &rubric(SpeakingSection::Photocard),
        );
        assert!(prompt.contains("1. Describe the photo\n2. Your last holiday"));
        assert!(prompt.contains("bullet_points_addressed"));
    }

    #[test]
    fn test_written_prompt_word_target() {
        let prompt = build_written_prompt(
            WritingSection::ExtendedWriting,
            Language::Es,
            Tier::Foundation,
            &AssessmentMaterial::new("Ayer fui al parque con mis amigos."),
            &builtin_rubric(AssessmentVariant::Written(WritingSection::ExtendedWriting)),
        );
        assert!(prompt.contains("Word count: 7 words (target: ~90 words)"));
        assert!(prompt.contains("\"linguistic_quality_score\": <0-5>"));
        assert!(prompt.contains("MARKS AVAILABLE: 15"));
    }

    #[test]
    fn test_band_lines_follow_max() {
        let five = band_lines(
            5,
            &Descriptors::generic(&Criterion::new("fluency", 5)),
        );
        assert!(five.contains("   - 5: "));
        assert!(five.contains("   - 3-4: "));
        assert!(five.contains("   - 1-2: "));
        assert!(five.contains("   - 0: "));

        let one = band_lines(1, &Descriptors::generic(&Criterion::new("task", 1)));
        assert_eq!(one.lines().count(), 2);
    }
}
