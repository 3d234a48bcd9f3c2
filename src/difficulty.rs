use rand::Rng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::model::{Question, Subject};

/// Target share of each difficulty level (1 through 5) after rebalancing,
/// in percent. Mirrors the historical distribution of applied exams.
pub const DIFFICULTY_TARGETS: [u32; 5] = [20, 25, 30, 20, 5];

/// Estimates a 1-5 difficulty for a single question from surface features of
/// its text. Each subject has its own rule chain; the first rule that fires
/// wins, and everything else lands on 2.
pub fn estimate(stem: &str, options: &[String], subject: Subject) -> u8 {
    let text = {
        let mut text = stem.to_lowercase();
        for option in options {
            text.push(' ');
            text.push_str(&option.to_lowercase());
        }
        text
    };
    let words = stem.split_whitespace().count();

    let level = match subject {
        Subject::M1 | Subject::M2 => estimate_math(&text, words, subject),
        Subject::H => estimate_history(&text, words),
        Subject::L => estimate_language(&text, words),
        Subject::CB | Subject::CF | Subject::CQ => estimate_science(&text, words),
    };
    level.clamp(1, 5)
}

fn estimate_math(text: &str, words: usize, subject: Subject) -> u8 {
    let advanced = [
        "demuestr",
        "logaritmo",
        "derivada",
        "trigonometr",
        "probabilidad condicional",
        "función compuesta",
    ];
    let symbolic = ["ecuación", "función", "inecuación", "expresión", "f(x)"];
    let basic = ["calcul", "suma", "resta", "porcentaje", "fracción"];

    if advanced.iter().any(|cue| text.contains(cue)) {
        return if subject == Subject::M2 { 5 } else { 4 };
    }
    if symbolic.iter().any(|cue| text.contains(cue)) && words > 40 {
        return 4;
    }
    if symbolic.iter().any(|cue| text.contains(cue)) {
        return 3;
    }
    if basic.iter().any(|cue| text.contains(cue)) && words <= 25 {
        return 2;
    }
    if words <= 15 {
        return 1;
    }
    2
}

fn estimate_history(text: &str, words: usize) -> u8 {
    let analytical = ["analiz", "compar", "relacion", "consecuencia", "interpreta"];
    let factual = ["en qué año", "quién", "dónde", "cuál de los siguientes"];

    if analytical.iter().any(|cue| text.contains(cue)) && words > 50 {
        return 5;
    }
    if analytical.iter().any(|cue| text.contains(cue)) {
        return 4;
    }
    if factual.iter().any(|cue| text.contains(cue)) {
        return 2;
    }
    if words > 60 {
        return 4;
    }
    2
}

fn estimate_language(text: &str, words: usize) -> u8 {
    let inferential = ["se puede inferir", "propósito", "intención", "sintetiza"];
    let literal = ["según el texto", "el texto menciona", "de acuerdo con"];

    if inferential.iter().any(|cue| text.contains(cue)) && words > 45 {
        return 5;
    }
    if inferential.iter().any(|cue| text.contains(cue)) {
        return 4;
    }
    if literal.iter().any(|cue| text.contains(cue)) {
        return 2;
    }
    2
}

fn estimate_science(text: &str, words: usize) -> u8 {
    let quantitative = ["calcul", "mol", "concentración", "velocidad", "fuerza", "energía"];
    let conceptual = ["explica", "por qué", "predice", "modelo"];

    if quantitative.iter().any(|cue| text.contains(cue))
        && conceptual.iter().any(|cue| text.contains(cue))
    {
        return 5;
    }
    if quantitative.iter().any(|cue| text.contains(cue)) {
        return 4;
    }
    if conceptual.iter().any(|cue| text.contains(cue)) {
        return 3;
    }
    if words <= 20 {
        return 2;
    }
    2
}

/// Reassigns difficulties across a whole batch so the bank matches the target
/// distribution exactly. Questions are shuffled first so which question lands
/// in which bucket is arbitrary, then bucket sizes are carved out of the
/// cumulative percentages so every question gets exactly one level.
pub fn rebalance<R: Rng>(questions: &mut [Question], rng: &mut R) {
    let total = questions.len();
    if total == 0 {
        return;
    }

    let mut order: Vec<usize> = (0..total).collect();
    order.shuffle(rng);

    let mut cumulative = 0u32;
    let mut previous_boundary = 0usize;
    for (level_index, target) in DIFFICULTY_TARGETS.iter().enumerate() {
        cumulative += target;
        let boundary = if level_index + 1 == DIFFICULTY_TARGETS.len() {
            total
        } else {
            (total as u64 * cumulative as u64 / 100) as usize
        };
        for &question_index in &order[previous_boundary..boundary] {
            questions[question_index].difficulty = level_index as u8 + 1;
        }
        previous_boundary = boundary;
    }

    debug!(total, "rebalanced difficulty distribution");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            subject: Subject::M1,
            content: "¿Cuánto es 2 + 2?".to_string(),
            options: Vec::new(),
            correct_answer: "a".to_string(),
            explanation: String::new(),
            area_tematica: "Numeros".to_string(),
            tema: "Unknown".to_string(),
            subtema: "Unknown".to_string(),
            difficulty: 3,
            habilidad: Some("Resolver problemas".to_string()),
            active: true,
            answer_inferred: false,
            has_visual_content: None,
            image_ids: Vec::new(),
        }
    }

    #[test]
    fn advanced_math_cues_raise_the_level() {
        let level = estimate(
            "Si log(x) = 2, demuestre el valor de x en la expresión dada.",
            &[],
            Subject::M2,
        );
        assert_eq!(level, 5);
    }

    #[test]
    fn factual_history_questions_stay_low() {
        let level = estimate(
            "¿En qué año se firmó la independencia de Chile?",
            &[],
            Subject::H,
        );
        assert_eq!(level, 2);
    }

    #[test]
    fn quantitative_and_conceptual_science_is_hardest() {
        let level = estimate(
            "Calcule la concentración final y explique por qué cambia el equilibrio.",
            &[],
            Subject::CQ,
        );
        assert_eq!(level, 5);
    }

    #[test]
    fn rebalance_hits_the_targets_exactly_for_one_hundred() {
        let mut questions: Vec<Question> =
            (0..100).map(|index| question(&format!("M1_{index:03}"))).collect();
        let mut rng = StdRng::seed_from_u64(7);
        rebalance(&mut questions, &mut rng);

        let mut counts = [0usize; 5];
        for question in &questions {
            counts[(question.difficulty - 1) as usize] += 1;
        }
        assert_eq!(counts, [20, 25, 30, 20, 5]);
    }

    #[test]
    fn rebalance_assigns_every_question_a_valid_level() {
        let mut questions: Vec<Question> =
            (0..37).map(|index| question(&format!("M1_{index:03}"))).collect();
        let mut rng = StdRng::seed_from_u64(7);
        rebalance(&mut questions, &mut rng);

        assert!(questions.iter().all(|q| (1..=5).contains(&q.difficulty)));
        let level_one = questions.iter().filter(|q| q.difficulty == 1).count();
        // 20% of 37, floored by the cumulative boundary math.
        assert_eq!(level_one, 7);
    }
}
