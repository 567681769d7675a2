use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::models::{ParsedAnalysis, ParsedStudent};

static RE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Class Overview|Analysis|Report|Assessment)[:\s]*(.+?)(?:\n|$)")
        .expect("static regex")
});
static RE_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Based on.*?(?:analysis|graded work).*?[:\-]\s*(.+?)(?:\n\n|\n[A-Z]|$)")
        .expect("static regex")
});
static RE_PRIORITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Priority\s+(\d+)[:.]?\s*(.+)").expect("static regex"));
static RE_BARE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)").expect("static regex"));
static RE_STRUCTURAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Score|Weak|Evidence|Pattern|Students|Class|Overview|Analysis")
        .expect("static regex")
});
static RE_MAJOR_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:Students|Class|Summary|Conclusion)").expect("static regex")
});
static RE_SCORE_LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Score[:\s]+(\d+)/(\d+)\s*[–-]?\s*\((\d+)%\)").expect("static regex")
});
static RE_SCORE_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+)\s*\((\d+)%\)").expect("static regex"));
static RE_WEAK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Weak\s+Areas?").expect("static regex"));
static RE_EVIDENCE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Evidence|Evidence:").expect("static regex"));
static RE_PATTERN_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Pattern|Pattern:|Pattern\s+[:\-]").expect("static regex")
});
static RE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-•*]+|\d+[.)])\s*").expect("static regex"));
static RE_LEADING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:Score|Weak|Evidence|Pattern)").expect("static regex")
});
static RE_LEADING_KEYWORD_OR_PRIORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:Score|Weak|Evidence|Pattern|Priority)").expect("static regex")
});
static RE_EVIDENCE_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Q\d+:|answered.*\|.*Correct|Q\d+.*\?").expect("static regex")
});

const ARROW: &str = "→";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    WeakAreas,
    Evidence,
    Patterns,
}

/// Line-by-line extraction state. A student block starts at a priority or
/// name line and ends at the next one, a major section heading, or the end of
/// the text.
#[derive(Default)]
struct LineScanner {
    students: Vec<ParsedStudent>,
    current: Option<ParsedStudent>,
    section: Option<Section>,
    in_block: bool,
}

impl LineScanner {
    fn flush(&mut self) {
        if let Some(student) = self.current.take() {
            if !student.name.is_empty() {
                self.students.push(student);
            }
        }
    }

    fn start_student(&mut self, name: String, priority: Option<u32>) {
        self.flush();
        self.current = Some(ParsedStudent {
            name,
            priority,
            ..ParsedStudent::default()
        });
        self.section = None;
        self.in_block = true;
    }

    fn feed(&mut self, raw_line: &str) {
        let line = raw_line.trim();
        if line.is_empty() {
            if self.current.is_some() {
                self.section = None;
            }
            return;
        }

        if let Some(caps) = RE_PRIORITY.captures(line) {
            let priority = caps[1].parse::<u32>().ok().filter(|value| *value > 0);
            self.start_student(clean_name(&caps[2]), priority);
            return;
        }

        if !self.in_block && !RE_STRUCTURAL.is_match(line) {
            if let Some(caps) = RE_BARE_NAME.captures(line) {
                self.start_student(caps[1].to_string(), None);
                return;
            }
        }

        if self.in_block && RE_MAJOR_SECTION.is_match(line) {
            self.in_block = false;
            self.flush();
        }

        let Some(student) = self.current.as_mut() else {
            return;
        };

        if student.score.is_empty() {
            let caps = RE_SCORE_LABELLED
                .captures(line)
                .or_else(|| RE_SCORE_BARE.captures(line));
            if let Some((value, total, percentage)) = caps.as_ref().and_then(score_parts) {
                student.score = format!("{value}/{total} ({percentage}%)");
                student.score_value = Some(value);
                student.score_total = Some(total);
                student.percentage = Some(percentage.min(100));
                return;
            }
        }

        if RE_WEAK_HEADER.is_match(line) {
            self.section = Some(Section::WeakAreas);
            return;
        }
        if RE_EVIDENCE_HEADER.is_match(line) {
            self.section = Some(Section::Evidence);
            return;
        }
        if RE_PATTERN_HEADER.is_match(line) {
            self.section = Some(Section::Patterns);
            return;
        }

        let bulleted = RE_MARKER.is_match(line);
        let cleaned = RE_MARKER.replace(line, "").trim().to_string();
        let length = cleaned.chars().count();

        let section = self.section;
        match section {
            Some(Section::WeakAreas) => {
                if cleaned.contains(ARROW)
                    || (bulleted && length > 5)
                    || (length > 10 && !RE_LEADING_KEYWORD.is_match(&cleaned))
                {
                    student.weak_areas.push(cleaned);
                }
            }
            Some(Section::Evidence) => {
                if is_evidence_line(&cleaned)
                    || (bulleted && length > 10)
                    || (length > 15
                        && cleaned.chars().any(|c| c.is_ascii_digit())
                        && !RE_LEADING_KEYWORD.is_match(&cleaned))
                {
                    student.evidence.push(cleaned);
                }
            }
            Some(Section::Patterns) => {
                if length > 20 && !RE_LEADING_KEYWORD_OR_PRIORITY.is_match(&cleaned) {
                    student.patterns.push(cleaned);
                }
            }
            None if bulleted => {
                if cleaned.contains(ARROW) {
                    student.weak_areas.push(cleaned);
                    self.section = Some(Section::WeakAreas);
                } else if length > 50 && !RE_LEADING_KEYWORD.is_match(&cleaned) {
                    student.patterns.push(cleaned);
                    self.section = Some(Section::Patterns);
                }
            }
            None => {}
        }
    }

    fn finish(mut self) -> Vec<ParsedStudent> {
        self.flush();
        self.students
    }
}

fn is_evidence_line(cleaned: &str) -> bool {
    RE_EVIDENCE_CUE.is_match(cleaned)
        || cleaned.contains(ARROW)
        || cleaned.contains("Student answered")
        || cleaned.contains("Correct:")
}

fn score_parts(caps: &Captures<'_>) -> Option<(u32, u32, u32)> {
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

fn clean_name(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '-' | '–' | ':'))
        .to_string()
}

/// Recover per-student records from free-form analysis prose.
///
/// Best effort: text that does not look like the usual analysis layout yields
/// an empty or partial student list, never an error.
pub fn parse_analysis_text(text: &str) -> ParsedAnalysis {
    let title = RE_TITLE
        .captures(text)
        .map(|caps| caps[1].trim().to_string());
    let description = RE_DESCRIPTION
        .captures(text)
        .map(|caps| caps[1].trim().to_string());

    let mut scanner = LineScanner::default();
    for line in text.lines() {
        scanner.feed(line);
    }
    let students = scanner.finish();
    debug!(students = students.len(), "parsed analysis text");

    ParsedAnalysis {
        title,
        description,
        students,
        raw_text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_analysis_result;
    use serde_json::json;

    #[test]
    fn extracts_single_prioritised_student() {
        let text = "\
Priority 1: Jane Doe\n\
Score: 3/5 (60%)\n\
Weak Areas\n\
- Fractions → Multiplying\n\
Evidence\n\
Q1: missed the multiplication step";
        let parsed = parse_analysis_text(text);

        assert_eq!(parsed.students.len(), 1);
        let jane = &parsed.students[0];
        assert_eq!(jane.name, "Jane Doe");
        assert_eq!(jane.priority, Some(1));
        assert_eq!(jane.score, "3/5 (60%)");
        assert_eq!(jane.score_value, Some(3));
        assert_eq!(jane.score_total, Some(5));
        assert_eq!(jane.percentage, Some(60));
        assert_eq!(jane.weak_areas, vec!["Fractions → Multiplying"]);
        assert_eq!(jane.evidence, vec!["Q1: missed the multiplication step"]);
        assert!(jane.patterns.is_empty());
        assert_eq!(parsed.raw_text, text);
    }

    #[test]
    fn splits_consecutive_priority_blocks() {
        let text = "\
1. Priority 1: **Liam Chen**
Score: 2/8 (25%)
Weak Areas:
- Math → Fractions → Multiplying Fractions

2. Priority 2: Ava Johnson
Score: 5/8 – (62%)
Pattern:
- Consistently inverts the divisor before checking the operation sign
";
        let parsed = parse_analysis_text(text);
        let names: Vec<&str> = parsed.students.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Liam Chen", "Ava Johnson"]);
        assert_eq!(parsed.students[1].priority, Some(2));
        assert_eq!(parsed.students[1].percentage, Some(62));
        assert_eq!(
            parsed.students[1].patterns,
            vec!["Consistently inverts the divisor before checking the operation sign"]
        );
    }

    #[test]
    fn first_score_wins() {
        let text = "Priority 1: Jane Doe\nScore: 3/5 (60%)\nRetake: 4/5 (80%)";
        let parsed = parse_analysis_text(text);
        assert_eq!(parsed.students[0].percentage, Some(60));
        assert_eq!(parsed.students[0].score, "3/5 (60%)");
    }

    #[test]
    fn score_allows_missing_space_and_missing_label() {
        let tight = parse_analysis_text("Priority 1: Jane Doe\nScore: 3/5(60%)");
        assert_eq!(tight.students[0].score, "3/5 (60%)");
        assert_eq!(tight.students[0].percentage, Some(60));

        let unlabelled = parse_analysis_text("Priority 2: Ava Johnson\nQuiz total 4/8 (50%)");
        let ava = &unlabelled.students[0];
        assert_eq!(ava.score, "4/8 (50%)");
        assert_eq!(ava.score_value, Some(4));
        assert_eq!(ava.score_total, Some(8));
        assert_eq!(ava.percentage, Some(50));
    }

    #[test]
    fn percentage_is_capped_at_one_hundred() {
        let text = "Priority 1: Jane Doe\nScore: 1/2 (4294967295%)";
        let jane = &parse_analysis_text(text).students[0];
        assert_eq!(jane.percentage, Some(100));
        assert_eq!(jane.score_value, Some(1));
        assert_eq!(jane.score_total, Some(2));
    }

    #[test]
    fn bare_name_starts_block_only_outside_a_block() {
        let text = "\
Emma Thompson\n\
Score: 9/10 (90%)\n\
Sofia Garcia\n\
Summary of the class\n\
Sofia Garcia\n\
Score: 7/10 (70%)";
        let parsed = parse_analysis_text(text);

        let names: Vec<&str> = parsed.students.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Emma Thompson", "Sofia Garcia"]);
        assert_eq!(parsed.students[0].percentage, Some(90));
        assert_eq!(parsed.students[1].priority, None);
        assert_eq!(parsed.students[1].percentage, Some(70));
    }

    #[test]
    fn structural_lines_are_not_names() {
        let parsed = parse_analysis_text("Class Overview Report\nStudents Needing Help");
        assert!(parsed.students.is_empty());
    }

    #[test]
    fn major_section_ends_the_block() {
        let text = "Priority 1: Jane Doe\nConclusion\n- Math → Ratios";
        let parsed = parse_analysis_text(text);
        assert_eq!(parsed.students.len(), 1);
        assert!(parsed.students[0].weak_areas.is_empty());
    }

    #[test]
    fn blank_line_clears_section_but_keeps_student() {
        let text = "\
Priority 1: Jane Doe\n\
Evidence\n\
Q2: wrote 3/4 + 1/4 = 4/8\n\
\n\
short note\n\
- Math → Geometry → Angles";
        let parsed = parse_analysis_text(text);
        let jane = &parsed.students[0];
        assert_eq!(jane.evidence, vec!["Q2: wrote 3/4 + 1/4 = 4/8"]);
        assert_eq!(jane.weak_areas, vec!["Math → Geometry → Angles"]);
    }

    #[test]
    fn evidence_cues_are_kept_without_bullets() {
        let text = "\
Priority 1: Jane Doe\n\
Evidence\n\
Student answered b\n\
Correct: b\n\
He answered c | Correct b\n\
He answered";
        let jane = &parse_analysis_text(text).students[0];
        assert_eq!(
            jane.evidence,
            vec!["Student answered b", "Correct: b", "He answered c | Correct b"]
        );
    }

    #[test]
    fn unbulleted_evidence_needs_digits_and_length() {
        let text = "\
Priority 1: Jane Doe\n\
Evidence\n\
Homework 4 was late\n\
Homework 4 late\n\
Turned in the quiz late again\n\
Score drop on test 3 of 4";
        let jane = &parse_analysis_text(text).students[0];
        assert_eq!(jane.evidence, vec!["Homework 4 was late"]);
    }

    #[test]
    fn unbulleted_weak_areas_need_more_than_ten_chars() {
        let text = "\
Priority 1: Jane Doe\n\
Weak Areas\n\
Ratio tables\n\
Word probs\n\
Score trends down";
        let jane = &parse_analysis_text(text).students[0];
        assert_eq!(jane.weak_areas, vec!["Ratio tables"]);
    }

    #[test]
    fn patterns_need_more_than_twenty_chars() {
        let text = "\
Priority 1: Jane Doe\n\
Patterns\n\
Skips checking the units\n\
Rushes through tests\n\
Priority given to speed over accuracy";
        let parsed = parse_analysis_text(text);
        assert_eq!(parsed.students.len(), 1);
        assert_eq!(parsed.students[0].patterns, vec!["Skips checking the units"]);
    }

    #[test]
    fn infers_patterns_from_long_bullets() {
        let text = "\
Priority 3: Noah Martinez\n\
* Tends to rush through multi-step word problems and skips the units";
        let parsed = parse_analysis_text(text);
        assert_eq!(parsed.students[0].patterns.len(), 1);
        assert!(parsed.students[0].weak_areas.is_empty());
    }

    #[test]
    fn header_lines_are_not_stored() {
        let text = "\
Priority 1: Jane Doe\n\
Weak Areas (ranked)\n\
- Decimals\n\
Evidence:\n\
- Homework 5 skipped 4 questions";
        let jane = &parse_analysis_text(text).students[0];
        assert_eq!(jane.weak_areas, vec!["Decimals"]);
        assert_eq!(jane.evidence, vec!["Homework 5 skipped 4 questions"]);
    }

    #[test]
    fn extracts_title_and_description() {
        let text = "\
Class Overview: Period 2 Fractions Quiz\n\
Based on the graded work analysis: most students confuse numerators.\n\
\n\
Priority 1: Jane Doe";
        let parsed = parse_analysis_text(text);
        assert_eq!(parsed.title.as_deref(), Some("Period 2 Fractions Quiz"));
        assert_eq!(
            parsed.description.as_deref(),
            Some("most students confuse numerators.")
        );
    }

    #[test]
    fn pretty_printed_fallback_does_not_panic() {
        let text = format_analysis_result(&json!({ "status": "ok", "items": [1, 2, 3] }));
        let parsed = parse_analysis_text(&text);
        assert!(parsed.students.is_empty());
        assert_eq!(parsed.raw_text, text);
    }

    #[test]
    fn empty_priority_name_is_dropped() {
        let parsed = parse_analysis_text("Priority 1:\nScore: 1/2 (50%)");
        assert!(parsed.students.is_empty());
    }
}
