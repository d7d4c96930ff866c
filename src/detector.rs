//! Weighted substring framework detector.
//!
//! Detection is a total function: every input, including empty or missing
//! source, maps to some framework (vanilla when nothing scores).

use serde::Serialize;

use crate::framework::{FrameworkId, FrameworkProfile, EXTENSION_BONUS, PROFILES};

/// Badge-ready analysis of a snippet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeAnalysis {
    pub framework: FrameworkId,
    pub name: &'static str,
    pub color: &'static str,
    pub text_color: &'static str,
    pub scripts: Vec<&'static str>,
    /// Detection patterns of the chosen profile found in the source
    pub patterns: Vec<&'static str>,
}

/// Detect the framework a snippet is written for.
pub fn detect(source: &str) -> FrameworkId {
    if source.trim().is_empty() {
        return FrameworkId::Vanilla;
    }

    if source.contains("@Component") && source.contains("export class") {
        return FrameworkId::Angular;
    }

    let scores = score_all(source);
    let mut best: Option<(FrameworkId, u32)> = None;
    for (id, score) in scores {
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((id, score));
        }
    }
    best.map(|(id, _)| id).unwrap_or(FrameworkId::Vanilla)
}

/// Detect from optional source; `None` behaves like empty input.
pub fn detect_opt(source: Option<&str>) -> FrameworkId {
    source.map(detect).unwrap_or(FrameworkId::Vanilla)
}

/// Score every profile in declaration order.
pub fn score_all(source: &str) -> Vec<(FrameworkId, u32)> {
    let normalized = normalize(source);
    PROFILES
        .iter()
        .map(|profile| (profile.id, score_profile(&normalized, profile)))
        .collect()
}

fn score_profile(normalized: &str, profile: &FrameworkProfile) -> u32 {
    let mut score: u32 = profile
        .patterns
        .iter()
        .filter(|(pattern, _)| normalized.contains(&pattern.to_lowercase()))
        .map(|(_, weight)| *weight)
        .sum();

    if profile
        .file_extensions
        .iter()
        .any(|ext| normalized.contains(&ext.to_lowercase()))
    {
        score += EXTENSION_BONUS;
    }
    score
}

/// Lowercase and collapse every whitespace run into a single space.
pub fn normalize(source: &str) -> String {
    source
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Detect the framework and collect what a badge needs to display it.
pub fn analyze(source: &str) -> CodeAnalysis {
    let framework = detect(source);
    let profile = framework.profile();
    let normalized = normalize(source);

    CodeAnalysis {
        framework,
        name: profile.display_name,
        color: profile.color,
        text_color: profile.text_color,
        scripts: profile.scripts.to_vec(),
        patterns: profile
            .patterns
            .iter()
            .filter(|(pattern, _)| normalized.contains(&pattern.to_lowercase()))
            .map(|(pattern, _)| *pattern)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_missing_sources_fall_back_to_vanilla() {
        assert_eq!(detect(""), FrameworkId::Vanilla);
        assert_eq!(detect("   \n\t"), FrameworkId::Vanilla);
        assert_eq!(detect_opt(None), FrameworkId::Vanilla);
    }

    #[test]
    fn unscored_text_is_vanilla() {
        assert_eq!(detect("hello world"), FrameworkId::Vanilla);
    }

    #[test]
    fn react_component_is_detected() {
        let code = r#"
            function Counter(props) {
                const [count, setCount] = useState(0);
                return <button className="btn" onClick={() => setCount(count + 1)}>{count}</button>;
            }
        "#;
        assert_eq!(detect(code), FrameworkId::React);
    }

    #[test]
    fn angular_shortcut_wins_over_scoring() {
        let code = "@Component({ selector: 'app-x', template: '<p>x</p>' })\nexport class X {}";
        assert_eq!(detect(code), FrameworkId::Angular);
    }

    #[test]
    fn vue_template_directives_are_detected() {
        let code = r#"<ul><li v-for="item in items">{{ item }}</li></ul>"#;
        assert_eq!(detect(code), FrameworkId::Vue);
    }

    #[test]
    fn dom_scripting_is_vanilla() {
        let code = "document.querySelector('#btn').addEventListener('click', () => alert(1));";
        assert_eq!(detect(code), FrameworkId::Vanilla);
    }

    #[test]
    fn whitespace_is_collapsed_before_matching() {
        assert_eq!(normalize("  Export\n\n   Class  Foo "), "export class foo");
    }

    #[test]
    fn extension_marker_adds_bonus_once() {
        let scores = score_all("import { A } from './a.component.ts'; import { B } from './b.component.ts';");
        let angular = scores.iter().find(|(id, _)| *id == FrameworkId::Angular).unwrap().1;
        assert_eq!(angular, EXTENSION_BONUS);
    }

    #[test]
    fn plain_ts_file_reference_scores_for_angular() {
        assert_eq!(detect("import { Store } from './store.ts';"), FrameworkId::Angular);
    }

    #[test]
    fn analyze_reports_matched_patterns() {
        let analysis = analyze("const [a, b] = useState(1); useEffect(() => {}, []);");
        assert_eq!(analysis.framework, FrameworkId::React);
        assert_eq!(analysis.name, "React");
        assert!(analysis.patterns.contains(&"useState"));
        assert!(analysis.patterns.contains(&"useEffect"));
        assert!(!analysis.patterns.contains(&"jsx"));
    }
}
