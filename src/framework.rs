//! Framework identifiers and the static profile table.
//!
//! Profiles are declared in priority order: when two profiles score the same
//! the one declared first wins, and `vanilla` is the fallback for everything.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Fixed bonus added when a profile's file-extension marker appears in the source
pub const EXTENSION_BONUS: u32 = 5;

/// The UI frameworks a snippet can be previewed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkId {
    React,
    Angular,
    Vue,
    Vanilla,
}

impl FrameworkId {
    /// All frameworks in profile declaration order
    pub const ALL: [FrameworkId; 4] = [
        FrameworkId::React,
        FrameworkId::Angular,
        FrameworkId::Vue,
        FrameworkId::Vanilla,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FrameworkId::React => "react",
            FrameworkId::Angular => "angular",
            FrameworkId::Vue => "vue",
            FrameworkId::Vanilla => "vanilla",
        }
    }

    /// Parse a framework name, falling back to vanilla for anything unknown.
    pub fn parse_lossy(name: &str) -> FrameworkId {
        name.parse().unwrap_or(FrameworkId::Vanilla)
    }

    /// The static profile for this framework
    pub fn profile(self) -> &'static FrameworkProfile {
        PROFILES
            .iter()
            .find(|p| p.id == self)
            .unwrap_or(&PROFILES[PROFILES.len() - 1])
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameworkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "react" => Ok(FrameworkId::React),
            "angular" => Ok(FrameworkId::Angular),
            "vue" => Ok(FrameworkId::Vue),
            "vanilla" | "javascript" | "js" => Ok(FrameworkId::Vanilla),
            other => Err(Error::Other(format!("Unknown framework: {}", other))),
        }
    }
}

/// Static, read-only description of a framework
#[derive(Debug)]
pub struct FrameworkProfile {
    pub id: FrameworkId,
    /// Human readable name shown on badges
    pub display_name: &'static str,
    /// Badge background color
    pub color: &'static str,
    /// Badge text color
    pub text_color: &'static str,
    /// Runtime scripts the preview surface must load before mounting
    pub scripts: &'static [&'static str],
    /// Ordered `(substring, weight)` detection pairs
    pub patterns: &'static [(&'static str, u32)],
    /// File-extension markers worth `EXTENSION_BONUS` when present
    pub file_extensions: &'static [&'static str],
    /// How long the render server lets the page settle before capturing
    pub settle_ms: u64,
}

/// Profiles in declaration order; the last entry is the fallback.
pub static PROFILES: [FrameworkProfile; 4] = [
    FrameworkProfile {
        id: FrameworkId::React,
        display_name: "React",
        color: "#61dafb",
        text_color: "#000000",
        scripts: &[
            "https://unpkg.com/react@17.0.2/umd/react.development.js",
            "https://unpkg.com/react-dom@17.0.2/umd/react-dom.development.js",
        ],
        patterns: &[
            ("React.", 10),
            ("jsx", 9),
            ("useState", 8),
            ("useEffect", 8),
            ("ReactDOM", 6),
            ("createContext", 5),
            ("className=", 4),
            ("props", 3),
            ("=>", 2),
        ],
        file_extensions: &[".jsx", ".tsx"],
        settle_ms: 3000,
    },
    FrameworkProfile {
        id: FrameworkId::Angular,
        display_name: "Angular",
        color: "#dd1b16",
        text_color: "#ffffff",
        scripts: &[
            "https://unpkg.com/@angular/core@12.2.16/bundles/core.umd.js",
            "https://unpkg.com/@angular/common@12.2.16/bundles/common.umd.js",
            "https://unpkg.com/@angular/platform-browser-dynamic@12.2.16/bundles/platform-browser-dynamic.umd.js",
        ],
        patterns: &[
            ("@Component", 10),
            ("@Injectable", 9),
            ("ngOnInit", 8),
            ("template:", 8),
            ("selector:", 8),
            ("*ng", 7),
            ("@Input()", 6),
            ("@Output()", 6),
            ("export class", 5),
            ("ngOnDestroy", 1),
            ("[(ngModel)]", 1),
            ("EventEmitter", 1),
            ("constructor(", 1),
        ],
        file_extensions: &[".ts", ".component.ts"],
        settle_ms: 5000,
    },
    FrameworkProfile {
        id: FrameworkId::Vue,
        display_name: "Vue.js",
        color: "#42b883",
        text_color: "#ffffff",
        scripts: &["https://unpkg.com/vue@3.2.31/dist/vue.global.js"],
        patterns: &[
            ("Vue.", 10),
            ("defineComponent", 8),
            ("v-if", 7),
            ("v-for", 7),
            ("v-model", 7),
            ("v-on", 7),
            ("v-bind", 7),
            ("setup()", 6),
            ("ref,", 5),
            ("computed,", 1),
            ("watch,", 1),
            ("mounted()", 1),
            ("methods:", 1),
            ("data()", 1),
        ],
        file_extensions: &[".vue"],
        settle_ms: 2000,
    },
    FrameworkProfile {
        id: FrameworkId::Vanilla,
        display_name: "JavaScript",
        color: "#f7df1e",
        text_color: "#000000",
        scripts: &[],
        patterns: &[
            ("document.", 3),
            ("window.", 3),
            ("addEventListener", 2),
            ("querySelector", 2),
            ("getElementById", 1),
            ("createElement", 1),
            ("function", 1),
            ("const", 1),
            ("let", 1),
            ("var", 1),
        ],
        file_extensions: &[".js"],
        settle_ms: 1000,
    },
];

impl FrameworkProfile {
    /// The pattern with the highest weight (first declared wins on ties)
    pub fn strongest_pattern(&self) -> Option<&'static str> {
        let mut best: Option<(&'static str, u32)> = None;
        for &(pattern, weight) in self.patterns {
            if best.map_or(true, |(_, w)| weight > w) {
                best = Some((pattern, weight));
            }
        }
        best.map(|(p, _)| p)
    }
}
