//! Coarse intent detection for chat messages.
//!
//! Decides which (if any) Revit data to fetch before calling the model. This
//! is keyword matching, nothing more: a miss just means the model answers
//! without model context.

use std::sync::LazyLock;

use regex::Regex;

/// What Revit data a message asks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// General model information (title, levels, counts).
    ModelInfo,
    /// All elements of one category.
    Elements {
        /// Revit category name, e.g. `Walls`.
        category: String,
    },
    /// The parameters of one element.
    Parameters {
        /// Revit element id.
        element_id: i64,
    },
    /// Nothing to fetch.
    None,
}

/// Word stems mapped to Revit category names. Order matters: the first hit
/// wins, so multi-word categories come before their single-word parts.
const CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("structural column", "Structural Columns"),
    ("curtain wall", "Curtain Walls"),
    ("wall", "Walls"),
    ("door", "Doors"),
    ("window", "Windows"),
    ("floor", "Floors"),
    ("roof", "Roofs"),
    ("room", "Rooms"),
    ("level", "Levels"),
    ("sheet", "Sheets"),
    ("view", "Views"),
    ("column", "Columns"),
    ("furniture", "Furniture"),
    ("stair", "Stairs"),
];

const MODEL_KEYWORDS: &[&str] = &["model", "project", "document", "building", "element"];

static ELEMENT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:element|id)\s*(?:id\s*)?[#:]?\s*(\d{1,12})\b")
        .expect("element id pattern is valid")
});

/// Classifies one chat message.
#[must_use]
pub fn detect(text: &str) -> Intent {
    if let Some(element_id) = ELEMENT_ID
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        return Intent::Parameters { element_id };
    }

    let lower = text.to_lowercase();

    if let Some((_, category)) = CATEGORY_KEYWORDS
        .iter()
        .find(|(stem, _)| lower.contains(stem))
    {
        return Intent::Elements {
            category: (*category).to_string(),
        };
    }

    if MODEL_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return Intent::ModelInfo;
    }

    Intent::None
}
