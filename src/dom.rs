use std::collections::BTreeMap;

use tracing::warn;

use crate::hands::{Page, PageError};
use crate::types::{
    ELEMENT_TEXT_MAX_CHARS, ElementCategory, ElementSummary, InputSummary, MARKUP_MAX_CHARS,
    MARKUP_TRUNCATION_MARKER, MAX_INPUTS, MAX_LINKS, Snapshot,
};

/// Attributes read off every input for the oracle.
const INPUT_ATTRIBUTES: [&str; 5] = ["id", "name", "type", "placeholder", "value"];

const EMPTY_BUTTON_TEXT: &str = "(empty)";

/// Builds a bounded snapshot of the current page. Never fails: each part is
/// read on its own and a failing part is left empty.
pub async fn snapshot(page: &dyn Page) -> Snapshot {
    if !page.is_open() {
        return Snapshot::default();
    }

    let url = absorb("url", page.current_url().await).unwrap_or_default();
    let title = absorb("title", page.title().await).unwrap_or_default();
    let markup = absorb("markup", page.markup().await)
        .map(|raw| truncate_markup(&raw))
        .unwrap_or_default();

    let buttons = absorb("buttons", page.element_texts(ElementCategory::Button).await)
        .map(|texts| summarize_buttons(&texts))
        .unwrap_or_default();
    let links = absorb("links", page.element_texts(ElementCategory::Link).await)
        .map(|texts| summarize_links(&texts))
        .unwrap_or_default();
    let inputs = absorb("inputs", page.input_attributes(&INPUT_ATTRIBUTES).await)
        .map(summarize_inputs)
        .unwrap_or_default();

    Snapshot {
        url,
        title,
        markup,
        buttons,
        links,
        inputs,
    }
}

fn absorb<T>(part: &str, result: Result<T, PageError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(part, "snapshot extraction failed: {err}");
            None
        }
    }
}

fn truncate_markup(raw: &str) -> String {
    match raw.char_indices().nth(MARKUP_MAX_CHARS) {
        Some((cut, _)) => format!("{}{}", &raw[..cut], MARKUP_TRUNCATION_MARKER),
        None => raw.to_string(),
    }
}

/// Collapses runs of whitespace and caps the length.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(ELEMENT_TEXT_MAX_CHARS)
        .collect()
}

fn summarize_buttons(texts: &[String]) -> Vec<ElementSummary> {
    texts
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let text = normalize_text(raw);
            ElementSummary {
                index,
                text: if text.is_empty() {
                    EMPTY_BUTTON_TEXT.to_string()
                } else {
                    text
                },
            }
        })
        .collect()
}

// Indices stay positional so a click can address the same element.
fn summarize_links(texts: &[String]) -> Vec<ElementSummary> {
    texts
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let text = normalize_text(raw);
            (!text.is_empty()).then_some(ElementSummary { index, text })
        })
        .take(MAX_LINKS)
        .collect()
}

fn summarize_inputs(raw: Vec<BTreeMap<String, String>>) -> Vec<InputSummary> {
    raw.into_iter()
        .take(MAX_INPUTS)
        .enumerate()
        .map(|(index, attrs)| InputSummary {
            index,
            attributes: attrs
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name, value.chars().take(ELEMENT_TEXT_MAX_CHARS).collect()))
                .collect(),
        })
        .collect()
}
