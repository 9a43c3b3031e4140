//! Heuristics over elements added to the page.
//!
//! The host reports each added element as an `ElementSnapshot` carrying its
//! tag, source and inline style. Only the inline style is inspected; computed
//! styles are out of reach.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Inline style properties relevant to visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InlineStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: String,
    pub width: String,
    pub height: String,
}

impl InlineStyle {
    fn hidden(&self) -> bool {
        self.display == "none" || self.visibility == "hidden"
    }

    fn invisible(&self) -> bool {
        self.hidden() || self.opacity == "0" || self.width == "0px" || self.height == "0px"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementSnapshot {
    /// Upper-case tag name, e.g. `"IMG"`.
    pub tag: String,
    pub src: String,
    pub style: InlineStyle,
}

impl ElementSnapshot {
    pub fn new(tag: &str, src: &str) -> Self {
        Self {
            tag: tag.to_ascii_uppercase(),
            src: src.to_string(),
            style: InlineStyle::default(),
        }
    }

    pub fn with_style(mut self, style: InlineStyle) -> Self {
        self.style = style;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    TrackingPixel,
    HiddenIframe,
}

impl Detection {
    pub fn reason(self) -> &'static str {
        match self {
            Detection::TrackingPixel => "Potential tracking pixel detected",
            Detection::HiddenIframe => "Hidden iframe detected",
        }
    }

    /// Audit details for `element`.
    pub fn details(self, element: &ElementSnapshot) -> Value {
        let s = &element.style;
        match self {
            Detection::TrackingPixel => json!({
                "element": "IMG",
                "src": element.src,
                "styles": {
                    "display": s.display,
                    "visibility": s.visibility,
                    "opacity": s.opacity,
                    "width": s.width,
                    "height": s.height,
                },
            }),
            Detection::HiddenIframe => json!({
                "element": "IFRAME",
                "src": element.src,
                "styles": {
                    "display": s.display,
                    "visibility": s.visibility,
                },
            }),
        }
    }
}

/// Classify one added element.
///
/// Images count as tracking pixels when hidden, fully transparent or zero
/// sized. Iframes count only when hidden.
pub fn detect(element: &ElementSnapshot) -> Option<Detection> {
    match element.tag.as_str() {
        "IMG" if element.style.invisible() => Some(Detection::TrackingPixel),
        "IFRAME" if element.style.hidden() => Some(Detection::HiddenIframe),
        _ => None,
    }
}
