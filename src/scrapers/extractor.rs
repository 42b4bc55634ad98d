//! Field Extractor: reads title, kicker, link and image out of one article block.
//!
//! Listing markup is not stable, so every field is located through a ranked
//! [`FieldLookup`]: a list of [`LookupRule`]s tried in order, where the first
//! rule producing a non-empty value wins. Blocks that lack a kicker or image
//! simply yield empty strings for those fields.

use crate::browser::DomBlock;
use crate::error::{ExtractError, Field};
use crate::models::ExtractedFields;
use crate::utils::collapse_whitespace;
use serde::{Deserialize, Serialize};
use url::Url;

/// One way of locating a field inside a block.
///
/// Written in configuration as `{ css: ".titulo a" }` for text content or
/// `{ css: ".titulo a", attr: href }` for an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LookupRule {
    Attr { css: String, attr: String },
    Text { css: String },
}

impl LookupRule {
    pub fn text(css: &str) -> Self {
        LookupRule::Text { css: css.to_string() }
    }

    pub fn attr(css: &str, attr: &str) -> Self {
        LookupRule::Attr {
            css: css.to_string(),
            attr: attr.to_string(),
        }
    }

    pub fn css(&self) -> &str {
        match self {
            LookupRule::Attr { css, .. } | LookupRule::Text { css } => css,
        }
    }

    fn apply<B: DomBlock + ?Sized>(&self, block: &B) -> Result<Option<String>, ExtractError> {
        let raw = match self {
            LookupRule::Text { css } => block.find_text(css)?,
            LookupRule::Attr { css, attr } => block.find_attr(css, attr)?,
        };
        Ok(raw
            .map(|value| collapse_whitespace(&value))
            .filter(|value| !value.is_empty()))
    }
}

/// Ranked candidate rules for one field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FieldLookup {
    rules: Vec<LookupRule>,
}

impl FieldLookup {
    pub fn new(rules: Vec<LookupRule>) -> Self {
        FieldLookup { rules }
    }

    pub fn rules(&self) -> &[LookupRule] {
        &self.rules
    }

    /// Value of the first rule that yields non-empty text.
    pub fn first_match<B: DomBlock + ?Sized>(&self, block: &B) -> Result<Option<String>, ExtractError> {
        for rule in &self.rules {
            if let Some(value) = rule.apply(block)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExtractor {
    pub title: FieldLookup,
    pub kicker: FieldLookup,
    pub link: FieldLookup,
    pub image: FieldLookup,
}

impl FieldExtractor {
    /// Extract all fields from `block`, resolving URLs against `base_url`.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::MissingRequiredField`] when no title or no usable
    ///   http(s) link can be located.
    /// - [`ExtractError::Extraction`] when a lookup itself fails.
    pub fn extract<B: DomBlock + ?Sized>(
        &self,
        block: &B,
        base_url: &Url,
    ) -> Result<ExtractedFields, ExtractError> {
        let title = self
            .title
            .first_match(block)?
            .ok_or(ExtractError::MissingRequiredField(Field::Title))?;

        let link = self
            .link
            .first_match(block)?
            .and_then(|href| resolve_http_url(base_url, &href))
            .ok_or(ExtractError::MissingRequiredField(Field::Link))?;

        let kicker = self.kicker.first_match(block)?.unwrap_or_default();

        let image = self
            .image
            .first_match(block)?
            .and_then(|src| resolve_http_url(base_url, &src))
            .unwrap_or_default();

        Ok(ExtractedFields {
            title,
            kicker,
            link,
            image,
        })
    }
}

/// Resolve `href` against `base`, keeping only http(s) results.
///
/// `javascript:` and `mailto:` anchors are not article links and count as
/// absent, as are empty and fragment-only hrefs (`#`, `#top`), which point
/// back at the listing page itself.
fn resolve_http_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = base.join(href).ok()?;
    let mut page = resolved.clone();
    page.set_fragment(None);
    let mut listing = base.clone();
    listing.set_fragment(None);
    if page == listing {
        return None;
    }
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
