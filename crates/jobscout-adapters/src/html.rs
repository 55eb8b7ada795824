use jobscout_core::AnchorDescriptor;
use scraper::{ElementRef, Html, Selector};

use crate::driver::DriverError;

const NEXT_PAGE_CONTROL: &str = "a#pnnext";

fn selector(css: &str) -> Result<Selector, DriverError> {
    Selector::parse(css).map_err(|e| DriverError::Markup(e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

fn anchors_in(document: &Html) -> Result<Vec<AnchorDescriptor>, DriverError> {
    let anchor_sel = selector("a")?;
    let heading_sel = selector("h3")?;

    Ok(document
        .select(&anchor_sel)
        .map(|anchor| {
            let heading_text = anchor.select(&heading_sel).next().map(element_text);
            let parent_text = anchor
                .parent()
                .and_then(ElementRef::wrap)
                .map(element_text)
                .unwrap_or_default();
            AnchorDescriptor {
                href: anchor.value().attr("href").unwrap_or_default().to_string(),
                link_text: element_text(anchor),
                parent_text,
                has_heading_child: heading_text.is_some(),
                heading_text: heading_text.unwrap_or_default(),
            }
        })
        .collect())
}

/// Every anchor of a rendered results page, in document order.
pub fn parse_anchors(html: &str) -> Result<Vec<AnchorDescriptor>, DriverError> {
    anchors_in(&Html::parse_document(html))
}

pub fn has_next_page_control(html: &str) -> Result<bool, DriverError> {
    let document = Html::parse_document(html);
    Ok(document.select(&selector(NEXT_PAGE_CONTROL)?).next().is_some())
}

/// Anchors plus whether the page links to a following page, from a single parse.
pub fn parse_results_page(html: &str) -> Result<(Vec<AnchorDescriptor>, bool), DriverError> {
    let document = Html::parse_document(html);
    let anchors = anchors_in(&document)?;
    let has_next = document.select(&selector(NEXT_PAGE_CONTROL)?).next().is_some();
    Ok((anchors, has_next))
}
