//! Result-page extraction: anchor descriptors in, candidate job records out.

mod driver;
mod html;

use jobscout_core::{AnchorDescriptor, JobRecord, TargetPlatform, MAX_DESCRIPTION_CHARS};
use regex::Regex;
use tracing::debug;

pub use driver::{
    search_page_url, wait_for_page, DriverError, HtmlSnapshotDriver, HttpSearchDriver, PageDriver,
    PageFetch, PagePoll, WaitOutcome, WaitPolicy,
};
pub use html::{has_next_page_control, parse_anchors, parse_results_page};

pub const CRATE_NAME: &str = "jobscout-adapters";

const REDIRECT_MARKER: &str = "url?q=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyHref,
    OffPlatform,
    EmptyRedirectTarget,
}

/// Result of looking at a single anchor. Skips are expected and frequent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorOutcome {
    Record(JobRecord),
    Skip(SkipReason),
}

#[derive(Debug, Clone)]
pub struct RecordExtractor {
    platform: TargetPlatform,
    company_slug: Regex,
}

impl RecordExtractor {
    pub fn new(platform: TargetPlatform) -> Result<Self, regex::Error> {
        let company_slug = Regex::new(&format!(r"{}/([^/?#]+)", regex::escape(&platform.host)))?;
        Ok(Self {
            platform,
            company_slug,
        })
    }

    pub fn platform(&self) -> &TargetPlatform {
        &self.platform
    }

    /// Turns one page worth of anchors into records, ranked by position in the output.
    pub fn extract_page(&self, anchors: &[AnchorDescriptor]) -> Vec<JobRecord> {
        let mut records = Vec::new();
        for anchor in anchors {
            match self.extract_anchor(anchor) {
                AnchorOutcome::Record(mut record) => {
                    record.search_rank = u32::try_from(records.len() + 1).unwrap_or(u32::MAX);
                    debug!(
                        url = %record.url,
                        title = %record.title,
                        company = %record.company,
                        "extracted candidate"
                    );
                    records.push(record);
                }
                AnchorOutcome::Skip(reason) => {
                    debug!(href = %anchor.href, ?reason, "skipping anchor");
                }
            }
        }
        records
    }

    pub fn extract_anchor(&self, anchor: &AnchorDescriptor) -> AnchorOutcome {
        if anchor.href.is_empty() {
            return AnchorOutcome::Skip(SkipReason::EmptyHref);
        }
        if !anchor.href.contains(&self.platform.host) {
            return AnchorOutcome::Skip(SkipReason::OffPlatform);
        }

        let url = unwrap_redirect(&anchor.href).unwrap_or_else(|| anchor.href.clone());
        if url.trim().is_empty() {
            return AnchorOutcome::Skip(SkipReason::EmptyRedirectTarget);
        }

        let title = extract_title(anchor);
        let description = extract_description(anchor);
        let company = self.extract_company(&url, &title);

        AnchorOutcome::Record(JobRecord {
            url,
            title,
            company,
            description,
            search_rank: 1,
        })
    }

    /// Company from the `<host>/<slug>/...` path convention, else from a `"<role> at <Company>"` title.
    pub fn extract_company(&self, url: &str, title: &str) -> String {
        if let Some(slug) = self
            .company_slug
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
        {
            return title_case_slug(slug);
        }
        title
            .rsplit_once(" at ")
            .map(|(_, company)| company.trim().to_string())
            .unwrap_or_default()
    }
}

/// Destination of a search-engine `url?q=` redirect wrapper, percent-decoded.
pub fn unwrap_redirect(href: &str) -> Option<String> {
    let start = href.find(REDIRECT_MARKER)? + REDIRECT_MARKER.len();
    let wrapped = &href[start..];
    let end = wrapped.find('&').unwrap_or(wrapped.len());
    let decoded = urlencoding::decode_binary(wrapped[..end].as_bytes());
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

fn extract_title(anchor: &AnchorDescriptor) -> String {
    if anchor.has_heading_child {
        let heading = anchor.heading_text.trim();
        if !heading.is_empty() {
            return heading.to_string();
        }
    }
    anchor
        .link_text
        .trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn extract_description(anchor: &AnchorDescriptor) -> String {
    let from_link = anchor
        .link_text
        .trim()
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !from_link.is_empty() {
        return truncate_chars(&from_link, MAX_DESCRIPTION_CHARS);
    }

    if anchor.parent_text.trim().is_empty() || anchor.parent_text == anchor.link_text {
        return String::new();
    }
    let remainder = if anchor.link_text.is_empty() {
        anchor.parent_text.clone()
    } else {
        anchor.parent_text.replace(&anchor.link_text, "")
    };
    truncate_chars(remainder.trim(), MAX_DESCRIPTION_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// `acme-labs` -> `Acme Labs`. Every alphabetic run starts upper-case, the rest is lower-cased.
pub fn title_case_slug(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    let mut at_word_start = true;
    for ch in slug.chars() {
        let ch = if ch == '-' || ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}
