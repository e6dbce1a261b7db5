//! Groups a document's kept pages into logical record blocks and renders the
//! marker-annotated text handed to the record assembler.

use crate::continuation::is_continuation;
use crate::models::{ClassifiedPage, PageGroup, PageText, SegmentMarker, Segmentation};

/// Fold state for [`build_segments`]. Discarded pages never reach it, so
/// `previous_text` always holds the last *kept* page.
#[derive(Debug, Clone, Default)]
pub struct SegmentAccumulator {
    current: Option<PageGroup>,
    previous_text: String,
    segments: Vec<PageGroup>,
    markers: Vec<SegmentMarker>,
    blocks: Vec<String>,
}

impl SegmentAccumulator {
    pub fn previous_text(&self) -> &str {
        &self.previous_text
    }

    /// Adds the next kept page in document order.
    pub fn step<S: AsRef<str>>(mut self, page: PageText, header_keywords: &[S]) -> Self {
        let marker = if self.current.is_none() {
            self.current = Some(PageGroup::new(page.clone()));
            SegmentMarker::DocumentStart { page: page.number }
        } else if is_continuation(&page.text, &self.previous_text, header_keywords) {
            if let Some(group) = self.current.as_mut() {
                group.push(page.clone());
            }
            SegmentMarker::Continued { page: page.number }
        } else {
            if let Some(closed) = self.current.replace(PageGroup::new(page.clone())) {
                self.segments.push(closed);
            }
            SegmentMarker::NewSegment { page: page.number }
        };

        let block = if self.blocks.is_empty() {
            format!("{marker}\n{}", page.text)
        } else {
            format!("\n{marker}\n{}", page.text)
        };

        self.blocks.push(block);
        self.markers.push(marker);
        self.previous_text = page.text;
        self
    }

    pub fn finish(mut self) -> Segmentation {
        if let Some(open) = self.current.take() {
            self.segments.push(open);
        }

        Segmentation {
            groups: self.segments,
            markers: self.markers,
            combined_text: self.blocks.join("\n").trim().to_string(),
        }
    }
}

/// Walks `pages` in the given order and groups the kept ones.
///
/// A continuation is always judged against the previous kept page, even when
/// discarded pages sit between the two.
pub fn build_segments<S: AsRef<str>>(pages: &[ClassifiedPage], header_keywords: &[S]) -> Segmentation {
    debug_assert!(
        pages
            .windows(2)
            .all(|pair| pair[0].page.number < pair[1].page.number),
        "pages must arrive in increasing index order"
    );

    pages
        .iter()
        .filter(|page| page.classification.is_keep())
        .fold(SegmentAccumulator::default(), |accumulator, page| {
            accumulator.step(page.page.clone(), header_keywords)
        })
        .finish()
}
