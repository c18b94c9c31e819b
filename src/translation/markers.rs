/*!
 * Item markers for batched list translation.
 *
 * List items are sent as one request where each item is introduced by a
 * `<<ITEM_n>>` line and the batch is closed by `<<END>>`. The helpers here
 * build such payloads, check a reply for the expected markers and extract
 * every item that survived, even from a damaged reply.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

/// Regex for matching item markers
static ITEM_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<ITEM_(\d+)>>").unwrap());

/// End marker constant
pub const END_MARKER: &str = "<<END>>";

/// Marker check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCheck {
    /// Indices found in the reply, in order of appearance
    pub found_indices: Vec<usize>,
    /// Expected indices that are absent
    pub missing_indices: Vec<usize>,
    pub end_marker_present: bool,
    pub out_of_order: bool,
}

impl MarkerCheck {
    /// All markers present, in order, and the batch is closed
    pub fn passed(&self) -> bool {
        self.missing_indices.is_empty() && self.end_marker_present && !self.out_of_order
    }
}

/// Builder and parser of marker-delimited item batches
pub struct ItemMarkers;

impl ItemMarkers {
    pub fn marker(index: usize) -> String {
        format!("<<ITEM_{}>>", index)
    }

    /// Build the request payload for a batch of items
    pub fn build_batch<S: AsRef<str>>(items: &[S]) -> String {
        let mut payload = String::new();
        for (i, item) in items.iter().enumerate() {
            payload.push_str(&Self::marker(i));
            payload.push('\n');
            payload.push_str(item.as_ref().trim());
            payload.push('\n');
        }
        payload.push_str(END_MARKER);
        payload
    }

    /// Check a reply for the markers of `expected_count` items
    pub fn check(response: &str, expected_count: usize) -> MarkerCheck {
        let found_indices: Vec<usize> = ITEM_MARKER_REGEX
            .captures_iter(response)
            .filter_map(|cap| cap.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect();

        let missing_indices: Vec<usize> = (0..expected_count).filter(|i| !found_indices.contains(i)).collect();

        let mut sorted = found_indices.clone();
        sorted.sort_unstable();
        let out_of_order = sorted != found_indices;

        let check = MarkerCheck {
            found_indices,
            missing_indices,
            end_marker_present: response.contains(END_MARKER),
            out_of_order,
        };
        debug!(
            "Item markers: expected={}, found={}, missing={}, end_marker={}",
            expected_count,
            check.found_indices.len(),
            check.missing_indices.len(),
            check.end_marker_present
        );
        check
    }

    /// Text following the marker of `index`, up to the next marker of any kind
    pub fn extract_item(response: &str, index: usize) -> Option<String> {
        let start_marker = Self::marker(index);
        let content_start = response.find(&start_marker)? + start_marker.len();
        let rest = &response[content_start..];

        let next_item = ITEM_MARKER_REGEX.find(rest).map(|m| m.start());
        let end = rest.find(END_MARKER);
        let stop = match (next_item, end) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            // Unterminated last item: treat as truncated
            (None, None) => return None,
        };

        let content = rest[..stop].trim();
        (!content.is_empty()).then(|| content.to_string())
    }

    /// Every item that can be extracted, as (index, text)
    pub fn recover_items(response: &str, expected_count: usize) -> Vec<(usize, String)> {
        let recovered: Vec<(usize, String)> = (0..expected_count)
            .filter_map(|i| Self::extract_item(response, i).map(|text| (i, text)))
            .collect();
        debug!("Recovered {}/{} items from response", recovered.len(), expected_count);
        recovered
    }
}
