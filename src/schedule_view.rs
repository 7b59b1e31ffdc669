//! Paginated, route-filtered projection of a stop's schedule.
//!
//! The rows are whatever the last schedule fetch returned, in API order.
//! Everything here is synchronous and infallible; the page index is kept
//! inside `[0, max_page]` for the current filter at all times.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::transit_api_models::ScheduleRow;

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "prev")]
    Previous,
    #[serde(rename = "next")]
    Next,
}

/// 1-based display bounds of the current page ("showing start - end of total").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageBounds {
    pub start: usize,
    pub end: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct ScheduleView {
    rows: Vec<ScheduleRow>,
    routes: Vec<String>,
    route_filter: Option<String>,
    page: usize,
    page_size: usize,
}

impl Default for ScheduleView {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ScheduleView {
    /// A zero page size is bumped to 1.
    pub fn new(page_size: usize) -> Self {
        ScheduleView {
            rows: Vec::new(),
            routes: Vec::new(),
            route_filter: None,
            page: 0,
            page_size: page_size.max(1),
        }
    }

    /// Replaces the whole result set and goes back to the first page.
    /// The route filter survives only if the new rows still offer that line.
    pub fn load(&mut self, rows: Vec<ScheduleRow>) {
        self.routes = rows.iter()
            .filter_map(ScheduleRow::route_label)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.rows = rows;
        self.page = 0;

        let routes = &self.routes;
        self.route_filter = self.route_filter.take().filter(|r| routes.contains(r));
    }

    /// `None` and the empty string both mean "all lines".
    pub fn set_route_filter(&mut self, route: Option<String>) {
        self.route_filter = route.filter(|r| !r.is_empty());
        self.page = 0;
    }

    pub fn change_page(&mut self, direction: Direction) {
        self.page = match direction {
            Direction::Previous => self.page.saturating_sub(1),
            Direction::Next => (self.page + 1).min(self.max_page()),
        };
    }

    pub fn current_page(&self) -> Vec<&ScheduleRow> {
        let start = self.page * self.page_size;
        self.filtered()
            .skip(start)
            .take(self.page_size)
            .collect()
    }

    pub fn page_bounds(&self) -> PageBounds {
        let total = self.filtered_len();
        PageBounds {
            start: self.page * self.page_size + 1,
            end: ((self.page + 1) * self.page_size).min(total),
            total,
        }
    }

    pub fn max_page(&self) -> usize {
        self.filtered_len().div_ceil(self.page_size).saturating_sub(1)
    }

    pub fn filtered_len(&self) -> usize {
        match &self.route_filter {
            Some(_) => self.filtered().count(),
            None => self.rows.len(),
        }
    }

    pub fn total_len(&self) -> usize {
        self.rows.len()
    }

    /// Distinct route labels present in the loaded rows, sorted ascending.
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn route_filter(&self) -> Option<&str> {
        self.route_filter.as_deref()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn filtered(&self) -> impl Iterator<Item = &ScheduleRow> + '_ {
        let filter = self.route_filter.as_deref();
        self.rows.iter()
            .filter(move |row| filter.is_none_or(|route| row.serves_route(route)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(trip_id: &str, short_name: Option<&str>, route_id: Option<&str>) -> ScheduleRow {
        ScheduleRow {
            trip_id: trip_id.to_string(),
            departure_time: Some("08:00:00".to_string()),
            route_short_name: short_name.map(str::to_string),
            route_id: route_id.map(str::to_string),
            ..ScheduleRow::default()
        }
    }

    fn numbered(count: usize) -> Vec<ScheduleRow> {
        (0..count)
            .map(|i| row(&format!("T{i}"), Some(if i % 3 == 0 { "C1" } else { "C4" }), Some("R")))
            .collect()
    }

    fn trip_ids(view: &ScheduleView) -> Vec<String> {
        view.current_page().iter().map(|r| r.trip_id.clone()).collect()
    }

    #[test]
    fn hundred_twenty_rows_split_into_fifty_fifty_twenty() {
        let mut view = ScheduleView::new(50);
        view.load(numbered(120));

        assert_eq!(view.max_page(), 2);
        assert_eq!(view.current_page().len(), 50);

        view.change_page(Direction::Next);
        assert_eq!(view.page(), 1);
        assert_eq!(view.current_page().len(), 50);

        view.change_page(Direction::Next);
        assert_eq!(view.page(), 2);
        assert_eq!(view.current_page().len(), 20);
        assert_eq!(view.page_bounds(), PageBounds { start: 101, end: 120, total: 120 });

        view.change_page(Direction::Next);
        assert_eq!(view.page(), 2);
    }

    #[test]
    fn pages_concatenate_to_the_filtered_sequence() {
        let rows = numbered(37);
        let mut view = ScheduleView::new(8);
        view.load(rows.clone());
        view.set_route_filter(Some("C4".to_string()));

        let expected: Vec<String> = rows.iter()
            .filter(|r| r.serves_route("C4"))
            .map(|r| r.trip_id.clone())
            .collect();

        let mut seen = Vec::new();
        for page in 0..=view.max_page() {
            assert_eq!(view.page(), page);
            let current = trip_ids(&view);
            assert!(current.len() <= 8);
            seen.extend(current);
            view.change_page(Direction::Next);
        }

        assert_eq!(seen, expected);
    }

    #[test]
    fn previous_clamps_at_zero() {
        let mut view = ScheduleView::new(10);
        view.load(numbered(25));

        view.change_page(Direction::Previous);
        view.change_page(Direction::Previous);
        assert_eq!(view.page(), 0);

        view.change_page(Direction::Next);
        view.change_page(Direction::Previous);
        view.change_page(Direction::Previous);
        assert_eq!(view.page(), 0);
    }

    #[test]
    fn filter_matching_nothing_yields_empty_page() {
        let mut view = ScheduleView::new(10);
        view.load(numbered(25));
        view.change_page(Direction::Next);

        view.set_route_filter(Some("R99".to_string()));

        assert_eq!(view.page(), 0);
        assert_eq!(view.max_page(), 0);
        assert!(view.current_page().is_empty());

        view.change_page(Direction::Next);
        assert_eq!(view.page(), 0);
    }

    #[test]
    fn empty_load_resets_everything() {
        let mut view = ScheduleView::new(10);
        view.load(numbered(25));
        view.change_page(Direction::Next);

        view.load(Vec::new());

        assert_eq!(view.page(), 0);
        assert!(view.current_page().is_empty());
        assert!(view.routes().is_empty());
        assert_eq!(view.page_bounds(), PageBounds { start: 1, end: 0, total: 0 });
    }

    #[test]
    fn filter_matches_short_name_or_route_id() {
        let mut view = ScheduleView::new(50);
        view.load(vec![
            row("A", Some("C1"), Some("10T0001C1")),
            row("B", None, Some("C1")),
            row("C", Some("C2"), Some("C2")),
            row("D", Some(""), Some("C1")),
        ]);

        view.set_route_filter(Some("C1".to_string()));

        assert_eq!(trip_ids(&view), vec!["A", "B", "D"]);
        assert_eq!(view.filtered_len(), 3);
        assert_eq!(view.total_len(), 4);
    }

    #[test]
    fn routes_are_distinct_sorted_and_skip_unlabelled_rows() {
        let mut view = ScheduleView::new(50);
        view.load(vec![
            row("A", Some("C4"), Some("R4")),
            row("B", None, Some("C10")),
            row("C", Some("C1"), None),
            row("D", None, None),
            row("E", Some(""), Some("")),
            row("F", Some("C4"), Some("R4b")),
        ]);

        assert_eq!(view.routes(), ["C1", "C10", "C4"]);
        // Unlabelled rows still show up in the listing
        assert_eq!(view.current_page().len(), 6);
    }

    #[test]
    fn empty_filter_means_all_lines() {
        let mut view = ScheduleView::new(10);
        view.load(numbered(12));
        view.set_route_filter(Some("C1".to_string()));
        assert_eq!(view.filtered_len(), 4);

        view.set_route_filter(Some(String::new()));
        assert_eq!(view.route_filter(), None);
        assert_eq!(view.filtered_len(), 12);
    }

    #[test]
    fn reload_resets_page_but_keeps_filter() {
        let mut view = ScheduleView::new(2);
        view.load(numbered(12));
        view.set_route_filter(Some("C4".to_string()));
        view.change_page(Direction::Next);
        assert_eq!(view.page(), 1);

        view.load(numbered(6));

        assert_eq!(view.page(), 0);
        assert_eq!(view.route_filter(), Some("C4"));
        assert_eq!(trip_ids(&view), vec!["T1", "T2"]);
    }

    #[test]
    fn reload_drops_filter_for_a_line_no_longer_offered() {
        let mut view = ScheduleView::new(10);
        view.load(vec![row("A", Some("C1"), None), row("B", Some("C5"), None)]);
        view.set_route_filter(Some("C1".to_string()));

        view.load(vec![row("X", Some("C5"), None), row("Y", Some("C7"), None)]);

        assert_eq!(view.route_filter(), None);
        assert_eq!(view.routes(), ["C5", "C7"]);
        assert_eq!(trip_ids(&view), vec!["X", "Y"]);
    }

    #[test]
    fn empty_load_clears_the_filter() {
        let mut view = ScheduleView::new(10);
        view.load(numbered(6));
        view.set_route_filter(Some("C4".to_string()));

        view.load(Vec::new());

        assert_eq!(view.route_filter(), None);
    }

    #[test]
    fn page_bounds_follow_the_filter() {
        let mut view = ScheduleView::new(3);
        view.load(numbered(12));
        view.set_route_filter(Some("C4".to_string()));
        view.change_page(Direction::Next);

        assert_eq!(view.page_bounds(), PageBounds { start: 4, end: 6, total: 8 });
    }

    #[test]
    fn zero_page_size_is_bumped() {
        let mut view = ScheduleView::new(0);
        view.load(numbered(3));
        assert_eq!(view.page_size(), 1);
        assert_eq!(view.max_page(), 2);
    }
}
