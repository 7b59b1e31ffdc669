// Dashboard page state: selected stop and date, upcoming trains, the schedule view,
// and the projection of all of it into view models for the embedded UI.

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::schedule_view::{Direction, ScheduleView};
use crate::transit_api_models::{
    Result, ScheduleRow, Stop, TransitApi, TransitError, UpcomingTrain, UpcomingTrains,
};

const SOON_THRESHOLD_MINUTES: i64 = 5;
const MISSING_TIME: &str = "--:--:--";
const MISSING_CELL: &str = "-";

pub fn earliest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Parses a `YYYY-MM-DD` date within `[2020-01-01, today + 365 days]`.
pub fn parse_service_date(raw: &str, today: NaiveDate) -> Result<NaiveDate> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| TransitError::InvalidDate(raw.to_string()))?;
    let latest = today.checked_add_days(Days::new(365)).unwrap_or(NaiveDate::MAX);

    if date < earliest_date() || date > latest {
        return Err(TransitError::InvalidDate(raw.to_string()));
    }
    Ok(date)
}

// ============================================================================
// Refresh
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub stop_id: String,
    pub date: NaiveDate,
}

#[derive(Debug)]
pub struct RefreshOutcome {
    pub request: RefreshRequest,
    pub upcoming: Result<UpcomingTrains>,
    pub schedule: Result<Vec<ScheduleRow>>,
}

/// Fetches upcoming trains and the day's schedule. One failing does not stop the other.
pub fn fetch_refresh(
    api: &dyn TransitApi,
    request: RefreshRequest,
    settings: &Settings,
    now: DateTime<Tz>,
) -> RefreshOutcome {
    let current_time = now.format("%H:%M:00").to_string();

    let upcoming = api.upcoming(&request.stop_id, &current_time, settings.upcoming_limit);
    if let Err(e) = &upcoming {
        warn!(stop_id = %request.stop_id, error = %e, "upcoming trains fetch failed");
    }

    let schedule = api.schedule(&request.stop_id, request.date, settings.schedule_limit);
    if let Err(e) = &schedule {
        warn!(stop_id = %request.stop_id, date = %request.date, error = %e, "schedule fetch failed");
    }

    RefreshOutcome { request, upcoming, schedule }
}

#[derive(Debug, Clone)]
enum UpcomingPanel {
    NotLoaded,
    Loaded(UpcomingTrains),
    Failed(String),
}

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Debug)]
pub struct Dashboard {
    current_stop: Option<Stop>,
    date: NaiveDate,
    upcoming: UpcomingPanel,
    schedule: ScheduleView,
    schedule_error: Option<String>,
    auto_refresh: bool,
    last_refresh: Option<DateTime<Utc>>,
}

impl Dashboard {
    pub fn new(today: NaiveDate, page_size: usize) -> Self {
        Dashboard {
            current_stop: None,
            date: today,
            upcoming: UpcomingPanel::NotLoaded,
            schedule: ScheduleView::new(page_size),
            schedule_error: None,
            auto_refresh: false,
            last_refresh: None,
        }
    }

    pub fn current_stop(&self) -> Option<&Stop> {
        self.current_stop.as_ref()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn schedule(&self) -> &ScheduleView {
        &self.schedule
    }

    /// Switching stops drops everything loaded for the previous one.
    pub fn select_stop(&mut self, stop: Stop) {
        info!(stop_id = %stop.stop_id, stop_name = ?stop.stop_name, "stop selected");
        self.current_stop = Some(stop);
        self.reset_panels();
    }

    pub fn clear_stop(&mut self) {
        self.current_stop = None;
        self.reset_panels();
    }

    pub fn set_date(&mut self, raw: &str, today: NaiveDate) -> Result<NaiveDate> {
        self.date = parse_service_date(raw, today)?;
        Ok(self.date)
    }

    pub fn refresh_request(&self) -> Option<RefreshRequest> {
        self.current_stop.as_ref().map(|stop| RefreshRequest {
            stop_id: stop.stop_id.clone(),
            date: self.date,
        })
    }

    /// Applies a finished refresh. Outcomes for a stop or date that is no longer
    /// selected are dropped; returns whether the outcome was applied.
    pub fn apply_refresh(&mut self, outcome: RefreshOutcome, at: DateTime<Utc>) -> bool {
        if self.refresh_request().as_ref() != Some(&outcome.request) {
            debug!(stop_id = %outcome.request.stop_id, "discarding refresh for a stale selection");
            return false;
        }

        self.upcoming = match outcome.upcoming {
            Ok(upcoming) => UpcomingPanel::Loaded(upcoming),
            Err(e) => UpcomingPanel::Failed(e.to_string()),
        };

        match outcome.schedule {
            Ok(rows) => {
                debug!(rows = rows.len(), "schedule loaded");
                self.schedule.load(rows);
                self.schedule_error = None;
            }
            Err(e) => self.schedule_error = Some(e.to_string()),
        }

        self.last_refresh = Some(at);
        true
    }

    /// Re-renders the kept rows, so a previous fetch error is no longer shown.
    pub fn set_route_filter(&mut self, route: Option<String>) {
        self.schedule.set_route_filter(route);
        self.schedule_error = None;
    }

    pub fn change_page(&mut self, direction: Direction) {
        self.schedule.change_page(direction);
        self.schedule_error = None;
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.auto_refresh = enabled;
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    pub fn view(&self) -> DashboardView {
        let (departures, arrivals) = match &self.upcoming {
            UpcomingPanel::NotLoaded => (TrainPanelView::default(), TrainPanelView::default()),
            UpcomingPanel::Loaded(upcoming) => (
                TrainPanelView::from_trains(&upcoming.departures, TrainKind::Departure),
                TrainPanelView::from_trains(&upcoming.arrivals, TrainKind::Arrival),
            ),
            UpcomingPanel::Failed(_) => (
                TrainPanelView::failed("Failed to load departures"),
                TrainPanelView::failed("Failed to load arrivals"),
            ),
        };

        DashboardView {
            stop: self.current_stop.as_ref().map(StopInfoView::from),
            date: self.date,
            departures,
            arrivals,
            schedule: self.schedule_table(),
            routes: self.schedule.routes().to_vec(),
            auto_refresh: self.auto_refresh,
            last_refresh: self.last_refresh,
        }
    }

    fn reset_panels(&mut self) {
        self.upcoming = UpcomingPanel::NotLoaded;
        self.schedule.load(Vec::new());
        self.schedule_error = None;
        self.last_refresh = None;
    }

    fn schedule_table(&self) -> ScheduleTableView {
        let view = &self.schedule;
        let page_rows: Vec<ScheduleRowView> = view.current_page()
            .into_iter()
            .map(ScheduleRowView::from)
            .collect();
        let filtered = view.filtered_len();

        let caption = (filtered > 0).then(|| {
            let bounds = view.page_bounds();
            let mut caption = String::new();
            if let Some(route) = view.route_filter() {
                caption.push_str(&format!("Showing line {}: ", route));
            }
            caption.push_str(&format!("{} - {} of {} schedules", bounds.start, bounds.end, bounds.total));
            if view.route_filter().is_some() && filtered < view.total_len() {
                caption.push_str(&format!(" ({} total)", view.total_len()));
            }
            caption
        });

        ScheduleTableView {
            rows: page_rows,
            route_options: view.routes().to_vec(),
            selected_route: view.route_filter().map(str::to_string),
            page: view.page(),
            page_size: view.page_size(),
            max_page: view.max_page(),
            has_previous: view.page() > 0,
            has_next: view.page() < view.max_page(),
            caption,
            empty_message: (filtered == 0 && self.schedule_error.is_none())
                .then(|| "No schedules available for the selected filter".to_string()),
            error: self.schedule_error.as_ref().map(|_| "Failed to load schedules".to_string()),
        }
    }
}

// ============================================================================
// View models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub stop: Option<StopInfoView>,
    pub date: NaiveDate,
    pub departures: TrainPanelView,
    pub arrivals: TrainPanelView,
    pub schedule: ScheduleTableView,
    pub routes: Vec<String>,
    pub auto_refresh: bool,
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopInfoView {
    pub stop_id: String,
    pub stop_name: String,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl From<&Stop> for StopInfoView {
    fn from(stop: &Stop) -> Self {
        StopInfoView {
            stop_id: stop.stop_id.clone(),
            stop_name: stop.stop_name.clone().unwrap_or_else(|| stop.stop_id.clone()),
            coordinates: stop.coordinates().map(|(lat, lon)| Coordinates { lat, lon }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrainKind {
    Departure,
    Arrival,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainPanelView {
    pub count: usize,
    pub trains: Vec<TrainCardView>,
    pub empty_message: Option<String>,
    pub error: Option<String>,
}

impl TrainPanelView {
    fn from_trains(trains: &[UpcomingTrain], kind: TrainKind) -> Self {
        let empty_message = trains.is_empty().then(|| match kind {
            TrainKind::Departure => "No upcoming departures".to_string(),
            TrainKind::Arrival => "No upcoming arrivals".to_string(),
        });

        TrainPanelView {
            count: trains.len(),
            trains: trains.iter().map(|t| TrainCardView::new(t, kind)).collect(),
            empty_message,
            error: None,
        }
    }

    fn failed(message: &str) -> Self {
        TrainPanelView {
            error: Some(message.to_string()),
            ..TrainPanelView::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainCardView {
    pub trip_id: String,
    pub route: String,
    pub headsign: String,
    pub time: String,
    pub minutes_until: i64,
    pub soon: bool,
}

impl TrainCardView {
    fn new(train: &UpcomingTrain, kind: TrainKind) -> Self {
        let (own_time, missing_headsign) = match kind {
            TrainKind::Departure => (train.departure_time.as_deref(), "No destination"),
            TrainKind::Arrival => (train.arrival_time.as_deref(), "No origin"),
        };
        let time = own_time
            .filter(|t| !t.is_empty())
            .or(train.scheduled_time.as_deref().filter(|t| !t.is_empty()))
            .unwrap_or(MISSING_TIME);
        let minutes_until = train.minutes_until.unwrap_or(0);

        TrainCardView {
            trip_id: train.trip_id.clone(),
            route: train.route_label().unwrap_or("N/A").to_string(),
            headsign: train.headsign().unwrap_or(missing_headsign).to_string(),
            time: time.to_string(),
            minutes_until,
            soon: minutes_until <= SOON_THRESHOLD_MINUTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleTableView {
    pub rows: Vec<ScheduleRowView>,
    pub route_options: Vec<String>,
    pub selected_route: Option<String>,
    pub page: usize,
    pub page_size: usize,
    pub max_page: usize,
    pub has_previous: bool,
    pub has_next: bool,
    pub caption: Option<String>,
    pub empty_message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRowView {
    pub time: String,
    pub route: String,
    pub headsign: String,
    pub trip_id: String,
}

impl From<&ScheduleRow> for ScheduleRowView {
    fn from(row: &ScheduleRow) -> Self {
        let cell = |value: Option<&str>| {
            value.filter(|v| !v.is_empty()).unwrap_or(MISSING_CELL).to_string()
        };

        ScheduleRowView {
            time: cell(row.time()),
            route: cell(row.route_short_name.as_deref()),
            headsign: cell(row.trip_headsign.as_deref()),
            trip_id: cell(Some(row.trip_id.as_str())),
        }
    }
}
