//! Request entities sent to the API and filled in from its answers.
//!
//! Every entity serializes to the JSON shape the API expects. `validate()` checks
//! the field constraints locally; the server enforces the same ones and answers
//! 422 when they are violated.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use geojson::Geometry;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidInput(msg.into())
}

/// A point, an address to be geocoded, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Full or partial address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Position {
    pub fn from_lon_lat(lon: f64, lat: f64) -> Self {
        Self {
            lon: Some(lon),
            lat: Some(lat),
            address: None,
        }
    }

    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn lon_lat(&self) -> Option<(f64, f64)> {
        self.lon.zip(self.lat)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lon_lat().is_none() && self.address.is_none() {
            return Err(invalid("either lon/lat or an address must be provided"));
        }
        if let Some(lon) = self.lon {
            if !(lon > -180.0 && lon < 180.0) {
                return Err(invalid("longitude must be between -180 and 180"));
            }
        }
        if let Some(lat) = self.lat {
            if !(lat > -90.0 && lat < 90.0) {
                return Err(invalid("latitude must be between -90 and 90"));
            }
        }
        Ok(())
    }

    /// GeoJSON point, when coordinates are known.
    pub fn to_geometry(&self) -> Option<Geometry> {
        self.lon_lat()
            .map(|(lon, lat)| Geometry::new(geojson::Value::Point(vec![lon, lat])))
    }
}

/// Fallback geocoding context for addresses that do not carry their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingOptions {
    pub country: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub postal_code: Option<String>,
}

impl Default for GeocodingOptions {
    fn default() -> Self {
        Self {
            country: Some("Spain".to_string()),
            state: None,
            county: None,
            city: None,
            district: None,
            postal_code: None,
        }
    }
}

impl GeocodingOptions {
    /// Qualified-query form, e.g. `country=Spain;city=Madrid;postalCode=28013`.
    pub fn qq(&self) -> String {
        [
            ("country", &self.country),
            ("state", &self.state),
            ("county", &self.county),
            ("city", &self.city),
            ("district", &self.district),
            ("postalCode", &self.postal_code),
        ]
        .iter()
        .filter_map(|(k, v)| {
            v.as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| format!("{k}={v}"))
        })
        .collect::<Vec<_>>()
        .join(";")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    /// ISO number, Monday = 1.
    pub fn number(self) -> u32 {
        match self {
            DayOfWeek::Monday => 1,
            DayOfWeek::Tuesday => 2,
            DayOfWeek::Wednesday => 3,
            DayOfWeek::Thursday => 4,
            DayOfWeek::Friday => 5,
            DayOfWeek::Saturday => 6,
            DayOfWeek::Sunday => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    pub fn number(self) -> u32 {
        self as u32 + 1
    }
}

/// A typical hour: day of week, month and hour of day in a given year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub dow: DayOfWeek,
    pub month: Month,
    pub hour: u8,
    #[serde(default = "Moment::default_year")]
    pub year: i32,
}

impl Moment {
    pub fn new(dow: DayOfWeek, month: Month, hour: u8) -> Self {
        Self {
            id: None,
            dow,
            month,
            hour,
            year: Self::default_year(),
        }
    }

    fn default_year() -> i32 {
        2020
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(invalid(format!("hour must be within 0..=23, got {}", self.hour)));
        }
        Ok(())
    }

    pub fn month_number(&self) -> u32 {
        self.month.number()
    }

    pub fn dow_number(&self) -> u32 {
        self.dow.number()
    }

    /// First date of `month`/`year` that falls on `dow`, at `hour:00`.
    pub fn equivalent_datetime(&self) -> Result<NaiveDateTime> {
        self.validate()?;
        (1..=7)
            .filter_map(|day| NaiveDate::from_ymd_opt(self.year, self.month_number(), day))
            .find(|date| date.weekday().number_from_monday() == self.dow_number())
            .and_then(|date| date.and_hms_opt(u32::from(self.hour), 0, 0))
            .ok_or_else(|| invalid(format!("no equivalent date for {self:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    Total,
    Density,
}

/// An indicator request, or a resolved indicator value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// Code as listed in the metadata catalog.
    pub code: String,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default = "default_true")]
    pub aggregated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Indicator {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            normalization: Normalization::default(),
            aggregated: true,
            location: None,
            moment: None,
            value: None,
        }
    }

    pub fn disaggregated(mut self) -> Self {
        self.aggregated = false;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(invalid("indicator code must not be empty"));
        }
        Ok(())
    }
}

/// Visibility polygon seen from `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isovist {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub destination: Position,
    pub radius_m: u32,
    /// Angular steps; -1 means one ray per degree of field of view.
    pub num_rays: i32,
    pub heading_deg: i32,
    pub fov_deg: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom: Option<Geometry>,
}

impl Isovist {
    pub fn new(destination: Position) -> Self {
        Self {
            id: None,
            destination,
            radius_m: 150,
            num_rays: -1,
            heading_deg: 0,
            fov_deg: 360,
            geom: None,
        }
    }

    pub fn with_radius(mut self, radius_m: u32) -> Self {
        self.radius_m = radius_m;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.destination.validate()?;
        if self.num_rays == 0 || self.num_rays < -1 {
            return Err(invalid("num_rays must be positive or -1"));
        }
        if !(0..=360).contains(&self.fov_deg) {
            return Err(invalid("fov_deg must be within 0..=360"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolineMode {
    Car,
    Truck,
    Pedestrian,
}

/// Area reachable from `destination` within `range_s` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isoline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub destination: Position,
    pub mode: IsolineMode,
    pub range_s: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moment: Option<Moment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom: Option<Geometry>,
}

impl Isoline {
    pub const MAX_RANGE_S: u32 = 3600;

    pub fn new(destination: Position, mode: IsolineMode, range_s: u32) -> Self {
        Self {
            id: None,
            destination,
            mode,
            range_s,
            moment: None,
            geom: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.destination.validate()?;
        if self.range_s == 0 || self.range_s > Self::MAX_RANGE_S {
            return Err(invalid(format!(
                "range_s must be within 1..={}, got {}",
                Self::MAX_RANGE_S,
                self.range_s
            )));
        }
        if let Some(moment) = &self.moment {
            moment.validate()?;
        }
        Ok(())
    }
}

/// An arbitrary area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub geom: Geometry,
}

impl Polygon {
    pub fn validate(&self) -> Result<()> {
        match &self.geom.value {
            geojson::Value::Polygon(_) | geojson::Value::MultiPolygon(_) => Ok(()),
            _ => Err(invalid("polygon geometry must be a Polygon or MultiPolygon")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    #[test]
    fn position_needs_coordinates_or_address() {
        assert!(Position::default().validate().is_err());
        assert!(Position::from_address("Gran Vía 46, Madrid").validate().is_ok());
        assert!(Position::from_lon_lat(-3.70587, 40.42048).validate().is_ok());
        assert!(Position::from_lon_lat(-180.0, 0.0).validate().is_err());
        assert!(Position::from_lon_lat(0.0, 95.0).validate().is_err());
    }

    #[test]
    fn position_serializes_only_known_fields() {
        assert_eq!(
            serde_json::to_value(Position::from_address("Calle Alcalá 10")).unwrap(),
            json!({"address": "Calle Alcalá 10"})
        );
    }

    #[test]
    fn geocoding_qq() {
        let options = GeocodingOptions {
            city: Some("Madrid".into()),
            postal_code: Some("28013".into()),
            ..GeocodingOptions::default()
        };
        assert_eq!(options.qq(), "country=Spain;city=Madrid;postalCode=28013");
    }

    #[test]
    fn moment_equivalent_datetime() {
        // February 2020 starts on a Saturday; the first Monday is the 3rd.
        let moment = Moment::new(DayOfWeek::Monday, Month::February, 15);
        let dt = moment.equivalent_datetime().unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2020, 2, 3).unwrap());
        assert_eq!(dt.hour(), 15);
        assert_eq!(moment.month_number(), 2);
        assert_eq!(moment.dow_number(), 1);
    }

    #[test]
    fn moment_hour_is_bounded() {
        let moment = Moment::new(DayOfWeek::Friday, Month::June, 24);
        assert!(matches!(moment.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn moment_wire_format() {
        let value = serde_json::to_value(Moment::new(DayOfWeek::Friday, Month::February, 12)).unwrap();
        assert_eq!(value, json!({"dow": "friday", "month": "february", "hour": 12, "year": 2020}));
    }

    #[test]
    fn isoline_range_bounds() {
        let dest = Position::from_lon_lat(-3.7, 40.4);
        assert!(Isoline::new(dest.clone(), IsolineMode::Car, 0).validate().is_err());
        assert!(Isoline::new(dest.clone(), IsolineMode::Car, 3601).validate().is_err());
        assert!(Isoline::new(dest, IsolineMode::Pedestrian, 200).validate().is_ok());
    }

    #[test]
    fn isovist_defaults() {
        let isovist = Isovist::new(Position::from_lon_lat(-3.7, 40.4));
        assert_eq!(isovist.radius_m, 150);
        assert_eq!(isovist.num_rays, -1);
        assert_eq!(isovist.fov_deg, 360);
        assert!(isovist.validate().is_ok());
    }

    #[test]
    fn indicator_defaults() {
        let indicator: Indicator = serde_json::from_value(json!({"code": "pop"})).unwrap();
        assert_eq!(indicator.normalization, Normalization::Total);
        assert!(indicator.aggregated);
        assert!(Indicator::new(" ").validate().is_err());
    }
}
