//! Resolvers that turn entities into API payloads and write the answers back.
//!
//! Each resolve issues exactly one [`Client::call`]. Results are matched to the
//! input by position, so a result of the wrong length is an error rather than a
//! partial update.

use geojson::{Feature, Geometry, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::{CallOptions, Client};
use crate::error::{Error, Result};
use crate::models::{GeocodingOptions, Indicator, Isoline, Isovist, Moment, Polygon, Position};
use crate::table::FeatureTable;

#[derive(Debug, Deserialize)]
struct LonLat {
    lon: f64,
    lat: f64,
}

fn length_mismatch(expected: usize, got: usize) -> Error {
    Error::UnexpectedResponse(format!("expected {expected} result(s), got {got}"))
}

fn point_of(geometry: Option<&Geometry>) -> Option<(f64, f64)> {
    match geometry.map(|g| &g.value) {
        Some(geojson::Value::Point(coords)) if coords.len() >= 2 => Some((coords[0], coords[1])),
        _ => None,
    }
}

/// Builds a GeoJSON FeatureCollection whose properties are the serialized items
/// minus their `geom` member.
fn feature_collection<T, F>(items: &[T], geometry: F) -> Result<Value>
where
    T: Serialize,
    F: Fn(&T) -> Option<Geometry>,
{
    let rows = items
        .iter()
        .map(|item| -> Result<(Option<Geometry>, JsonObject)> {
            let mut properties = match serde_json::to_value(item)? {
                Value::Object(map) => map,
                other => {
                    let mut map = JsonObject::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            properties.remove("geom");
            Ok((geometry(item), properties))
        })
        .collect::<Result<Vec<_>>>()?;
    FeatureTable::from_rows(rows).to_json()
}

/// Geometries of a feature result, one per input item.
fn resolved_geometries(result: Value, expected: usize) -> Result<Vec<Geometry>> {
    let table = FeatureTable::from_value(result)?;
    if table.len() != expected {
        return Err(length_mismatch(expected, table.len()));
    }
    table
        .features
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            f.geometry.ok_or_else(|| {
                Error::UnexpectedResponse(format!("result feature {i} has no geometry"))
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct GeocodingHelper<'a> {
    client: &'a Client,
    options: Option<GeocodingOptions>,
    call: CallOptions,
}

impl<'a> GeocodingHelper<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            options: None,
            call: CallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GeocodingOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    /// Geocodes free-form addresses.
    pub fn from_addresses<S: AsRef<str>>(&self, addresses: &[S]) -> Result<Vec<Position>> {
        let mut positions: Vec<Position> = addresses
            .iter()
            .map(|a| Position::from_address(a.as_ref()))
            .collect();
        self.resolve(&mut positions)?;
        Ok(positions)
    }

    /// Fills in `lon`/`lat` of every position, in order.
    pub fn resolve(&self, positions: &mut [Position]) -> Result<()> {
        if positions.is_empty() {
            return Ok(());
        }
        for p in positions.iter() {
            p.validate()?;
        }

        let payload = json!({ "locations": &*positions, "options": &self.options });
        let result = self
            .client
            .call(&self.client.endpoints().geocoding, &payload, self.call)?;

        let points = geocoded_points(result)?;
        if points.len() != positions.len() {
            return Err(length_mismatch(positions.len(), points.len()));
        }
        for (position, (lon, lat)) in positions.iter_mut().zip(points) {
            position.lon = Some(lon);
            position.lat = Some(lat);
        }
        Ok(())
    }
}

/// Accepts either `[{"lon":..,"lat":..}, ..]` or a FeatureCollection of points.
fn geocoded_points(result: Value) -> Result<Vec<(f64, f64)>> {
    match serde_json::from_value::<Vec<LonLat>>(result.clone()) {
        Ok(list) => return Ok(list.into_iter().map(|p| (p.lon, p.lat)).collect()),
        Err(e) if is_lon_lat_list(&result) => {
            return Err(Error::UnexpectedResponse(format!("invalid geocoding result: {e}")));
        }
        Err(_) => {}
    }

    let table = FeatureTable::from_value(result)?;
    table
        .geometries()
        .enumerate()
        .map(|(i, g)| {
            point_of(g).ok_or_else(|| {
                Error::UnexpectedResponse(format!("geocoding result {i} is not a point"))
            })
        })
        .collect()
}

// A list whose items carry `lon`/`lat` rather than a GeoJSON `type`.
fn is_lon_lat_list(result: &Value) -> bool {
    result.as_array().is_some_and(|items| {
        items.iter().any(|item| {
            item.get("type").is_none() && (item.get("lon").is_some() || item.get("lat").is_some())
        })
    })
}

#[derive(Debug, Clone)]
pub struct IsovistHelper<'a> {
    client: &'a Client,
    options: Option<GeocodingOptions>,
    call: CallOptions,
}

impl<'a> IsovistHelper<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            options: None,
            call: CallOptions::default(),
        }
    }

    /// Geocoding context for destinations given as addresses.
    pub fn with_options(mut self, options: GeocodingOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    /// Sets `geom` on every isovist, in order.
    pub fn resolve(&self, isovists: &mut [Isovist]) -> Result<()> {
        if isovists.is_empty() {
            return Ok(());
        }
        for i in isovists.iter() {
            i.validate()?;
        }

        let gdf = feature_collection(&*isovists, |i| i.destination.to_geometry())?;
        let payload = json!({ "gdf": gdf, "options": &self.options });
        let result = self
            .client
            .call(&self.client.endpoints().isovists, &payload, self.call)?;

        let geometries = resolved_geometries(result, isovists.len())?;
        for (isovist, geom) in isovists.iter_mut().zip(geometries) {
            isovist.geom = Some(geom);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IsolineHelper<'a> {
    client: &'a Client,
    options: Option<GeocodingOptions>,
    call: CallOptions,
}

impl<'a> IsolineHelper<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            options: None,
            call: CallOptions::default(),
        }
    }

    /// Geocoding context for destinations given as addresses.
    pub fn with_options(mut self, options: GeocodingOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    /// Sets `geom` on every isoline, in order.
    pub fn resolve(&self, isolines: &mut [Isoline]) -> Result<()> {
        if isolines.is_empty() {
            return Ok(());
        }
        for i in isolines.iter() {
            i.validate()?;
        }

        let gdf = feature_collection(&*isolines, |i| i.destination.to_geometry())?;
        let payload = json!({ "gdf": gdf, "options": &self.options });
        let result = self
            .client
            .call(&self.client.endpoints().isolines, &payload, self.call)?;

        let geometries = resolved_geometries(result, isolines.len())?;
        for (isoline, geom) in isolines.iter_mut().zip(geometries) {
            isoline.geom = Some(geom);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorHelper<'a> {
    client: &'a Client,
    call: CallOptions,
}

impl<'a> IndicatorHelper<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            call: CallOptions::default(),
        }
    }

    pub fn with_call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }

    /// Aggregates `indicator` at `moment` over every area in `areas`.
    ///
    /// The returned table keeps the input rows in order; each row gains the
    /// properties of the matching result feature (such as `value`). A result
    /// geometry replaces the input one when present.
    pub fn resolve_aggregated(
        &self,
        areas: &FeatureTable,
        indicator: &Indicator,
        moment: &Moment,
    ) -> Result<FeatureTable> {
        indicator.validate()?;
        moment.validate()?;
        if areas.is_empty() {
            return Ok(FeatureTable::default());
        }

        let payload = json!({
            "gdf": areas.to_json()?,
            "indicator": indicator,
            "moment": moment,
        });
        let result = self.client.call(
            &self.client.endpoints().aggregated_indicators,
            &payload,
            self.call,
        )?;

        let resolved = FeatureTable::from_value(result)?;
        if resolved.len() != areas.len() {
            return Err(length_mismatch(areas.len(), resolved.len()));
        }

        let features = areas
            .features
            .iter()
            .zip(resolved.features)
            .map(|(input, output)| merge_feature(input, output))
            .collect();
        Ok(FeatureTable::new(features))
    }

    /// Breaks `indicator` at `moment` down over the cells covering `polygon`.
    pub fn resolve_disaggregated(
        &self,
        polygon: &Polygon,
        indicator: &Indicator,
        moment: &Moment,
    ) -> Result<FeatureTable> {
        polygon.validate()?;
        indicator.validate()?;
        moment.validate()?;

        let payload = json!({
            "polygon": &polygon.geom,
            "indicator": indicator,
            "moment": moment,
        });
        let result = self.client.call(
            &self.client.endpoints().disaggregated_indicators,
            &payload,
            self.call,
        )?;
        if result.is_null() {
            return Err(Error::UnexpectedResponse(
                "disaggregated indicator returned no result".to_string(),
            ));
        }
        FeatureTable::from_value(result)
    }
}

fn merge_feature(input: &Feature, output: Feature) -> Feature {
    let mut merged = input.clone();
    if output.geometry.is_some() {
        merged.geometry = output.geometry;
    }
    if let Some(props) = output.properties {
        merged
            .properties
            .get_or_insert_with(JsonObject::new)
            .extend(props);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::models::{DayOfWeek, IsolineMode, Month};
    use crate::transport::testing::ScriptedTransport;
    use reqwest::Method;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(t: &Arc<ScriptedTransport>) -> Client {
        let config = ClientConfig::resolve(Some("dummy".into()), |_| None).unwrap();
        Client::with_transport(config, t.clone()).with_poll_delay(Duration::from_millis(1))
    }

    fn polygon_json() -> Value {
        json!({"type": "Polygon", "coordinates": [[[-3.70587, 40.4208], [-3.7058, 40.4209], [-3.7057, 40.4208], [-3.70587, 40.4208]]]})
    }

    #[test]
    fn geocoding_updates_positions_in_order() {
        let t = Arc::new(ScriptedTransport::new().respond(
            200,
            r#"[{"lon": -3.70587, "lat": 40.42048}, {"lon": -3.37825, "lat": 40.47281}]"#,
        ));
        let c = client(&t);

        let positions = GeocodingHelper::new(&c)
            .with_options(GeocodingOptions::default())
            .from_addresses(&["Gran Vía 46, Madrid", "Calle Alcalá 10, Madrid"])
            .unwrap();

        assert_eq!(positions[0].lon_lat(), Some((-3.70587, 40.42048)));
        assert_eq!(positions[1].lon_lat(), Some((-3.37825, 40.47281)));
        assert_eq!(positions[0].address.as_deref(), Some("Gran Vía 46, Madrid"));

        let seen = t.requests();
        assert_eq!(seen.len(), 1);
        let body = seen[0].body.as_ref().unwrap();
        assert_eq!(body["locations"][1]["address"], "Calle Alcalá 10, Madrid");
        assert_eq!(body["options"]["country"], "Spain");
    }

    #[test]
    fn geocoding_accepts_point_features() {
        let t = Arc::new(ScriptedTransport::new().respond(
            200,
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[-3.7,40.4]},"properties":{}}]}"#,
        ));
        let c = client(&t);
        let mut positions = vec![Position::from_address("Gran Vía 46")];
        GeocodingHelper::new(&c).resolve(&mut positions).unwrap();
        assert_eq!(positions[0].lon_lat(), Some((-3.7, 40.4)));
    }

    #[test]
    fn geocoding_rejects_short_results() {
        let t = Arc::new(ScriptedTransport::new().respond(200, r#"[{"lon": 1.0, "lat": 2.0}]"#));
        let c = client(&t);
        let mut positions = vec![Position::from_address("a"), Position::from_address("b")];

        let err = GeocodingHelper::new(&c).resolve(&mut positions).unwrap_err();

        assert!(matches!(err, Error::UnexpectedResponse(_)));
        assert!(positions.iter().all(|p| p.lon.is_none()));
    }

    #[test]
    fn isovists_resolved_through_a_deferred_job() {
        let t = Arc::new(
            ScriptedTransport::new()
                .respond(202, r#"{"detail": "https://job/1"}"#)
                .respond(200, json!({
                    "type": "FeatureCollection",
                    "features": [{"type": "Feature", "geometry": polygon_json(), "properties": {}}]
                }).to_string()),
        );
        let c = client(&t);
        let mut isovists = vec![Isovist::new(Position::from_lon_lat(-3.70587, 40.42048)).with_radius(100)];

        IsovistHelper::new(&c).resolve(&mut isovists).unwrap();

        let seen = t.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].method, Method::GET);
        assert_eq!(seen[1].url, "https://job/1");

        let expected: Geometry = serde_json::from_value(polygon_json()).unwrap();
        assert_eq!(isovists[0].geom.as_ref(), Some(&expected));

        let feature = &seen[0].body.as_ref().unwrap()["gdf"]["features"][0];
        assert_eq!(feature["geometry"]["coordinates"], json!([-3.70587, 40.42048]));
        assert_eq!(feature["properties"]["radius_m"], 100);
        assert!(feature["properties"].get("geom").is_none());
    }

    #[test]
    fn isolines_fail_on_null_result() {
        let t = Arc::new(
            ScriptedTransport::new()
                .respond(202, r#"{"detail": "https://job/2"}"#)
                .respond(410, "gone"),
        );
        let c = client(&t);
        let mut isolines = vec![Isoline::new(
            Position::from_lon_lat(-3.7, 40.4),
            IsolineMode::Pedestrian,
            200,
        )];

        let err = IsolineHelper::new(&c).resolve(&mut isolines).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
        assert!(isolines[0].geom.is_none());
    }

    #[test]
    fn invalid_entities_never_reach_the_server() {
        let t = Arc::new(ScriptedTransport::new());
        let c = client(&t);
        let mut isolines = vec![Isoline::new(Position::from_lon_lat(-3.7, 40.4), IsolineMode::Car, 7200)];

        assert!(matches!(
            IsolineHelper::new(&c).resolve(&mut isolines),
            Err(Error::InvalidInput(_))
        ));
        assert!(t.requests().is_empty());
    }

    #[test]
    fn aggregated_values_join_input_rows() {
        let t = Arc::new(ScriptedTransport::new().respond(
            200,
            json!({
                "type": "FeatureCollection",
                "features": [
                    {"type": "Feature", "geometry": null, "properties": {"value": 123}},
                    {"type": "Feature", "geometry": null, "properties": {"value": 456}}
                ]
            })
            .to_string(),
        ));
        let c = client(&t);
        let geometry: Geometry = serde_json::from_value(polygon_json()).unwrap();
        let areas = FeatureTable::from_rows(vec![
            (Some(geometry.clone()), JsonObject::from_iter([("name".to_string(), json!("a"))])),
            (Some(geometry), JsonObject::from_iter([("name".to_string(), json!("b"))])),
        ]);

        let out = IndicatorHelper::new(&c)
            .resolve_aggregated(
                &areas,
                &Indicator::new("pop"),
                &Moment::new(DayOfWeek::Monday, Month::February, 15),
            )
            .unwrap();

        let values: Vec<_> = out.column("value").map(|v| v.cloned()).collect();
        assert_eq!(values, vec![Some(json!(123)), Some(json!(456))]);
        let names: Vec<_> = out.column("name").map(|v| v.cloned()).collect();
        assert_eq!(names, vec![Some(json!("a")), Some(json!("b"))]);
        assert!(out.geometries().all(|g| g.is_some()));

        let body = t.requests()[0].body.clone().unwrap();
        assert_eq!(body["indicator"]["code"], "pop");
        assert_eq!(body["moment"]["dow"], "monday");
    }

    #[test]
    fn disaggregated_returns_server_cells() {
        let cell = json!({"type": "Feature", "geometry": polygon_json(), "properties": {"value": 1.5, "weight": 1}});
        let t = Arc::new(ScriptedTransport::new().respond(
            200,
            json!({"type": "FeatureCollection", "features": [cell.clone(), cell]}).to_string(),
        ));
        let c = client(&t);
        let polygon = Polygon {
            id: None,
            geom: serde_json::from_value(polygon_json()).unwrap(),
        };

        let out = IndicatorHelper::new(&c)
            .resolve_disaggregated(
                &polygon,
                &Indicator::new("pop").disaggregated(),
                &Moment::new(DayOfWeek::Monday, Month::February, 15),
            )
            .unwrap();

        assert_eq!(out.len(), 2);
        let body = t.requests()[0].body.clone().unwrap();
        assert_eq!(body["polygon"]["type"], "Polygon");
        assert_eq!(body["indicator"]["aggregated"], false);
    }

    #[test]
    fn geocoding_reports_malformed_points() {
        let t = Arc::new(ScriptedTransport::new().respond(200, r#"[{"lon": null, "lat": 40.4}]"#));
        let c = client(&t);
        let mut positions = vec![Position::from_address("Gran Vía 46")];

        let err = GeocodingHelper::new(&c).resolve(&mut positions).unwrap_err();

        match err {
            Error::UnexpectedResponse(msg) => assert!(msg.starts_with("invalid geocoding result"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(positions[0].lon.is_none());
    }

    #[test]
    fn disaggregated_fails_when_job_is_lost() {
        let t = Arc::new(
            ScriptedTransport::new()
                .respond(202, r#"{"detail": "https://job/1"}"#)
                .respond(500, "boom"),
        );
        let c = client(&t);
        let polygon = Polygon {
            id: None,
            geom: serde_json::from_value(polygon_json()).unwrap(),
        };

        let err = IndicatorHelper::new(&c)
            .resolve_disaggregated(
                &polygon,
                &Indicator::new("pop").disaggregated(),
                &Moment::new(DayOfWeek::Monday, Month::February, 15),
            )
            .unwrap_err();

        assert!(matches!(err, Error::UnexpectedResponse(_)));
        assert_eq!(t.requests().len(), 2);
    }
}
