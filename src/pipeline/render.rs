//! Map-facing payloads built from the unique aggregates.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{format_date_label, GeoResolution, UniqueAggregate};

/// `{ "data": [UniqueAggregate...] }`
#[derive(Debug, Clone, Serialize)]
pub struct AggregateDataset<'a> {
    pub data: &'a [UniqueAggregate],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: PointGeometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// GeoJSON order: longitude, latitude
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureProperties {
    pub date: String,
    pub count: u64,
    pub geo_resolution: GeoResolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<usize>,
}

/// One animation frame: every aggregate confirmed on `date`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationFrame {
    #[serde(with = "crate::domain::date_label")]
    pub date: NaiveDate,
    pub data: Vec<UniqueAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationDataset {
    pub dates: Vec<String>,
    pub frames: Vec<AnimationFrame>,
}

fn feature(aggregate: &UniqueAggregate, frame: Option<usize>) -> Feature {
    Feature {
        kind: "Feature",
        geometry: PointGeometry {
            kind: "Point",
            coordinates: [aggregate.longitude, aggregate.latitude],
        },
        properties: FeatureProperties {
            date: format_date_label(aggregate.date),
            count: aggregate.count,
            geo_resolution: aggregate.geo_resolution,
            frame,
        },
    }
}

/// One point feature per aggregate
pub fn geo_aggregates(aggregates: &[UniqueAggregate]) -> FeatureCollection {
    FeatureCollection {
        kind: "FeatureCollection",
        features: aggregates.iter().map(|a| feature(a, None)).collect(),
    }
}

/// Date-ordered frames. Expects aggregates sorted by date, as the Aggregator emits them.
pub fn animation(aggregates: &[UniqueAggregate]) -> AnimationDataset {
    let mut frames: Vec<AnimationFrame> = Vec::new();
    for aggregate in aggregates {
        match frames.last_mut() {
            Some(frame) if frame.date == aggregate.date => frame.data.push(aggregate.clone()),
            _ => frames.push(AnimationFrame {
                date: aggregate.date,
                data: vec![aggregate.clone()],
            }),
        }
    }
    AnimationDataset {
        dates: frames.iter().map(|f| format_date_label(f.date)).collect(),
        frames,
    }
}

/// Geo counterpart of [`animation`]: features in frame order, tagged with their frame index
pub fn geo_animation(animation: &AnimationDataset) -> FeatureCollection {
    FeatureCollection {
        kind: "FeatureCollection",
        features: animation
            .frames
            .iter()
            .enumerate()
            .flat_map(|(i, frame)| frame.data.iter().map(move |a| feature(a, Some(i))))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agg(d: u32, lat: f64, count: u64) -> UniqueAggregate {
        UniqueAggregate {
            latitude: lat,
            longitude: 9.19,
            date: NaiveDate::from_ymd_opt(2020, 3, d).unwrap(),
            geo_resolution: GeoResolution::Admin2,
            count,
        }
    }

    #[test]
    fn geojson_point_uses_lon_lat_order() {
        let collection = geo_aggregates(&[agg(1, 45.46, 3)]);
        let value = serde_json::to_value(&collection).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [9.19, 45.46]},
                    "properties": {"date": "01.03.2020", "count": 3, "geo_resolution": "admin2"}
                }]
            })
        );
    }

    #[test]
    fn frames_follow_dates() {
        let aggs = vec![agg(1, 45.0, 1), agg(1, 46.0, 2), agg(3, 45.0, 5)];
        let anim = animation(&aggs);
        assert_eq!(anim.dates, vec!["01.03.2020", "03.03.2020"]);
        assert_eq!(anim.frames[0].data.len(), 2);
        assert_eq!(anim.frames[1].data[0].count, 5);

        let geo = geo_animation(&anim);
        let frames: Vec<Option<usize>> = geo.features.iter().map(|f| f.properties.frame).collect();
        assert_eq!(frames, vec![Some(0), Some(0), Some(1)]);
    }

    #[test]
    fn dataset_wraps_data_key() {
        let aggs = vec![agg(2, 45.0, 4)];
        let value = serde_json::to_value(AggregateDataset { data: &aggs }).unwrap();
        assert_eq!(value["data"][0]["count"], 4);
        assert_eq!(value["data"][0]["date"], "02.03.2020");
    }
}
