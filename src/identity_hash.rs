//! Deterministic identity digests.
//!
//! The trip-stop hash is the idempotency key joining the vehicle position
//! and trip update streams, so it has to be byte-identical across runs and
//! across processes. Keyed SipHash with a fixed key gives a stable 128 bit
//! digest without pulling in a crypto stack.

use crate::error::HeadwayError;
use chrono::NaiveDate;
use siphasher::sip128::{Hasher128, SipHasher24};
use std::collections::BTreeMap;
use std::hash::Hasher;

/// Canonical stand-in for a null value inside the digest, so `None` hashes
/// the same on both source streams.
const NULL_TOKEN: &str = "\u{0}none";

const FIELD_SEPARATOR: &str = "\u{1e}";

/// Digest a record over an expected set of fields.
///
/// Fields are concatenated in sorted-by-name order, never insertion order:
/// the two source streams build their records differently and must still
/// agree on the digest. Every expected field has to be present in the
/// record (a present-but-null value is fine).
pub fn trip_stop_hash(
    record: &BTreeMap<String, Option<String>>,
    expected_fields: &[&str],
) -> Result<String, HeadwayError> {
    let mut sorted_fields: Vec<&str> = expected_fields.to_vec();
    sorted_fields.sort_unstable();

    let mut concatenated = String::new();

    for field in sorted_fields {
        let value = record
            .get(field)
            .ok_or_else(|| HeadwayError::MissingField(field.to_string()))?;

        concatenated.push_str(value.as_deref().unwrap_or(NULL_TOKEN));
        concatenated.push_str(FIELD_SEPARATOR);
    }

    let mut hasher = SipHasher24::new_with_keys(0, 0);
    hasher.write(concatenated.as_bytes());

    Ok(format!("{:032x}", hasher.finish128().as_u128()))
}

/// Identity fields of one (trip, stop) observation, shared by both
/// normalizer pipelines.
///
/// Only fields both streams are required to carry belong here: the
/// prediction stream may lack a start time, so keying on it would split
/// one physical trip-stop across two rows. The trip id covers the same
/// disambiguation (repeated runs of one vehicle over one stop sequence).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventIdentity {
    pub service_date: NaiveDate,
    pub route_id: String,
    pub trip_id: String,
    pub direction_id: bool,
    pub vehicle_id: String,
    pub stop_sequence: i32,
    pub parent_station: String,
}

pub const EVENT_IDENTITY_FIELDS: [&str; 7] = [
    "service_date",
    "route_id",
    "trip_id",
    "direction_id",
    "vehicle_id",
    "stop_sequence",
    "parent_station",
];

impl EventIdentity {
    fn to_record(&self) -> BTreeMap<String, Option<String>> {
        BTreeMap::from([
            (
                "service_date".to_string(),
                Some(self.service_date.format("%Y%m%d").to_string()),
            ),
            ("route_id".to_string(), Some(self.route_id.clone())),
            ("trip_id".to_string(), Some(self.trip_id.clone())),
            (
                "direction_id".to_string(),
                Some((self.direction_id as u8).to_string()),
            ),
            ("vehicle_id".to_string(), Some(self.vehicle_id.clone())),
            (
                "stop_sequence".to_string(),
                Some(self.stop_sequence.to_string()),
            ),
            (
                "parent_station".to_string(),
                Some(self.parent_station.clone()),
            ),
        ])
    }
}

pub fn hash_event_identity(identity: &EventIdentity) -> String {
    // the record always carries every identity field, so this cannot fail
    trip_stop_hash(&identity.to_record(), &EVENT_IDENTITY_FIELDS)
        .unwrap_or_else(|_| unreachable!("event identity record is always complete"))
}

/// Synthetic 64 bit trip key for (service_date, route_id, trip_id), used as
/// the vehicle_trips primary key and as the post-resolution event grouping
/// key. Deterministic, so insert-or-ignore stays safe across re-delivery.
pub fn pm_trip_key(service_date: NaiveDate, route_id: &str, trip_id: &str) -> i64 {
    let mut hasher = siphasher::sip::SipHasher24::new_with_keys(0, 0);
    hasher.write(service_date.format("%Y%m%d").to_string().as_bytes());
    hasher.write(FIELD_SEPARATOR.as_bytes());
    hasher.write(route_id.as_bytes());
    hasher.write(FIELD_SEPARATOR.as_bytes());
    hasher.write(trip_id.as_bytes());

    hasher.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|v| v.to_string())))
            .collect()
    }

    #[test]
    fn hash_is_deterministic() {
        let r = record(&[("a", Some("1")), ("b", None), ("c", Some("x"))]);

        let h1 = trip_stop_hash(&r, &["a", "b", "c"]).unwrap();
        let h2 = trip_stop_hash(&r, &["a", "b", "c"]).unwrap();

        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn field_order_does_not_matter() {
        let r = record(&[("a", Some("1")), ("b", Some("2"))]);

        assert_eq!(
            trip_stop_hash(&r, &["a", "b"]).unwrap(),
            trip_stop_hash(&r, &["b", "a"]).unwrap()
        );
    }

    #[test]
    fn null_values_hash_consistently() {
        let r1 = record(&[("a", None), ("b", Some("2"))]);
        let r2 = record(&[("a", None), ("b", Some("2"))]);

        assert_eq!(
            trip_stop_hash(&r1, &["a", "b"]).unwrap(),
            trip_stop_hash(&r2, &["a", "b"]).unwrap()
        );

        let r3 = record(&[("a", Some("")), ("b", Some("2"))]);
        assert_ne!(
            trip_stop_hash(&r1, &["a", "b"]).unwrap(),
            trip_stop_hash(&r3, &["a", "b"]).unwrap()
        );
    }

    #[test]
    fn missing_field_is_an_error() {
        let r = record(&[("a", Some("1"))]);

        let err = trip_stop_hash(&r, &["a", "b"]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::HeadwayError::MissingField(f) if f == "b"
        ));
    }

    #[test]
    fn different_values_produce_different_hashes() {
        let r1 = record(&[("a", Some("1")), ("b", Some("2"))]);
        let r2 = record(&[("a", Some("1")), ("b", Some("3"))]);

        assert_ne!(
            trip_stop_hash(&r1, &["a", "b"]).unwrap(),
            trip_stop_hash(&r2, &["a", "b"]).unwrap()
        );
    }

    #[test]
    fn identity_hash_agrees_across_streams() {
        let identity = EventIdentity {
            service_date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            route_id: "Red".to_string(),
            trip_id: "61348621".to_string(),
            direction_id: false,
            vehicle_id: "R-5463D359".to_string(),
            stop_sequence: 40,
            parent_station: "place-pktrm".to_string(),
        };

        assert_eq!(hash_event_identity(&identity), hash_event_identity(&identity.clone()));
    }

    #[test]
    fn pm_trip_key_is_stable() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();

        assert_eq!(pm_trip_key(d, "Red", "61348621"), pm_trip_key(d, "Red", "61348621"));
        assert_ne!(pm_trip_key(d, "Red", "61348621"), pm_trip_key(d, "Red", "61348622"));
    }
}
