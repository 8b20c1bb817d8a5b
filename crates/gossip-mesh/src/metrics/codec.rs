//! Binary codec for metric batches with prost serialization.
//!
//! A record is `name` (tag 1, string) and `value` (tag 2, double). A batch is
//! zero or more tag-1 occurrences, each holding one independently encoded
//! record, followed by the required `hostname` (tag 2, string).

use prost::Message;
use thiserror::Error;

use super::{MetricBatch, MetricRecord};

/// Why a payload could not be turned into a [`MetricBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A required field was absent (or empty).
    #[error("missing required field '{field}'")]
    MissingRequiredField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field was present but could not be decoded.
    #[error("malformed field '{field}': {reason}")]
    MalformedField {
        /// Which field failed, e.g. `batch` or `metrics[3]`.
        field: String,
        /// What went wrong.
        reason: String,
    },
}

// ============ Prost Wire Format ============

#[derive(Clone, PartialEq, Message)]
struct WireMetric {
    #[prost(string, optional, tag = "1")]
    name: Option<String>,
    #[prost(double, optional, tag = "2")]
    value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
struct WireMetricBatch {
    /// Each entry is an encoded [`WireMetric`], kept opaque until the whole
    /// batch has been gathered.
    #[prost(bytes = "vec", repeated, tag = "1")]
    metrics: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    hostname: Option<String>,
}

/// Encodes a batch. Records keep their insertion order.
#[must_use]
pub fn encode(batch: &MetricBatch) -> Vec<u8> {
    let wire = WireMetricBatch {
        metrics: batch.metrics().iter().map(encode_record).collect(),
        hostname: Some(batch.hostname().to_string()),
    };
    wire.encode_to_vec()
}

fn encode_record(record: &MetricRecord) -> Vec<u8> {
    WireMetric {
        name: Some(record.name().to_string()),
        value: Some(record.value()),
    }
    .encode_to_vec()
}

/// Decodes a batch received from an untrusted peer.
///
/// Every record is decoded before the hostname is checked; the first failing
/// record aborts the whole batch. Never panics on arbitrary input.
pub fn decode(bytes: &[u8]) -> Result<MetricBatch, DecodeError> {
    let wire = WireMetricBatch::decode(bytes).map_err(|e| DecodeError::MalformedField {
        field: "batch".to_string(),
        reason: e.to_string(),
    })?;

    let metrics = wire
        .metrics
        .iter()
        .enumerate()
        .map(|(index, raw)| decode_record(index, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let hostname = wire
        .hostname
        .filter(|h| !h.is_empty())
        .ok_or(DecodeError::MissingRequiredField { field: "hostname" })?;

    Ok(MetricBatch::with_metrics(hostname, metrics))
}

fn decode_record(index: usize, raw: &[u8]) -> Result<MetricRecord, DecodeError> {
    let malformed = |reason: String| DecodeError::MalformedField {
        field: format!("metrics[{index}]"),
        reason,
    };

    let wire = WireMetric::decode(raw).map_err(|e| malformed(e.to_string()))?;
    let name = wire
        .name
        .ok_or_else(|| malformed("missing required field 'name'".to_string()))?;
    let value = wire
        .value
        .ok_or_else(|| malformed("missing required field 'value'".to_string()))?;

    Ok(MetricRecord::new(name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> MetricBatch {
        MetricBatch::with_metrics(
            "node-7",
            vec![
                MetricRecord::new("cpu_usage_percent", 42.5),
                MetricRecord::new("temperature_delta", -3.25),
                MetricRecord::new("zero", 0.0),
            ],
        )
    }

    fn batch_with_raw_records(records: Vec<Vec<u8>>, hostname: Option<&str>) -> Vec<u8> {
        WireMetricBatch {
            metrics: records,
            hostname: hostname.map(str::to_string),
        }
        .encode_to_vec()
    }

    #[test]
    fn roundtrip_preserves_order_and_values() {
        let batch = sample_batch();
        let decoded = decode(&encode(&batch)).expect("decode should succeed");
        assert_eq!(decoded, batch);
    }

    #[test]
    fn roundtrip_empty_batch() {
        let batch = MetricBatch::new("lonely-host");
        let decoded = decode(&encode(&batch)).expect("decode should succeed");
        assert_eq!(decoded, batch);
        assert!(decoded.is_empty());
    }

    #[test]
    fn decoding_twice_is_idempotent() {
        let bytes = encode(&sample_batch());
        let first = decode(&bytes).unwrap();
        let second = decode(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn records_precede_hostname_on_the_wire() {
        let bytes = encode(&sample_batch());
        // first key byte: field 1, wire type 2 (length-delimited)
        assert_eq!(bytes[0], 0x0a);
    }

    #[test]
    fn missing_hostname_is_rejected() {
        let bytes = batch_with_raw_records(vec![encode_record(&MetricRecord::new("a", 1.0))], None);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::MissingRequiredField { field: "hostname" })
        );
    }

    #[test]
    fn empty_hostname_is_rejected() {
        let bytes = batch_with_raw_records(vec![], Some(""));
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::MissingRequiredField { field: "hostname" })
        );
    }

    #[test]
    fn record_without_name_fails_whole_batch() {
        let nameless = WireMetric {
            name: None,
            value: Some(1.0),
        }
        .encode_to_vec();
        let bytes = batch_with_raw_records(
            vec![encode_record(&MetricRecord::new("ok", 1.0)), nameless],
            Some("host"),
        );

        let result = decode(&bytes);
        assert!(
            matches!(
                &result,
                Err(DecodeError::MalformedField { field, reason })
                    if field == "metrics[1]" && reason.contains("name")
            ),
            "expected MalformedField, got {result:?}"
        );
    }

    #[test]
    fn record_failure_wins_over_missing_hostname() {
        let nameless = WireMetric {
            name: None,
            value: Some(1.0),
        }
        .encode_to_vec();
        let bytes = batch_with_raw_records(vec![nameless], None);
        assert!(matches!(decode(&bytes), Err(DecodeError::MalformedField { .. })));
    }

    #[test]
    fn record_without_value_is_malformed() {
        let valueless = WireMetric {
            name: Some("x".to_string()),
            value: None,
        }
        .encode_to_vec();
        let bytes = batch_with_raw_records(vec![valueless], Some("host"));
        assert!(matches!(decode(&bytes), Err(DecodeError::MalformedField { .. })));
    }

    #[test]
    fn garbage_bytes_are_rejected_not_panicking() {
        assert!(decode(b"not a batch!").is_err());
        assert!(decode(&[0xff; 12]).is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode(&sample_batch());
        for cut in 1..bytes.len() {
            // every strict prefix either fails or lacks the hostname
            assert!(decode(&bytes[..cut]).is_err(), "prefix of {cut} bytes decoded");
        }
    }

    #[test]
    fn empty_input_lacks_hostname() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::MissingRequiredField { field: "hostname" })
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn record() -> impl Strategy<Value = MetricRecord> {
            (".*", any::<f64>().prop_filter("finite", |v| v.is_finite()))
                .prop_map(|(name, value)| MetricRecord::new(name, value))
        }

        proptest! {
            #[test]
            fn batch_roundtrip(
                hostname in ".+",
                metrics in prop::collection::vec(record(), 0..16)
            ) {
                let batch = MetricBatch::with_metrics(hostname, metrics);
                let decoded = decode(&encode(&batch)).unwrap();
                prop_assert_eq!(decoded, batch);
            }

            #[test]
            fn values_keep_exact_bits(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
                let batch = MetricBatch::with_metrics("h", vec![MetricRecord::new("v", value)]);
                let decoded = decode(&encode(&batch)).unwrap();
                prop_assert_eq!(decoded.metrics()[0].value().to_bits(), value.to_bits());
            }

            #[test]
            fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode(&bytes);
            }
        }
    }
}
