// Chunked JSON streaming utilities - length-prefixed frames
use crate::application::adaptive_data_service::DataResponse;
use crate::infrastructure::http_response::{brotli, X_CACHE};
use crate::infrastructure::json_mapper::{dataset_to_json, metadata_to_json, OutputFormat, Page};
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Metadata {
        metadata: Value,
    },
    Rows {
        index: usize,
        offset: usize,
        /// Row objects, or column arrays for the columnar format
        data: Value,
    },
    Complete {
        chunks: usize,
        records: usize,
        processing_ms: u64,
    },
}

/// Metadata first, then one frame per `chunk_size` rows starting at `offset`, then completion
pub fn frame_stream(
    response: DataResponse,
    offset: usize,
    chunk_size: usize,
    format: OutputFormat,
) -> impl Stream<Item = StreamFrame> + Send + 'static {
    let chunk_size = chunk_size.max(1);

    async_stream::stream! {
        let total = response.dataset.len();
        let records = total.saturating_sub(offset);
        let page = Page {
            offset,
            chunk_size: Some(chunk_size),
        };

        yield StreamFrame::Metadata {
            metadata: metadata_to_json(&response, page, records),
        };

        let mut chunks = 0;
        let mut start = offset;
        while start < total {
            let (_, data) = dataset_to_json(&response.dataset.slice(start, chunk_size), format);
            yield StreamFrame::Rows {
                index: chunks,
                offset: start,
                data,
            };
            chunks += 1;
            start = start.saturating_add(chunk_size);
        }

        yield StreamFrame::Complete {
            chunks,
            records,
            processing_ms: response.processing_ms,
        };
    }
}

/// Create a chunked streaming response
pub fn chunked_json_stream<S>(
    stream: S,
    compress: bool,
    cache_hit: bool,
) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = StreamFrame> + Send + 'static,
{
    let byte_stream = stream.then(move |frame| async move { serialize_chunk(frame, compress).await });

    let body = Body::from_stream(byte_stream);

    // Frames are compressed individually, so no Content-Encoding on the response
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(X_CACHE, if cache_hit { "HIT" } else { "MISS" })
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serialize a single frame: 4-byte big-endian length, then the JSON payload
async fn serialize_chunk(frame: StreamFrame, compress: bool) -> Result<Bytes, std::io::Error> {
    let buffer = serde_json::to_vec(&frame).map_err(std::io::Error::other)?;

    let payload = if compress { brotli(buffer).await? } else { buffer };

    let length = payload.len() as u32;
    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(length);
    chunk.put_slice(&payload);

    Ok(chunk.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::adaptive_data_service::{RequestPhase, ResultMetadata};
    use crate::domain::resolution::{AggregationMethod, PerformanceMode};
    use crate::domain::timeseries::{Dataset, TimeSeriesRow};
    use async_compression::tokio::bufread::BrotliDecoder;
    use chrono::{TimeDelta, TimeZone, Utc};
    use tokio::io::AsyncReadExt;

    fn response(rows: usize) -> DataResponse {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let dataset = Dataset::new(
            vec!["temp_c".to_string()],
            (0..rows)
                .map(|i| TimeSeriesRow::new(start + TimeDelta::minutes(i as i64), "S1", None, vec![Some(i as f64)]))
                .collect(),
        );
        DataResponse {
            metadata: ResultMetadata {
                aggregation_method: AggregationMethod::Raw,
                performance_tier: PerformanceMode::Fast,
                target_points: 1_500,
                time_range_days: 1.0,
                total_records: dataset.len(),
                loaded_records: dataset.len(),
                extrema_skipped: false,
            },
            dataset,
            cache_origin: None,
            cache_key: "water_quality:S1:1d:x:std.fast.auto.ds.auto".to_string(),
            phases: vec![RequestPhase::Requested, RequestPhase::Responded],
            processing_ms: 1,
            notice: None,
        }
    }

    fn split_frames(mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while bytes.len() >= 4 {
            let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            frames.push(bytes[4..4 + len].to_vec());
            bytes = &bytes[4 + len..];
        }
        frames
    }

    #[tokio::test]
    async fn test_frame_sequence() {
        let frames: Vec<StreamFrame> = frame_stream(response(25), 0, 10, OutputFormat::Rows).collect().await;

        assert_eq!(frames.len(), 5);
        assert!(matches!(frames[0], StreamFrame::Metadata { .. }));
        assert!(matches!(frames[3], StreamFrame::Rows { index: 2, offset: 20, .. }));
        assert_eq!(
            frames[4],
            StreamFrame::Complete {
                chunks: 3,
                records: 25,
                processing_ms: 1
            }
        );
        if let StreamFrame::Rows { data, .. } = &frames[3] {
            assert_eq!(data.as_array().unwrap().len(), 5);
        }
    }

    #[tokio::test]
    async fn test_offset_past_end_yields_no_rows() {
        let frames: Vec<StreamFrame> = frame_stream(response(5), 50, 10, OutputFormat::Columnar).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], StreamFrame::Complete { chunks: 0, records: 0, .. }));
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_a_single_frame() {
        let frames: Vec<StreamFrame> = frame_stream(response(5), 1, usize::MAX, OutputFormat::Rows).collect().await;

        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[1], StreamFrame::Rows { index: 0, offset: 1, .. }));
        assert!(matches!(frames[2], StreamFrame::Complete { chunks: 1, records: 4, .. }));
    }

    #[tokio::test]
    async fn test_wire_format_uncompressed() {
        let stream = frame_stream(response(3), 0, 2, OutputFormat::Rows);
        let http = chunked_json_stream(stream, false, true).unwrap();
        assert_eq!(http.headers()[X_CACHE], "HIT");

        let body = axum::body::to_bytes(http.into_body(), usize::MAX).await.unwrap();
        let frames = split_frames(&body);
        assert_eq!(frames.len(), 4);

        let first: Value = serde_json::from_slice(&frames[0]).unwrap();
        assert_eq!(first["type"], "metadata");
        assert_eq!(first["metadata"]["total_records"], 3);
        let last: Value = serde_json::from_slice(&frames[3]).unwrap();
        assert_eq!(last["type"], "complete");
    }

    #[tokio::test]
    async fn test_wire_format_compressed_per_frame() {
        let stream = frame_stream(response(3), 0, 5, OutputFormat::Rows);
        let http = chunked_json_stream(stream, true, false).unwrap();
        assert!(http.headers().get(header::CONTENT_ENCODING).is_none());

        let body = axum::body::to_bytes(http.into_body(), usize::MAX).await.unwrap();
        let frames = split_frames(&body);
        assert_eq!(frames.len(), 3);

        let mut decoder = BrotliDecoder::new(std::io::Cursor::new(frames[1].clone()));
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain).await.unwrap();
        let rows: Value = serde_json::from_slice(&plain).unwrap();
        assert_eq!(rows["type"], "rows");
        assert_eq!(rows["data"].as_array().unwrap().len(), 3);
    }
}
